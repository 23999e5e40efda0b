//! Running local processes, either to completion or in background.

use std::{
    io,
    os::unix::prelude::CommandExt,
    process::{Child, Command},
    thread::sleep,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{kill, Signal},
    unistd::{setsid, Pid},
};

/// Exit code and output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub code: i32,
    /// Stdout followed by stderr.
    pub output: Vec<u8>,
}

impl RawOutput {
    pub fn new<T: Into<Vec<u8>>>(code: i32, output: T) -> Self {
        Self {
            code,
            output: output.into(),
        }
    }
}

/// Capability to run processes, the only place the executor touches the os.
pub trait Runner: Send + Sync {
    /// Runs `cmd` to completion.
    fn output(&self, cmd: &mut Command) -> io::Result<RawOutput>;
    /// Spawns `cmd` without waiting for it, stdio must already be set up by the caller.
    fn spawn(&self, cmd: &mut Command) -> io::Result<Box<dyn ProcessHandle>>;
}

/// Handle of a process running in background.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;
    /// Non-blocking exit check.
    fn has_exited(&mut self) -> io::Result<bool>;
    /// Asks the process to exit.
    fn terminate(&mut self) -> io::Result<()>;
    /// Forcibly kills the process.
    fn kill(&mut self) -> io::Result<()>;
    /// Waits at most `timeout` for the process to exit, returns whether it did.
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// Runs processes with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn output(&self, cmd: &mut Command) -> io::Result<RawOutput> {
        let output = cmd.output()?;
        let mut out = output.stdout;
        out.extend(output.stderr);
        // killed by signal
        let code = output.status.code().unwrap_or(-1);
        Ok(RawOutput { code, output: out })
    }

    fn spawn(&self, cmd: &mut Command) -> io::Result<Box<dyn ProcessHandle>> {
        unsafe {
            cmd.pre_exec(|| {
                let _ = setsid();
                Ok(())
            });
        }
        let child = cmd.spawn()?;
        Ok(Box::new(ChildProcess::new(child)))
    }
}

pub struct ChildProcess {
    child: Child,
    exited: bool,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            exited: false,
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        if !self.exited {
            self.exited = self.child.try_wait()?.is_some();
        }
        Ok(self.exited)
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        kill(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        self.child.kill()?;
        self.child.wait()?;
        self.exited = true;
        Ok(())
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        let delta = Duration::from_millis(50);
        let now = Instant::now();
        loop {
            if self.has_exited()? {
                return Ok(true);
            }
            if now.elapsed() >= timeout {
                return Ok(false);
            }
            sleep(delta);
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // reaps it only if it already exited, a running process isn't stopped
        let _ = self.child.try_wait();
    }
}

/// Stops `p` gracefully, killing it if it's still alive after `grace`.
pub fn stop_process(p: &mut dyn ProcessHandle, grace: Duration) -> io::Result<()> {
    p.terminate()?;
    if !p.wait_timeout(grace)? {
        log::debug!("process {} still alive after {:?}, killing", p.pid(), grace);
        p.kill()?;
    }
    Ok(())
}
