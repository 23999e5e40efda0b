//! Scripted runner and processes for tests.

use super::process::{ProcessHandle, RawOutput, Runner};
use std::{
    io,
    process::Command,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

type Handler = Box<dyn Fn(&[String]) -> RawOutput + Send + Sync>;

pub(crate) struct FakeRunner {
    handler: Handler,
    calls: Mutex<Vec<Vec<String>>>,
    spawned: Mutex<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&[String]) -> RawOutput + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn spawned(&self) -> Vec<Vec<String>> {
        self.spawned.lock().unwrap().clone()
    }
}

fn argv(cmd: &Command) -> Vec<String> {
    let mut argv = vec![cmd.get_program().to_string_lossy().into_owned()];
    argv.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    argv
}

/// Command run by ssh, always the last argument.
pub(crate) fn remote_cmd(argv: &[String]) -> &str {
    argv.last().map(|s| s.as_str()).unwrap_or_default()
}

impl Runner for FakeRunner {
    fn output(&self, cmd: &mut Command) -> io::Result<RawOutput> {
        let argv = argv(cmd);
        let out = (self.handler)(&argv);
        self.calls.lock().unwrap().push(argv);
        Ok(out)
    }

    fn spawn(&self, cmd: &mut Command) -> io::Result<Box<dyn ProcessHandle>> {
        self.spawned.lock().unwrap().push(argv(cmd));
        Ok(Box::new(FakeProcess::new(ProcessStats::default())))
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

/// Observable state of a [`FakeProcess`], shared with the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessStats(Arc<StatsInner>);

#[derive(Debug, Default)]
pub(crate) struct StatsInner {
    terminated: AtomicUsize,
    killed: AtomicUsize,
    exited: AtomicBool,
    /// Ignores `terminate`.
    stubborn: AtomicBool,
}

impl ProcessStats {
    pub(crate) fn terminated(&self) -> usize {
        self.0.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn killed(&self) -> usize {
        self.0.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn exited(&self) -> bool {
        self.0.exited.load(Ordering::SeqCst)
    }

    /// Simulates the process dying on its own.
    pub(crate) fn exit(&self) {
        self.0.exited.store(true, Ordering::SeqCst)
    }

    pub(crate) fn set_stubborn(&self) {
        self.0.stubborn.store(true, Ordering::SeqCst)
    }
}

pub(crate) struct FakeProcess {
    pid: u32,
    stats: ProcessStats,
}

impl FakeProcess {
    pub(crate) fn new(stats: ProcessStats) -> Self {
        Self {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            stats,
        }
    }
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.stats.exited())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.stats.0.terminated.fetch_add(1, Ordering::SeqCst);
        if !self.stats.0.stubborn.load(Ordering::SeqCst) {
            self.stats.exit();
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.stats.0.killed.fetch_add(1, Ordering::SeqCst);
        self.stats.exit();
        Ok(())
    }

    fn wait_timeout(&mut self, _timeout: Duration) -> io::Result<bool> {
        Ok(self.stats.exited())
    }
}
