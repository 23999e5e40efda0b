use crate::exec::{ExecError, Executor, ProcessHandle, SshOptions};
use crate::remote::RemoteError;
use std::fs::File;

/// Coarse state of a guest as reported by its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    Running,
    Halted,
    Suspended,
    Paused,
    Unknown,
}

impl PowerState {
    /// Whether the guest won't come back without an explicit start.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            PowerState::Running | PowerState::Suspended | PowerState::Paused
        )
    }
}

impl From<&str> for PowerState {
    fn from(s: &str) -> Self {
        match s.trim() {
            "running" => PowerState::Running,
            "halted" => PowerState::Halted,
            "suspended" => PowerState::Suspended,
            "paused" => PowerState::Paused,
            _ => PowerState::Unknown,
        }
    }
}

/// Something whose console can be logged.
pub trait Entity: Send + Sync {
    /// Stable identifier, never reused.
    fn uuid(&self) -> &str;
    /// Address of the host currently owning the entity.
    fn host(&self) -> String;
    fn power_state(&self) -> Result<PowerState, RemoteError>;
    /// Domain id, only assigned while running and changes across reboots.
    fn domid(&self) -> Result<Option<u64>, RemoteError>;
}

/// Starts a process streaming the console of domain `domid` into `log`.
pub trait ConsoleLauncher: Send + Sync {
    fn launch(&self, host: &str, domid: u64, log: File)
        -> Result<Box<dyn ProcessHandle>, ExecError>;
}

/// Attaches `xl console` over ssh.
#[derive(Debug, Clone)]
pub struct XlConsoleLauncher {
    exec: Executor,
}

impl XlConsoleLauncher {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }
}

impl ConsoleLauncher for XlConsoleLauncher {
    fn launch(
        &self,
        host: &str,
        domid: u64,
        log: File,
    ) -> Result<Box<dyn ProcessHandle>, ExecError> {
        let domid = domid.to_string();
        // xl refuses to attach without a terminal
        let opts = SshOptions {
            force_tty: true,
            ..Default::default()
        };
        self.exec
            .spawn_remote(host, ["xl", "console", domid.as_str()], &opts, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::exec::fake::{remote_cmd, FakeRunner};
    use crate::exec::RawOutput;

    #[test]
    fn power_states() {
        assert_eq!(PowerState::from("running\n"), PowerState::Running);
        assert_eq!(PowerState::from("halted"), PowerState::Halted);
        assert_eq!(PowerState::from("crashed"), PowerState::Unknown);
        assert!(!PowerState::Running.is_terminal());
        assert!(!PowerState::Paused.is_terminal());
        assert!(!PowerState::Suspended.is_terminal());
        assert!(PowerState::Halted.is_terminal());
        assert!(PowerState::Unknown.is_terminal());
    }

    #[test]
    fn xl_console_over_ssh() {
        let runner = FakeRunner::new(|_| RawOutput::new(0, ""));
        let exec = Executor::with_runner(ExecConfig::default(), runner.clone());
        let log = tempfile::tempfile().unwrap();
        XlConsoleLauncher::new(exec)
            .launch("10.0.0.2", 7, log)
            .unwrap();
        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0].contains(&"-tt".to_string()));
        assert!(spawned[0].contains(&"root@10.0.0.2".to_string()));
        assert_eq!(remote_cmd(&spawned[0]), "xl console 7");
    }
}
