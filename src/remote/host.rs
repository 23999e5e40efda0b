use super::{split_minimal, xe_argv, RemoteError};
use crate::config::WaitConfig;
use crate::exec::{CmdResult, CopyOptions, Executor, RemoteCmd};
use crate::wait::Wait;
use std::{path::Path, time::Duration};

/// Host of a pool, addressed by ip or hostname.
#[derive(Debug, Clone)]
pub struct Host {
    addr: String,
    exec: Executor,
    wait: WaitConfig,
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Host {}

impl Host {
    pub fn new<T: Into<String>>(addr: T, exec: Executor) -> Self {
        Self {
            addr: addr.into(),
            exec,
            wait: WaitConfig::default(),
        }
    }

    /// Defaults of every wait on this host and objects derived from it.
    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    pub fn wait_config(&self) -> &WaitConfig {
        &self.wait
    }

    /// Same executor and wait defaults, different address.
    pub(crate) fn sibling<T: Into<String>>(&self, addr: T) -> Host {
        Host {
            addr: addr.into(),
            exec: self.exec.clone(),
            wait: self.wait.clone(),
        }
    }

    pub fn ssh<C: Into<RemoteCmd>>(&self, cmd: C) -> Result<String, RemoteError> {
        Ok(self.exec.ssh(&self.addr, cmd)?)
    }

    pub fn ssh_with_result<C: Into<RemoteCmd>>(&self, cmd: C) -> Result<CmdResult, RemoteError> {
        Ok(self.exec.ssh_with_result(&self.addr, cmd)?)
    }

    /// Runs `xe <action> args...`, returns its trimmed output.
    pub fn xe(&self, action: &str, args: &[(&str, &str)]) -> Result<String, RemoteError> {
        self.ssh(xe_argv(action, args, false))
    }

    /// Like [`Host::xe`] with `--minimal`, split on commas.
    pub fn xe_minimal(&self, action: &str, args: &[(&str, &str)]) -> Result<Vec<String>, RemoteError> {
        let out = self.ssh(xe_argv(action, args, true))?;
        Ok(split_minimal(&out))
    }

    pub fn uuid(&self) -> Result<String, RemoteError> {
        let uuids = self.xe_minimal("host-list", &[("address", &self.addr)])?;
        match uuids.as_slice() {
            [uuid] => Ok(uuid.clone()),
            _ => Err(RemoteError::parse(
                format!("uuid of host {}", self.addr),
                uuids.join(","),
            )),
        }
    }

    pub fn param_get(&self, name: &str) -> Result<String, RemoteError> {
        let uuid = self.uuid()?;
        self.xe("host-param-get", &[("uuid", &uuid), ("param-name", name)])
    }

    pub fn is_enabled(&self) -> Result<bool, RemoteError> {
        Ok(self.param_get("enabled")? == "true")
    }

    /// Whether ssh answers at all.
    pub fn is_reachable(&self) -> bool {
        match self.exec.ssh_with_result(&self.addr, "true") {
            Ok(_) => true,
            Err(e) => {
                log::debug!("host {} unreachable: {}", self.addr, e);
                false
            }
        }
    }

    pub fn wait_until_reachable(&self, timeout: Duration) -> Result<(), RemoteError> {
        Wait::from_config(&self.wait)
            .message(format!("Wait for host {} to be reachable", self.addr))
            .timeout(timeout)
            .until(|| self.is_reachable())?;
        Ok(())
    }

    /// Waits until the toolstack answers and reports the host enabled.
    pub fn wait_until_enabled(&self, timeout: Duration) -> Result<(), RemoteError> {
        Wait::from_config(&self.wait)
            .message(format!("Wait for host {} to be enabled", self.addr))
            .timeout(timeout)
            .until(|| match self.is_enabled() {
                Ok(enabled) => enabled,
                // toolstack still starting
                Err(e) => {
                    log::debug!("host {} not ready: {}", self.addr, e);
                    false
                }
            })?;
        Ok(())
    }

    /// Reboots the host and waits until it's back and enabled.
    pub fn reboot(&self) -> Result<(), RemoteError> {
        log::info!("Reboot host {}", self.addr);
        match self.exec.ssh(&self.addr, "reboot") {
            Ok(_) => (),
            // the connection may drop before ssh returns
            Err(e) if e.is_transport() => (),
            Err(e) => return Err(e.into()),
        }
        Wait::from_config(&self.wait)
            .message(format!("Wait for host {} to go down", self.addr))
            .invert()
            .until(|| self.is_reachable())?;
        self.wait_until_reachable(self.wait.timeout)?;
        self.wait_until_enabled(self.wait.timeout)
    }

    /// Guests resident on this host, control domain excluded.
    pub fn vm_uuids(&self, running_only: bool) -> Result<Vec<String>, RemoteError> {
        let uuid = self.uuid()?;
        let mut args = vec![("resident-on", uuid.as_str()), ("is-control-domain", "false")];
        if running_only {
            args.push(("power-state", "running"));
        }
        self.xe_minimal("vm-list", &args)
    }

    pub fn file_exists(&self, path: &str) -> Result<bool, RemoteError> {
        Ok(self.ssh_with_result(["test", "-e", path])?.success())
    }

    /// Copies local `src` to `dest` on the host.
    pub fn scp_to<P: AsRef<Path>, Q: AsRef<Path>>(&self, src: P, dest: Q) -> Result<(), RemoteError> {
        self.exec
            .copy_file(&self.addr, src, dest, &CopyOptions::default())?;
        Ok(())
    }

    /// Copies `src` on the host to local `dest`.
    pub fn scp_from<P: AsRef<Path>, Q: AsRef<Path>>(&self, src: P, dest: Q) -> Result<(), RemoteError> {
        let opts = CopyOptions {
            reverse: true,
            ..Default::default()
        };
        self.exec.copy_file(&self.addr, src, dest, &opts)?;
        Ok(())
    }
}
