use super::{parse_params, Host, RemoteError};
use crate::monitor::{Entity, PowerState};
use crate::wait::Wait;
use rustc_hash::FxHashMap;
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

/// Guest of a pool.
///
/// The owning host changes on migration, every command is sent to the
/// current one.
#[derive(Debug)]
pub struct Vm {
    uuid: String,
    host: Mutex<Host>,
}

impl Vm {
    pub fn new<T: Into<String>>(uuid: T, host: Host) -> Self {
        Self {
            uuid: uuid.into(),
            host: Mutex::new(host),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    fn lock_host(&self) -> MutexGuard<'_, Host> {
        self.host.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host currently owning the vm.
    pub fn host(&self) -> Host {
        self.lock_host().clone()
    }

    /// Runs `xe <action> uuid=<vm> args...` on the owning host.
    fn xe(&self, action: &str, args: &[(&str, &str)]) -> Result<String, RemoteError> {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(("uuid", self.uuid.as_str()));
        all.extend_from_slice(args);
        self.host().xe(action, &all)
    }

    pub fn param_get(&self, name: &str) -> Result<String, RemoteError> {
        self.xe("vm-param-get", &[("param-name", name)])
    }

    /// All parameters, as listed by `vm-param-list`.
    pub fn params(&self) -> Result<FxHashMap<String, String>, RemoteError> {
        Ok(parse_params(&self.xe("vm-param-list", &[])?))
    }

    pub fn param_set(&self, name: &str, value: &str) -> Result<(), RemoteError> {
        self.xe("vm-param-set", &[(name, value)])?;
        Ok(())
    }

    pub fn power_state(&self) -> Result<PowerState, RemoteError> {
        Ok(PowerState::from(self.param_get("power-state")?.as_str()))
    }

    /// Domain id, `None` if the vm has no domain.
    pub fn domid(&self) -> Result<Option<u64>, RemoteError> {
        let domid = self.param_get("dom-id")?;
        match domid.parse::<i64>() {
            Ok(id) if id >= 0 => Ok(Some(id as u64)),
            Ok(_) => Ok(None),
            Err(_) => Err(RemoteError::parse(format!("dom-id of vm {}", self.uuid), domid)),
        }
    }

    pub fn is_running(&self) -> Result<bool, RemoteError> {
        Ok(self.power_state()? == PowerState::Running)
    }

    /// Starts the vm, on `on` if given.
    pub fn start(&self, on: Option<&Host>) -> Result<(), RemoteError> {
        log::info!("Start vm {}", self.uuid);
        match on {
            Some(host) => {
                let host_uuid = host.uuid()?;
                self.xe("vm-start", &[("on", &host_uuid)])?;
                *self.lock_host() = host.clone();
            }
            None => {
                self.xe("vm-start", &[])?;
            }
        }
        Ok(())
    }

    pub fn shutdown(&self, force: bool) -> Result<(), RemoteError> {
        log::info!("Shutdown vm {}", self.uuid);
        if force {
            self.xe("vm-shutdown", &[("force", "true")])?;
        } else {
            self.xe("vm-shutdown", &[])?;
        }
        Ok(())
    }

    pub fn reboot(&self, force: bool) -> Result<(), RemoteError> {
        log::info!("Reboot vm {}", self.uuid);
        if force {
            self.xe("vm-reboot", &[("force", "true")])?;
        } else {
            self.xe("vm-reboot", &[])?;
        }
        Ok(())
    }

    fn wait_for_state(&self, state: PowerState, timeout: Duration) -> Result<(), RemoteError> {
        let host = self.host();
        Wait::from_config(host.wait_config())
            .message(format!("Wait for vm {} to be {:?}", self.uuid, state))
            .timeout(timeout)
            .try_until(|| Ok::<_, RemoteError>(self.power_state()? == state))
    }

    pub fn wait_for_running(&self, timeout: Duration) -> Result<(), RemoteError> {
        self.wait_for_state(PowerState::Running, timeout)
    }

    pub fn wait_for_halted(&self, timeout: Duration) -> Result<(), RemoteError> {
        self.wait_for_state(PowerState::Halted, timeout)
    }

    /// Live migrates the vm to `dest`, which owns it afterwards.
    pub fn migrate(&self, dest: &Host) -> Result<(), RemoteError> {
        log::info!("Migrate vm {} to {}", self.uuid, dest.addr());
        let dest_uuid = dest.uuid()?;
        self.xe("vm-migrate", &[("host-uuid", &dest_uuid), ("live", "true")])?;
        *self.lock_host() = dest.clone();
        Ok(())
    }

    pub fn snapshot(&self, name: &str) -> Result<Snapshot, RemoteError> {
        log::info!("Snapshot vm {} as '{}'", self.uuid, name);
        let uuid = self.xe("vm-snapshot", &[("new-name-label", name)])?;
        if uuid.is_empty() {
            return Err(RemoteError::parse("snapshot uuid", uuid));
        }
        Ok(Snapshot::new(uuid, self.host()))
    }

    pub fn clone_vm(&self, name: &str) -> Result<Vm, RemoteError> {
        log::info!("Clone vm {} as '{}'", self.uuid, name);
        let uuid = self.xe("vm-clone", &[("new-name-label", name)])?;
        if uuid.is_empty() {
            return Err(RemoteError::parse("clone uuid", uuid));
        }
        Ok(Vm::new(uuid, self.host()))
    }

    /// Uninstalls the vm along with its disks.
    pub fn destroy(&self) -> Result<(), RemoteError> {
        log::info!("Destroy vm {}", self.uuid);
        self.xe("vm-uninstall", &[("force", "true")])?;
        Ok(())
    }

    pub fn vdi_uuids(&self) -> Result<Vec<String>, RemoteError> {
        let vdis = self.host().xe_minimal(
            "vbd-list",
            &[
                ("vm-uuid", &self.uuid),
                ("type", "Disk"),
                ("params", "vdi-uuid"),
            ],
        )?;
        // empty drives
        Ok(vdis
            .into_iter()
            .filter(|v| v != "<not in database>")
            .collect())
    }
}

impl Entity for Vm {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn host(&self) -> String {
        self.lock_host().addr().to_string()
    }

    fn power_state(&self) -> Result<PowerState, RemoteError> {
        Vm::power_state(self)
    }

    fn domid(&self) -> Result<Option<u64>, RemoteError> {
        Vm::domid(self)
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    uuid: String,
    host: Host,
}

impl Snapshot {
    pub fn new<T: Into<String>>(uuid: T, host: Host) -> Self {
        Self {
            uuid: uuid.into(),
            host,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn revert(&self) -> Result<(), RemoteError> {
        log::info!("Revert to snapshot {}", self.uuid);
        self.host
            .xe("snapshot-revert", &[("snapshot-uuid", &self.uuid)])?;
        Ok(())
    }

    pub fn destroy(&self) -> Result<(), RemoteError> {
        log::info!("Destroy snapshot {}", self.uuid);
        self.host.xe(
            "snapshot-uninstall",
            &[("snapshot-uuid", &self.uuid), ("force", "true")],
        )?;
        Ok(())
    }
}
