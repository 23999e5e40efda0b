use super::{Host, RemoteError};

#[derive(Debug, Clone)]
pub struct Network {
    uuid: String,
    host: Host,
}

impl Network {
    pub fn new<T: Into<String>>(uuid: T, host: Host) -> Self {
        Self {
            uuid: uuid.into(),
            host,
        }
    }

    /// Creates an internal network named `name`.
    pub fn create(host: &Host, name: &str) -> Result<Network, RemoteError> {
        log::info!("Create network '{}'", name);
        let uuid = host.xe("network-create", &[("name-label", name)])?;
        if uuid.is_empty() {
            return Err(RemoteError::parse("network uuid", uuid));
        }
        Ok(Network::new(uuid, host.clone()))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn param_get(&self, name: &str) -> Result<String, RemoteError> {
        self.host
            .xe("network-param-get", &[("uuid", &self.uuid), ("param-name", name)])
    }

    /// Name of the bridge backing the network on the hosts.
    pub fn bridge(&self) -> Result<String, RemoteError> {
        self.param_get("bridge")
    }

    pub fn pif_uuids(&self) -> Result<Vec<String>, RemoteError> {
        self.host
            .xe_minimal("pif-list", &[("network-uuid", &self.uuid)])
    }

    pub fn destroy(&self) -> Result<(), RemoteError> {
        log::info!("Destroy network {}", self.uuid);
        self.host.xe("network-destroy", &[("uuid", &self.uuid)])?;
        Ok(())
    }
}
