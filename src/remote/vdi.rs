use super::{Host, RemoteError};

/// Virtual disk image.
#[derive(Debug, Clone)]
pub struct Vdi {
    uuid: String,
    host: Host,
}

impl Vdi {
    pub fn new<T: Into<String>>(uuid: T, host: Host) -> Self {
        Self {
            uuid: uuid.into(),
            host,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn param_get(&self, name: &str) -> Result<String, RemoteError> {
        self.host
            .xe("vdi-param-get", &[("uuid", &self.uuid), ("param-name", name)])
    }

    pub fn name(&self) -> Result<String, RemoteError> {
        self.param_get("name-label")
    }

    /// Size in bytes.
    pub fn virtual_size(&self) -> Result<u64, RemoteError> {
        let size = self.param_get("virtual-size")?;
        size.parse()
            .map_err(|_| RemoteError::parse(format!("virtual-size of vdi {}", self.uuid), size))
    }

    pub fn destroy(&self) -> Result<(), RemoteError> {
        log::info!("Destroy vdi {}", self.uuid);
        self.host.xe("vdi-destroy", &[("uuid", &self.uuid)])?;
        Ok(())
    }
}
