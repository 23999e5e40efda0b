use super::{Host, RemoteError, Vdi};

/// Storage repository.
#[derive(Debug, Clone)]
pub struct Sr {
    uuid: String,
    host: Host,
}

impl Sr {
    pub fn new<T: Into<String>>(uuid: T, host: Host) -> Self {
        Self {
            uuid: uuid.into(),
            host,
        }
    }

    /// Creates an sr of type `sr_type` with `host` as its owner.
    ///
    /// `device_config` is passed as `device-config:k=v`.
    pub fn create(
        host: &Host,
        sr_type: &str,
        name: &str,
        device_config: &[(&str, &str)],
        shared: bool,
    ) -> Result<Sr, RemoteError> {
        log::info!("Create {} sr '{}' on {}", sr_type, name, host.addr());
        let host_uuid = host.uuid()?;
        let keys = device_config
            .iter()
            .map(|(k, _)| format!("device-config:{}", k))
            .collect::<Vec<_>>();
        let mut args = vec![
            ("host-uuid", host_uuid.as_str()),
            ("type", sr_type),
            ("name-label", name),
            ("shared", if shared { "true" } else { "false" }),
        ];
        args.extend(keys.iter().zip(device_config).map(|(k, (_, v))| (k.as_str(), *v)));

        let uuid = host.xe("sr-create", &args)?;
        if uuid.is_empty() {
            return Err(RemoteError::parse("sr uuid", uuid));
        }
        Ok(Sr::new(uuid, host.clone()))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn param_get(&self, name: &str) -> Result<String, RemoteError> {
        self.host
            .xe("sr-param-get", &[("uuid", &self.uuid), ("param-name", name)])
    }

    pub fn is_shared(&self) -> Result<bool, RemoteError> {
        Ok(self.param_get("shared")? == "true")
    }

    pub fn scan(&self) -> Result<(), RemoteError> {
        self.host.xe("sr-scan", &[("uuid", &self.uuid)])?;
        Ok(())
    }

    pub fn pbd_uuids(&self) -> Result<Vec<String>, RemoteError> {
        self.host.xe_minimal("pbd-list", &[("sr-uuid", &self.uuid)])
    }

    pub fn plug_pbds(&self) -> Result<(), RemoteError> {
        for pbd in self.pbd_uuids()? {
            self.host.xe("pbd-plug", &[("uuid", &pbd)])?;
        }
        Ok(())
    }

    pub fn unplug_pbds(&self) -> Result<(), RemoteError> {
        for pbd in self.pbd_uuids()? {
            self.host.xe("pbd-unplug", &[("uuid", &pbd)])?;
        }
        Ok(())
    }

    /// Whether the pbd of `host` is currently attached.
    pub fn attached_to_host(&self, host: &Host) -> Result<bool, RemoteError> {
        let host_uuid = host.uuid()?;
        let attached = self.host.xe_minimal(
            "pbd-list",
            &[
                ("sr-uuid", &self.uuid),
                ("host-uuid", &host_uuid),
                ("params", "currently-attached"),
            ],
        )?;
        Ok(attached.iter().any(|a| a == "true"))
    }

    pub fn create_vdi(&self, name: &str, virtual_size: u64) -> Result<Vdi, RemoteError> {
        let size = virtual_size.to_string();
        let uuid = self.host.xe(
            "vdi-create",
            &[
                ("sr-uuid", &self.uuid),
                ("name-label", name),
                ("virtual-size", &size),
            ],
        )?;
        if uuid.is_empty() {
            return Err(RemoteError::parse("vdi uuid", uuid));
        }
        Ok(Vdi::new(uuid, self.host.clone()))
    }

    pub fn vdi_uuids(&self) -> Result<Vec<String>, RemoteError> {
        self.host.xe_minimal("vdi-list", &[("sr-uuid", &self.uuid)])
    }

    /// Detaches the sr and forgets it, its content is left untouched.
    pub fn forget(&self) -> Result<(), RemoteError> {
        log::info!("Forget sr {}", self.uuid);
        self.unplug_pbds()?;
        self.host.xe("sr-forget", &[("uuid", &self.uuid)])?;
        Ok(())
    }

    /// Detaches the sr and destroys its content.
    pub fn destroy(&self) -> Result<(), RemoteError> {
        log::info!("Destroy sr {}", self.uuid);
        self.unplug_pbds()?;
        self.host.xe("sr-destroy", &[("uuid", &self.uuid)])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RawOutput;
    use crate::remote::testing::{fake_host, has_arg, xe_calls};

    fn sr_host() -> (Host, std::sync::Arc<crate::exec::fake::FakeRunner>) {
        fake_host("10.0.0.1", |w| match w[1].as_str() {
            "host-list" => RawOutput::new(0, "host-1"),
            "sr-create" => RawOutput::new(0, "sr-1\n"),
            "vdi-create" => RawOutput::new(0, "vdi-1\n"),
            "pbd-list" if has_arg(w, "params=currently-attached") => RawOutput::new(0, "true"),
            "pbd-list" => RawOutput::new(0, "pbd-1,pbd-2"),
            "vdi-list" => RawOutput::new(0, "vdi-1,vdi-2"),
            "sr-param-get" => RawOutput::new(0, "false"),
            _ => RawOutput::new(0, ""),
        })
    }

    #[test]
    fn create() {
        let (host, runner) = sr_host();
        let sr = Sr::create(&host, "ext", "local ext", &[("device", "/dev/sdb")], false).unwrap();
        assert_eq!(sr.uuid(), "sr-1");
        let create = &xe_calls(&runner)[1];
        assert_eq!(create[1], "sr-create");
        assert!(has_arg(create, "host-uuid=host-1"));
        assert!(has_arg(create, "type=ext"));
        assert!(has_arg(create, "name-label=local ext"));
        assert!(has_arg(create, "shared=false"));
        assert!(has_arg(create, "device-config:device=/dev/sdb"));
    }

    #[test]
    fn pbds() {
        let (host, runner) = sr_host();
        let sr = Sr::new("sr-1", host.clone());
        sr.plug_pbds().unwrap();
        sr.unplug_pbds().unwrap();
        assert!(sr.attached_to_host(&host).unwrap());

        let calls = xe_calls(&runner);
        let actions = calls.iter().map(|c| c[1].as_str()).collect::<Vec<_>>();
        assert_eq!(
            &actions[..6],
            &["pbd-list", "pbd-plug", "pbd-plug", "pbd-list", "pbd-unplug", "pbd-unplug"]
        );
        assert!(has_arg(&calls[2], "uuid=pbd-2"));
    }

    #[test]
    fn destroy_unplugs_first() {
        let (host, runner) = sr_host();
        Sr::new("sr-1", host.clone()).destroy().unwrap();
        Sr::new("sr-2", host).forget().unwrap();
        let calls = xe_calls(&runner);
        let actions = calls.iter().map(|c| c[1].as_str()).collect::<Vec<_>>();
        assert_eq!(actions[3], "sr-destroy");
        assert_eq!(actions[7], "sr-forget");
        assert!(has_arg(&calls[7], "uuid=sr-2"));
    }

    #[test]
    fn vdis() {
        let (host, runner) = sr_host();
        let sr = Sr::new("sr-1", host);
        assert!(!sr.is_shared().unwrap());
        sr.scan().unwrap();
        let vdi = sr.create_vdi("data", 4096).unwrap();
        assert_eq!(vdi.uuid(), "vdi-1");
        assert_eq!(sr.vdi_uuids().unwrap(), vec!["vdi-1", "vdi-2"]);
        let calls = xe_calls(&runner);
        assert!(has_arg(&calls[2], "virtual-size=4096"));
        assert!(has_arg(&calls[3], "sr-uuid=sr-1"));
    }
}
