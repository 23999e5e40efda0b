use super::{Host, RemoteError};

/// Pool of hosts, managed through its master.
#[derive(Debug, Clone)]
pub struct Pool {
    master: Host,
}

impl Pool {
    pub fn new(master: Host) -> Self {
        Self { master }
    }

    pub fn master(&self) -> &Host {
        &self.master
    }

    pub fn uuid(&self) -> Result<String, RemoteError> {
        let uuids = self.master.xe_minimal("pool-list", &[])?;
        match uuids.as_slice() {
            [uuid] => Ok(uuid.clone()),
            _ => Err(RemoteError::parse("pool uuid", uuids.join(","))),
        }
    }

    /// All members, master included.
    pub fn hosts(&self) -> Result<Vec<Host>, RemoteError> {
        let addrs = self
            .master
            .xe_minimal("host-list", &[("params", "address")])?;
        Ok(addrs
            .into_iter()
            .map(|addr| {
                if addr == self.master.addr() {
                    self.master.clone()
                } else {
                    self.master.sibling(addr)
                }
            })
            .collect())
    }

    pub fn first_host_that_isnt(&self, host: &Host) -> Result<Option<Host>, RemoteError> {
        Ok(self.hosts()?.into_iter().find(|h| h != host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RawOutput;
    use crate::remote::testing::{fake_host, has_arg, xe_calls};

    fn pool() -> (Pool, std::sync::Arc<crate::exec::fake::FakeRunner>) {
        let (master, runner) = fake_host("10.0.0.1", |w| match w[1].as_str() {
            "pool-list" => RawOutput::new(0, "pool-1\n"),
            "host-list" => RawOutput::new(0, "10.0.0.1,10.0.0.2,10.0.0.3\n"),
            _ => RawOutput::new(1, "unknown command"),
        });
        (Pool::new(master), runner)
    }

    #[test]
    fn members() {
        let (pool, runner) = pool();
        assert_eq!(pool.uuid().unwrap(), "pool-1");
        let hosts = pool.hosts().unwrap();
        let addrs = hosts.iter().map(|h| h.addr()).collect::<Vec<_>>();
        assert_eq!(addrs, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert!(has_arg(&xe_calls(&runner)[1], "params=address"));
    }

    #[test]
    fn other_host() {
        let (pool, _) = pool();
        let other = pool.first_host_that_isnt(pool.master()).unwrap().unwrap();
        assert_eq!(other.addr(), "10.0.0.2");
        let second = pool.hosts().unwrap().remove(1);
        let other = pool.first_host_that_isnt(&second).unwrap().unwrap();
        assert_eq!(other.addr(), "10.0.0.1");
    }

    #[test]
    fn single_host_pool() {
        let (master, _) = fake_host("10.0.0.1", |_| RawOutput::new(0, "10.0.0.1"));
        let pool = Pool::new(master);
        assert!(pool.first_host_that_isnt(pool.master()).unwrap().is_none());
    }
}
