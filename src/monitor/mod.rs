//! Background logging of guest serial consoles.
//!
//! Every tracked entity gets one process streaming its console into a log
//! file. A single reconciliation thread periodically checks each entity and:
//! - drops it once it reached a terminal state,
//! - starts logging once a domain id is available,
//! - restarts logging when the process died or the domain id changed, the
//!   old console then belongs to a domain that doesn't exist anymore.
//!
//! All state lives behind one mutex. Entities are queried without holding it,
//! the results are then applied under the lock, which is also held for every
//! process start and stop, so a process is never started for an entity before
//! its previous one has been stopped.

use crate::config::MonitorConfig;
use crate::exec::{process::stop_process, ExecError, Executor, ProcessHandle};
use crate::remote::RemoteError;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

pub mod entity;

pub use entity::{ConsoleLauncher, Entity, PowerState, XlConsoleLauncher};

#[derive(Debug, Error)]
enum MonitorError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("launch: {0}")]
    Exec(#[from] ExecError),
    #[error("query: {0}")]
    Remote(#[from] RemoteError),
}

/// Console logging of one domain.
struct Session {
    domid: u64,
    log_path: PathBuf,
    process: Box<dyn ProcessHandle>,
}

struct Tracked {
    /// Distinguishes an entity removed and added again while it was queried.
    id: u64,
    entity: Arc<dyn Entity>,
    /// Overrides the entity's own host.
    host: Option<String>,
    /// `None` while the entity is live but nothing is logging it.
    session: Option<Session>,
}

impl Tracked {
    fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| self.entity.host())
    }
}

struct Shared {
    conf: MonitorConfig,
    launcher: Arc<dyn ConsoleLauncher>,
    tracked: Mutex<FxHashMap<String, Tracked>>,
    next_id: AtomicU64,
}

/// Result of querying an entity, the domid is only read for live entities.
struct Status {
    state: PowerState,
    domid: Option<u64>,
}

fn query(entity: &dyn Entity) -> Result<Status, RemoteError> {
    let state = entity.power_state()?;
    let domid = if state.is_terminal() {
        None
    } else {
        entity.domid()?
    };
    Ok(Status { state, domid })
}

struct Worker {
    stop: mpsc::Sender<()>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct ConsoleMonitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // state stays consistent even if a holder panicked
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConsoleMonitor {
    pub fn new(conf: MonitorConfig, launcher: Arc<dyn ConsoleLauncher>) -> Self {
        Self {
            shared: Arc::new(Shared {
                conf,
                launcher,
                tracked: Mutex::new(FxHashMap::default()),
                next_id: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Monitor attaching `xl console` over ssh.
    pub fn with_executor(conf: MonitorConfig, exec: Executor) -> Self {
        Self::new(conf, Arc::new(XlConsoleLauncher::new(exec)))
    }

    /// Starts logging the console of `entity`.
    ///
    /// Returns false if the entity isn't running or has no domain id yet, it's
    /// not tracked then and the caller may retry later.
    pub fn add(&self, entity: Arc<dyn Entity>, host: Option<&str>) -> bool {
        let uuid = entity.uuid().to_string();
        if lock(&self.shared.tracked).contains_key(&uuid) {
            return true;
        }

        let domid = match query(entity.as_ref()) {
            Ok(Status {
                state: PowerState::Running,
                domid: Some(domid),
            }) => domid,
            Ok(Status {
                state: PowerState::Running,
                domid: None,
            }) => {
                log::debug!("console monitor: {} has no domid yet", uuid);
                return false;
            }
            Ok(Status { state, .. }) => {
                log::debug!("console monitor: {} is {:?}, not logging", uuid, state);
                return false;
            }
            Err(e) => {
                log::warn!("console monitor: failed to query {}: {}", uuid, e);
                return false;
            }
        };

        let mut tracked = lock(&self.shared.tracked);
        // added concurrently while querying
        if tracked.contains_key(&uuid) {
            return true;
        }
        let mut t = Tracked {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            entity,
            host: host.map(|h| h.to_string()),
            session: None,
        };
        t.session = self.shared.start_session(&uuid, &t, domid);
        tracked.insert(uuid, t);
        drop(tracked);

        self.start_monitoring();
        true
    }

    /// Stops logging `uuid`, no-op if it isn't tracked.
    pub fn remove(&self, uuid: &str) {
        let t = lock(&self.shared.tracked).remove(uuid);
        if let Some(session) = t.and_then(|t| t.session) {
            self.shared.stop_session(uuid, session);
        }
    }

    /// Spawns the reconciliation thread if it isn't running yet.
    pub fn start_monitoring(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("console-monitor".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(shared.conf.interval) {
                        Err(RecvTimeoutError::Timeout) => shared.tick(),
                        // stop requested or monitor gone
                        _ => break,
                    }
                }
                let _ = done_tx.send(());
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(Worker {
                    stop: stop_tx,
                    done: done_rx,
                    handle,
                })
            }
            Err(e) => log::warn!("console monitor: failed to spawn thread: {}", e),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Runs one reconciliation pass over all tracked entities.
    pub fn tick(&self) {
        self.shared.tick()
    }

    /// Uuids of currently tracked entities.
    pub fn logged_entities(&self) -> FxHashSet<String> {
        lock(&self.shared.tracked).keys().cloned().collect()
    }

    /// Log file of the running logging process of `uuid`.
    pub fn log_path(&self, uuid: &str) -> Option<PathBuf> {
        lock(&self.shared.tracked)
            .get(uuid)
            .and_then(|t| t.session.as_ref())
            .map(|s| s.log_path.clone())
    }

    /// Stops the reconciliation thread, then stops logging everything.
    pub fn cleanup(&self) {
        let worker = lock(&self.worker).take();
        if let Some(Worker { stop, done, handle }) = worker {
            let _ = stop.send(());
            match done.recv_timeout(self.shared.conf.join_timeout) {
                Err(RecvTimeoutError::Timeout) => log::warn!(
                    "console monitor: thread did not stop within {:?}",
                    self.shared.conf.join_timeout
                ),
                _ => {
                    let _ = handle.join();
                }
            }
        }

        let tracked = lock(&self.shared.tracked).drain().collect::<Vec<_>>();
        for (uuid, t) in tracked {
            if let Some(session) = t.session {
                self.shared.stop_session(&uuid, session);
            }
        }
    }
}

impl Drop for ConsoleMonitor {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl Shared {
    fn tick(&self) {
        let snapshot = lock(&self.tracked)
            .iter()
            .map(|(uuid, t)| (uuid.clone(), t.id, Arc::clone(&t.entity)))
            .collect::<Vec<_>>();
        for (uuid, id, entity) in snapshot {
            // remote queries may take long, never block callers on them
            let status = query(entity.as_ref());

            let mut tracked = lock(&self.tracked);
            // removed, or removed and added again, since the snapshot
            let t = match tracked.get_mut(&uuid) {
                Some(t) if t.id == id => t,
                _ => continue,
            };
            let res = status
                .map_err(MonitorError::from)
                .and_then(|status| self.reconcile(&uuid, t, status));
            match res {
                Ok(true) => (),
                Ok(false) => {
                    tracked.remove(&uuid);
                }
                Err(e) => log::warn!("console monitor: failed to reconcile {}: {}", uuid, e),
            }
        }
    }

    /// Returns whether `t` should stay tracked.
    fn reconcile(
        &self,
        uuid: &str,
        t: &mut Tracked,
        status: Status,
    ) -> Result<bool, MonitorError> {
        let Status { state, domid } = status;
        if state.is_terminal() {
            log::info!("console monitor: {} is {:?}, stop logging", uuid, state);
            if let Some(session) = t.session.take() {
                self.stop_session(uuid, session);
            }
            return Ok(false);
        }

        let exited = match t.session.as_mut() {
            Some(s) => s.process.has_exited()?,
            None => false,
        };
        let restart = match t.session.as_ref().map(|s| s.domid) {
            None => domid.is_some(),
            Some(old) if exited => {
                log::info!(
                    "console monitor: logging of {} (domid {}) exited unexpectedly",
                    uuid,
                    old
                );
                true
            }
            Some(old) if domid != Some(old) => {
                log::info!(
                    "console monitor: domid of {} changed: {} -> {:?}",
                    uuid,
                    old,
                    domid
                );
                true
            }
            Some(_) => false,
        };

        if restart {
            if let Some(session) = t.session.take() {
                self.stop_session(uuid, session);
            }
            if let Some(domid) = domid {
                t.session = self.start_session(uuid, t, domid);
            }
        }
        Ok(true)
    }

    fn start_session(&self, uuid: &str, t: &Tracked, domid: u64) -> Option<Session> {
        match self.try_start_session(uuid, t, domid) {
            Ok(session) => {
                log::info!(
                    "console monitor: logging {} (domid {}) to {}",
                    uuid,
                    domid,
                    session.log_path.display()
                );
                Some(session)
            }
            Err(e) => {
                log::warn!(
                    "console monitor: failed to start logging {} (domid {}): {}",
                    uuid,
                    domid,
                    e
                );
                None
            }
        }
    }

    fn try_start_session(
        &self,
        uuid: &str,
        t: &Tracked,
        domid: u64,
    ) -> Result<Session, MonitorError> {
        let host = t.host();
        fs::create_dir_all(&self.conf.log_dir)?;
        let log_path = self.conf.log_dir.join(log_name(&host, uuid));
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let process = match self.launcher.launch(&host, domid, log) {
            Ok(p) => p,
            Err(e) => {
                remove_if_empty(&log_path);
                return Err(e.into());
            }
        };
        Ok(Session {
            domid,
            log_path,
            process,
        })
    }

    fn stop_session(&self, uuid: &str, mut session: Session) {
        log::debug!(
            "console monitor: stopping logging of {} (pid {})",
            uuid,
            session.process.pid()
        );
        if let Err(e) = stop_process(session.process.as_mut(), self.conf.stop_grace) {
            log::warn!("console monitor: failed to stop logging {}: {}", uuid, e);
        }
        remove_if_empty(&session.log_path);
    }
}

fn log_name(host: &str, uuid: &str) -> String {
    let now = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    format!("{}_{}_{}.log", host.replace(|c: char| c == ':' || c == '/', "-"), uuid, now)
}

fn remove_if_empty(path: &Path) {
    match fs::metadata(path) {
        Ok(m) if m.len() == 0 => {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("failed to remove empty log {}: {}", path.display(), e);
            }
        }
        Ok(_) => (),
        Err(e) => log::debug!("failed to stat log {}: {}", path.display(), e),
    }
}
