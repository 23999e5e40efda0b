//! Objects of a pool under test, all driven through `xe` over ssh.

use crate::exec::ExecError;
use crate::wait::TimeoutError;
use rustc_hash::FxHashMap;
use thiserror::Error;

pub mod host;
pub mod network;
pub mod pool;
pub mod sr;
pub mod vdi;
pub mod vm;

pub use host::Host;
pub use network::Network;
pub use pool::Pool;
pub use sr::Sr;
pub use vdi::Vdi;
pub use vm::{Snapshot, Vm};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("unexpected {what}: '{output}'")]
    Parse { what: String, output: String },
}

impl RemoteError {
    pub(crate) fn parse<T: Into<String>, U: Into<String>>(what: T, output: U) -> Self {
        RemoteError::Parse {
            what: what.into(),
            output: output.into(),
        }
    }

    /// Whether the host couldn't be reached at all.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Exec(e) if e.is_transport())
    }
}

/// Argv of `xe <action> k=v ... [--minimal]`.
pub fn xe_argv(action: &str, args: &[(&str, &str)], minimal: bool) -> Vec<String> {
    let mut argv = Vec::with_capacity(args.len() + 3);
    argv.push("xe".to_string());
    argv.push(action.to_string());
    argv.extend(args.iter().map(|(k, v)| format!("{}={}", k, v)));
    if minimal {
        argv.push("--minimal".to_string());
    }
    argv
}

/// Parses the output of `xe *-param-list`, one `key ( RO)   : value` per line.
pub fn parse_params(output: &str) -> FxHashMap<String, String> {
    let mut params = FxHashMap::default();
    for line in output.lines() {
        let close = match line.find(')') {
            Some(idx) => idx,
            None => continue,
        };
        let value = match line[close + 1..].trim_start().strip_prefix(':') {
            Some(v) => v.trim(),
            None => continue,
        };
        let key = match line[..close].rfind('(') {
            Some(open) => line[..open].trim(),
            None => continue,
        };
        if key.is_empty() {
            continue;
        }
        params.insert(key.to_string(), value.to_string());
    }
    params
}

/// Splits the comma separated output of `--minimal`.
pub fn split_minimal(output: &str) -> Vec<String> {
    output
        .trim()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Host;
    use crate::config::{ExecConfig, WaitConfig};
    use crate::exec::fake::{remote_cmd, FakeRunner};
    use crate::exec::{Executor, RawOutput};
    use std::{sync::Arc, time::Duration};

    /// Words of the remote command in `argv`.
    pub(crate) fn words(argv: &[String]) -> Vec<String> {
        shell_words::split(remote_cmd(argv)).unwrap_or_default()
    }

    /// Host answering every command with `f(words)`.
    pub(crate) fn fake_host<F>(addr: &str, f: F) -> (Host, Arc<FakeRunner>)
    where
        F: Fn(&[String]) -> RawOutput + Send + Sync + 'static,
    {
        let runner = FakeRunner::new(move |argv| f(&words(argv)));
        let exec = Executor::with_runner(ExecConfig::default(), runner.clone());
        let wait = WaitConfig {
            timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(1),
        };
        (Host::new(addr, exec).with_wait_config(wait), runner)
    }

    /// Remote commands run so far, as words.
    pub(crate) fn xe_calls(runner: &FakeRunner) -> Vec<Vec<String>> {
        runner.calls().iter().map(|argv| words(argv)).collect()
    }

    pub(crate) fn has_arg(words: &[String], arg: &str) -> bool {
        words.iter().any(|w| w == arg)
    }
}
