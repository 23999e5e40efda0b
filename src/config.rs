use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Configuration of remote command execution.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Username to login hosts under test.
    pub ssh_user: String,
    /// Path to ssh secret key, ssh's own default is used if not set.
    pub ssh_key: Option<PathBuf>,
    /// Ssh connect timeout.
    pub connect_timeout: Duration,
    /// Default for disabling host key verification.
    pub suppress_host_key_checks: bool,
    /// Some hosts print a login banner on every command, strip it from the output.
    pub strip_banner: bool,
    /// Max number of output lines in debug logs.
    pub max_log_lines: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            ssh_key: None,
            connect_timeout: Duration::from_secs(10),
            suppress_host_key_checks: true,
            strip_banner: false,
            max_log_lines: 20,
        }
    }
}

/// Configuration of the serial console monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Directory of console logs.
    pub log_dir: PathBuf,
    /// Delay between two reconciliation ticks.
    pub interval: Duration,
    /// How long `cleanup` waits for the reconciliation thread.
    pub join_timeout: Duration,
    /// How long a logging process is given to exit before being killed.
    pub stop_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("console_logs"),
            interval: Duration::from_secs(3),
            join_timeout: Duration::from_secs(2),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Defaults of condition waiting.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub exec: ExecConfig,
    pub monitor: MonitorConfig,
    pub wait: WaitConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("empty ssh username")]
    EmptySshUser,
    #[error("invalid ssh key path: {0}")]
    InvalidKeyPath(String),
    #[error("invalid max log lines '{0}': should be at least 2")]
    InvalidMaxLogLines(usize),
    #[error("invalid duration for '{name}': {reason}")]
    InvalidDuration { name: &'static str, reason: String },
    #[error("log dir '{0}' exists and is not a directory")]
    InvalidLogDir(String),
}

fn check_positive(name: &'static str, d: Duration) -> Result<(), ConfigError> {
    if d == Duration::from_secs(0) {
        Err(ConfigError::InvalidDuration {
            name,
            reason: "should be positive".to_string(),
        })
    } else {
        Ok(())
    }
}

impl ExecConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.ssh_user.is_empty() {
            return Err(ConfigError::EmptySshUser);
        }
        if let Some(key) = self.ssh_key.as_ref() {
            if !key.is_file() {
                return Err(ConfigError::InvalidKeyPath(
                    key.to_string_lossy().into_owned(),
                ));
            }
        }
        // one line of output plus the elision marker
        if self.max_log_lines < 2 {
            return Err(ConfigError::InvalidMaxLogLines(self.max_log_lines));
        }
        check_positive("connect_timeout", self.connect_timeout)
    }
}

impl MonitorConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.log_dir.exists() && !self.log_dir.is_dir() {
            return Err(ConfigError::InvalidLogDir(
                self.log_dir.to_string_lossy().into_owned(),
            ));
        }
        check_positive("interval", self.interval)?;
        check_positive("join_timeout", self.join_timeout)?;
        check_positive("stop_grace", self.stop_grace)
    }
}

impl WaitConfig {
    pub fn check(&self) -> Result<(), ConfigError> {
        check_positive("timeout", self.timeout)?;
        check_positive("retry_delay", self.retry_delay)
    }
}

impl Config {
    pub fn check(&self) -> Result<(), ConfigError> {
        self.exec.check()?;
        self.monitor.check()?;
        self.wait.check()
    }
}
