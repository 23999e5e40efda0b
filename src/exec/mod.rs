//! Executing commands on hosts under test, or locally.
//!
//! Every invocation is logged at debug level with its output elided to
//! [`ExecConfig::max_log_lines`] lines. A return code of [`SSH_TRANSPORT_ERROR`]
//! from ssh always means the connection itself failed and is reported as
//! [`ExecError::Ssh`], no matter what the caller asked for.

use crate::config::ExecConfig;
use std::{
    borrow::Cow,
    fmt,
    fs::File,
    io,
    path::Path,
    process::{Command, Stdio},
    sync::Arc,
};
use thiserror::Error;

#[cfg(test)]
pub(crate) mod fake;
/// Running processes.
pub mod process;
/// Building ssh commands.
pub mod ssh;

pub use process::{ProcessHandle, RawOutput, Runner, SystemRunner};

/// Exit code of ssh when the connection failed.
pub const SSH_TRANSPORT_ERROR: i32 = 255;

/// Marker replacing elided output lines.
pub const ELISION_MARKER: &str = "(...)";

/// Os of the remote host, decides how background commands are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Linux,
    Windows,
}

impl Default for TargetOs {
    fn default() -> Self {
        TargetOs::Linux
    }
}

/// Command to run through the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCmd {
    /// Quoted word by word.
    Argv(Vec<String>),
    /// Passed to the remote shell as is.
    Shell(String),
}

impl RemoteCmd {
    pub fn to_shell(&self) -> String {
        match self {
            RemoteCmd::Argv(argv) => shell_words::join(argv),
            RemoteCmd::Shell(s) => s.clone(),
        }
    }
}

impl fmt::Display for RemoteCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

impl From<&str> for RemoteCmd {
    fn from(s: &str) -> Self {
        RemoteCmd::Shell(s.to_string())
    }
}

impl From<String> for RemoteCmd {
    fn from(s: String) -> Self {
        RemoteCmd::Shell(s)
    }
}

impl From<Vec<String>> for RemoteCmd {
    fn from(argv: Vec<String>) -> Self {
        RemoteCmd::Argv(argv)
    }
}

impl From<&[&str]> for RemoteCmd {
    fn from(argv: &[&str]) -> Self {
        RemoteCmd::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RemoteCmd {
    fn from(argv: [&str; N]) -> Self {
        RemoteCmd::from(&argv[..])
    }
}

/// Options of one remote invocation.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Fail on non-zero exit code.
    pub check: bool,
    /// Disable host key verification, `None` means the configured default.
    pub suppress_host_key_checks: Option<bool>,
    pub target_os: TargetOs,
    /// Allocate a tty on the remote side.
    pub force_tty: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            check: true,
            suppress_host_key_checks: None,
            target_os: TargetOs::Linux,
            force_tty: false,
        }
    }
}

impl SshOptions {
    pub fn unchecked() -> Self {
        Self {
            check: false,
            ..Default::default()
        }
    }
}

/// Options of one file copy.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub check: bool,
    pub suppress_host_key_checks: Option<bool>,
    /// Copy from the remote host to local.
    pub reverse: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            check: true,
            suppress_host_key_checks: None,
            reverse: false,
        }
    }
}

/// Return code and output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdResult {
    /// Host the command ran on, `None` for local commands.
    pub host: Option<String>,
    pub code: i32,
    /// Raw output, stdout followed by stderr.
    pub output: Vec<u8>,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    /// Output decoded lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn trimmed(&self) -> String {
        self.text().trim().to_string()
    }
}

/// Result of a background invocation.
pub enum Background {
    /// Command was detached on the remote side, ssh already returned.
    Detached(CmdResult),
    /// Local ssh process still attached to the remote command.
    Process(Box<dyn ProcessHandle>),
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Background::Detached(r) => f.debug_tuple("Detached").field(r).finish(),
            Background::Process(p) => f.debug_tuple("Process").field(&p.pid()).finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    /// Ssh could not reach the host, the command may not have run at all.
    #[error("ssh to '{host}' failed running '{cmd}': {output}")]
    Ssh {
        host: String,
        cmd: String,
        code: i32,
        output: String,
    },
    /// The command ran and exited with non-zero code.
    #[error("'{cmd}' exited with {code}: {output}")]
    Command {
        host: Option<String>,
        cmd: String,
        code: i32,
        output: String,
    },
    #[error("spawn '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ExecError::Ssh { .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExecError::Ssh { code, .. } | ExecError::Command { code, .. } => Some(*code),
            ExecError::Spawn { .. } => None,
        }
    }

    /// Full trimmed output of the failed command.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::Ssh { output, .. } | ExecError::Command { output, .. } => Some(output),
            ExecError::Spawn { .. } => None,
        }
    }
}

/// Keeps the first `max_lines - 1` lines of `text`, followed by [`ELISION_MARKER`].
pub fn elide(text: &str, max_lines: usize) -> Cow<'_, str> {
    let max_lines = max_lines.max(2);
    if text.lines().count() <= max_lines {
        return Cow::Borrowed(text);
    }
    let mut elided = text
        .lines()
        .take(max_lines - 1)
        .collect::<Vec<_>>()
        .join("\n");
    elided.push('\n');
    elided.push_str(ELISION_MARKER);
    Cow::Owned(elided)
}

fn cmd_string(cmd: &Command) -> String {
    let mut argv = vec![cmd.get_program().to_string_lossy().into_owned()];
    argv.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    argv.join(" ")
}

#[derive(Clone)]
pub struct Executor {
    conf: Arc<ExecConfig>,
    runner: Arc<dyn Runner>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("conf", &self.conf).finish()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

impl Executor {
    pub fn new(conf: ExecConfig) -> Self {
        Self::with_runner(conf, Arc::new(SystemRunner))
    }

    pub fn with_runner(conf: ExecConfig, runner: Arc<dyn Runner>) -> Self {
        Self {
            conf: Arc::new(conf),
            runner,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.conf
    }

    /// Runs `cmd` on `host`, fails on non-zero exit code, returns trimmed output.
    pub fn ssh<C: Into<RemoteCmd>>(&self, host: &str, cmd: C) -> Result<String, ExecError> {
        self.run_remote(host, cmd, &SshOptions::default())
            .map(|r| r.trimmed())
    }

    /// Runs `cmd` on `host`, only transport failures are errors.
    pub fn ssh_with_result<C: Into<RemoteCmd>>(
        &self,
        host: &str,
        cmd: C,
    ) -> Result<CmdResult, ExecError> {
        self.run_remote(host, cmd, &SshOptions::unchecked())
    }

    pub fn run_remote<C: Into<RemoteCmd>>(
        &self,
        host: &str,
        cmd: C,
        opts: &SshOptions,
    ) -> Result<CmdResult, ExecError> {
        let cmd = cmd.into().to_shell();
        self.run_remote_inner(host, cmd, opts)
    }

    /// Launches `cmd` on `host` without waiting for it to finish.
    ///
    /// Linux targets detach the command with `nohup` so it outlives the ssh
    /// session. That doesn't work on Windows targets, the ssh process is
    /// spawned and returned instead.
    pub fn run_remote_background<C: Into<RemoteCmd>>(
        &self,
        host: &str,
        cmd: C,
        opts: &SshOptions,
    ) -> Result<Background, ExecError> {
        let cmd = cmd.into().to_shell();
        match opts.target_os {
            TargetOs::Linux => {
                // one word, so compound commands are detached as a whole
                let detached = format!(
                    "nohup sh -c {} > /dev/null 2>&1 < /dev/null &",
                    shell_words::quote(&cmd)
                );
                self.run_remote_inner(host, detached, opts)
                    .map(Background::Detached)
            }
            TargetOs::Windows => {
                let mut ssh_cmd = self.ssh_cmd(host, opts);
                ssh_cmd
                    .arg(&cmd)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
                self.spawn(host, ssh_cmd).map(Background::Process)
            }
        }
    }

    /// Spawns `cmd` on `host` with its output redirected to `log`.
    pub fn spawn_remote<C: Into<RemoteCmd>>(
        &self,
        host: &str,
        cmd: C,
        opts: &SshOptions,
        log: File,
    ) -> Result<Box<dyn ProcessHandle>, ExecError> {
        let cmd = cmd.into().to_shell();
        let stderr = log.try_clone().map_err(|e| ExecError::Spawn {
            cmd: cmd.clone(),
            source: e,
        })?;
        let mut ssh_cmd = self.ssh_cmd(host, opts);
        ssh_cmd
            .arg(&cmd)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(stderr);
        self.spawn(host, ssh_cmd)
    }

    pub fn run_local<S: AsRef<str>>(&self, argv: &[S], check: bool) -> Result<CmdResult, ExecError> {
        let argv = argv.iter().map(|a| a.as_ref()).collect::<Vec<_>>();
        let cmd_str = argv.join(" ");
        let (bin, args) = argv.split_first().ok_or_else(|| ExecError::Spawn {
            cmd: cmd_str.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;
        let mut cmd = Command::new(bin);
        cmd.args(args);
        let raw = self.output(&mut cmd, &cmd_str)?;
        self.log_result(None, &cmd_str, raw.code, &raw.output);
        classify(None, cmd_str, raw, check)
    }

    pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        host: &str,
        src: P,
        dest: Q,
        opts: &CopyOptions,
    ) -> Result<CmdResult, ExecError> {
        let suppress = opts
            .suppress_host_key_checks
            .unwrap_or(self.conf.suppress_host_key_checks);
        let mut scp_cmd = ssh::build_scp_cmd(
            &self.conf,
            host,
            src.as_ref(),
            dest.as_ref(),
            suppress,
            opts.reverse,
        );
        let cmd_str = cmd_string(&scp_cmd);
        let raw = self.output(&mut scp_cmd, &cmd_str)?;
        self.log_result(Some(host), &cmd_str, raw.code, &raw.output);
        classify(Some(host), cmd_str, raw, opts.check)
    }

    fn run_remote_inner(
        &self,
        host: &str,
        cmd: String,
        opts: &SshOptions,
    ) -> Result<CmdResult, ExecError> {
        let banner = if self.conf.strip_banner {
            let raw = self.raw_ssh(host, "true", opts)?;
            if raw.code == SSH_TRANSPORT_ERROR {
                return classify(Some(host), "true".to_string(), raw, false);
            }
            Some(raw.output)
        } else {
            None
        };

        let mut raw = self.raw_ssh(host, &cmd, opts)?;
        if let Some(banner) = banner {
            if !banner.is_empty() && raw.output.starts_with(&banner) {
                raw.output.drain(..banner.len());
            }
        }
        self.log_result(Some(host), &cmd, raw.code, &raw.output);
        classify(Some(host), cmd, raw, opts.check)
    }

    fn raw_ssh(&self, host: &str, cmd: &str, opts: &SshOptions) -> Result<RawOutput, ExecError> {
        let mut ssh_cmd = self.ssh_cmd(host, opts);
        ssh_cmd.arg(cmd);
        self.output(&mut ssh_cmd, cmd)
    }

    fn ssh_cmd(&self, host: &str, opts: &SshOptions) -> Command {
        let suppress = opts
            .suppress_host_key_checks
            .unwrap_or(self.conf.suppress_host_key_checks);
        ssh::build_ssh_cmd(&self.conf, host, suppress, opts.force_tty)
    }

    fn output(&self, cmd: &mut Command, cmd_str: &str) -> Result<RawOutput, ExecError> {
        self.runner.output(cmd).map_err(|e| ExecError::Spawn {
            cmd: cmd_str.to_string(),
            source: e,
        })
    }

    fn spawn(&self, host: &str, mut cmd: Command) -> Result<Box<dyn ProcessHandle>, ExecError> {
        let cmd_str = cmd_string(&cmd);
        log::debug!("[{}] spawning: {}", host, cmd_str);
        self.runner.spawn(&mut cmd).map_err(|e| ExecError::Spawn {
            cmd: cmd_str,
            source: e,
        })
    }

    fn log_result(&self, host: Option<&str>, cmd: &str, code: i32, output: &[u8]) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let prefix = host.map(|h| format!("[{}] ", h)).unwrap_or_default();
        let code_msg = if code != 0 {
            format!(" - got error code: {}", code)
        } else {
            String::new()
        };
        let output = String::from_utf8_lossy(output);
        log::debug!(
            "{}{}{}\n{}",
            prefix,
            cmd,
            code_msg,
            elide(output.trim_end(), self.conf.max_log_lines)
        );
    }
}

fn classify(
    host: Option<&str>,
    cmd: String,
    raw: RawOutput,
    check: bool,
) -> Result<CmdResult, ExecError> {
    if let Some(host) = host {
        if raw.code == SSH_TRANSPORT_ERROR {
            return Err(ExecError::Ssh {
                host: host.to_string(),
                cmd,
                code: raw.code,
                output: String::from_utf8_lossy(&raw.output).trim().to_string(),
            });
        }
    }
    if check && raw.code != 0 {
        return Err(ExecError::Command {
            host: host.map(|h| h.to_string()),
            cmd,
            code: raw.code,
            output: String::from_utf8_lossy(&raw.output).trim().to_string(),
        });
    }
    Ok(CmdResult {
        host: host.map(|h| h.to_string()),
        code: raw.code,
        output: raw.output,
    })
}
