//! Building ssh/scp invocations.

use crate::config::ExecConfig;
use std::path::Path;
use std::process::Command;

/// Options that make ssh forget about host keys, test hosts get reinstalled
/// with the same addresses all the time.
const NO_HOST_KEY_CHECKS: [&str; 6] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

fn common_opts(cmd: &mut Command, conf: &ExecConfig, suppress_host_key_checks: bool) {
    cmd.args(&["-o", "BatchMode=yes"])
        .arg("-o")
        .arg(format!("ConnectTimeout={}", conf.connect_timeout.as_secs()));
    if suppress_host_key_checks {
        cmd.args(&NO_HOST_KEY_CHECKS);
    }
    if let Some(key) = conf.ssh_key.as_ref() {
        cmd.args(&["-o", "IdentitiesOnly=yes"]).arg("-i").arg(key);
    }
}

/// `ssh [opts] user@host`, the remote command is appended by the caller.
pub fn build_ssh_cmd(
    conf: &ExecConfig,
    host: &str,
    suppress_host_key_checks: bool,
    force_tty: bool,
) -> Command {
    let mut ssh_cmd = Command::new("ssh");
    common_opts(&mut ssh_cmd, conf, suppress_host_key_checks);
    if force_tty {
        ssh_cmd.arg("-tt");
    }
    ssh_cmd.arg(format!("{}@{}", conf.ssh_user, host));
    ssh_cmd
}

/// `scp [opts] src dest`, `reverse` copies from the remote host to local.
pub fn build_scp_cmd(
    conf: &ExecConfig,
    host: &str,
    src: &Path,
    dest: &Path,
    suppress_host_key_checks: bool,
    reverse: bool,
) -> Command {
    let mut scp_cmd = Command::new("scp");
    common_opts(&mut scp_cmd, conf, suppress_host_key_checks);
    scp_cmd.arg("-r");
    let remote = |p: &Path| format!("{}@{}:{}", conf.ssh_user, host, p.display());
    if reverse {
        scp_cmd.arg(remote(src)).arg(dest);
    } else {
        scp_cmd.arg(src).arg(remote(dest));
    }
    scp_cmd
}
