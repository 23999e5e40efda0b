use anyhow::Context;
use env_logger::{Env, TimestampPrecision};
use poolcheck::{
    config::{Config, ExecConfig, MonitorConfig, WaitConfig},
    exec::{CopyOptions, Executor, RemoteCmd, SshOptions, TargetOs},
    monitor::ConsoleMonitor,
    remote::{Host, Vm},
};
use std::{io::Write, os::raw::c_int, path::PathBuf, sync::Arc, time::Duration};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "poolcheck", about = "Drive hosts of a pool under test over ssh.")]
struct Settings {
    /// Username to login hosts under test.
    #[structopt(long, short = "u", default_value = "root")]
    ssh_user: String,
    /// Path to ssh secret key, ssh's default identities are used if not set.
    #[structopt(long, short = "s")]
    ssh_key: Option<PathBuf>,
    /// Ssh connect timeout in seconds.
    #[structopt(long, default_value = "10")]
    connect_timeout: u64,
    /// Verify host keys of hosts under test.
    #[structopt(long)]
    host_key_checks: bool,
    /// Strip the login banner some hosts print on every command.
    #[structopt(long)]
    strip_banner: bool,
    /// Max number of output lines in debug logs.
    #[structopt(long, default_value = "20")]
    max_log_lines: usize,
    /// Delay in seconds between two checks when waiting for something.
    #[structopt(long, default_value = "2")]
    retry_delay: u64,
    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Run a command on a host and exit with its return code.
    Exec {
        #[structopt(long, short = "H")]
        host: String,
        /// Don't fail on non-zero return code.
        #[structopt(long)]
        no_check: bool,
        /// Host runs windows.
        #[structopt(long)]
        windows: bool,
        /// Command, a single argument is passed to the remote shell as is.
        #[structopt(required = true)]
        cmd: Vec<String>,
    },
    /// Copy files to a host, or from it with --reverse.
    Copy {
        #[structopt(long, short = "H")]
        host: String,
        #[structopt(long)]
        reverse: bool,
        src: PathBuf,
        dest: PathBuf,
    },
    /// Wait until a host answers over ssh.
    WaitHost {
        #[structopt(long, short = "H")]
        host: String,
        /// Timeout in seconds.
        #[structopt(long, default_value = "120")]
        timeout: u64,
    },
    /// Log serial consoles of guests until interrupted.
    ConsoleLog {
        #[structopt(long, short = "H")]
        host: String,
        /// Uuid of a guest to log, all running guests of the host if none.
        #[structopt(long = "vm")]
        vms: Vec<String>,
        /// Directory of console logs.
        #[structopt(long, default_value = "console_logs")]
        log_dir: PathBuf,
        /// Seconds between two checks of the guests.
        #[structopt(long, default_value = "3")]
        interval: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::from_args();

    let log_env = Env::new()
        .filter_or("POOLCHECK_LOG", "info")
        .default_write_style_or("auto");
    env_logger::Builder::from_env(log_env)
        .format_timestamp(Some(TimestampPrecision::Seconds))
        .init();

    let mut config = Config {
        exec: ExecConfig {
            ssh_user: settings.ssh_user,
            ssh_key: settings.ssh_key,
            connect_timeout: Duration::from_secs(settings.connect_timeout),
            suppress_host_key_checks: !settings.host_key_checks,
            strip_banner: settings.strip_banner,
            max_log_lines: settings.max_log_lines,
        },
        wait: WaitConfig {
            retry_delay: Duration::from_secs(settings.retry_delay),
            ..Default::default()
        },
        ..Default::default()
    };
    if let Cmd::ConsoleLog {
        log_dir, interval, ..
    } = &settings.cmd
    {
        config.monitor = MonitorConfig {
            log_dir: log_dir.clone(),
            interval: Duration::from_secs(*interval),
            ..Default::default()
        };
    }
    config.check().context("invalid config")?;

    let Config { exec, monitor, wait } = config;
    let exec = Executor::new(exec);
    match settings.cmd {
        Cmd::Exec {
            host,
            no_check,
            windows,
            mut cmd,
        } => {
            let cmd = if cmd.len() == 1 {
                RemoteCmd::Shell(cmd.remove(0))
            } else {
                RemoteCmd::Argv(cmd)
            };
            let opts = SshOptions {
                check: !no_check,
                target_os: if windows {
                    TargetOs::Windows
                } else {
                    TargetOs::Linux
                },
                ..Default::default()
            };
            let res = exec
                .run_remote(&host, cmd, &opts)
                .with_context(|| format!("failed to run command on {}", host))?;
            std::io::stdout().write_all(&res.output)?;
            std::process::exit(res.code)
        }
        Cmd::Copy {
            host,
            reverse,
            src,
            dest,
        } => {
            let opts = CopyOptions {
                reverse,
                ..Default::default()
            };
            exec.copy_file(&host, &src, &dest, &opts)
                .with_context(|| format!("failed to copy {}", src.display()))?;
            Ok(())
        }
        Cmd::WaitHost { host, timeout } => {
            Host::new(host, exec)
                .with_wait_config(wait)
                .wait_until_reachable(Duration::from_secs(timeout))?;
            Ok(())
        }
        Cmd::ConsoleLog { host, vms, .. } => {
            let host = Host::new(host, exec.clone()).with_wait_config(wait);
            console_log(host, vms, ConsoleMonitor::with_executor(monitor, exec))
        }
    }
}

fn console_log(host: Host, vms: Vec<String>, monitor: ConsoleMonitor) -> anyhow::Result<()> {
    use signal_hook::consts::TERM_SIGNALS;
    use signal_hook::iterator::exfiltrator::WithOrigin;
    use signal_hook::iterator::SignalsInfo;

    fn named_signal(sig: c_int) -> String {
        signal_hook::low_level::signal_name(sig)
            .map(|n| format!("{}({})", n, sig))
            .unwrap_or_else(|| sig.to_string())
    }

    // registered before anything is spawned, so nothing is left behind
    let mut signals =
        SignalsInfo::<WithOrigin>::new(TERM_SIGNALS).context("failed to setup signal handler")?;

    let vms = if vms.is_empty() {
        host.vm_uuids(true)
            .with_context(|| format!("failed to list guests of {}", host.addr()))?
    } else {
        vms
    };
    if vms.is_empty() {
        log::warn!("No running guest on {}", host.addr());
    }
    for uuid in vms {
        let vm = Arc::new(Vm::new(uuid.clone(), host.clone()));
        if !monitor.add(vm, None) {
            log::warn!("{} is not running, not logging it", uuid);
        }
    }

    if let Some(info) = signals.into_iter().next() {
        let from = if let Some(p) = info.process {
            format!("(pid: {}, uid: {})", p.pid, p.uid)
        } else {
            "unknown".to_string()
        };
        log::info!("{} recved, from: {}", named_signal(info.signal), from);
    }
    monitor.cleanup();
    log::info!("All done");
    Ok(())
}
