//! Argus - network reachability monitor with Web Push notifications.

mod config;
mod error;
mod monitor;
mod probe;
mod push;
mod scheduler;
mod systemd;
mod web;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::MonitorConfig;
use monitor::MonitorRegistry;
use push::PushManager;
use web::Server;

#[derive(Debug, Parser)]
#[command(
    name = "argus",
    version,
    about = "Argus network reachability monitor",
    after_help = "systemd mode is detected automatically when NOTIFY_SOCKET is set"
)]
struct Cli {
    /// Run as daemon (detach from terminal)
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Run in systemd mode (no fork, readiness notification)
    #[arg(short = 's', long)]
    systemd: bool,

    /// Log to the given file (overrides the config setting)
    #[arg(short = 'l', long = "log-file", value_name = "path")]
    log_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(value_name = "config.json")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let systemd_mode = cli.systemd || systemd::is_systemd_service();
    let daemon_mode = cli.daemon && !systemd_mode;

    let mut config = match MonitorConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading config {}: {e}", cli.config.display());
            return ExitCode::from(1);
        }
    };

    let log_file = cli
        .log_file
        .or_else(|| config.log_file.clone().map(PathBuf::from))
        .map(absolutize);

    // The daemon chdirs to /, so anchor configured paths first.
    if daemon_mode {
        config.push.subscriptions_file = absolutize(config.push.subscriptions_file.into())
            .display()
            .to_string();
        config.push.suppressions_file = absolutize(config.push.suppressions_file.into())
            .display()
            .to_string();
        config.html_template = config
            .html_template
            .map(|p| absolutize(p.into()).display().to_string());
        config.static_dir = config
            .static_dir
            .map(|p| absolutize(p.into()).display().to_string());

        if let Err(e) = daemonize() {
            eprintln!("failed to daemonize: {e}");
            return ExitCode::from(1);
        }
    }

    init_logging(log_file.as_deref());

    tracing::info!(
        "starting Argus Monitor version {} (PID: {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );
    if systemd_mode {
        tracing::info!("running in systemd mode");
    }

    let config = Arc::new(config);
    tracing::info!("configuration loaded: {}", config.name);

    let push = Arc::new(PushManager::new(config.push.clone()));
    push.load();

    let registry = MonitorRegistry::new(&config, push.clone());
    registry.start();

    if let Some(interval) = systemd::watchdog_interval() {
        tracing::info!("systemd watchdog pings every {interval:?}");
        registry.schedule_repeating(interval, systemd::notify_watchdog);
    }

    let server = match Server::new(config.clone(), registry.clone(), push.clone()) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("failed to initialize web server: {e}");
            registry.stop();
            return ExitCode::from(1);
        }
    };

    if systemd_mode {
        systemd::notify_ready();
    }

    let result = serve(server);

    registry.stop();
    push.save_all();

    match result {
        Ok(()) => {
            tracing::info!("Argus Monitor shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("error running Argus Monitor: {e}");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn serve(server: Server) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    server.start().await
}

fn init_logging(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("argus=info"));

    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("cannot open log file {}: {e}", path.display()))
            .ok()
    });

    match file {
        Some(file) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                )
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer())
                .with(filter)
                .init();
        }
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

/// Classic double-fork daemonization: detach from the controlling
/// terminal, become a session leader, and point stdio at /dev/null.
fn daemonize() -> std::io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error());
        }

        libc::signal(libc::SIGHUP, libc::SIG_IGN);

        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::chdir(c"/".as_ptr()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::umask(0);

        let fd = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::dup2(fd, libc::STDIN_FILENO);
        libc::dup2(fd, libc::STDOUT_FILENO);
        libc::dup2(fd, libc::STDERR_FILENO);
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }

    Ok(())
}
