//! PowerDaemon - TCU power-state arbitration daemon
//!
//! CLI entry point for controlling the daemon and submitting transitions.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use powerdaemon::cli::{Cli, Command, OutputFormat, get_log_path};
use powerdaemon::config::Config;
use powerdaemon::daemon::DaemonManager;
use powerdaemon::domain::{ALL_MACHINES, ActivityState, Event, TriggerType};
use powerdaemon::engine::{Engine, SysfsWakeLock};
use powerdaemon::ipc::PowerClient;
use powerdaemon::outcome_log::OutcomeLogger;
use powerdaemon::service::{SimService, SimServiceConfig};
use powerdaemon::trigger::socket::{cleanup_socket, create_listener_at};
use powerdaemon::trigger::{BusTrigger, SocketServer, TextTrigger};

fn setup_logging(verbose: bool, level: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("powerdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        level.parse().unwrap_or(tracing::Level::INFO)
    };
    let log_file = fs::File::create(log_dir.join("powerdaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(cli.verbose, &config.log_level).context("Failed to setup logging")?;

    info!(
        machines = ?config.machines.names,
        socket = %config.socket_path().display(),
        "PowerDaemon loaded config"
    );

    // Dispatch command
    match cli.command {
        Some(Command::Start { foreground }) => cmd_start(&config, foreground).await,
        Some(Command::Stop) => cmd_stop(&config).await,
        Some(Command::Status { format }) => cmd_status(&config, format).await,
        Some(Command::Submit { state, machine }) => cmd_submit(&config, state, &machine).await,
        Some(Command::Queue { format }) => cmd_queue(&config, format).await,
        Some(Command::Ping) => cmd_ping(&config).await,
        Some(Command::Logs { follow, lines }) => cmd_logs(follow, lines).await,
        Some(Command::RunDaemon) => cmd_run_daemon(&config).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Start the daemon
async fn cmd_start(config: &Config, foreground: bool) -> Result<()> {
    let daemon = DaemonManager::new();

    if let Some(pid) = daemon.running_pid() {
        println!("PowerDaemon is already running (PID: {})", pid);
        return Ok(());
    }

    if foreground {
        println!("Starting PowerDaemon in foreground mode...");
        run_daemon(config).await
    } else {
        let pid = daemon.start()?;
        println!("PowerDaemon started (PID: {})", pid);
        Ok(())
    }
}

/// Stop the daemon
async fn cmd_stop(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();

    if !daemon.is_running() {
        println!("PowerDaemon is not running");
        return Ok(());
    }

    // Ask nicely over IPC first so the engine can drain and release its
    // wake hold; fall back to signals
    let client = PowerClient::with_socket_path(config.socket_path());
    if client.socket_exists() && client.shutdown().await.is_ok() {
        let mut attempts = 0;
        while daemon.is_running() && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            attempts += 1;
        }
    }

    if let Some(pid) = daemon.running_pid() {
        daemon.stop()?;
        println!("PowerDaemon stopped (was PID: {})", pid);
    } else {
        daemon.remove_pid_file()?;
        println!("PowerDaemon stopped");
    }
    Ok(())
}

/// Show daemon status
async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let daemon = DaemonManager::new();
    let status = daemon.status();

    let version = if status.running {
        PowerClient::with_socket_path(config.socket_path()).ping().await.ok()
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "pid_file": status.pid_file.to_string_lossy(),
                "version": version,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("{}", "PowerDaemon Status".bold());
            println!("------------------");
            if let Some(pid) = status.pid {
                println!("Status: {}", "running".green());
                println!("PID: {}", pid);
                if let Some(version) = version {
                    println!("Version: {}", version);
                }
            } else {
                println!("Status: {}", "stopped".red());
            }
            println!("PID file: {}", status.pid_file.display());
        }
    }

    Ok(())
}

/// Submit a state transition request
async fn cmd_submit(config: &Config, state: ActivityState, machine: &str) -> Result<()> {
    let client = PowerClient::with_socket_path(config.socket_path());
    let id = client
        .submit(state, machine)
        .await
        .context("Failed to submit transition (is the daemon running?)")?;
    println!("Submitted event {} ({} -> {})", id, machine, state);
    Ok(())
}

/// Show the arbitration queue
async fn cmd_queue(config: &Config, format: OutputFormat) -> Result<()> {
    let client = PowerClient::with_socket_path(config.socket_path());
    let events = client
        .queue()
        .await
        .context("Failed to fetch queue (is the daemon running?)")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        OutputFormat::Text => {
            if events.is_empty() {
                println!("Queue is empty");
                return Ok(());
            }
            println!("{:<6} {:<10} {:<12} {:<8} {}", "ID", "TARGET", "MACHINE", "TRIGGER", "STATUS");
            for event in &events {
                println!(
                    "{:<6} {:<10} {:<12} {:<8} {}",
                    event.id, event.target, event.machine, event.trigger, event.status
                );
            }
        }
    }

    Ok(())
}

/// Ping the daemon
async fn cmd_ping(config: &Config) -> Result<()> {
    let client = PowerClient::with_socket_path(config.socket_path());
    let version = client.ping().await.context("Daemon did not answer")?;
    println!("PowerDaemon is running (version {})", version);
    Ok(())
}

/// Show logs
async fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("The daemon may not have been started yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        // Use tail -f for following
        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        // Read last N lines
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = if all_lines.len() > lines { all_lines.len() - lines } else { 0 };

        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Run as the daemon process (internal command)
async fn cmd_run_daemon(config: &Config) -> Result<()> {
    let daemon = DaemonManager::new();
    daemon.register_self()?;

    let result = run_daemon(config).await;

    if let Err(e) = daemon.remove_pid_file() {
        warn!(error = %e, "Failed to remove PID file on exit");
    }
    result
}

/// Run the daemon main loop
async fn run_daemon(config: &Config) -> Result<()> {
    info!("Daemon starting...");

    // Backend service and engine
    let sim = Arc::new(SimService::new(SimServiceConfig {
        machines: config.machines.names.clone(),
        command_delay: Duration::from_millis(config.service.command_delay_ms),
        ack_delay: Duration::from_millis(config.service.ack_delay_ms),
    }));
    let wake_hold = Arc::new(SysfsWakeLock::new(
        config.wakelock.lock_path.clone(),
        config.wakelock.unlock_path.clone(),
        config.wakelock.tag.clone(),
    ));
    let engine = Engine::new(sim.clone(), wake_hold);

    // Out-of-band service reports feed back into arbitration
    sim.register_ack_observer(engine.clone());
    sim.register_availability_observer(engine.clone());

    // Audit trail for every event outcome
    let _outcome_sub = engine.register_listener(Arc::new(OutcomeLogger), None);

    // Wait for the backend before accepting triggers
    if !sim.wait_ready(Duration::from_secs(5)).await {
        return Err(eyre::eyre!("Activity state service did not become available"));
    }
    info!("Activity state service ready");

    // The unit just booted: bring every machine to full operation
    engine.submit(Event::new(TriggerType::Unknown, ActivityState::Resume, ALL_MACHINES));

    // Trigger sources
    let bus = BusTrigger::new(engine.clone(), config.bus_rules()).context("Invalid bus trigger rules")?;
    let text = TextTrigger::new(engine.clone(), config.text_rules()).context("Invalid text trigger rules")?;

    let socket_path = config.socket_path();
    let (listener, socket_path) = create_listener_at(&socket_path)?;
    let server = SocketServer::new(engine.clone(), bus, text);

    info!("Daemon running");

    // Serve until a shutdown request or a termination signal
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = server.run(listener) => {
                result?;
            }
            _ = sigint.recv() => {
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = server.run(listener) => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received");
            }
        }
    }

    info!("Daemon shutting down...");

    engine.shutdown();
    cleanup_socket(&socket_path);

    Ok(())
}
