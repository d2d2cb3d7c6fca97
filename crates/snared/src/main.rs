//! snared — the netsnare honeypot daemon.
//!
//! Single binary that assembles the honeypot subsystems:
//! - Protocol listeners (HTTP/HTTPS/SSH/FTP/mail/MySQL)
//! - Detection pipeline (classify → throttle → report)
//! - Backend client with heartbeats and the offline spool
//! - Diagnostics surface on the HTTP listener port
//!
//! # Usage
//!
//! ```text
//! HONEYPOT_ID=hp-1 API_KEY=... API_ENDPOINT=https://backend/api snared run
//! ```
//!
//! All configuration comes from environment variables; `snared config`
//! prints the resolved values.

mod pipeline;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use netsnare_api::DiagState;
use netsnare_protocols::serve::Trackers;
use netsnare_protocols::{ftp, http, imap, mysql, pop3, smtp, ssh, tls};
use netsnare_protocols::ListenerContext;
use netsnare_report::scheduler::{REPLAY_INTERVAL, run_heartbeat_loop, run_replay_loop};
use netsnare_report::{ReportClient, Spool};
use netsnare_throttle::{ThrottleCache, ThrottlePolicy};
use snare_core::{Config, EventSink, ModuleRegistry, ModuleStatus};

/// Grace period for in-flight sessions after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Throttle janitor period.
const JANITOR_INTERVAL: Duration = Duration::from_secs(600);

/// Bruteforce/rapid tracker sweep period.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "snared", about = "netsnare honeypot daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the honeypot. Configuration is read from the environment.
    Run,
    /// Print the resolved configuration as JSON and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Config => {
            let config = Config::from_env();
            let mut value = serde_json::to_value(&config)?;
            if let Some(obj) = value.as_object_mut() {
                obj.insert(
                    "api_key".to_string(),
                    serde_json::Value::String(config.redacted_api_key()),
                );
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Run => {
            let config = Config::from_env();
            let _log_guard = init_tracing(&config.log_dir)?;
            run_daemon(config).await
        }
    }
}

/// Console logging plus a non-blocking daily-rolled JSON log under the
/// log directory.
fn init_tracing(log_dir: &Path) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, "netsnare.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,snared=debug,netsnare=debug".parse().unwrap());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn run_daemon(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    info!(
        honeypot_id = %config.honeypot_id,
        version = snare_core::VERSION,
        offline = config.offline_mode,
        "netsnare daemon starting"
    );

    // ── Delivery path ──────────────────────────────────────────

    let spool = Arc::new(Spool::open(
        &config.spool_path(),
        config.keep_offline_spool,
    )?);
    let client = Arc::new(ReportClient::new(&config, spool)?);
    let throttle = Arc::new(ThrottleCache::new(ThrottlePolicy {
        ttl: config.ip_cache_ttl,
        max_reports_per_ip: config.max_reports_per_ip,
        unique_types_only: config.report_unique_types_only,
    }));

    let (sink, events) = EventSink::channel(1024);
    let modules = ModuleRegistry::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── TLS material ───────────────────────────────────────────

    let tls_material = if config.enable_https {
        match tls::load_or_generate(&config.keys_dir) {
            Ok(material) => Some(material),
            Err(e) => {
                error!(error = %e, "https disabled, certificate setup failed");
                modules.set(ModuleStatus::error("https", config.https_port, e.to_string()));
                None
            }
        }
    } else {
        None
    };
    let tls_fingerprint = tls_material.as_ref().map(|m| m.fingerprint.clone());

    let diag_state = DiagState {
        config: config.clone(),
        client: client.clone(),
        throttle: throttle.clone(),
        modules: modules.clone(),
        started_at: Instant::now(),
        tls_fingerprint,
    };

    // ── Listeners ──────────────────────────────────────────────

    let mut tracker_sets: Vec<Arc<Trackers>> = Vec::new();
    let make_ctx = |tracker_sets: &mut Vec<Arc<Trackers>>| {
        let trackers = Arc::new(Trackers::new(config.scan_duration));
        tracker_sets.push(trackers.clone());
        ListenerContext {
            config: config.clone(),
            sink: sink.clone(),
            trackers,
            shutdown: shutdown_rx.clone(),
        }
    };

    if config.enable_http {
        let ctx = make_ctx(&mut tracker_sets);
        let diag_router = netsnare_api::build_router(diag_state.clone());
        register(
            &modules,
            "http",
            config.http_port,
            http::start(ctx, config.http_port, diag_router).await,
        );
    } else {
        modules.set(ModuleStatus::disabled("http", config.http_port));
    }

    if config.enable_https {
        if let Some(material) = tls_material {
            let ctx = make_ctx(&mut tracker_sets);
            register(
                &modules,
                "https",
                config.https_port,
                http::start_tls(ctx, config.https_port, axum::Router::new(), material).await,
            );
        }
    } else {
        modules.set(ModuleStatus::disabled("https", config.https_port));
    }

    if config.enable_ssh {
        let ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "ssh",
            config.ssh_port,
            ssh::start(ctx, config.ssh_port).await,
        );
    } else {
        modules.set(ModuleStatus::disabled("ssh", config.ssh_port));
    }

    if config.enable_ftp {
        let ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "ftp",
            config.ftp_port,
            ftp::start(ctx, config.ftp_port).await,
        );
    } else {
        modules.set(ModuleStatus::disabled("ftp", config.ftp_port));
    }

    if config.enable_mail {
        // SMTP and submission share one tracker set; POP3 and IMAP get
        // their own.
        let smtp_ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "smtp",
            config.smtp_port,
            smtp::start(smtp_ctx.clone(), config.smtp_port, "smtp").await,
        );
        register(
            &modules,
            "smtp-submission",
            config.smtp_submission_port,
            smtp::start(smtp_ctx, config.smtp_submission_port, "smtp-submission").await,
        );

        let pop3_ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "pop3",
            config.pop3_port,
            pop3::start(pop3_ctx, config.pop3_port).await,
        );

        let imap_ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "imap",
            config.imap_port,
            imap::start(imap_ctx, config.imap_port).await,
        );
    } else {
        modules.set(ModuleStatus::disabled("smtp", config.smtp_port));
        modules.set(ModuleStatus::disabled("smtp-submission", config.smtp_submission_port));
        modules.set(ModuleStatus::disabled("pop3", config.pop3_port));
        modules.set(ModuleStatus::disabled("imap", config.imap_port));
    }

    if config.enable_mysql {
        let ctx = make_ctx(&mut tracker_sets);
        register(
            &modules,
            "mysql",
            config.mysql_port,
            mysql::start(ctx, config.mysql_port).await,
        );
    } else {
        modules.set(ModuleStatus::disabled("mysql", config.mysql_port));
    }

    if !modules.any_running() {
        anyhow::bail!("no listener could start; nothing to do");
    }

    // ── Background tasks ───────────────────────────────────────

    let pipeline_handle = tokio::spawn(pipeline::run_pipeline(
        events,
        throttle.clone(),
        client.clone(),
        config.store_throttled_attacks,
        shutdown_rx.clone(),
    ));

    if config.offline_mode {
        info!("offline mode: heartbeats disabled, reports spool to disk");
    } else {
        tokio::spawn(run_heartbeat_loop(
            client.clone(),
            config.heartbeat_interval,
            shutdown_rx.clone(),
        ));
    }

    tokio::spawn(run_replay_loop(
        client.clone(),
        REPLAY_INTERVAL,
        shutdown_rx.clone(),
    ));

    // Throttle janitor.
    {
        let throttle = throttle.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(JANITOR_INTERVAL) => {
                        throttle.sweep();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // Tracker sweeps.
    {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                        for trackers in &tracker_sets {
                            trackers.auth.sweep();
                            trackers.rapid.sweep();
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    info!("netsnare daemon running");

    // ── Shutdown ───────────────────────────────────────────────

    wait_for_signal().await;
    info!("shutdown signal received");

    shutdown_tx.send(true)?;
    modules.stop_all();

    // Let in-flight sessions and the pipeline drain briefly.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, pipeline_handle).await;

    info!("netsnare daemon stopped");
    Ok(())
}

/// Record a listener start result; a failed bind never aborts the others.
fn register<T>(
    modules: &ModuleRegistry,
    name: &str,
    port: u16,
    result: Result<T, netsnare_protocols::ListenerError>,
) {
    match result {
        Ok(_) => {
            modules.set(ModuleStatus::running(name, port));
        }
        Err(e) => {
            error!(listener = name, port, error = %e, "listener failed to start");
            modules.set(ModuleStatus::error(name, port, e.to_string()));
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    }
}
