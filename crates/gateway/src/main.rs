use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use chrono::Utc;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use hs_bridge::{AvailabilityTracker, PaneDriver, TmuxDriver};
use hs_domain::broadcast::BroadcastKind;
use hs_domain::config::{Config, ConfigSeverity};
use hs_domain::session_event::{Provenance, SessionEvent, Trigger};
use hs_gateway::api;
use hs_gateway::cli::{Cli, Command, ConfigCommand};
use hs_gateway::runtime::{
    Broadcaster, Correlator, Dispatcher, HookActivity, IntentDetector, TranscriptWatcher,
    WorkerSet,
};
use hs_gateway::state::AppState;
use hs_store::queries::{events, sessions};
use hs_store::records::NewEvent;
use hs_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = hs_gateway::cli::load_config(config_path)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = hs_gateway::cli::load_config(config_path)?;
            if !hs_gateway::cli::config::validate(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = hs_gateway::cli::load_config(config_path)?;
            hs_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("headspace {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hs_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Headspace starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Persistence ──────────────────────────────────────────────────
    let store = Arc::new(
        Store::open(&config.database.path).context("opening database")?,
    );
    tracing::info!(path = %config.database.path.display(), "store ready");

    // ── Broadcast fabric ─────────────────────────────────────────────
    let broadcaster = Arc::new(Broadcaster::new(config.broadcast.clone()));
    tracing::info!(
        max_subscribers = config.broadcast.max_subscribers,
        buffer = config.broadcast.buffer_size,
        "broadcaster ready"
    );

    // ── Intent detection ─────────────────────────────────────────────
    let detector =
        IntentDetector::from_config(&config.intent).context("compiling intent patterns")?;

    // ── Inference collaborator ───────────────────────────────────────
    let inference = hs_gateway::runtime::inference::from_config(&config.inference)
        .context("initializing inference client")?;
    match &config.inference.base_url {
        Some(url) => tracing::info!(url = %url, "inference client ready"),
        None => tracing::info!("inference disabled — derived summaries off"),
    }

    // ── Dispatcher (correlator + state machine + locks) ─────────────
    let hook_activity = Arc::new(HookActivity::new());
    let correlator = Correlator::new(config.bridge.claim_window_secs);
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        broadcaster.clone(),
        detector,
        inference,
        correlator,
        hook_activity.clone(),
    ));
    tracing::info!("dispatcher ready");

    // ── Terminal bridge ──────────────────────────────────────────────
    let pane_driver: Arc<dyn PaneDriver> = Arc::new(TmuxDriver::new(Duration::from_millis(
        config.bridge.tmux_timeout_ms,
    )));
    let availability = Arc::new(AvailabilityTracker::new());
    tracing::info!("terminal bridge ready");

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "API bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "API bearer-token auth DISABLED — local dev mode"
                );
                None
            }
        }
    };

    // ── Background workers ───────────────────────────────────────────
    let mut workers = WorkerSet::new();

    // Transcript watcher: tick at the fast-poll period; slow
    // reconciliation cadence is decided inside the watcher.
    let watcher = Arc::new(TranscriptWatcher::new(
        store.clone(),
        dispatcher.clone(),
        broadcaster.clone(),
        config.watcher.clone(),
        hook_activity.clone(),
    ));
    {
        let watcher = watcher.clone();
        workers.spawn(
            "transcript-watcher",
            Duration::from_secs(config.watcher.fast_poll_secs.max(1)),
            move || {
                let watcher = watcher.clone();
                async move { watcher.tick().await }
            },
        );
    }

    // Availability tracker: probe panes, publish changes.
    {
        let store = store.clone();
        let driver = pane_driver.clone();
        let tracker = availability.clone();
        let broadcaster = broadcaster.clone();
        workers.spawn(
            "availability-tracker",
            Duration::from_secs(config.bridge.probe_interval_secs),
            move || {
                let store = store.clone();
                let driver = driver.clone();
                let tracker = tracker.clone();
                let broadcaster = broadcaster.clone();
                async move {
                    probe_availability(&store, driver.as_ref(), &tracker, &broadcaster).await;
                }
            },
        );
    }

    // Session reaper: close sessions unseen past the idle limit.
    {
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        let idle_secs = config.workers.session_idle_secs;
        workers.spawn(
            "session-reaper",
            Duration::from_secs(config.workers.reaper_interval_secs),
            move || {
                let store = store.clone();
                let dispatcher = dispatcher.clone();
                async move { reap_idle_sessions(&store, &dispatcher, idle_secs).await }
            },
        );
    }

    // Subscriber janitor: prune stalled subscribers and idle locks.
    {
        let broadcaster = broadcaster.clone();
        let dispatcher = dispatcher.clone();
        let store = store.clone();
        let tracker = availability.clone();
        workers.spawn(
            "subscriber-janitor",
            Duration::from_secs(config.workers.janitor_interval_secs),
            move || {
                let broadcaster = broadcaster.clone();
                let dispatcher = dispatcher.clone();
                let store = store.clone();
                let tracker = tracker.clone();
                async move {
                    let pruned = broadcaster.prune_stalled();
                    if pruned > 0 {
                        tracing::info!(pruned, "stalled subscribers removed");
                    }
                    dispatcher.locks().prune_idle();
                    if let Ok(live) = store.with_conn(|conn| sessions::list(conn, true)) {
                        let ids: Vec<i64> = live.iter().map(|s| s.id).collect();
                        tracker.retain(&ids);
                    }
                }
            },
        );
    }

    // ── App state ────────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        dispatcher,
        broadcaster: broadcaster.clone(),
        pane_driver,
        availability,
        hook_activity,
        worker_health: workers.health(),
        started_at: Utc::now(),
        api_token_hash,
    };

    // ── Router ───────────────────────────────────────────────────────
    let app = api::router(state.clone())
        .layer(build_cors_layer(&config.server.cors.allowed_origins))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Headspace listening");

    let shutdown_broadcaster = broadcaster.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, closing subscribers");
            shutdown_broadcaster.shutdown();
        })
        .await
        .context("server error")?;

    // Workers stop in reverse start order after the listener unbinds.
    workers.stop_all().await;
    tracing::info!("Headspace stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

/// One availability sweep: probe every active session with a pane and
/// publish `availability_changed` for flips.
async fn probe_availability(
    store: &Store,
    driver: &dyn PaneDriver,
    tracker: &AvailabilityTracker,
    broadcaster: &Broadcaster,
) {
    let sessions_with_panes = match store.with_conn(|conn| sessions::list(conn, true)) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(error = %e, "availability sweep could not list sessions");
            return;
        }
    };

    for session in sessions_with_panes {
        let Some(pane) = session.pane_id.as_deref() else {
            continue;
        };
        let alive = driver.is_alive(pane).await;
        if !tracker.update(session.id, alive) {
            continue;
        }

        let appended = store.with_tx(|tx| {
            events::append(
                tx,
                &NewEvent::new("availability_changed")
                    .project(session.project_id)
                    .session(session.id)
                    .payload(serde_json::json!({ "alive": alive, "pane": pane })),
                Utc::now(),
            )
        });
        if appended.is_ok() {
            broadcaster.publish(
                BroadcastKind::AvailabilityChanged,
                Some(session.project_id),
                Some(session.id),
                serde_json::json!({ "session_id": session.id, "alive": alive }),
            );
        }
    }
}

/// Close sessions unseen for longer than the idle limit.
async fn reap_idle_sessions(store: &Store, dispatcher: &Dispatcher, idle_secs: u64) {
    let cutoff = Utc::now() - chrono::Duration::seconds(idle_secs as i64);
    let idle = match store.with_conn(|conn| sessions::idle_since(conn, cutoff)) {
        Ok(idle) => idle,
        Err(e) => {
            tracing::warn!(error = %e, "reaper could not list sessions");
            return;
        }
    };

    for session in idle {
        tracing::info!(
            session_id = session.id,
            external_id = %session.external_id,
            "reaping idle session"
        );
        let event = SessionEvent::new(session.id, Trigger::SessionEnd, Provenance::System);
        if let Err(e) = dispatcher.dispatch(event).await {
            tracing::warn!(session_id = session.id, error = %e, "reap failed");
        }
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`); the remainder must be digits only so
/// `http://localhost:3000.evil.com` cannot slip through.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    use axum::http::header;

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            let origin_str = origin.to_str().unwrap_or("");
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
