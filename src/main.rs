use std::sync::Arc;

use medtrack::clock::{Clock, SystemClock};
use medtrack::config::AppConfig;
use medtrack::doses::{self, DoseStore, MissedDoseSweeper};
use medtrack::notify::{Dispatcher, EmailNotifier, Notifier, PushNotifier};
use medtrack::reminders::{self, ReminderEngine, ReminderStore};
use medtrack::service::AdherenceService;
use medtrack::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("💊 MedTrack v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.port);
    eprintln!("   UTC offset: {}", config.utc_offset);
    eprintln!(
        "   Scheduler: tick {}s, tolerance ±{}s, window ±{}m, dispatch delay {}s",
        config.scheduler.tick_interval.as_secs(),
        config.scheduler.trigger_tolerance.as_secs(),
        config.scheduler.action_window.as_secs() / 60,
        config.scheduler.dispatch_delay.as_secs(),
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.utc_offset));

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        },
    ));
    eprintln!("   Database: {}", config.db_path);

    // ── Notification channels ────────────────────────────────────────────
    let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
    let mut channel_names = Vec::new();

    if let Some(push_config) = config.push.clone() {
        eprintln!("   Push: enabled ({})", push_config.gateway_url);
        channels.push(Arc::new(PushNotifier::new(push_config)));
        channel_names.push("push");
    }
    if let Some(email_config) = config.email.clone() {
        eprintln!("   Email: enabled (SMTP: {})", email_config.smtp_host);
        channels.push(Arc::new(EmailNotifier::new(email_config)));
        channel_names.push("email");
    }
    if channel_names.is_empty() {
        eprintln!("   Notifications: disabled (no channels configured)");
    } else {
        eprintln!("   Channels: {}", channel_names.join(", "));
    }

    let dispatcher = Arc::new(Dispatcher::new(
        channels,
        config.scheduler.dispatch_timeout,
    ));

    // ── Stores ──────────────────────────────────────────────────────────
    let action_window = config.scheduler.action_window_chrono();
    let dose_store = Arc::new(DoseStore::new(
        Arc::clone(&db),
        Arc::clone(&clock),
        action_window,
    ));
    let reminder_store = Arc::new(ReminderStore::new(
        Arc::clone(&db),
        Arc::clone(&clock),
        action_window,
    ));

    // ── Background loops ────────────────────────────────────────────────
    let engine = Arc::new(ReminderEngine::new(
        Arc::clone(&db),
        Arc::clone(&clock),
        Arc::clone(&dispatcher),
        config.scheduler.clone(),
    ));
    let _engine_handle = reminders::spawn_ticker(engine, config.scheduler.tick_interval);

    let sweeper = Arc::new(MissedDoseSweeper::new(
        Arc::clone(&db),
        Arc::clone(&dose_store),
        Arc::clone(&clock),
    ));
    let _sweeper_handle = doses::spawn_sweeper(sweeper, config.scheduler.sweep_interval);

    let _reset_handle =
        reminders::spawn_midnight_reset(Arc::clone(&reminder_store), Arc::clone(&clock));

    // ── HTTP surface ────────────────────────────────────────────────────
    let service = Arc::new(AdherenceService::new(
        db,
        dose_store,
        reminder_store,
        clock,
    ));
    let app = medtrack::api::routes(service);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
