//! Eventpass background worker.
//!
//! Connects to `PostgreSQL`, runs migrations, then keeps two loops alive until
//! Ctrl+C: the daily reminder run and the stranded-inventory repair sweep.
//! Metrics are served for Prometheus on `METRICS_PORT`.

use eventpass::config::Config;
use eventpass::metrics::register_business_metrics;
use eventpass::notifier::LogNotifier;
use eventpass::{BookingService, Payments, ReminderDispatcher, ServiceSettings, Storage};
use eventpass_core::environment::{Clock, SystemClock};
use eventpass_postgres::PostgresStore;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eventpass=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    config.validate()?;
    info!(
        app_env = config.app_env.as_str(),
        payments = config.processor.is_configured(),
        webhook_secret = config.webhook.secret.is_some(),
        reminder_hour = config.reminders.hour,
        "Configuration loaded"
    );

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;
    register_business_metrics();
    info!(port = config.metrics_port, "Prometheus metrics available at /metrics");

    let store = PostgresStore::connect(&config.database.pool_settings()).await?;
    store.migrate().await?;
    info!("Database ready");

    let storage = Storage::shared(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = BookingService::new(
        storage.clone(),
        Payments::from_config(&config.processor)?,
        clock.clone(),
        ServiceSettings::from_config(&config),
    );

    let reminders = ReminderDispatcher::new(
        storage.catalog.clone(),
        storage.bookings.clone(),
        Arc::new(LogNotifier),
        clock,
        config.reminders,
    )?;
    let reminder_task = tokio::spawn(reminders.run_daily());

    let engine = service.engine().clone();
    let sweep_every = Duration::from_secs(config.repair_sweep_interval.max(1));
    let repair_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            if let Err(err) = engine.repair_stranded().await {
                error!(error = %err, "Repair sweep failed");
            }
        }
    });

    info!("Worker running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    reminder_task.abort();
    repair_task.abort();
    Ok(())
}
