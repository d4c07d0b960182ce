use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::{db, redis_pool};
use courier_daemon::intake::IntakeBridge;
use courier_daemon::shutdown;
use courier_daemon::transports::build_transports;
use courier_engine::correlation::InMemoryCorrelationStore;
use courier_engine::credit::{CreditGate, LoggingTenantNotifier, RedisCreditLedger};
use courier_engine::pg_store::PgMessageStore;
use courier_engine::wake::SystemClock;
use courier_engine::{Dispatcher, EngineParts, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_daemon=info,courier_engine=info,courier_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Courier dispatch daemon starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to storage
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    let ledger_redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let intake_redis = redis_pool::create_redis_pool(&config.redis_url).await?;

    let transports = build_transports(&config)?;

    let (dispatcher, scheduler) = Dispatcher::new(EngineParts {
        config: SchedulerConfig::from_app_config(&config),
        adapters: transports.adapters,
        replies: transports.replies,
        credits: CreditGate::new(
            Arc::new(RedisCreditLedger::new(ledger_redis)),
            Arc::new(LoggingTenantNotifier),
        ),
        correlation: Box::new(InMemoryCorrelationStore::new()),
        store: Arc::new(PgMessageStore::new(pool)),
        clock: Arc::new(SystemClock),
    });

    let shutdown = shutdown::install_signal_handler();

    let mut scheduler_task = scheduler.spawn(shutdown.clone());
    let mut intake_task = tokio::spawn(
        IntakeBridge::new(intake_redis, &config.intake_queue_key, dispatcher).run(shutdown.clone()),
    );

    // Either task ending takes the other one down with it.
    tokio::select! {
        result = &mut scheduler_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Scheduler task panicked");
            }
            shutdown.cancel();
            let _ = intake_task.await;
        }
        result = &mut intake_task => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Intake task panicked");
            }
            shutdown.cancel();
            let _ = scheduler_task.await;
        }
    }

    tracing::info!("Courier dispatch daemon stopped.");
    Ok(())
}
