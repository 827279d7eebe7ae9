use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use log::{info, warn};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use api::AppState;
use broker::{InMemoryBroker, MessageBroker, PgBroker, TopicSpec};
use config::{BrokerBackend, Config};
use consumer::RateConsumer;
use ingestion::IngestionService;
use provider::HttpProviderClient;
use publisher::RatePublisher;
use scheduler::{Scheduler, SchedulerSettings};
use store::{PgDocumentStore, RateStore};

mod api;
mod broker;
mod config;
mod consumer;
mod error;
mod exchange_rate;
mod ingestion;
mod normalizer;
mod provider;
mod provider_response;
mod publisher;
mod scheduler;
mod shutdown;
mod store;

const BROKER_IDLE_POLL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().context("Invalid configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("Can't connect to the database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Can't run database migrations")?;

    let broker: Arc<dyn MessageBroker> = match config.broker_backend {
        BrokerBackend::Postgres => Arc::new(PgBroker::new(pool.clone(), BROKER_IDLE_POLL)),
        BrokerBackend::Memory => Arc::new(InMemoryBroker::new()),
    };
    broker
        .create_topic(&TopicSpec::new(
            &config.topic,
            config.topic_partitions,
            config.topic_replication_factor,
        ))
        .await
        .with_context(|| format!("Can't create topic {}", config.topic))?;

    let store = RateStore::new(Arc::new(PgDocumentStore::new(pool)));
    let provider = HttpProviderClient::new(
        &config.provider_base_url,
        &config.provider_name,
        config.provider_timeout,
    )?;
    let ingestion = Arc::new(IngestionService::new(
        Arc::new(provider),
        RatePublisher::new(Arc::clone(&broker), &config.topic),
        store.clone(),
        &config.provider_name,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&ingestion),
        SchedulerSettings {
            fixed_rate: config.poll_fixed_rate,
            initial_delay: config.poll_initial_delay,
            default_base_currency: config.default_base_currency.clone(),
        },
    ));
    let mut tasks = scheduler.start(shutdown_rx.clone());
    tasks.push(RateConsumer::new(broker, &config.topic, &config.consumer_group_id).start(shutdown_rx));

    let state = web::Data::new(AppState { ingestion, store });
    info!("Listening on {}", config.listen_addr);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(config.listen_addr)
        .with_context(|| format!("Can't bind {}", config.listen_addr))?
        .run()
        .await?;

    info!("Server stopped, shutting down background tasks");
    shutdown_tx.send(true).ok();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    Ok(())
}
