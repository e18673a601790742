use conduit_integration::{CredentialManager, GmailClient, OAuthRefresher};
use conduit_scheduler::EventPoller;
use conduit_server::{
    config::ServerConfig,
    db::{CheckpointRepository, CredentialRepository, WorkflowRepository},
};
use conduit_workflow::{
    ExecutionEngine, NatsTaskDispatcher, NatsTriggerClient, StepExecutor, TriggerIngress,
    TriggerSink, nats,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let nats_client = nats::connect(&config.nats_url)
        .await
        .expect("failed to connect to NATS");

    let refresher = OAuthRefresher::new(
        config.google.client_id.clone(),
        config.google.client_secret.clone(),
        config.google.token_url.clone(),
        config.credentials.call_timeout(),
    )
    .expect("failed to build OAuth client");
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(CredentialRepository::new(db_pool.clone())),
        Arc::new(refresher),
        config.credentials.policy(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let ingress = if config.engine.enabled {
        let dispatcher = Arc::new(NatsTaskDispatcher::new(
            nats_client.clone(),
            config.engine.step_timeout(),
        ));
        let steps = Arc::new(StepExecutor::new(
            credentials.clone(),
            dispatcher,
            config.engine.step_timeout(),
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(WorkflowRepository::new(db_pool.clone())),
            steps,
        ));
        let ingress = Arc::new(TriggerIngress::start(engine, config.engine.ingress()));

        let client = nats_client.clone();
        let sink: Arc<dyn TriggerSink> = ingress.clone();
        let stop = shutdown_signal(shutdown_rx.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = nats::serve_triggers(client, sink, stop).await {
                tracing::error!(error = %e, "trigger server failed");
            }
        }));
        tracing::info!(workers = config.engine.workers, "execution engine started");
        Some(ingress)
    } else {
        None
    };

    if config.poller.enabled {
        let triggers: Arc<dyn TriggerSink> = match &ingress {
            Some(ingress) if !config.poller.remote_ingress => ingress.clone(),
            _ => Arc::new(NatsTriggerClient::new(
                nats_client.clone(),
                config.poller.call_timeout(),
            )),
        };
        let source = GmailClient::new(
            config.google.api_base_url.clone(),
            config.poller.call_timeout(),
        )
        .expect("failed to build Gmail client");
        let poller = EventPoller::new(
            Arc::new(CheckpointRepository::new(db_pool.clone())),
            credentials.clone(),
            Arc::new(source),
            triggers,
            config.poller.poller_config(),
        );
        let stop = shutdown_signal(shutdown_rx.clone());
        tasks.push(tokio::spawn(async move { poller.run(stop).await }));
    }

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "background task panicked");
        }
    }
    if let Some(ingress) = ingress {
        ingress.shutdown().await;
    }
    db_pool.close().await;
}

/// Resolves once shutdown has been requested.
async fn shutdown_signal(mut receiver: watch::Receiver<bool>) {
    let _ = receiver.wait_for(|stop| *stop).await;
}
