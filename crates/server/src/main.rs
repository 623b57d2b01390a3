//! Federation server entry point.

use std::sync::Arc;
use std::time::Duration;

use fedi_common::config::{LoggingConfig, RedisConfig};
use fedi_common::{CacheStore, Config, IdGenerator, LayeredCache, RedisCache, generate_rsa_keypair};
use fedi_db::Repositories;
use fedi_db::entities::{user, user_keypair};
use fedi_federation::{
    ActivityBuilder, ActorResolver, ApClient, DeliveryService, FederationState, HandlerDeps,
    HandlerRegistry, HttpSigner, InboxDispatcher, LocalUrls, federation_router,
    spawn_cache_pruner,
};
use fedi_queue::workers::{DeliverContext, deliver_monitor};
use fedi_queue::{
    BrokerTransport, DeadLetterStore, DeliveryMetrics, DeliveryQueue, DeliveryTransport,
    DirectTransport, JobExecutor, RetryConfig, SigningDeliverer, connect_broker,
    spawn_health_reporter,
};
use fred::interfaces::ClientLike;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Username of the local actor that signs instance-level fetches.
const INSTANCE_ACTOR: &str = "instance.actor";

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fedi=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Actor document cache: Redis when reachable, process memory otherwise.
async fn document_cache(config: &RedisConfig) -> LayeredCache {
    let Some(url) = config.url.as_deref() else {
        info!("No Redis configured, using in-process caches");
        return LayeredCache::memory_only();
    };

    let fred_config = match fred::types::config::Config::from_url(url) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Invalid Redis URL, using in-process caches");
            return LayeredCache::memory_only();
        }
    };

    let client = fred::clients::Client::new(fred_config, None, None, None);
    client.connect();
    if let Err(e) = client.wait_for_connect().await {
        warn!(error = %e, "Redis unreachable, using in-process caches");
        return LayeredCache::memory_only();
    }

    info!("Connected to Redis cache");
    LayeredCache::new(Arc::new(RedisCache::new(
        Arc::new(client),
        format!("{}:cache", config.prefix),
    )))
}

/// Signer for authorized-fetch retries.
///
/// Uses the configured system key when present; otherwise signs as the
/// local instance actor, creating it and its keypair on first start.
async fn system_signer(
    config: &Config,
    repos: &Repositories,
    urls: &LocalUrls,
) -> anyhow::Result<HttpSigner> {
    if let (Some(key_id), Some(pem)) = (
        config.resolver.system_key_id.as_deref(),
        config.resolver.system_private_key_pem.as_deref(),
    ) {
        return Ok(HttpSigner::new(pem, key_id)?);
    }

    let actor = match repos.users.find_local_by_username(INSTANCE_ACTOR).await? {
        Some(actor) => actor,
        None => {
            let model = user::Model::local(IdGenerator::new().generate(), INSTANCE_ACTOR);
            let actor = repos.users.create(model).await?;
            info!(user_id = %actor.id, "Created instance actor");
            actor
        }
    };

    let keypair = match repos.keypairs.find_by_user_id(&actor.id).await? {
        Some(keypair) => keypair,
        None => {
            let generated = generate_rsa_keypair()?;
            let keypair = user_keypair::Model {
                user_id: actor.id.clone(),
                key_id: urls.key_id(&actor.id),
                public_key_pem: generated.public_key_pem,
                private_key_pem: generated.private_key_pem,
            };
            repos.keypairs.save(keypair.clone()).await?;
            info!(key_id = %keypair.key_id, "Generated instance actor keypair");
            keypair
        }
    };

    Ok(HttpSigner::new(&keypair.private_key_pem, keypair.key_id)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config.logging);

    info!("Starting federation server...");

    let urls = LocalUrls::new(&config.server.url)?;
    let builder = ActivityBuilder::new(urls.clone());
    let repos = Repositories::in_memory();
    let documents: Arc<dyn CacheStore> = Arc::new(document_cache(&config.redis).await);

    let signer = system_signer(&config, &repos, &urls).await?;
    let fetch_client = ApClient::new(
        &config.server.url,
        Duration::from_secs(config.resolver.fetch_timeout_secs),
    )?;
    let resolver = ActorResolver::new(
        Arc::new(fetch_client),
        repos.users.clone(),
        documents,
        &config.resolver,
    )
    .with_system_signer(signer);

    // Delivery
    let metrics = DeliveryMetrics::new();
    let delivery_client = ApClient::new(
        &config.server.url,
        Duration::from_secs(config.delivery.request_timeout_secs),
    )?;
    let executor = JobExecutor::new(
        Arc::new(SigningDeliverer::new(delivery_client, repos.keypairs.clone())),
        RetryConfig::from_config(&config.delivery),
        DeadLetterStore::default(),
        metrics.clone(),
    );

    let broker = match config.redis.url.as_deref() {
        Some(url) => {
            connect_broker(
                url,
                config.delivery.broker_connect_attempts,
                Duration::from_millis(config.delivery.broker_backoff_cap_ms),
            )
            .await
        }
        None => None,
    };

    let transport: Arc<dyn DeliveryTransport> = if let Some(conn) = broker {
        let broker = BrokerTransport::new(conn, &config.redis.prefix);
        let ctx = DeliverContext::new(executor, broker.clone(), config.delivery.workers);
        let monitor = deliver_monitor(&ctx, config.delivery.workers);
        tokio::spawn(async move {
            if let Err(e) = monitor.run().await {
                error!(error = %e, "Delivery workers failed");
            }
        });
        info!(workers = config.delivery.workers, "Delivery workers started");
        Arc::new(broker)
    } else {
        warn!("No job broker available, delivering directly without retries");
        Arc::new(DirectTransport::new(executor))
    };

    let delivery: DeliveryService = Arc::new(DeliveryQueue::from_config(
        transport,
        &config.delivery,
        metrics.clone(),
    ));

    let _health = spawn_health_reporter(
        metrics,
        Duration::from_secs(config.delivery.health_interval_secs),
        config.delivery.health_warn_ratio,
    );
    let _pruner = spawn_cache_pruner(
        resolver.key_cache().clone(),
        resolver.failure_cache().clone(),
        Duration::from_secs(config.resolver.cache_prune_interval_secs.max(1)),
    );

    // Inbound
    let deps = HandlerDeps {
        repos: repos.clone(),
        resolver: resolver.clone(),
        delivery,
        builder: builder.clone(),
    };
    let dispatcher = InboxDispatcher::new(
        resolver,
        repos.received_activities.clone(),
        HandlerRegistry::with_defaults(&deps),
        Duration::from_secs(config.signature.date_tolerance_secs),
    );

    let app = federation_router(FederationState {
        dispatcher: Arc::new(dispatcher),
        repos,
        builder,
    })
    .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
