use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use applygate_auth::{LoginLockout, TokenService};
use applygate_cache::{DistributedStore, InMemoryStore, RedisStore, TieredCache};
use applygate_core::config::AppConfig;
use applygate_core::health::{HealthIndicator, HealthRegistry, HealthStatus};
use applygate_data::routing::{PrimaryHealth, ReplicaHealth};
use applygate_data::{JobRepository, RoutedPool, SubscriptionStore, UserStore};
use applygate_limit::{
    CounterStore, InMemoryCounterStore, RateLimits, RedisCounterStore, SlidingWindowLimiter,
};
use applygate_server::dispatcher::{spawn_status_consumer, BrokerDispatcher};
use applygate_server::glue::{DirectorySubjectResolver, HubEventHandler, RepositoryStatusStore};
use applygate_server::lifecycle::JobLifecycleService;
use applygate_server::quota::QuotaService;
use applygate_server::uploads::UploadUrlMinter;
use applygate_server::{build_router, AppState};
use applygate_stream::{EventRelay, InMemoryRelay, RedisRelay, StatusHub};

struct CacheHealth {
    store: Arc<dyn DistributedStore>,
}

impl HealthIndicator for CacheHealth {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> HealthStatus {
        match self.store.get("health:probe").await {
            Ok(_) => HealthStatus::Up,
            Err(err) => HealthStatus::Down(err.to_string()),
        }
    }

    fn affects_readiness(&self) -> bool {
        // The fabric degrades to L1 + origin; a dead cache is not fatal.
        false
    }
}

#[tokio::main]
async fn main() {
    applygate_core::init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, "configuration invalid");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();

    // Database router with its probe loop.
    let router = match RoutedPool::connect(&config.db) {
        Ok(router) => Arc::new(router),
        Err(err) => {
            error!(error = %err, "database configuration invalid");
            std::process::exit(1);
        }
    };
    router.spawn_probes(cancel.clone());

    // Distributed store, counter store and relay: Redis when CACHE_URL is
    // set, in-process fallbacks otherwise (single-instance dev mode).
    let (l2, counters, relay): (
        Arc<dyn DistributedStore>,
        Arc<dyn CounterStore>,
        Arc<dyn EventRelay>,
    ) = match &config.cache_url {
        Some(url) => match redis::Client::open(url.as_str()) {
            Ok(client) => match client.get_connection_manager().await {
                Ok(conn) => {
                    info!("distributed store connected");
                    (
                        Arc::new(RedisStore::new(conn.clone())),
                        Arc::new(RedisCounterStore::new(conn.clone())),
                        Arc::new(RedisRelay::new(client, conn)),
                    )
                }
                Err(err) => {
                    error!(error = %err, "redis unreachable at startup");
                    std::process::exit(1);
                }
            },
            Err(err) => {
                error!(error = %err, "CACHE_URL invalid");
                std::process::exit(1);
            }
        },
        None => {
            info!("no CACHE_URL, using in-process store");
            (
                Arc::new(InMemoryStore::new()),
                Arc::new(InMemoryCounterStore::new()),
                Arc::new(InMemoryRelay::new()),
            )
        }
    };

    // Stores.
    let jobs = Arc::new(JobRepository::new(router.clone()));
    let users = Arc::new(UserStore::new(router.clone()));
    let subscriptions = Arc::new(SubscriptionStore::new(router.clone()));

    // Token service resolving subjects against the user store.
    let tokens = Arc::new(TokenService::new(
        config.token_secret.as_bytes(),
        config.token_ttl,
        Arc::new(DirectorySubjectResolver::new(users.clone())),
    ));

    // Rate limiter.
    let limiter = SlidingWindowLimiter::new(
        counters,
        RateLimits {
            per_minute: config.rate_limit.per_minute,
            per_hour: config.rate_limit.per_hour,
            per_day: config.rate_limit.per_day,
        },
    );

    // Status hub + broker consumer.
    let hub = StatusHub::new(
        Arc::new(RepositoryStatusStore::new(jobs.clone())),
        relay,
        config.stream.subscriber_buffer,
    );
    hub.start_relay_listener(cancel.clone());
    spawn_status_consumer(
        config.dispatch.clone(),
        Arc::new(HubEventHandler::new(hub.clone())),
        cancel.clone(),
    );

    // Dispatch, quota, lifecycle, uploads.
    let dispatcher = Arc::new(BrokerDispatcher::new(config.dispatch.clone()));
    let quota = Arc::new(QuotaService::new(
        subscriptions.clone(),
        TieredCache::new("plans", l2.clone(), 1_024),
    ));
    let lifecycle = Arc::new(JobLifecycleService::new(
        jobs.clone(),
        dispatcher,
        quota.clone(),
        hub.clone(),
    ));
    let uploads = Arc::new(UploadUrlMinter::new(&config.object_store).await);

    let health = HealthRegistry::new()
        .register(PrimaryHealth { router: router.clone() })
        .register(ReplicaHealth { router: router.clone() })
        .register(CacheHealth { store: l2.clone() });

    let state = AppState {
        config: config.clone(),
        tokens,
        lockout: LoginLockout::default(),
        users,
        jobs,
        subscriptions,
        limiter,
        hub,
        lifecycle,
        quota,
        uploads,
        dashboard_cache: TieredCache::new("dashboard", l2, 4_096),
    };

    let app = build_router(state, health);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.bind_addr, "bind failed");
            std::process::exit(1);
        }
    };
    info!(addr = %config.bind_addr, env = ?config.env, "applygate listening");

    let shutdown_cancel = cancel.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received, draining");
        shutdown_cancel.cancel();
    });

    if let Err(err) = serve.await {
        error!(error = %err, "server error");
    }
    cancel.cancel();
    info!("applygate stopped");
}
