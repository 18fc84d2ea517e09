//! Read/write routed Postgres access.
//!
//! One primary pool takes every write and explicit transaction; reads are
//! balanced over the healthy replicas. A periodic probe (`SELECT 1`, 10 s
//! timeout) drops failing replicas from rotation until they probe clean
//! again. Replication lag is measured on the primary: past the warning
//! threshold it is logged, past the critical threshold the router reports
//! unhealthy and reads fall back to the primary.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use applygate_core::config::DbConfig;
use applygate_core::health::{HealthIndicator, HealthStatus};

use crate::error::DataError;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const LAG_WARN: Duration = Duration::from_secs(5);
const LAG_CRITICAL: Duration = Duration::from_secs(15);

/// Replica selection strategy, chosen at startup from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    RoundRobin,
    Random,
    Weighted,
}

impl std::str::FromStr for ReadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(ReadStrategy::RoundRobin),
            "random" => Ok(ReadStrategy::Random),
            "weighted" => Ok(ReadStrategy::Weighted),
            other => Err(format!("unknown read strategy: {other}")),
        }
    }
}

struct Replica {
    pool: PgPool,
    url: String,
    healthy: AtomicBool,
    weight: u32,
}

pub struct RoutedPool {
    primary: PgPool,
    replicas: Vec<Replica>,
    cursor: AtomicUsize,
    strategy: ReadStrategy,
    /// Last measured replication lag, in milliseconds.
    lag_ms: AtomicU64,
}

impl RoutedPool {
    /// Build the routed pool from configuration. Pools are lazy; no
    /// connection is attempted until first use.
    pub fn connect(cfg: &DbConfig) -> Result<Self, DataError> {
        let strategy: ReadStrategy = cfg
            .read_strategy
            .parse()
            .map_err(|e: String| DataError::Unavailable(e))?;

        let statement_timeout_ms = cfg.statement_timeout.as_millis() as u64;
        let options = || {
            PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .acquire_timeout(cfg.acquire_timeout)
                .after_connect(move |conn, _meta| {
                    Box::pin(async move {
                        sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                            .execute(conn)
                            .await?;
                        Ok(())
                    })
                })
        };

        let primary = options().connect_lazy(&cfg.primary_url)?;
        let replicas = cfg
            .replica_urls
            .iter()
            .map(|url| {
                Ok(Replica {
                    pool: options().connect_lazy(url)?,
                    url: url.clone(),
                    healthy: AtomicBool::new(true),
                    weight: 1,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        info!(replicas = replicas.len(), strategy = ?strategy, "database router ready");
        Ok(Self {
            primary,
            replicas,
            cursor: AtomicUsize::new(0),
            strategy,
            lag_ms: AtomicU64::new(0),
        })
    }

    /// The primary pool. All writes and explicit transactions go here.
    pub fn writer(&self) -> &PgPool {
        &self.primary
    }

    /// A pool for reads: a healthy replica under the configured strategy,
    /// or the primary when no replica qualifies or lag is critical.
    pub fn reader(&self) -> &PgPool {
        if self.is_lag_critical() {
            return &self.primary;
        }
        let healthy: Vec<&Replica> = self
            .replicas
            .iter()
            .filter(|r| r.healthy.load(Ordering::Relaxed))
            .collect();
        if healthy.is_empty() {
            return &self.primary;
        }
        let pick = match self.strategy {
            ReadStrategy::RoundRobin => {
                self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len()
            }
            ReadStrategy::Random => rand::random::<usize>() % healthy.len(),
            ReadStrategy::Weighted => {
                let total: u32 = healthy.iter().map(|r| r.weight).sum();
                let mut roll = rand::random::<u32>() % total.max(1);
                let mut idx = 0;
                for (i, replica) in healthy.iter().enumerate() {
                    if roll < replica.weight {
                        idx = i;
                        break;
                    }
                    roll -= replica.weight;
                }
                idx
            }
        };
        &healthy[pick].pool
    }

    pub fn replication_lag(&self) -> Duration {
        Duration::from_millis(self.lag_ms.load(Ordering::Relaxed))
    }

    pub fn is_lag_critical(&self) -> bool {
        self.replication_lag() > LAG_CRITICAL
    }

    pub fn healthy_replicas(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| r.healthy.load(Ordering::Relaxed))
            .count()
    }

    /// One probe round: `SELECT 1` against each endpoint plus the lag
    /// measurement on the primary.
    pub async fn probe_once(&self) {
        for replica in &self.replicas {
            let ok = probe(&replica.pool).await;
            let was = replica.healthy.swap(ok, Ordering::Relaxed);
            if was != ok {
                if ok {
                    info!(url = %replica.url, "replica back in rotation");
                } else {
                    warn!(url = %replica.url, "replica failed probe, removed from rotation");
                }
            }
        }

        if !self.replicas.is_empty() {
            match measure_lag(&self.primary).await {
                Ok(lag) => {
                    self.lag_ms.store(lag.as_millis() as u64, Ordering::Relaxed);
                    if lag > LAG_CRITICAL {
                        warn!(lag_ms = lag.as_millis() as u64, "replication lag critical, reads fall back to primary");
                    } else if lag > LAG_WARN {
                        warn!(lag_ms = lag.as_millis() as u64, "replication lag above warning threshold");
                    }
                }
                Err(err) => debug!(error = %err, "lag measurement failed"),
            }
        }
    }

    /// Spawn the 30 s probe loop; stops when the token is cancelled.
    pub fn spawn_probes(self: &Arc<Self>, cancel: CancellationToken) {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => router.probe_once().await,
                }
            }
            debug!("database probe loop stopped");
        });
    }
}

async fn probe(pool: &PgPool) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await,
        Ok(Ok(_))
    )
}

async fn measure_lag(primary: &PgPool) -> Result<Duration, sqlx::Error> {
    let secs: f64 = sqlx::query_scalar(
        "SELECT COALESCE(EXTRACT(EPOCH FROM MAX(replay_lag)), 0)::FLOAT8 FROM pg_stat_replication",
    )
    .fetch_one(primary)
    .await?;
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

/// Health indicator for the primary endpoint.
pub struct PrimaryHealth {
    pub router: Arc<RoutedPool>,
}

impl HealthIndicator for PrimaryHealth {
    fn name(&self) -> &str {
        "db-primary"
    }

    async fn check(&self) -> HealthStatus {
        if probe(self.router.writer()).await {
            HealthStatus::Up
        } else {
            HealthStatus::Down("primary probe failed".into())
        }
    }
}

/// Health indicator for the replica pool; down when lag is critical or
/// every replica is out of rotation.
pub struct ReplicaHealth {
    pub router: Arc<RoutedPool>,
}

impl HealthIndicator for ReplicaHealth {
    fn name(&self) -> &str {
        "db-replicas"
    }

    async fn check(&self) -> HealthStatus {
        if self.router.replicas.is_empty() {
            return HealthStatus::Up;
        }
        if self.router.is_lag_critical() {
            return HealthStatus::Down(format!(
                "replication lag {}ms",
                self.router.replication_lag().as_millis()
            ));
        }
        if self.router.healthy_replicas() == 0 {
            return HealthStatus::Down("no healthy replicas".into());
        }
        HealthStatus::Up
    }

    fn affects_readiness(&self) -> bool {
        // Reads fall back to the primary; degraded, not unready.
        false
    }
}
