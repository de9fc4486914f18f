//! Parallel connection and query probes against the destination
//!
//! Opens `concurrency` independent connections at once, then issues
//! `concurrency` parallel queries through the shared pool, and joins on all
//! of them. Catches pool exhaustion and misconfigured limits before
//! production traffic does.

use crate::db::pool::within;
use crate::db::{DatabaseConfig, DatabaseError, DestinationPool, Result};
use futures::future::join_all;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio_postgres::NoTls;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_CONNECTION_THRESHOLD: Duration = Duration::from_millis(100);
pub const DEFAULT_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// One connection attempt or one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeAttempt {
    pub index: usize,
    pub success: bool,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConcurrencyResult {
    pub success: bool,
    pub concurrency: usize,
    pub connections: Vec<ProbeAttempt>,
    pub queries: Vec<ProbeAttempt>,
    pub avg_connection_ms: f64,
    pub avg_query_ms: f64,
    pub connection_threshold_ms: f64,
    pub query_threshold_ms: f64,
    pub errors: Vec<String>,
}

impl ConcurrencyResult {
    pub fn connection_success_rate(&self) -> f64 {
        success_rate(&self.connections)
    }

    pub fn query_success_rate(&self) -> f64 {
        success_rate(&self.queries)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyProber {
    connection_threshold: Duration,
    query_threshold: Duration,
}

impl Default for ConcurrencyProber {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_THRESHOLD, DEFAULT_QUERY_THRESHOLD)
    }
}

impl ConcurrencyProber {
    pub fn new(connection_threshold: Duration, query_threshold: Duration) -> Self {
        Self {
            connection_threshold,
            query_threshold,
        }
    }

    /// Run both probes; success needs every attempt to succeed and both
    /// averages under their thresholds
    pub async fn probe(
        &self,
        config: &DatabaseConfig,
        pool: &DestinationPool,
        concurrency: usize,
    ) -> ConcurrencyResult {
        let concurrency = concurrency.max(1);
        log::info!("Probing destination with {} parallel connections", concurrency);

        let connections = join_all(
            (0..concurrency).map(|index| timed(index, open_connection(config))),
        )
        .await;

        let queries =
            join_all((0..concurrency).map(|index| timed(index, pooled_query(pool)))).await;

        let mut result = ConcurrencyResult {
            concurrency,
            avg_connection_ms: average_ms(&connections),
            avg_query_ms: average_ms(&queries),
            connection_threshold_ms: self.connection_threshold.as_secs_f64() * 1000.0,
            query_threshold_ms: self.query_threshold.as_secs_f64() * 1000.0,
            connections,
            queries,
            ..Default::default()
        };

        for attempt in result.connections.iter().filter(|a| !a.success) {
            result.errors.push(format!(
                "Connection {} failed: {}",
                attempt.index,
                attempt.error.as_deref().unwrap_or("unknown error")
            ));
        }
        for attempt in result.queries.iter().filter(|a| !a.success) {
            result.errors.push(format!(
                "Query {} failed: {}",
                attempt.index,
                attempt.error.as_deref().unwrap_or("unknown error")
            ));
        }
        if result.avg_connection_ms > result.connection_threshold_ms {
            result.errors.push(format!(
                "Average connection time {:.1}ms exceeds {:.0}ms",
                result.avg_connection_ms, result.connection_threshold_ms
            ));
        }
        if result.avg_query_ms > result.query_threshold_ms {
            result.errors.push(format!(
                "Average query time {:.1}ms exceeds {:.0}ms",
                result.avg_query_ms, result.query_threshold_ms
            ));
        }

        result.success = result.errors.is_empty();
        log::info!(
            "Concurrency probe: connections {:.0}% ok (avg {:.1}ms), queries {:.0}% ok (avg {:.1}ms)",
            result.connection_success_rate() * 100.0,
            result.avg_connection_ms,
            result.query_success_rate() * 100.0,
            result.avg_query_ms
        );
        result
    }
}

/// A fresh connection outside the pool, closed when the client drops
async fn open_connection(config: &DatabaseConfig) -> Result<()> {
    let connect = tokio_postgres::connect(&config.connection_string, NoTls);
    let (client, connection) = tokio::time::timeout(config.connect_timeout, connect)
        .await
        .map_err(|_| DatabaseError::Timeout("connection attempt".to_string()))?
        .map_err(DatabaseError::from_pg)?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            log::debug!("Standalone connection closed with error: {}", e);
        }
    });

    let outcome = within(config.query_timeout, "SELECT 1", async {
        client
            .query_one("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(DatabaseError::from_pg)
    })
    .await;
    drop(client);
    join_driver(driver).await;
    outcome
}

/// Wait for a connection driver task; a panicked or cancelled driver is
/// logged, never propagated, since the query outcome is already known
async fn join_driver(driver: tokio::task::JoinHandle<()>) {
    if let Err(e) = driver.await {
        log::debug!("Connection driver task ended abnormally: {}", e);
    }
}

async fn pooled_query(pool: &DestinationPool) -> Result<()> {
    let client = pool.get().await?;
    client
        .query_one("SELECT COUNT(*) FROM packages", &[])
        .await
        .map_err(DatabaseError::from_pg)?;
    Ok(())
}

async fn timed<F>(index: usize, op: F) -> ProbeAttempt
where
    F: std::future::Future<Output = Result<()>>,
{
    let start = Instant::now();
    let outcome = op.await;
    ProbeAttempt {
        index,
        success: outcome.is_ok(),
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        error: outcome.err().map(|e| e.to_string()),
    }
}

fn average_ms(attempts: &[ProbeAttempt]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    attempts.iter().map(|a| a.elapsed_ms).sum::<f64>() / attempts.len() as f64
}

fn success_rate(attempts: &[ProbeAttempt]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    attempts.iter().filter(|a| a.success).count() as f64 / attempts.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(index: usize, success: bool, elapsed_ms: f64) -> ProbeAttempt {
        ProbeAttempt {
            index,
            success,
            elapsed_ms,
            error: (!success).then(|| "refused".to_string()),
        }
    }

    #[test]
    fn test_average_and_rate() {
        let attempts = vec![attempt(0, true, 10.0), attempt(1, false, 30.0)];
        assert_eq!(average_ms(&attempts), 20.0);
        assert_eq!(success_rate(&attempts), 0.5);
        assert_eq!(average_ms(&[]), 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_every_attempt() {
        let config = DatabaseConfig::new("postgres://app:pw@127.0.0.1:1/tracker")
            .with_connect_timeout(Duration::from_millis(200));
        let pool = DestinationPool::new(config.clone()).unwrap();

        let result = ConcurrencyProber::default().probe(&config, &pool, 3).await;
        assert!(!result.success);
        assert_eq!(result.connections.len(), 3);
        assert_eq!(result.queries.len(), 3);
        assert_eq!(result.connection_success_rate(), 0.0);
        assert!(result.errors.len() >= 6);
    }

    #[tokio::test]
    async fn test_panicked_driver_is_absorbed() {
        let driver = tokio::spawn(async { panic!("driver lost its socket") });
        join_driver(driver).await;

        let aborted = tokio::spawn(std::future::pending::<()>());
        aborted.abort();
        join_driver(aborted).await;
    }
}
