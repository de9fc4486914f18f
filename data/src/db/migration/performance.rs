//! Fixed query battery against the migrated destination
//!
//! Four timed operations: full COUNT, packages/status_updates join with
//! grouping, tracking-number lookup, and a 100-row insert into a scratch
//! table that is dropped afterwards. Pool occupancy and process memory are
//! sampled alongside.

use crate::db::metrics::{MemoryUsage, MetricTimer, MetricsSnapshot, PerformanceMetrics, process_memory};
use crate::db::{DatabaseError, DestinationPool, PoolOccupancy, Result};
use serde::Serialize;
use std::time::Duration;
use tokio_postgres::Client;
use tokio_postgres::types::ToSql;

pub const DEFAULT_BENCHMARK_THRESHOLD: Duration = Duration::from_millis(200);

const BULK_INSERT_ROWS: usize = 100;

/// Tracking number used when the destination has no packages yet
const PLACEHOLDER_TRACKING_NUMBER: &str = "BENCHMARK0000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkOperation {
    SimpleSelect,
    ComplexJoin,
    IndexedLookup,
    BulkInsert,
}

impl BenchmarkOperation {
    /// Operations whose timing decides success
    fn is_gated(&self) -> bool {
        matches!(
            self,
            BenchmarkOperation::SimpleSelect | BenchmarkOperation::IndexedLookup
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationTiming {
    pub operation: BenchmarkOperation,
    pub duration_ms: f64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceResult {
    pub success: bool,
    pub threshold_ms: f64,
    pub operations: Vec<OperationTiming>,
    pub pool: PoolOccupancy,
    pub memory: Option<MemoryUsage>,
    pub metrics: MetricsSnapshot,
    pub errors: Vec<String>,
}

impl PerformanceResult {
    pub fn timing(&self, operation: BenchmarkOperation) -> Option<&OperationTiming> {
        self.operations.iter().find(|t| t.operation == operation)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceBenchmarker {
    threshold: Duration,
}

impl Default for PerformanceBenchmarker {
    fn default() -> Self {
        Self::new(DEFAULT_BENCHMARK_THRESHOLD)
    }
}

impl PerformanceBenchmarker {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Run the battery; success needs the simple select and the indexed
    /// lookup to finish under the threshold
    pub async fn benchmark(&self, pool: &DestinationPool) -> PerformanceResult {
        log::info!("Running destination benchmarks...");
        let metrics = PerformanceMetrics::new();
        let mut result = PerformanceResult {
            threshold_ms: self.threshold.as_secs_f64() * 1000.0,
            ..Default::default()
        };

        match pool.get().await {
            Ok(client) => {
                let timings = [
                    run_timed(BenchmarkOperation::SimpleSelect, &metrics, simple_select(&client)).await,
                    run_timed(BenchmarkOperation::ComplexJoin, &metrics, complex_join(&client)).await,
                    run_timed(BenchmarkOperation::IndexedLookup, &metrics, indexed_lookup(&client)).await,
                    run_timed(BenchmarkOperation::BulkInsert, &metrics, bulk_insert(&client)).await,
                ];
                result.operations.extend(timings);
                // Sample while the benchmark connection is still checked out
                result.pool = pool.occupancy();
            }
            Err(e) => result.errors.push(format!("No destination connection: {}", e)),
        }

        result.memory = process_memory();
        result.metrics = metrics.snapshot();

        for timing in &result.operations {
            if let Some(error) = &timing.error {
                result
                    .errors
                    .push(format!("{:?} failed: {}", timing.operation, error));
            } else if timing.operation.is_gated() && timing.duration_ms > result.threshold_ms {
                result.errors.push(format!(
                    "{:?} took {:.1}ms (threshold {:.0}ms)",
                    timing.operation, timing.duration_ms, result.threshold_ms
                ));
            }
        }
        for warning in result.metrics.warnings() {
            log::warn!("Benchmark: {}", warning);
        }

        result.success = result.errors.is_empty() && result.operations.len() == 4;
        log::info!("Benchmarks {}: {}", if result.success { "passed" } else { "failed" }, result.metrics.summary());
        result
    }
}

async fn run_timed<F>(
    operation: BenchmarkOperation,
    metrics: &PerformanceMetrics,
    op: F,
) -> OperationTiming
where
    F: std::future::Future<Output = Result<()>>,
{
    let timer = match operation {
        BenchmarkOperation::BulkInsert => MetricTimer::write(metrics),
        _ => MetricTimer::read(metrics),
    };
    let outcome = op.await;
    let elapsed = timer.stop();

    OperationTiming {
        operation,
        duration_ms: elapsed.as_secs_f64() * 1000.0,
        success: outcome.is_ok(),
        error: outcome.err().map(|e| e.to_string()),
    }
}

async fn simple_select(client: &Client) -> Result<()> {
    client
        .query_one("SELECT COUNT(*) FROM packages", &[])
        .await
        .map_err(DatabaseError::from_pg)?;
    Ok(())
}

async fn complex_join(client: &Client) -> Result<()> {
    client
        .query(
            "SELECT p.status, COUNT(su.id) AS updates, MAX(su.timestamp) AS latest
             FROM packages p
             LEFT JOIN status_updates su ON su.package_id = p.id
             GROUP BY p.status
             ORDER BY updates DESC",
            &[],
        )
        .await
        .map_err(DatabaseError::from_pg)?;
    Ok(())
}

async fn indexed_lookup(client: &Client) -> Result<()> {
    let tracking_number = client
        .query_opt("SELECT tracking_number FROM packages LIMIT 1", &[])
        .await
        .map_err(DatabaseError::from_pg)?
        .map(|row| row.get::<_, String>(0))
        .unwrap_or_else(|| PLACEHOLDER_TRACKING_NUMBER.to_string());

    client
        .query_opt(
            "SELECT id, status FROM packages WHERE tracking_number = $1",
            &[&tracking_number],
        )
        .await
        .map_err(DatabaseError::from_pg)?;
    Ok(())
}

/// Insert into a uniquely named scratch table, dropping it on every path
async fn bulk_insert(client: &Client) -> Result<()> {
    let table = format!("benchmark_scratch_{}", uuid::Uuid::new_v4().simple());
    client
        .batch_execute(&format!(
            "CREATE TABLE {} (id INTEGER PRIMARY KEY, payload TEXT NOT NULL, created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
            table
        ))
        .await
        .map_err(DatabaseError::from_pg)?;

    let outcome = insert_scratch_rows(client, &table).await;

    if let Err(e) = client
        .batch_execute(&format!("DROP TABLE IF EXISTS {}", table))
        .await
    {
        log::warn!("Failed to drop scratch table {}: {}", table, e);
    }
    outcome
}

async fn insert_scratch_rows(client: &Client, table: &str) -> Result<()> {
    let ids: Vec<i32> = (0..BULK_INSERT_ROWS as i32).collect();
    let payloads: Vec<String> = ids.iter().map(|id| format!("row-{}", id)).collect();

    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(BULK_INSERT_ROWS * 2);
    for (id, payload) in ids.iter().zip(&payloads) {
        params.push(id);
        params.push(payload);
    }
    let values = (0..BULK_INSERT_ROWS)
        .map(|row| format!("(${}, ${})", row * 2 + 1, row * 2 + 2))
        .collect::<Vec<_>>()
        .join(", ");

    let inserted = client
        .execute(
            format!("INSERT INTO {} (id, payload) VALUES {}", table, values).as_str(),
            &params,
        )
        .await
        .map_err(DatabaseError::from_pg)?;

    if inserted as usize != BULK_INSERT_ROWS {
        return Err(DatabaseError::Query(format!(
            "expected {} scratch rows, inserted {}",
            BULK_INSERT_ROWS, inserted
        )));
    }
    Ok(())
}
