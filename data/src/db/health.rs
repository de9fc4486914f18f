//! Destination health checks
//!
//! Run before anything is written: proves the destination answers within
//! the connect timeout and records what it already contains.

use crate::db::pool::within;
use crate::db::{DatabaseError, DestinationPool, PoolOccupancy, Result, SchemaManager};
use serde::Serialize;
use std::time::Duration;

/// Round-trip latency warning threshold
const SLOW_CONNECTION_THRESHOLD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub connection_ok: bool,
    pub latency_ms: u64,
    pub server_version: Option<String>,
    /// Pipeline tables that already exist in the destination
    pub existing_tables: Vec<String>,
    pub pool: PoolOccupancy,
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn summary(&self) -> String {
        let version = self.server_version.as_deref().unwrap_or("unknown version");
        if self.warnings.is_empty() {
            format!(
                "Healthy - PostgreSQL {}, latency {}ms, {} existing table(s)",
                version,
                self.latency_ms,
                self.existing_tables.len()
            )
        } else {
            format!("Healthy with warnings: {}", self.warnings.join(", "))
        }
    }
}

/// Check that the destination is reachable and inspect its current state
///
/// # Errors
/// `Timeout` if no connection is handed out within `timeout` or a statement
/// outlives the pool's query timeout; connection or query errors otherwise.
/// Callers decide whether to retry.
pub async fn check_destination(pool: &DestinationPool, timeout: Duration) -> Result<HealthReport> {
    let latency = pool.check_connectivity(timeout).await?;

    let client = within(timeout, "destination connection", pool.get()).await?;
    let server_version = pool
        .bounded_query("SHOW server_version", async {
            client
                .query_one("SHOW server_version", &[])
                .await
                .map_err(DatabaseError::from_pg)
        })
        .await?
        .get::<_, String>(0);
    let existing_tables = pool
        .bounded_query(
            "existing table lookup",
            SchemaManager::new().existing_tables(&client),
        )
        .await?;
    drop(client);

    let mut report = HealthReport {
        connection_ok: true,
        latency_ms: latency.as_millis() as u64,
        server_version: Some(server_version),
        existing_tables,
        pool: pool.occupancy(),
        warnings: Vec::new(),
    };

    if latency > SLOW_CONNECTION_THRESHOLD {
        report.warnings.push(format!(
            "Slow destination round trip: {}ms (threshold: {}ms)",
            latency.as_millis(),
            SLOW_CONNECTION_THRESHOLD.as_millis()
        ));
    }
    if !report.existing_tables.is_empty() {
        report.warnings.push(format!(
            "Destination already has {} table(s); rows will be upserted by id",
            report.existing_tables.len()
        ));
    }

    log::debug!("Destination health check completed: {}", report.summary());
    Ok(report)
}
