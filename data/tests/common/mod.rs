//! Shared helpers for the migration integration tests
//!
//! Tests that need PostgreSQL call [`TestDestination::create`] and return
//! early when `TEST_DATABASE_URL` is unset. Each destination lives in its own
//! throwaway schema so tests can run in parallel against one server.

#![allow(dead_code)]

pub mod fixtures;

use data::db::{DatabaseConfig, DestinationPool};
use tokio_postgres::{Client, NoTls};

const TEST_DATABASE_URL: &str = "TEST_DATABASE_URL";

pub struct TestDestination {
    pub schema: String,
    pub config: DatabaseConfig,
    admin_url: String,
}

impl TestDestination {
    /// Fresh schema on the test server, or `None` when no server is configured
    pub async fn create() -> Option<Self> {
        let Ok(admin_url) = std::env::var(TEST_DATABASE_URL) else {
            eprintln!("{} not set; skipping PostgreSQL test", TEST_DATABASE_URL);
            return None;
        };

        let schema = format!("migrate_test_{}", uuid::Uuid::new_v4().simple());
        let client = connect(&admin_url).await;
        client
            .batch_execute(&format!("CREATE SCHEMA {}", schema))
            .await
            .expect("Failed to create test schema");

        let separator = if admin_url.contains('?') { '&' } else { '?' };
        let scoped_url = format!(
            "{}{}options=-c%20search_path%3D{}",
            admin_url, separator, schema
        );

        Some(Self {
            schema,
            config: DatabaseConfig::new(scoped_url),
            admin_url,
        })
    }

    pub fn pool(&self) -> DestinationPool {
        DestinationPool::new(self.config.clone()).expect("Failed to build test pool")
    }

    /// Direct connection scoped to this test's schema
    pub async fn client(&self) -> Client {
        connect(&self.config.connection_string).await
    }

    pub async fn count(&self, table: &str) -> i64 {
        self.client()
            .await
            .query_one(&format!("SELECT COUNT(*) FROM {}", table), &[])
            .await
            .expect("Failed to count rows")
            .get(0)
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.client()
            .await
            .query(
                "SELECT table_name::text FROM information_schema.tables WHERE table_schema = $1",
                &[&self.schema],
            )
            .await
            .expect("Failed to list tables")
            .iter()
            .map(|row| row.get(0))
            .collect()
    }

    pub async fn teardown(self) {
        let client = connect(&self.admin_url).await;
        if let Err(e) = client
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .await
        {
            eprintln!("Failed to drop test schema {}: {}", self.schema, e);
        }
    }
}

async fn connect(url: &str) -> Client {
    let (client, connection) = tokio_postgres::connect(url, NoTls)
        .await
        .expect("Failed to connect to test database");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Test connection error: {}", e);
        }
    });
    client
}
