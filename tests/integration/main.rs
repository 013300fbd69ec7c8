//! Integration test entry point
//!
//! `server` runs the API in-process against mocked nodes and always runs.
//! `live` and `node` need a running router and PostgreSQL cluster:
//!
//! Run with: PGROUTE66_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - PGROUTE66_RUN_INTEGRATION_TESTS: Set to "1" to enable live tests
//! - PGROUTE66_TEST_URL: Router base URL (default: http://127.0.0.1:8080)
//! - PGROUTE66_TEST_PRIMARY: Name of the primary node (default: host1)
//! - PGROUTE66_TEST_STANDBY: Name of a standby node (default: host2)
//! - PGROUTE66_TEST_PGHOST / PGROUTE66_TEST_PGPORT / PGROUTE66_TEST_PGUSER /
//!   PGROUTE66_TEST_PGPASSWORD / PGROUTE66_TEST_PGDATABASE: Direct connection
//!   to the primary (defaults: localhost, 5432, postgres, empty, postgres)

mod live;
mod node;
mod server;

use std::env;
use std::time::Duration;

use pgroute66::pg::Dsn;

/// Check if live integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("PGROUTE66_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if live integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set PGROUTE66_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Live router settings from environment
#[derive(Debug, Clone)]
pub struct RouterTestConfig {
    pub url: String,
    pub primary: String,
    pub standby: String,
}

pub fn get_router_config() -> RouterTestConfig {
    RouterTestConfig {
        url: env::var("PGROUTE66_TEST_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
            .trim_end_matches('/')
            .to_string(),
        primary: env::var("PGROUTE66_TEST_PRIMARY").unwrap_or_else(|_| "host1".to_string()),
        standby: env::var("PGROUTE66_TEST_STANDBY").unwrap_or_else(|_| "host2".to_string()),
    }
}

/// Direct connection parameters for the primary
pub fn get_primary_dsn() -> Dsn {
    let var = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.to_string());
    let mut dsn: Dsn = [
        ("host", var("PGROUTE66_TEST_PGHOST", "localhost")),
        ("port", var("PGROUTE66_TEST_PGPORT", "5432")),
        ("user", var("PGROUTE66_TEST_PGUSER", "postgres")),
        ("dbname", var("PGROUTE66_TEST_PGDATABASE", "postgres")),
    ]
    .into_iter()
    .collect();
    if let Ok(password) = env::var("PGROUTE66_TEST_PGPASSWORD") {
        dsn.insert("password", password);
    }
    dsn
}

/// A response reduced to what the tests check
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// GET `url` and decode the JSON body
pub fn get_json(url: &str) -> TestResponse {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");
    let response = client.get(url).send().expect("Request should succeed");
    let status = response.status().as_u16();
    let body = response.json().expect("Body should be JSON");
    TestResponse { status, body }
}
