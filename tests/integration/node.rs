//! Live tests of role checks and the heartbeat table through the library

use std::time::{Duration, Instant};

use pgroute66::config::PoolConfig;
use pgroute66::pg::{AvailabilityTracker, HeartbeatUpdate, Node, PgExecutor, QueryExecutor};
use tokio_util::sync::CancellationToken;

use crate::{get_primary_dsn, skip_if_not_enabled};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().expect("Failed to build runtime")
}

#[test]
fn test_primary_role() {
    skip_if_not_enabled!();

    runtime().block_on(async {
        let node = Node::connect_lazy("primary", get_primary_dsn(), PoolConfig::default());
        let token = CancellationToken::new();
        assert!(node.is_primary(&token).await.expect("role check should succeed"));
        assert!(!node.is_standby(&token).await.expect("role check should succeed"));
    });
}

#[test]
fn test_heartbeat_round_trip() {
    skip_if_not_enabled!();

    runtime().block_on(async {
        let node = Node::connect_lazy("primary", get_primary_dsn(), PoolConfig::default());
        let token = CancellationToken::new();

        AvailabilityTracker::create_table(&node, &token)
            .await
            .expect("table should exist afterwards");
        assert!(AvailabilityTracker::table_exists(&node, &token).await.unwrap());

        let update = AvailabilityTracker::update_duration(&node, &token)
            .await
            .expect("update should succeed");
        assert_eq!(update, HeartbeatUpdate::Updated);

        let age = AvailabilityTracker::check_duration(&node, Some(5.0), &token)
            .await
            .expect("fresh heartbeat is within the limit");
        assert!((0.0..5.0).contains(&age));
    });
}

#[test]
fn test_cancelled_role_check() {
    skip_if_not_enabled!();

    runtime().block_on(async {
        let node = Node::connect_lazy("primary", get_primary_dsn(), PoolConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = node.is_primary(&token).await.unwrap_err();
        assert!(err.is_cancelled());
    });
}

#[test]
fn test_cancelled_query_discards_connection() {
    skip_if_not_enabled!();

    runtime().block_on(async {
        let exec = PgExecutor::new(get_primary_dsn(), PoolConfig::default());
        let sleep_sql = "select pg_sleep(30) /* pgroute66 cancel test */";

        let deadline = CancellationToken::new();
        let timer = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            timer.cancel();
        });

        let started = Instant::now();
        let err = exec.query(sleep_sql, &[], &deadline).await.unwrap_err();
        assert!(err.is_cancelled(), "got {:?}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
        // The busy connection never went back to the pool
        assert_eq!(exec.pool_size(), 0);

        // The server side query was cancelled too
        let token = CancellationToken::new();
        let active = "select 1 from pg_stat_activity where state = 'active' \
                      and query like '%pgroute66 cancel test%' and pid <> pg_backend_pid()";
        let mut still_running = true;
        for _ in 0..20 {
            still_running = exec.exists(active, &[], &token).await.unwrap();
            if !still_running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!still_running);

        // A fresh connection serves the next query
        assert!(exec.exists("select 1", &[], &token).await.unwrap());
        assert_eq!(exec.pool_size(), 1);
    });
}
