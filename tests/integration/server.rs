//! In-process API tests over real HTTP against mocked nodes

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pgroute66::api;
use pgroute66::handler::RoutingHandler;
use pgroute66::pg::{
    heartbeat_age_sql, update_heartbeat_sql, Node, OverrideExecutor, OverrideKey, OverrideResult,
    QueryExecutor, Row, Value, AVC_SCHEMA, AVC_TABLE, AVC_TABLE_EXISTS_QUERY, IS_PRIMARY_QUERY,
    IS_STANDBY_QUERY,
};
use pgroute66::registry::ConnectionRegistry;
use tokio_util::sync::CancellationToken;

use crate::get_json;

/// Router running on a background runtime; stops when dropped
struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(handler: RoutingHandler) -> Self {
        let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Listener has an address");
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let thread = std::thread::spawn(move || {
            let state = api::ApiState::new(Arc::new(handler), Duration::from_secs(5), token);
            runtime
                .block_on(api::serve_listener(listener, state, None))
                .expect("Server should stop cleanly");
        });

        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn mock_node(name: &str, primary: bool, heartbeat_age: Option<f64>) -> Node {
    let exec = Arc::new(OverrideExecutor::new(format!("{}:5432", name)));
    let (p, s) = if primary {
        (
            OverrideResult::one_row("?column?", "primary"),
            OverrideResult::no_rows(),
        )
    } else {
        (
            OverrideResult::no_rows(),
            OverrideResult::one_row("?column?", "standby"),
        )
    };
    exec.set(OverrideKey::new(IS_PRIMARY_QUERY, vec![]), p);
    exec.set(OverrideKey::new(IS_STANDBY_QUERY, vec![]), s);

    if let Some(age) = heartbeat_age {
        let args: Vec<Value> = vec![AVC_TABLE.into(), AVC_SCHEMA.into()];
        exec.set(
            OverrideKey::new(AVC_TABLE_EXISTS_QUERY, args),
            OverrideResult::one_row("relname", AVC_TABLE),
        );
        exec.set(
            OverrideKey::new(heartbeat_age_sql(), vec![]),
            OverrideResult::Rows(vec![Row::new().with("duration", age)]),
        );
        exec.set(
            OverrideKey::new(update_heartbeat_sql(), vec![]),
            OverrideResult::Affected(1),
        );
    }
    Node::new(name, exec as Arc<dyn QueryExecutor>)
}

fn cluster() -> RoutingHandler {
    let nodes = vec![
        mock_node("host1", true, Some(0.5)),
        mock_node("host2", false, Some(20.0)),
        mock_node("host3", false, None),
    ];
    let mut groups = BTreeMap::new();
    groups.insert(
        "replicas".to_string(),
        vec!["host3".to_string(), "host2".to_string(), "host9".to_string()],
    );
    RoutingHandler::new(ConnectionRegistry::new(nodes, groups))
}

#[test]
fn test_server_answers_routing_questions() {
    let server = TestServer::start(cluster());

    let resp = get_json(&server.url("/v1/primary"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "host1");

    let resp = get_json(&server.url("/v1/primaries"));
    assert_eq!(resp.body, serde_json::json!(["host1"]));

    let resp = get_json(&server.url("/v1/standbys?group=replicas"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, serde_json::json!(["host2", "host3"]));

    let resp = get_json(&server.url("/v1/primary?group=replicas"));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, "");

    let resp = get_json(&server.url("/v1/host2/status"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "standby");

    let resp = get_json(&server.url("/v1/nobody/status"));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, "invalid");
}

#[test]
fn test_server_availability_codes() {
    let server = TestServer::start(cluster());

    let resp = get_json(&server.url("/v1/host1/availability"));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "ok");

    let resp = get_json(&server.url("/v1/host2/availability?limit=10"));
    assert_eq!(resp.status, 408);
    assert_eq!(resp.body, "exceeded (10.000000,20.000000)");

    let resp = get_json(&server.url("/v1/host2/availability?limit="));
    assert_eq!(resp.status, 200);

    let resp = get_json(&server.url("/v1/nobody/availability"));
    assert_eq!(resp.status, 417);
    assert_eq!(resp.body, "invalid");

    let resp = get_json(&server.url("/v1/host1/availability?limit=later"));
    assert_eq!(resp.status, 400);
}

#[test]
fn test_server_health_and_metrics() {
    let server = TestServer::start(cluster());
    let client = reqwest::blocking::Client::new();

    let resp = client.get(server.url("/health")).send().unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().unwrap(), "OK");

    // Issue at least one role check before scraping
    let _ = get_json(&server.url("/v1/primaries"));
    let resp = client.get(server.url("/metrics")).send().unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let text = resp.text().unwrap();
    assert!(text.contains("pgroute66_probes_total"));
    assert!(text.contains("pgroute66_http_requests_total"));

    let resp = client.post(server.url("/v1/primaries")).send().unwrap();
    assert_eq!(resp.status().as_u16(), 405);
}
