//! Live tests against a running router

use crate::{get_json, get_router_config, skip_if_not_enabled};

#[test]
fn test_exactly_one_primary() {
    skip_if_not_enabled!();

    let config = get_router_config();
    let resp = get_json(&format!("{}/v1/primary", config.url));
    assert_eq!(resp.status, 200, "cluster should have exactly one primary");
    assert_eq!(resp.body, config.primary.as_str());
}

#[test]
fn test_lists_are_sorted_and_disjoint() {
    skip_if_not_enabled!();

    let config = get_router_config();
    let primaries = get_json(&format!("{}/v1/primaries", config.url));
    let standbys = get_json(&format!("{}/v1/standbys?group=all", config.url));
    assert_eq!(primaries.status, 200);
    assert_eq!(standbys.status, 200);

    let to_names = |v: &serde_json::Value| -> Vec<String> {
        serde_json::from_value(v.clone()).expect("list of names")
    };
    let primaries = to_names(&primaries.body);
    let standbys = to_names(&standbys.body);

    let mut sorted = standbys.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(standbys, sorted);
    assert!(primaries.iter().all(|p| !standbys.contains(p)));
    assert!(standbys.contains(&config.standby));
}

#[test]
fn test_node_status() {
    skip_if_not_enabled!();

    let config = get_router_config();
    let resp = get_json(&format!("{}/v1/{}/status", config.url, config.primary));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "primary");

    let resp = get_json(&format!("{}/v1/{}/status", config.url, config.standby));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "standby");

    let resp = get_json(&format!("{}/v1/not_configured/status", config.url));
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body, "invalid");
}

#[test]
fn test_availability_refreshes_heartbeat() {
    skip_if_not_enabled!();

    let config = get_router_config();
    // The first call creates the table if needed; the second sees a fresh heartbeat
    let _ = get_json(&format!("{}/v1/{}/availability", config.url, config.primary));
    let resp = get_json(&format!(
        "{}/v1/{}/availability?limit=5",
        config.url, config.primary
    ));
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "ok");

    let resp = get_json(&format!("{}/v1/not_configured/availability", config.url));
    assert_eq!(resp.status, 417);
    assert_eq!(resp.body, "invalid");
}
