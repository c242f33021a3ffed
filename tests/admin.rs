//! Admin endpoint behavior over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use spectatord::admin::AdminServer;
use spectatord::{Config, Id, Registry, Tags};

struct Fixture {
    registry: Arc<Registry>,
    admin: AdminServer,
    client: reqwest::blocking::Client,
}

impl Fixture {
    fn new() -> Self {
        let registry = Arc::new(Registry::new(Config::default()));
        let admin = AdminServer::start(registry.clone(), 0).unwrap();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Self {
            registry,
            admin,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.admin.port())
    }

    fn get_json(&self, path: &str) -> serde_json::Value {
        self.client
            .get(self.url(path))
            .send()
            .unwrap()
            .json()
            .unwrap()
    }
}

#[test]
fn root_describes_the_service() {
    let fixture = Fixture::new();
    let body = fixture.get_json("/");
    assert!(body["description"]
        .as_str()
        .unwrap()
        .contains("Admin Server"));
    assert!(body["endpoints"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("/config")));
}

#[test]
fn config_reports_effective_settings() {
    let fixture = Fixture::new();
    let body = fixture.get_json("/config");
    assert_eq!(body["batch_size"], 10_000);
    assert_eq!(body["connect_timeout"], 2_000);
    assert_eq!(body["read_timeout"], 3_000);
    assert_eq!(body["meter_ttl"], 900_000);
    assert_eq!(body["age_gauge_limit"], 1_000);
    assert_eq!(body["status_metrics_enabled"], true);
}

#[test]
fn common_tags_round_trip() {
    let fixture = Fixture::new();

    let response = fixture
        .client
        .post(fixture.url("/config/common_tags"))
        .body(r#"{"mantisJobId": "job-1"}"#)
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let config = fixture.get_json("/config");
    assert_eq!(config["common_tags"]["mantisJobId"], "job-1");

    // an empty value deletes the tag
    let response = fixture
        .client
        .post(fixture.url("/config/common_tags"))
        .body(r#"{"mantisJobId": ""}"#)
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let config = fixture.get_json("/config");
    assert!(config["common_tags"].get("mantisJobId").is_none());
}

#[test]
fn common_tags_rejects_bad_requests() {
    let fixture = Fixture::new();
    let post = |body: &str| {
        fixture
            .client
            .post(fixture.url("/config/common_tags"))
            .body(body.to_string())
            .send()
            .unwrap()
            .status()
            .as_u16()
    };
    assert_eq!(post("not json"), 400);
    assert_eq!(post(r#"["array"]"#), 400);
    assert_eq!(post(r#"{"nf.app": "www"}"#), 400);
    assert_eq!(post(r#"{"mantisJobId": 42}"#), 400);
}

#[test]
fn metrics_lists_meters_by_type() {
    let fixture = Fixture::new();
    fixture
        .registry
        .get_counter(Id::of("requests", Tags::of(&[("zone", "1a")])))
        .add(3.0);
    fixture
        .registry
        .get_gauge(Id::of("fuel.level", Tags::new()))
        .set(0.5);

    let body = fixture.get_json("/metrics");
    let counters = body["counters"].as_array().unwrap();
    let requests = counters
        .iter()
        .find(|c| c["name"] == "requests")
        .expect("counter should be listed");
    assert_eq!(requests["tags"]["zone"], "1a");
    assert_eq!(requests["value"], "3");

    assert_eq!(body["gauges"].as_array().unwrap().len(), 1);
    assert_eq!(body["stats"]["gauges.size"], 1);
    assert!(body["stats"]["total.size"].as_u64().unwrap() >= 2);
}

#[test]
fn delete_gauge_then_repeat_is_not_found() {
    let fixture = Fixture::new();
    fixture
        .registry
        .get_gauge(Id::of("g.one", Tags::of(&[("k", "v")])))
        .set(1.0);

    let url = fixture.url("/metrics/g/g.one,k=v");
    assert_eq!(
        fixture.client.delete(&url).send().unwrap().status().as_u16(),
        200
    );
    assert_eq!(
        fixture.client.delete(&url).send().unwrap().status().as_u16(),
        404
    );
}

#[test]
fn delete_with_mangled_tags_is_not_found() {
    let fixture = Fixture::new();
    fixture
        .registry
        .get_gauge(Id::of("g.two", Tags::of(&[("k", "v")])))
        .set(1.0);

    // the trailing segment mangles the tag scan, so nothing matches
    let url = fixture.url("/metrics/g/g.two,k=v,oops");
    assert_eq!(
        fixture.client.delete(&url).send().unwrap().status().as_u16(),
        404
    );
}

#[test]
fn delete_all_age_gauges() {
    let fixture = Fixture::new();
    fixture
        .registry
        .get_age_gauge(Id::of("a.one", Tags::new()))
        .update_last_success(1);
    fixture
        .registry
        .get_age_gauge(Id::of("a.two", Tags::new()))
        .update_last_success(1);

    let response = fixture
        .client
        .delete(fixture.url("/metrics/A"))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(fixture.registry.age_gauges().is_empty());
}

#[test]
fn unknown_paths_are_not_found() {
    let fixture = Fixture::new();
    let response = fixture
        .client
        .get(fixture.url("/nope"))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
