//! End-to-end tests: poll cycle into shared state, then the HTTP API.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tokio::sync::watch;
use tower::ServiceExt;

use taghub::config::TagHubConfig;
use taghub::events::EventCache;
use taghub::gateway::TagGateway;
use taghub::http::HttpServer;
use taghub::poller::PollScheduler;
use taghub::registry::TagRegistry;
use taghub::transport::{RegisterSource, TransportError};

/// Register source that replays canned responses.
struct ScriptedSource {
    responses: VecDeque<Result<Vec<u16>, TransportError>>,
}

impl RegisterSource for ScriptedSource {
    async fn read_registers(&mut self, _start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        match self.responses.pop_front() {
            Some(Ok(values)) => {
                assert_eq!(values.len(), count as usize, "script out of step");
                Ok(values)
            }
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Read("script exhausted".into())),
        }
    }
}

const CONFIG: &str = r#"{
    server: { packet_size: 5, polling_timeout_secs: 1, cache_max: 8 },
    serial: { port: "/dev/plc" },
    tags: {
        boiler_temp: { address: 10, type: "input" },
        boiler_ret: { address: 11, type: "input" },
        hall_motion: { address: 14, type: "input" },
        boiler_pump: { address: 30, type: "output" },
        hall_counter: { address: 40, type: "inputc" },
    }
}"#;

async fn polled_router(
    responses: Vec<Result<Vec<u16>, TransportError>>,
) -> (axum::Router, watch::Receiver<bool>) {
    let config: TagHubConfig = json5::from_str(CONFIG).unwrap();
    config.validate().unwrap();

    let registry = Arc::new(TagRegistry::from_config(&config));
    let events = Arc::new(EventCache::new(config.server.cache_max));

    let source = ScriptedSource {
        responses: responses.into(),
    };
    let mut scheduler =
        PollScheduler::from_config(&config, source, registry.clone(), events.clone());
    scheduler.poll_cycle().await;

    let gateway = Arc::new(TagGateway::new(registry, events, config));
    let (tx, rx) = watch::channel(false);
    (HttpServer::router(gateway, Arc::new(tx)), rx)
}

/// One full successful cycle: input span 10..=14 is one (10,5) read,
/// output (30,1), inputc (40,1).
fn happy_responses() -> Vec<Result<Vec<u16>, TransportError>> {
    vec![Ok(vec![215, 180, 0, 0, 1]), Ok(vec![1]), Ok(vec![9000])]
}

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        json!(null)
    } else {
        serde_json::from_slice(&bytes).unwrap_or(json!(null))
    };
    (status, value)
}

#[tokio::test]
async fn test_polled_values_visible_through_api() {
    let (router, _rx) = polled_router(happy_responses()).await;

    let (status, body) = get_json(&router, "/handlers/input/tags/boiler_temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!(215));
    assert!(body["updated_at"].is_i64());

    let (_, body) = get_json(&router, "/handlers/inputc/tags/hall_counter").await;
    assert_eq!(body["value"], json!(9000));
}

#[tokio::test]
async fn test_handlers_and_tag_listing() {
    let (router, _rx) = polled_router(happy_responses()).await;

    let (status, body) = get_json(&router, "/handlers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["input", "output", "inputc"]));

    let (_, body) = get_json(&router, "/handlers/input/tags").await;
    assert_eq!(body, json!(["boiler_ret", "boiler_temp", "hall_motion"]));

    let (status, _) = get_json(&router, "/handlers/bogus/tags").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_record_the_cycle_oldest_first() {
    let (router, _rx) = polled_router(happy_responses()).await;

    let (status, body) = get_json(&router, "/events").await;
    assert_eq!(status, StatusCode::OK);

    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["payload"]["group"], json!("input"));
    assert_eq!(events[0]["payload"]["status"], json!("ok"));
    assert_eq!(events[2]["payload"]["group"], json!("inputc"));
}

#[tokio::test]
async fn test_failed_reads_leave_tags_stale_but_api_alive() {
    let responses = vec![
        Err(TransportError::Read("line down".into())),
        Err(TransportError::Read("line down".into())),
        Err(TransportError::Read("line down".into())),
    ];
    let (router, _rx) = polled_router(responses).await;

    // Tags exist but have no values
    let (status, body) = get_json(&router, "/handlers/input/tags/boiler_temp").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!(null));

    // Failure events were recorded
    let (_, body) = get_json(&router, "/events").await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e["payload"]["status"] == json!("error")));
}

#[tokio::test]
async fn test_operator_write_wins_over_stale_poll() {
    let (router, _rx) = polled_router(happy_responses()).await;

    let response = router
        .clone()
        .oneshot(
            Request::post("/handlers/output/tags/boiler_pump?value=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, body) = get_json(&router, "/handlers/output/tags/boiler_pump").await;
    assert_eq!(body["value"], json!(0));
}

#[tokio::test]
async fn test_config_reflection_and_query_actions() {
    let (router, _rx) = polled_router(happy_responses()).await;

    let (status, body) = get_json(&router, "/handlers/input/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tags"]["boiler_temp"]["address"], json!(10));

    let (_, body) = get_json(&router, "/get?action=getJson").await;
    assert_eq!(body["tags"]["boiler_temp"], json!(215));

    let (_, body) = get_json(&router, "/get?action=listTags").await;
    assert_eq!(body["boiler"]["temp"], json!(215));
    assert_eq!(body["hall"]["counter"], json!(9000));
}

#[tokio::test]
async fn test_stop_server_flips_shutdown_flag() {
    let (router, rx) = polled_router(happy_responses()).await;

    let (status, _) = get_json(&router, "/get?action=stopServer").await;
    assert_eq!(status, StatusCode::OK);
    assert!(*rx.borrow());
}
