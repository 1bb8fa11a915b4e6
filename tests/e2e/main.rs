//! End-to-end tests for the declarative gateway (SPEC_FULL §8): the six
//! literal testable properties, each exercised either directly against the
//! `prism-core` gateway engine or through the full router via
//! `tower::ServiceExt::oneshot`, following the harness pattern in
//! `crates/server/tests/dashboard_tests.rs`.

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use prism_core::config::Config;
use prism_core::cost::CostCalculator;
use prism_core::gateway::selector::{self, Candidate};
use prism_core::gateway::sse_exec::{Frame, StreamExecutor};
use prism_core::metrics::Metrics;
use prism_core::rate_limit::RateLimiter;
use prism_core::request_log::RequestLogStore;
use prism_provider::build_registry;
use prism_provider::routing::CredentialRouter;
use prism_server::orchestrator::GatewayState;
use prism_server::{AppState, build_router};
use prism_types::{
    AuthPolicy, BackoffPolicy, FailoverPolicy, FieldRules, ModificationRules, PhaseDetection,
    Route, StreamTransformRules, Upstream,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request as MockRequest, ResponseTemplate};

fn state_for_routes(routes: Vec<Route>) -> AppState {
    let config = Config {
        routes,
        ..Config::default()
    };
    let config_arc = Arc::new(ArcSwap::new(Arc::new(config.clone())));
    let credential_router = Arc::new(CredentialRouter::new(
        prism_core::config::RoutingStrategy::RoundRobin,
    ));
    credential_router.update_from_config(&config);
    let gateway = Arc::new(GatewayState::new(&config));

    AppState {
        config: config_arc,
        router: credential_router.clone(),
        executors: Arc::new(build_registry(None)),
        translators: Arc::new(prism_translator::build_registry()),
        metrics: Arc::new(Metrics::new()),
        request_logs: Arc::new(RequestLogStore::new(1000)),
        config_path: Arc::new(Mutex::new("config.yaml".to_string())),
        credential_router,
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        cost_calculator: Arc::new(CostCalculator::new(&config.model_prices)),
        gateway,
        start_time: Instant::now(),
    }
}

fn post(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(json!({"model": "x"}).to_string()))
        .unwrap()
}

/// Scenario 1: weighted selection within one priority band. A (weight 900)
/// vs B (weight 100), 10,000 draws, A's share must land in [8700, 9300].
#[test]
fn weighted_selection_within_priority_band() {
    let candidates = vec![
        Candidate {
            weight: 900,
            priority: 1,
            slow_start_recovery_time: None,
            handle: "a",
        },
        Candidate {
            weight: 100,
            priority: 1,
            slow_start_recovery_time: None,
            handle: "b",
        },
    ];
    let policy = prism_types::SlowStartPolicy::default();
    let mut rng = rand::rng();
    let mut a_count = 0;
    for _ in 0..10_000 {
        if let Some(picked) = selector::select(&candidates, &policy, Instant::now(), &mut rng)
            && picked.handle == "a"
        {
            a_count += 1;
        }
    }
    assert!(
        (8700..=9300).contains(&a_count),
        "a_count was {a_count}, expected within [8700, 9300]"
    );
}

/// Scenario 2: priority override. A sits at priority 2, B at priority 1; A
/// must never be picked while B (any positive weight) is available.
#[test]
fn priority_band_overrides_weight() {
    let candidates = vec![
        Candidate {
            weight: 100,
            priority: 2,
            slow_start_recovery_time: None,
            handle: "a",
        },
        Candidate {
            weight: 50,
            priority: 1,
            slow_start_recovery_time: None,
            handle: "b",
        },
    ];
    let policy = prism_types::SlowStartPolicy::default();
    let mut rng = rand::rng();
    let mut a_count = 0;
    for _ in 0..100 {
        if let Some(picked) = selector::select(&candidates, &policy, Instant::now(), &mut rng)
            && picked.handle == "a"
        {
            a_count += 1;
        }
    }
    assert_eq!(a_count, 0);
}

/// Scenario 3: retry then recover within a single client request. The
/// priority-1 upstream returns a retryable 502 on its only attempt; the
/// orchestrator falls through to the priority-2 upstream in the same
/// request, which succeeds.
#[tokio::test]
async fn retry_then_recover_within_one_request() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/scenario3/chat"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/scenario3/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&secondary)
        .await;

    let route = Route {
        path: "/scenario3".to_string(),
        upstreams: vec![
            Upstream {
                url: primary.uri(),
                priority: 1,
                ..Default::default()
            },
            Upstream {
                url: secondary.uri(),
                priority: 2,
                ..Default::default()
            },
        ],
        failover: FailoverPolicy {
            backoff: BackoffPolicy {
                base_ms: 5,
                max_ms: 20,
                factor: 0.1,
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let state = state_for_routes(vec![route]);
    let response = build_router(state)
        .oneshot(post("/scenario3/chat"))
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);

    // `primary`/`secondary` verify their `.expect(1)` call counts on drop.
}

/// Scenario 4: circuit open / fall-through. Three separate client requests
/// each hit the (terminal, non-retryable) priority-1 upstream and fail on
/// their own; the third failure trips the circuit. A fourth request, issued
/// well within `recovery_interval_ms`, must skip the now-UNHEALTHY upstream
/// entirely and land on the priority-2 upstream instead.
#[tokio::test]
async fn circuit_opens_then_falls_through() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/scenario4/chat"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/scenario4/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&secondary)
        .await;

    let route = Route {
        path: "/scenario4".to_string(),
        upstreams: vec![
            Upstream {
                url: primary.uri(),
                priority: 1,
                ..Default::default()
            },
            Upstream {
                url: secondary.uri(),
                priority: 2,
                ..Default::default()
            },
        ],
        failover: FailoverPolicy {
            backoff: BackoffPolicy {
                base_ms: 5,
                max_ms: 20,
                factor: 0.1,
            },
            ..Default::default()
        },
        ..Default::default()
    };

    let state = state_for_routes(vec![route]);
    let router_for = |s: &AppState| build_router(s.clone());

    for _ in 0..3 {
        let response = router_for(&state)
            .oneshot(post("/scenario4/chat"))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    let response = router_for(&state)
        .oneshot(post("/scenario4/chat"))
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);

    // `primary`'s `.expect(3)` and `secondary`'s `.expect(1)` verify on drop.
}

/// Scenario 5: SSE end-phase multi-event fan-out. Three plain chunks pass
/// through untouched; the frame that flips `finishReason` truthy triggers
/// the `end` rule's two-element `__multi_events` fan-out, for 5 total
/// output frames.
#[tokio::test]
async fn sse_end_phase_fans_out_multi_events() {
    let rules = StreamTransformRules {
        phase_detection: Some(PhaseDetection {
            is_end: Some("body.finishReason".to_string()),
            ..Default::default()
        }),
        end: Some(ModificationRules {
            headers: None,
            body: Some(FieldRules {
                add: HashMap::from([(
                    "__multi_events".to_string(),
                    json!([{"type": "stream_delta", "final": true}, {"type": "stream_stop"}]),
                )]),
                ..Default::default()
            }),
        }),
        ..Default::default()
    };

    let mut exec = StreamExecutor::new(rules, Default::default());
    let frames = [
        json!({"text": "start"}).to_string(),
        json!({"text": "a"}).to_string(),
        json!({"text": "b"}).to_string(),
        json!({"text": "", "finishReason": "STOP"}).to_string(),
    ];

    let mut total = 0;
    for (i, data) in frames.iter().enumerate() {
        let is_last = i == frames.len() - 1;
        let out = exec
            .process_frame(
                Frame {
                    event_type: None,
                    data: data.clone(),
                },
                is_last,
            )
            .await;
        total += out.len();
    }

    assert_eq!(total, 5);
}

/// Scenario 6: header auth stripping. The client's `Authorization` header is
/// consumed by route-level auth and must not reach the upstream; other
/// headers pass through unchanged.
#[tokio::test]
async fn auth_header_is_stripped_before_forwarding() {
    let upstream = MockServer::start().await;

    struct NoAuthHeader;
    impl wiremock::Match for NoAuthHeader {
        fn matches(&self, request: &MockRequest) -> bool {
            !request.headers.contains_key("authorization")
        }
    }

    Mock::given(method("POST"))
        .and(path("/scenario6/chat"))
        .and(header("x-custom-test", "keep-me"))
        .and(NoAuthHeader)
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&upstream)
        .await;

    let route = Route {
        path: "/scenario6".to_string(),
        upstreams: vec![Upstream {
            url: upstream.uri(),
            ..Default::default()
        }],
        auth: Some(AuthPolicy {
            enabled: true,
            tokens: vec!["secret-token".to_string()],
        }),
        ..Default::default()
    };

    let state = state_for_routes(vec![route]);
    let request = Request::builder()
        .method("POST")
        .uri("/scenario6/chat")
        .header("content-type", "application/json")
        .header("authorization", "Bearer secret-token")
        .header("x-custom-test", "keep-me")
        .body(Body::from(json!({"model": "x"}).to_string()))
        .unwrap();

    let response = build_router(state)
        .oneshot(request)
        .await
        .expect("request failed");
    assert_eq!(response.status(), StatusCode::OK);

    // `upstream`'s `.expect(1)` (method + path + header match) verifies on drop.
}
