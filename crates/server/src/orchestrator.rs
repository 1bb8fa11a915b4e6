//! Request orchestrator (SPEC_FULL §4.H): the runtime home of the
//! declarative gateway engine. Generalizes `dispatch.rs`'s model-fallback /
//! retry loop (translate → apply rules → execute → classify, the
//! non-stream keepalive trick, the streaming bootstrap-retry budget) from a
//! fixed provider-format pivot into a route-matched, plugin-driven pipeline
//! over arbitrary declarative upstreams.

use crate::AppState;
use crate::builtin_plugins::BuiltinTransformerPlugin;
use crate::streaming::build_sse_response;
use prism_core::config::Config;
use prism_core::error::ProxyError;
use prism_core::gateway::failover::{self, RuntimeUpstream};
use prism_core::gateway::modify;
use prism_core::gateway::plugin::{Plugin, PluginChain, PluginContext};
use prism_core::gateway::route::RouteTable;
use prism_core::gateway::selector::{self, Candidate};
use prism_core::gateway::sse_exec::{Frame, StreamExecutor};
use prism_core::gateway::{builtin, expr::Context as ExprContext};
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use prism_types::{PluginRef, Route, StreamTransformRules, TransformerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A snapshot of the declarative gateway, rebuilt wholesale on every config
/// reload and published through an `ArcSwap` so in-flight requests keep the
/// snapshot they started with (SPEC_FULL §5).
pub struct GatewaySnapshot {
    table: RouteTable,
    upstreams: HashMap<String, Vec<Arc<RuntimeUpstream>>>,
    global_plugins: Vec<PluginRef>,
    transformer_configs: HashMap<String, TransformerConfig>,
}

impl GatewaySnapshot {
    pub fn build(config: &Config) -> Self {
        let mut upstreams = HashMap::new();
        for route in &config.routes {
            let runtime: Vec<Arc<RuntimeUpstream>> = route
                .upstreams
                .iter()
                .cloned()
                .map(|u| Arc::new(RuntimeUpstream::new(u)))
                .collect();
            upstreams.insert(route.path.clone(), runtime);
        }
        Self {
            table: RouteTable::new(config.routes.clone()),
            upstreams,
            global_plugins: config.plugins.clone(),
            transformer_configs: builtin::builtin_transformer_configs(),
        }
    }
}

pub struct GatewayState {
    snapshot: arc_swap::ArcSwap<GatewaySnapshot>,
    client: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: &Config) -> Self {
        Self {
            snapshot: arc_swap::ArcSwap::from_pointee(GatewaySnapshot::build(config)),
            client: reqwest::Client::new(),
        }
    }

    pub fn rebuild(&self, config: &Config) {
        self.snapshot.store(Arc::new(GatewaySnapshot::build(config)));
    }
}

/// Axum fallback handler: entry point for every request the static
/// `/v1/*`/`/admin/*`/`/api/dashboard/*` routers don't claim.
pub async fn handle(
    axum::extract::State(state): axum::extract::State<AppState>,
    req: Request,
) -> Response {
    match orchestrate(&state, req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

struct ResolvedRoute<'a> {
    route: &'a Route,
    rewritten_path: String,
    upstreams: &'a [Arc<RuntimeUpstream>],
}

async fn orchestrate(state: &AppState, req: Request) -> Result<Response, ProxyError> {
    let start = Instant::now();
    let config = state.config.load();
    let snapshot = state.gateway.snapshot.load();

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let mut incoming_headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();

    let matched = snapshot
        .table
        .match_path(&path)
        .ok_or_else(|| ProxyError::RouteNotFound(path.clone()))?;
    let route = matched.route;
    let upstreams = snapshot
        .upstreams
        .get(&route.path)
        .map(|v| v.as_slice())
        .unwrap_or(&[]);
    if upstreams.is_empty() {
        return Err(ProxyError::RouteNotFound(path.clone()));
    }
    let resolved = ResolvedRoute {
        route,
        rewritten_path: matched.rewritten_path,
        upstreams,
    };

    if let Some(auth) = &route.auth
        && auth.enabled
    {
        let token = incoming_headers
            .get("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .or_else(|| incoming_headers.get("x-api-key").map(|s| s.as_str()));
        match token {
            Some(t) if auth.tokens.iter().any(|k| k == t) => {}
            _ => return Err(ProxyError::AuthRejected("invalid or missing token".into())),
        }
        // Consumed by this route's own auth check; strip before the request
        // continues downstream so the upstream never sees the client's token.
        incoming_headers.remove("authorization");
        incoming_headers.remove("x-api-key");
    }

    // Bounded body capture (SPEC_FULL §4.H step 2).
    let limit = config.body_limit_mb * 1024 * 1024;
    let body_bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| ProxyError::BodyTooLarge(limit + 1, limit))?;
    let body_value: serde_json::Value =
        serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);
    let model = body_value
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let stream = body_value
        .get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // Route-level modification rules + global/route plugin chain, applied
    // once before upstream selection (SPEC_FULL §4.H step 3).
    let mut ctx = PluginContext {
        headers: incoming_headers,
        body: body_value,
        path: resolved.rewritten_path.clone(),
        ..Default::default()
    };

    if let Some(rules) = &route.request {
        let expr_ctx = expr_context(&ctx, &method, &resolved.rewritten_path);
        modify::apply(rules, &mut ctx.headers, &mut ctx.body, &expr_ctx)
            .map_err(|e| ProxyError::ExpressionError(e.to_string()))?;
    }

    let mut base_refs = snapshot.global_plugins.clone();
    base_refs.extend(route.plugins.clone());
    let base_plugins = resolve_chain(
        &base_refs,
        &snapshot.transformer_configs,
        &model,
        body_bytes.clone(),
        stream,
    );
    base_plugins.process_request(&mut ctx).await;

    if let Some(short_circuit) = ctx.short_circuit_response.take() {
        return Ok(build_response(short_circuit, 200, ctx.headers));
    }

    // Attempt loop over the route's upstreams (SPEC_FULL §4.E).
    let failover_policy = &route.failover;
    let mut attempted: Vec<usize> = Vec::new();
    let mut skipped: Vec<usize> = Vec::new();
    let mut last_error: Option<ProxyError> = None;
    let mut rng = rand::rng();
    // Streaming connects get a separate, usually tighter, retry budget than
    // the main failover loop: once headers and the first byte are flowing we
    // can no longer retry without corrupting an already-started response, so
    // giving up on a slow/unreachable upstream quickly matters more here than
    // spending the full failure-threshold budget finding out.
    let bootstrap_limit = config.streaming.bootstrap_retries;
    let mut bootstrap_attempts: u32 = 0;

    loop {
        let candidates: Vec<Candidate<usize>> = resolved
            .upstreams
            .iter()
            .enumerate()
            .filter(|(i, _)| !attempted.contains(i) && !skipped.contains(i))
            .map(|(i, u)| Candidate {
                weight: u.upstream.weight,
                priority: u.upstream.priority,
                slow_start_recovery_time: u.slow_start_recovery_time(),
                handle: i,
            })
            .collect();

        let Some(picked) = selector::select(&candidates, &failover_policy.slow_start, Instant::now(), &mut rng)
        else {
            break;
        };
        let index = picked.handle;
        let runtime = &resolved.upstreams[index];

        let status = runtime.status();
        if status == prism_types::UpstreamStatus::Unhealthy {
            let elapsed = runtime.time_since_last_failure(Instant::now());
            let recovery_due = elapsed
                .map(|d| d >= Duration::from_millis(failover_policy.recovery_interval_ms))
                .unwrap_or(true);
            if !recovery_due {
                skipped.push(index);
                continue;
            }
            runtime.mark_half_open();
        }

        attempted.push(index);
        let timeout = failover::timeout_for_status(failover_policy, runtime.status());

        // Upstream-level plugins + request rules, on a per-attempt copy.
        let mut attempt_ctx = PluginContext {
            headers: ctx.headers.clone(),
            body: ctx.body.clone(),
            path: ctx.path.clone(),
            ..Default::default()
        };
        if let Some(rules) = &runtime.upstream.request {
            let expr_ctx = expr_context(&attempt_ctx, &method, &ctx.path);
            modify::apply(rules, &mut attempt_ctx.headers, &mut attempt_ctx.body, &expr_ctx)
                .map_err(|e| ProxyError::ExpressionError(e.to_string()))?;
        }
        let upstream_plugins = resolve_chain(
            &runtime.upstream.plugins,
            &snapshot.transformer_configs,
            &model,
            body_bytes.clone(),
            stream,
        );
        upstream_plugins.process_request(&mut attempt_ctx).await;
        if let Some(short_circuit) = attempt_ctx.short_circuit_response.take() {
            return Ok(build_response(short_circuit, 200, attempt_ctx.headers));
        }

        let url = format!("{}{}", runtime.upstream.url.trim_end_matches('/'), resolved.rewritten_path);
        let mut builder = state.gateway.client.post(&url).timeout(timeout);
        for (k, v) in &attempt_ctx.headers {
            builder = builder.header(k, v);
        }
        let payload = serde_json::to_vec(&attempt_ctx.body).unwrap_or_default();
        let send_result = builder.body(payload).send().await;

        let http_response = match send_result {
            Ok(resp) => resp,
            Err(e) => {
                runtime.on_failure(failover_policy, Instant::now());
                last_error = Some(ProxyError::from(e));
                if stream {
                    bootstrap_attempts += 1;
                    if bootstrap_attempts > bootstrap_limit {
                        tracing::warn!(bootstrap_limit, "streaming bootstrap retry limit reached, giving up");
                        return Err(last_error.unwrap_or_else(|| ProxyError::AllUpstreamsExhausted {
                            route: route.path.clone(),
                            last_error: "streaming bootstrap retries exhausted".to_string(),
                        }));
                    }
                }
                backoff_between_rounds(failover_policy, attempted.len()).await;
                continue;
            }
        };

        let upstream_status = http_response.status().as_u16();
        if upstream_status >= 400 {
            let retryable = failover::is_retryable_status(failover_policy, upstream_status);
            let upstream_body = http_response.text().await.unwrap_or_default();
            if retryable {
                runtime.on_failure(failover_policy, Instant::now());
                last_error = Some(ProxyError::Upstream {
                    status: upstream_status,
                    body: upstream_body,
                    retry_after_secs: None,
                });
                backoff_between_rounds(failover_policy, attempted.len()).await;
                continue;
            }
            runtime.on_failure(failover_policy, Instant::now());
            return Err(ProxyError::UpstreamTerminalStatus {
                status: upstream_status,
                body: upstream_body,
            });
        }

        let restored = runtime.on_success(failover_policy, Instant::now());
        let _ = failover::classify_attempt(true, restored);
        state.metrics.record_latency_ms(start.elapsed().as_millis());

        let combined_plugins = {
            let mut plugins = base_plugins.plugins().to_vec();
            plugins.extend(upstream_plugins.plugins().iter().cloned());
            PluginChain::new(plugins)
        };

        attempt_ctx.headers.insert("x-upstream-status".into(), upstream_status.to_string());

        if stream {
            return run_stream(state, route, http_response, attempt_ctx, combined_plugins).await;
        }
        let keepalive_secs = config.non_stream_keepalive_secs;
        return run_non_stream(http_response, attempt_ctx, combined_plugins, route, keepalive_secs).await;
    }

    Err(last_error.unwrap_or_else(|| ProxyError::AllUpstreamsExhausted {
        route: route.path.clone(),
        last_error: "no upstream available".to_string(),
    }))
}

fn expr_context(ctx: &PluginContext, method: &str, path: &str) -> ExprContext {
    let mut e = ctx.expr_context(method);
    e.url.pathname = path.to_string();
    e
}

fn resolve_chain(
    refs: &[PluginRef],
    transformer_configs: &HashMap<String, TransformerConfig>,
    model: &str,
    original_request: Bytes,
    stream: bool,
) -> PluginChain {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    for r in refs {
        let name = match r {
            PluginRef::Name(name) => name.clone(),
            PluginRef::Descriptor { .. } => continue,
        };
        let Some((from, to)) = builtin::builtin_format_pair(&name) else {
            continue;
        };
        let config = transformer_configs
            .get(&name)
            .cloned()
            .unwrap_or_else(|| TransformerConfig {
                name: name.clone(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                request: None,
                response: Vec::new(),
            });
        let translators = Arc::new(prism_translator::build_registry());
        plugins.push(Arc::new(BuiltinTransformerPlugin::new(
            config,
            from,
            to,
            translators,
            model.to_string(),
            original_request.to_vec(),
            stream,
        )) as Arc<dyn Plugin>);
    }
    PluginChain::new(plugins)
}

async fn backoff_between_rounds(policy: &prism_types::FailoverPolicy, rounds_tried: usize) {
    let backoff = failover::exponential_backoff_with_jitter(rounds_tried as u32, &policy.backoff);
    tokio::time::sleep(backoff).await;
}

fn build_response(
    body: serde_json::Value,
    status: u16,
    headers: HashMap<String, String>,
) -> Response {
    let mut builder = axum::http::Response::builder()
        .status(axum::http::StatusCode::from_u16(status).unwrap_or(axum::http::StatusCode::OK))
        .header(axum::http::header::CONTENT_TYPE, "application/json");
    for (k, v) in &headers {
        if k == "x-upstream-status" {
            continue;
        }
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| axum::http::Response::new(Body::empty()))
        .into_response()
}

async fn run_non_stream(
    http_response: reqwest::Response,
    ctx: PluginContext,
    plugins: PluginChain,
    route: &Route,
    keepalive_secs: u64,
) -> Result<Response, ProxyError> {
    let status = http_response.status().as_u16();

    if keepalive_secs == 0 {
        let text = http_response.text().await.map_err(ProxyError::from)?;
        return finish_non_stream(status, text, ctx, plugins, &route.response).await;
    }

    // Upstream headers are already in, but the body may take a while to
    // arrive — race it against a keepalive timer so the client's connection
    // doesn't look dead while a slow/streaming-only upstream buffers.
    let (tx, rx) = tokio::sync::oneshot::channel::<Result<String, ProxyError>>();
    tokio::spawn(async move {
        let result = http_response.text().await.map_err(ProxyError::from);
        let _ = tx.send(result);
    });
    let mut rx = Box::pin(rx);

    tokio::select! {
        result = &mut rx => {
            match result {
                Ok(text_result) => finish_non_stream(status, text_result?, ctx, plugins, &route.response).await,
                Err(_) => Err(ProxyError::Network("upstream response task dropped".into())),
            }
        }
        _ = tokio::time::sleep(Duration::from_secs(keepalive_secs)) => {
            tracing::debug!("non-stream request exceeded {keepalive_secs}s, enabling keepalive");
            let body = build_keepalive_body(rx, keepalive_secs, ctx, plugins, route.response.clone(), status);
            Ok(axum::http::Response::builder()
                .header(axum::http::header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap_or_else(|_| axum::http::Response::new(Body::empty()))
                .into_response())
        }
    }
}

async fn finish_non_stream(
    status: u16,
    text: String,
    mut ctx: PluginContext,
    plugins: PluginChain,
    route_response: &[prism_types::ResponseRule],
) -> Result<Response, ProxyError> {
    ctx.body = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);

    for rule in route_response {
        if !response_matches(rule, &ctx.headers) {
            continue;
        }
        if let Some(rules) = &rule.rules.default {
            let expr_ctx = ctx.expr_context("");
            modify::apply(rules, &mut ctx.headers, &mut ctx.body, &expr_ctx)
                .map_err(|e| ProxyError::ExpressionError(e.to_string()))?;
        }
        break;
    }

    plugins.process_response(&mut ctx).await;

    Ok(build_response(ctx.body, status, ctx.headers))
}

/// A chunked body that emits periodic whitespace (valid leading JSON
/// whitespace, silently skipped by parsers) while the real upstream body is
/// still in flight, then the fully-translated response once it lands.
fn build_keepalive_body(
    rx: std::pin::Pin<Box<tokio::sync::oneshot::Receiver<Result<String, ProxyError>>>>,
    interval_secs: u64,
    ctx: PluginContext,
    plugins: PluginChain,
    route_response: Vec<prism_types::ResponseRule>,
    status: u16,
) -> Body {
    struct KeepaliveState {
        rx: Option<std::pin::Pin<Box<tokio::sync::oneshot::Receiver<Result<String, ProxyError>>>>>,
        interval_secs: u64,
        ctx: Option<PluginContext>,
        plugins: Option<PluginChain>,
        route_response: Vec<prism_types::ResponseRule>,
        status: u16,
    }

    let state = KeepaliveState {
        rx: Some(rx),
        interval_secs,
        ctx: Some(ctx),
        plugins: Some(plugins),
        route_response,
        status,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        let mut rx = state.rx.take()?;

        tokio::select! {
            result = &mut rx => {
                let ctx = state.ctx.take().unwrap_or_default();
                let plugins = state.plugins.take().unwrap_or_default();
                let data = match result {
                    Ok(Ok(text)) => {
                        match finish_non_stream(state.status, text, ctx, plugins, &state.route_response).await {
                            Ok(resp) => response_to_json_bytes(resp).await,
                            Err(e) => keepalive_error_json(&e.to_string()),
                        }
                    }
                    Ok(Err(e)) => keepalive_error_json(&e.to_string()),
                    Err(_) => keepalive_error_json("internal error"),
                };
                // rx stays None; the stream ends on the next poll.
                Some((Ok::<Bytes, std::convert::Infallible>(Bytes::from(data)), state))
            }
            _ = tokio::time::sleep(Duration::from_secs(state.interval_secs)) => {
                state.rx = Some(rx);
                Some((Ok(Bytes::from_static(b" ")), state))
            }
        }
    });

    Body::from_stream(stream)
}

async fn response_to_json_bytes(resp: Response) -> String {
    let body = resp.into_body();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => keepalive_error_json("failed to buffer response"),
    }
}

fn keepalive_error_json(msg: &str) -> String {
    serde_json::json!({ "error": { "message": msg, "type": "server_error" } }).to_string()
}

fn response_matches(rule: &prism_types::ResponseRule, headers: &HashMap<String, String>) -> bool {
    if let Some(pattern) = &rule.match_on.status
        && let Some(status) = headers.get("x-upstream-status")
        && let Ok(re) = regex::Regex::new(pattern)
        && !re.is_match(status)
    {
        return false;
    }
    rule.match_on
        .headers
        .iter()
        .all(|(k, v)| headers.get(k).map(|actual| actual == v).unwrap_or(false))
}

async fn run_stream(
    state: &AppState,
    route: &Route,
    http_response: reqwest::Response,
    ctx: PluginContext,
    plugins: PluginChain,
) -> Result<Response, ProxyError> {
    let rules = route
        .response
        .iter()
        .find(|r| response_matches(r, &ctx.headers))
        .and_then(|r| r.rules.stream.clone())
        .unwrap_or_else(StreamTransformRules::default);

    let byte_stream = http_response.bytes_stream();
    let sse_events = prism_provider::sse::parse_sse_stream(byte_stream);
    let keepalive = state.config.load().streaming.keepalive_seconds;

    let output = futures::stream::unfold(
        (sse_events, StreamExecutor::new(rules, plugins), None::<prism_provider::sse::SseEvent>),
        move |(mut events, mut exec, lookahead)| async move {
            loop {
                let current = match lookahead {
                    Some(ev) => ev,
                    None => match events.next_checked().await {
                        Ok(Some(ev)) => ev,
                        Ok(None) => {
                            let flushed = exec.flush().await;
                            if flushed.is_empty() {
                                return None;
                            }
                            return Some((Ok(flushed.join("\n")), (events, exec, None)));
                        }
                        Err(e) => return Some((Err(e), (events, exec, None))),
                    },
                };
                let next = events.next_checked().await;
                let (next_lookahead, is_last) = match next {
                    Ok(Some(ev)) => (Some(ev), false),
                    Ok(None) => (None, true),
                    Err(e) => return Some((Err(e), (events, exec, None))),
                };
                let frame = Frame {
                    event_type: current.event,
                    data: current.data,
                };
                let out = exec.process_frame(frame, is_last).await;
                if out.is_empty() {
                    return Some((Ok(String::new()), (events, exec, next_lookahead)));
                }
                return Some((Ok(out.join("\n")), (events, exec, next_lookahead)));
            }
        },
    );

    Ok(build_sse_response(output, keepalive).into_response())
}

trait SseStreamExt {
    fn next_checked(
        &mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<prism_provider::sse::SseEvent>, ProxyError>> + Send + '_>>;
}

impl<S> SseStreamExt for std::pin::Pin<Box<S>>
where
    S: tokio_stream::Stream<Item = Result<prism_provider::sse::SseEvent, ProxyError>> + Send + ?Sized,
{
    fn next_checked(
        &mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<prism_provider::sse::SseEvent>, ProxyError>> + Send + '_>> {
        Box::pin(async move {
            use tokio_stream::StreamExt;
            match self.next().await {
                Some(Ok(ev)) => Ok(Some(ev)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        })
    }
}
