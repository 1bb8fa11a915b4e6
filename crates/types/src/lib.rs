//! Shared data model for the route-based gateway: routes, upstreams, declarative
//! modification rules, and the plugin/stream vocabulary. Consumed by `prism-core`
//! (expression engine, rule applier, selector, failover, plugin runtime, SSE
//! executor) and `prism-server` (orchestrator, config).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_weight() -> u32 {
    100
}

fn default_priority() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_recovery_interval_ms() -> u64 {
    5_000
}

fn default_recovery_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_slow_start_duration_ms() -> u64 {
    30_000
}

fn default_slow_start_initial_factor() -> f64 {
    0.1
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    0.2
}

/// A path-rewrite rule: `pattern` is a regex matched against the request path;
/// `replacement` follows `regex::Regex::replace` syntax (`$1`, `${name}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

/// A declarative binding of a path prefix to upstreams, rules, and plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    pub path: String,
    pub rewrites: Vec<RewriteRule>,
    pub request: Option<ModificationRules>,
    pub response: Vec<ResponseRule>,
    pub plugins: Vec<PluginRef>,
    pub upstreams: Vec<Upstream>,
    pub failover: FailoverPolicy,
    pub auth: Option<AuthPolicy>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            path: String::new(),
            rewrites: Vec::new(),
            request: None,
            response: Vec::new(),
            plugins: Vec::new(),
            upstreams: Vec::new(),
            failover: FailoverPolicy::default(),
            auth: None,
        }
    }
}

impl Route {
    /// Validate the invariants SPEC_FULL §3 requires of a route: at least one
    /// upstream, and every non-empty priority band carries positive total weight.
    pub fn validate(&self) -> Result<(), String> {
        if self.upstreams.is_empty() {
            return Err(format!("route '{}' has no upstreams", self.path));
        }
        let mut by_priority: HashMap<u32, u64> = HashMap::new();
        for u in &self.upstreams {
            *by_priority.entry(u.priority).or_insert(0) += u.weight as u64;
        }
        for (priority, total) in by_priority {
            if total == 0 {
                return Err(format!(
                    "route '{}' priority band {priority} has zero total weight",
                    self.path
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Static configuration of one upstream target within a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Upstream {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub request: Option<ModificationRules>,
    pub plugins: Vec<PluginRef>,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            url: String::new(),
            weight: default_weight(),
            priority: default_priority(),
            request: None,
            plugins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginRef {
    Name(String),
    Descriptor {
        path: String,
        #[serde(default)]
        options: serde_json::Value,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

fn default_true() -> bool {
    true
}

/// Per-route/per-upstream failover tuning. Defaults match SPEC_FULL §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverPolicy {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub slow_start: SlowStartPolicy,
    pub backoff: BackoffPolicy,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            healthy_threshold: default_healthy_threshold(),
            recovery_interval_ms: default_recovery_interval_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            slow_start: SlowStartPolicy::default(),
            backoff: BackoffPolicy::default(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowStartPolicy {
    #[serde(default = "default_slow_start_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_slow_start_initial_factor")]
    pub initial_weight_factor: f64,
}

impl Default for SlowStartPolicy {
    fn default() -> Self {
        Self {
            duration_ms: default_slow_start_duration_ms(),
            initial_weight_factor: default_slow_start_initial_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            max_ms: default_backoff_max_ms(),
            factor: default_backoff_factor(),
        }
    }
}

/// `{ headers?: { add, replace, remove[] }, body?: { add, replace, remove[], default } }`.
/// Values in `add`/`replace` may be expression strings (`{{ ... }}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModificationRules {
    pub headers: Option<FieldRules>,
    pub body: Option<FieldRules>,
}

impl ModificationRules {
    pub fn is_empty(&self) -> bool {
        self.headers.is_none() && self.body.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub default: HashMap<String, serde_json::Value>,
    pub add: HashMap<String, serde_json::Value>,
    pub replace: HashMap<String, serde_json::Value>,
    pub remove: Vec<String>,
}

/// `{ match: { status, headers? }, rules: { default?, stream? } }`. The first
/// matching rule in a route's `response: []` list wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRule {
    #[serde(rename = "match")]
    pub match_on: ResponseMatch,
    pub rules: ResponseRuleBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMatch {
    /// Regex matched against the upstream response status code as a string.
    pub status: Option<String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseRuleBody {
    pub default: Option<ModificationRules>,
    pub stream: Option<StreamTransformRules>,
}

/// `{ eventTypeMapping?, phaseDetection?, start?, chunk?, end? }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamTransformRules {
    pub event_type_mapping: HashMap<String, Phase>,
    pub phase_detection: Option<PhaseDetection>,
    pub start: Option<ModificationRules>,
    pub chunk: Option<ModificationRules>,
    pub end: Option<ModificationRules>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Chunk,
    End,
    Skip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhaseDetection {
    pub is_start: Option<String>,
    pub is_chunk: Option<String>,
    pub is_end: Option<String>,
}

/// The per-field resolution of a built-in format-translation plugin. `path`
/// scopes which routes the bundle applies under; `request`/`response` are the
/// same declarative rule shapes applied to requests headed to, and responses
/// coming from, that format pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub name: String,
    pub from: String,
    pub to: String,
    pub request: Option<ModificationRules>,
    pub response: Vec<ResponseRule>,
}

/// The three outcomes a stream plugin may produce for one input frame.
#[derive(Debug, Clone)]
pub enum StreamStep {
    Passthrough,
    Suppress,
    Emit(Vec<String>),
}

/// Upstream selector/circuit-breaker status, one value per `RuntimeUpstream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpstreamStatus {
    Healthy,
    HalfOpen,
    Unhealthy,
}

/// Classification of one attempt within a request's retry loop, recorded on
/// the `RequestLog` per SPEC_FULL §3/§4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptClass {
    Final,
    Retry,
    Recovery,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_requires_upstream() {
        let route = Route {
            path: "/v1".into(),
            ..Default::default()
        };
        assert!(route.validate().is_err());
    }

    #[test]
    fn route_requires_positive_band_weight() {
        let route = Route {
            path: "/v1".into(),
            upstreams: vec![Upstream {
                weight: 0,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(route.validate().is_err());
    }

    #[test]
    fn route_with_one_upstream_is_valid() {
        let route = Route {
            path: "/v1".into(),
            upstreams: vec![Upstream::default()],
            ..Default::default()
        };
        assert!(route.validate().is_ok());
    }

    #[test]
    fn defaults_match_spec() {
        let f = FailoverPolicy::default();
        assert_eq!(f.failure_threshold, 3);
        assert_eq!(f.healthy_threshold, 2);
        assert_eq!(f.recovery_interval_ms, 5_000);
        assert_eq!(f.retryable_status_codes, vec![502, 503, 504]);
        assert_eq!(f.slow_start.initial_weight_factor, 0.1);
        assert_eq!(f.backoff.factor, 0.2);
    }
}
