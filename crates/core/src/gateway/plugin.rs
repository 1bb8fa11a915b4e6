//! Plugin runtime (SPEC_FULL §4.F): an object-safe `Plugin` trait with
//! default no-op hooks, a declaration-ordered chain, and the six built-in
//! transformer bundles wired on top of the modification applier.
//!
//! The trait shape follows the codebase's existing `ProviderExecutor`
//! trait: `async_trait`, object-safe, `Send + Sync`.

use super::expr::Context;
use super::modify;
use crate::error::ProxyError;
use async_trait::async_trait;
use prism_types::{PluginRef, StreamStep, TransformerConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable per-request state a plugin's hooks may observe and modify.
#[derive(Debug, Default)]
pub struct PluginContext {
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub path: String,
    /// Set by `process_request` to skip the upstream call entirely and jump
    /// straight to the response hooks.
    pub short_circuit_response: Option<Value>,
    pub chunk_index: u64,
    pub is_first_chunk: bool,
    pub is_last_chunk: bool,
}

impl PluginContext {
    pub fn expr_context(&self, method: &str) -> Context {
        let mut ctx = Context::default();
        ctx.headers = self.headers.clone();
        ctx.body = self.body.clone();
        ctx.method = method.to_string();
        ctx.stream_chunk_index = Some(self.chunk_index as i64);
        ctx
    }
}

/// One plugin in the chain. Every hook has a no-op default so a plugin only
/// implements what it needs (SPEC_FULL §4.F).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_load(&self) -> Result<(), ProxyError> {
        Ok(())
    }

    async fn on_unload(&self) {}

    /// Mutate the outgoing request. May set `ctx.short_circuit_response`.
    async fn process_request(&self, _ctx: &mut PluginContext) -> Result<(), ProxyError> {
        Ok(())
    }

    /// Mutate a non-streaming upstream response in place.
    async fn process_response(&self, _ctx: &mut PluginContext) -> Result<(), ProxyError> {
        Ok(())
    }

    /// Transform one streamed frame, already serialized to its `data: `
    /// payload string. `Passthrough` keeps the input going to the next
    /// plugin unchanged; `Suppress` drops it (N:0); `Emit` fans it out to
    /// M strings (1:M or N:M), mirroring the translator's existing
    /// `fn(...) -> Result<Vec<String>, Error>` stream-transform shape.
    async fn process_stream_chunk(
        &self,
        _chunk: &str,
        _ctx: &PluginContext,
    ) -> Result<StreamStep, ProxyError> {
        Ok(StreamStep::Passthrough)
    }

    /// Called once after the source stream is exhausted; may emit trailing
    /// frames (e.g. a synthetic terminator).
    async fn flush_stream(&self, _ctx: &PluginContext) -> Result<Vec<String>, ProxyError> {
        Ok(Vec::new())
    }
}

/// Declaration-ordered chain: global → route-level → upstream-level, later
/// entries appended (SPEC_FULL §4.F.1).
#[derive(Default, Clone)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// `processRequest` in declaration order. A plugin exception is logged
    /// and skipped; processing continues (SPEC_FULL §4.F.2 failure policy).
    pub async fn process_request(&self, ctx: &mut PluginContext) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.process_request(ctx).await {
                tracing::warn!(plugin = plugin.name(), error = %e, "plugin process_request failed");
            }
            if ctx.short_circuit_response.is_some() {
                break;
            }
        }
    }

    /// `processResponse` in **reverse** declaration order (SPEC_FULL §4.F.3).
    pub async fn process_response(&self, ctx: &mut PluginContext) {
        for plugin in self.plugins.iter().rev() {
            if let Err(e) = plugin.process_response(ctx).await {
                tracing::warn!(plugin = plugin.name(), error = %e, "plugin process_response failed");
            }
        }
    }

    /// Feed one input frame through every plugin's `process_stream_chunk` in
    /// order, threading each plugin's output list into the next. A plugin
    /// exception logs and passes the original frame(s) through unchanged.
    pub async fn process_stream_chunk(&self, frame: String, ctx: &PluginContext) -> Vec<String> {
        let mut current = vec![frame];
        for plugin in &self.plugins {
            let mut next = Vec::with_capacity(current.len());
            for item in &current {
                match plugin.process_stream_chunk(item, ctx).await {
                    Ok(StreamStep::Passthrough) => next.push(item.clone()),
                    Ok(StreamStep::Suppress) => {}
                    Ok(StreamStep::Emit(values)) => next.extend(values),
                    Err(e) => {
                        tracing::warn!(plugin = plugin.name(), error = %e, "plugin process_stream_chunk failed");
                        next.push(item.clone());
                    }
                }
            }
            current = next;
        }
        current
    }

    /// `flushStream` in declaration order; each plugin's output is fed
    /// through the remaining plugins' `process_stream_chunk` before the next
    /// plugin's flush runs (SPEC_FULL §4.G).
    pub async fn flush(&self, ctx: &PluginContext) -> Vec<String> {
        let mut emitted = Vec::new();
        for (i, plugin) in self.plugins.iter().enumerate() {
            let flushed = match plugin.flush_stream(ctx).await {
                Ok(values) => values,
                Err(e) => {
                    tracing::warn!(plugin = plugin.name(), error = %e, "plugin flush_stream failed");
                    continue;
                }
            };
            for value in flushed {
                let mut current = vec![value];
                for downstream in &self.plugins[i + 1..] {
                    let mut next = Vec::with_capacity(current.len());
                    for item in &current {
                        match downstream.process_stream_chunk(item, ctx).await {
                            Ok(StreamStep::Passthrough) => next.push(item.clone()),
                            Ok(StreamStep::Suppress) => {}
                            Ok(StreamStep::Emit(values)) => next.extend(values),
                            Err(_) => next.push(item.clone()),
                        }
                    }
                    current = next;
                }
                emitted.extend(current);
            }
        }
        emitted
    }
}

/// Resolve a `PluginRef` list to concrete plugin instances. Built-in names
/// resolve to a `TransformerPlugin`; descriptors with an external `path` are
/// not supported by this in-process runtime and are disabled with a warning
/// (load failures mark a plugin disabled for the worker's lifetime, per
/// SPEC_FULL §4.F).
pub fn resolve_plugins(
    refs: &[PluginRef],
    transformers: &HashMap<String, TransformerConfig>,
) -> Vec<Arc<dyn Plugin>> {
    let mut out = Vec::new();
    for r in refs {
        match r {
            PluginRef::Name(name) => {
                if let Some(cfg) = transformers.get(name) {
                    out.push(Arc::new(TransformerPlugin::new(cfg.clone())) as Arc<dyn Plugin>);
                } else {
                    tracing::warn!(plugin = %name, "unknown built-in plugin name, disabling");
                }
            }
            PluginRef::Descriptor {
                path,
                enabled,
                options: _,
            } => {
                if *enabled {
                    tracing::warn!(path = %path, "external plugin descriptors are not supported by this runtime, disabling");
                }
            }
        }
    }
    out
}

/// A built-in format-translation plugin backed by a declarative
/// `TransformerConfig`, applied via the modification applier (§4.B). This is
/// how the six built-in transformer bundles (anthropic-to-openai,
/// anthropic-to-gemini, openai-to-anthropic, openai-to-gemini,
/// gemini-to-anthropic, gemini-to-openai) are expressed: no bespoke plugin
/// code beyond the applier and the config itself.
pub struct TransformerPlugin {
    config: TransformerConfig,
}

impl TransformerPlugin {
    pub fn new(config: TransformerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Plugin for TransformerPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn process_request(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
        let Some(rules) = &self.config.request else {
            return Ok(());
        };
        let expr_ctx = ctx.expr_context("");
        modify::apply(rules, &mut ctx.headers, &mut ctx.body, &expr_ctx)
            .map_err(|e| ProxyError::ExpressionError(e.to_string()))
    }

    async fn process_response(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
        for response_rule in &self.config.response {
            if !response_matches(response_rule, &ctx.headers) {
                continue;
            }
            if let Some(rules) = &response_rule.rules.default {
                let expr_ctx = ctx.expr_context("");
                modify::apply(rules, &mut ctx.headers, &mut ctx.body, &expr_ctx)
                    .map_err(|e| ProxyError::ExpressionError(e.to_string()))?;
            }
            break;
        }
        Ok(())
    }
}

fn response_matches(
    rule: &prism_types::ResponseRule,
    headers: &HashMap<String, String>,
) -> bool {
    if let Some(pattern) = &rule.match_on.status {
        // Status matching against the upstream status is threaded in by the
        // orchestrator via an `x-upstream-status` pseudo-header; absence of
        // that header means "match any status" for this rule.
        if let Some(status) = headers.get("x-upstream-status") {
            if let Ok(re) = regex::Regex::new(pattern) {
                if !re.is_match(status) {
                    return false;
                }
            }
        }
    }
    rule.match_on
        .headers
        .iter()
        .all(|(k, v)| headers.get(k).map(|actual| actual == v).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Plugin for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn process_stream_chunk(
            &self,
            chunk: &str,
            _ctx: &PluginContext,
        ) -> Result<StreamStep, ProxyError> {
            Ok(StreamStep::Emit(vec![chunk.to_uppercase()]))
        }
    }

    struct Dropper;

    #[async_trait]
    impl Plugin for Dropper {
        fn name(&self) -> &str {
            "dropper"
        }

        async fn process_stream_chunk(
            &self,
            _chunk: &str,
            _ctx: &PluginContext,
        ) -> Result<StreamStep, ProxyError> {
            Ok(StreamStep::Suppress)
        }
    }

    #[tokio::test]
    async fn passthrough_default_keeps_chunk() {
        let chain = PluginChain::new(vec![]);
        let ctx = PluginContext::default();
        let out = chain.process_stream_chunk("hi".to_string(), &ctx).await;
        assert_eq!(out, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn emit_fans_out_and_feeds_next_plugin() {
        let chain = PluginChain::new(vec![Arc::new(Upper)]);
        let ctx = PluginContext::default();
        let out = chain.process_stream_chunk("hi".to_string(), &ctx).await;
        assert_eq!(out, vec!["HI".to_string()]);
    }

    #[tokio::test]
    async fn suppress_drops_chunk() {
        let chain = PluginChain::new(vec![Arc::new(Dropper), Arc::new(Upper)]);
        let ctx = PluginContext::default();
        let out = chain.process_stream_chunk("hi".to_string(), &ctx).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn short_circuit_stops_request_chain() {
        struct ShortCircuiter;
        #[async_trait]
        impl Plugin for ShortCircuiter {
            fn name(&self) -> &str {
                "sc"
            }
            async fn process_request(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
                ctx.short_circuit_response = Some(json!({"ok": true}));
                Ok(())
            }
        }
        struct NeverRuns;
        #[async_trait]
        impl Plugin for NeverRuns {
            fn name(&self) -> &str {
                "never"
            }
            async fn process_request(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
                ctx.body = json!("should not run");
                Ok(())
            }
        }
        let chain = PluginChain::new(vec![Arc::new(ShortCircuiter), Arc::new(NeverRuns)]);
        let mut ctx = PluginContext::default();
        chain.process_request(&mut ctx).await;
        assert!(ctx.short_circuit_response.is_some());
        assert_ne!(ctx.body, json!("should not run"));
    }
}
