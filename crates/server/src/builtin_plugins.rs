//! Wires the six built-in transformer bundle names (SPEC_FULL §4.F) to the
//! codebase's existing hardcoded format-pair translation functions, then lets
//! the declarative overlay rules in the bundle's `TransformerConfig` run on
//! top via the same modification applier every other plugin uses.
//!
//! `prism-core`'s `gateway::builtin` module can only describe a bundle's name
//! and format pair — it cannot call into `prism-translator` (the dependency
//! runs translator → core). This is the other half of that split, living in
//! the crate that depends on both.

use prism_core::error::ProxyError;
use prism_core::gateway::modify;
use prism_core::gateway::plugin::{Plugin, PluginContext};
use prism_core::provider::Format;
use prism_translator::{TranslateState, TranslatorRegistry};
use async_trait::async_trait;
use prism_types::{StreamStep, TransformerConfig};
use std::sync::{Arc, Mutex};

/// A built-in format-translation plugin. Constructed fresh per request
/// attempt (never shared), so the interior `Mutex` around `TranslateState`
/// only ever sees single-threaded access — it exists purely because
/// `Plugin`'s hooks take `&self`, not because the state is actually
/// contended.
pub struct BuiltinTransformerPlugin {
    config: TransformerConfig,
    from: Format,
    to: Format,
    translators: Arc<TranslatorRegistry>,
    model: String,
    original_request: Vec<u8>,
    stream: bool,
    state: Mutex<TranslateState>,
}

impl BuiltinTransformerPlugin {
    pub fn new(
        config: TransformerConfig,
        from: Format,
        to: Format,
        translators: Arc<TranslatorRegistry>,
        model: String,
        original_request: Vec<u8>,
        stream: bool,
    ) -> Self {
        Self {
            config,
            from,
            to,
            translators,
            model,
            original_request,
            stream,
            state: Mutex::new(TranslateState::default()),
        }
    }
}

#[async_trait]
impl Plugin for BuiltinTransformerPlugin {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn process_request(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
        let raw = serde_json::to_vec(&ctx.body)?;
        let translated = self.translators.translate_request(
            self.from,
            self.to,
            &self.model,
            &raw,
            self.stream,
        )?;
        ctx.body = serde_json::from_slice(&translated)?;

        if let Some(rules) = &self.config.request {
            let expr_ctx = ctx.expr_context("");
            modify::apply(rules, &mut ctx.headers, &mut ctx.body, &expr_ctx)
                .map_err(|e| ProxyError::ExpressionError(e.to_string()))?;
        }
        Ok(())
    }

    async fn process_response(&self, ctx: &mut PluginContext) -> Result<(), ProxyError> {
        let raw = serde_json::to_vec(&ctx.body)?;
        let translated = self.translators.translate_non_stream(
            self.from,
            self.to,
            &self.model,
            &self.original_request,
            &raw,
        )?;
        ctx.body = serde_json::from_str(&translated)?;

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

    async fn process_stream_chunk(
        &self,
        chunk: &str,
        _ctx: &PluginContext,
    ) -> Result<StreamStep, ProxyError> {
        if chunk.trim() == "[DONE]" {
            return Ok(StreamStep::Passthrough);
        }
        // Claude-dialect upstream frames carry their event name as the
        // JSON body's own "type" field (e.g. `{"type":"message_start",...}`),
        // the same value the SSE `event:` line would otherwise supply. Other
        // dialects' stream-transform functions ignore this parameter.
        let event_type: Option<String> = serde_json::from_str::<serde_json::Value>(chunk)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));

        let mut state = self.state.lock().unwrap();
        let lines = self.translators.translate_stream(
            self.from,
            self.to,
            &self.model,
            &self.original_request,
            event_type.as_deref(),
            chunk.as_bytes(),
            &mut state,
        )?;
        if lines.is_empty() {
            Ok(StreamStep::Suppress)
        } else {
            Ok(StreamStep::Emit(lines))
        }
    }
}

fn response_matches(
    rule: &prism_types::ResponseRule,
    headers: &std::collections::HashMap<String, String>,
) -> bool {
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
