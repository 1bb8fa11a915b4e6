//! SSE stream executor (SPEC_FULL §4.G): phase detection, the modification
//! applier and the plugin pipeline applied per frame.
//!
//! Byte-to-frame splitting (consume bytes, split on blank lines, recognise
//! `event:`/`data:` lines, `[DONE]` sentinel) already happens one layer down
//! in the provider crate's SSE parser before frames reach here — `prism-core`
//! cannot depend on `prism-provider` (the dependency runs the other way), so
//! this module picks up at the already-framed `(event_type, data)` pair, the
//! same shape the existing translator stream-transform functions consume
//! (`fn(model, original_req, event_type, data, state) -> Result<Vec<String>,
//! Error>`) and produce: plain JSON strings, or the `[DONE]` sentinel,
//! joined by the caller exactly like the dispatch loop's translated stream
//! output already is.

use super::expr::Context;
use super::modify;
use super::plugin::{PluginChain, PluginContext};
use prism_types::{ModificationRules, Phase, StreamTransformRules};
use serde_json::Value;

/// One already-framed SSE event from upstream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub event_type: Option<String>,
    pub data: String,
}

pub const DONE_SENTINEL: &str = "[DONE]";

/// Per-stream executor state: whether the start phase has already fired and
/// the running chunk index (SPEC_FULL §4.G context flags).
pub struct StreamExecutor {
    rules: StreamTransformRules,
    plugins: PluginChain,
    chunk_index: u64,
    seen_start: bool,
}

impl StreamExecutor {
    pub fn new(rules: StreamTransformRules, plugins: PluginChain) -> Self {
        Self {
            rules,
            plugins,
            chunk_index: 0,
            seen_start: false,
        }
    }

    /// Process one upstream frame, returning zero or more output lines
    /// ready to hand to the SSE writer.
    pub async fn process_frame(&mut self, frame: Frame, is_last: bool) -> Vec<String> {
        let index = self.chunk_index;
        self.chunk_index += 1;

        if frame.data.trim() == DONE_SENTINEL {
            let ctx = PluginContext {
                chunk_index: index,
                is_first_chunk: index == 0,
                is_last_chunk: true,
                ..Default::default()
            };
            return self
                .plugins
                .process_stream_chunk(DONE_SENTINEL.to_string(), &ctx)
                .await;
        }

        let phase = self.detect_phase(&frame);
        if phase == Phase::Skip {
            return Vec::new();
        }
        if phase == Phase::Start {
            self.seen_start = true;
        }

        let rules_for_phase = match phase {
            Phase::Start => self.rules.start.as_ref(),
            Phase::Chunk => self.rules.chunk.as_ref(),
            Phase::End => self.rules.end.as_ref(),
            Phase::Skip => None,
        };

        let mut body: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
        if let Some(rules) = rules_for_phase {
            let expr_ctx = self.expr_context(&body, index);
            let mut headers = std::collections::HashMap::new();
            if let Err(e) = modify::apply(rules, &mut headers, &mut body, &expr_ctx) {
                tracing::warn!(error = %e, "stream rule application failed, passing frame through");
                body = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
            }
        }

        let events = expand_multi_events(body, rules_for_phase);

        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let line = event.to_string();
            let ctx = PluginContext {
                chunk_index: index,
                is_first_chunk: index == 0,
                is_last_chunk: is_last,
                ..Default::default()
            };
            out.extend(self.plugins.process_stream_chunk(line, &ctx).await);
        }
        out
    }

    /// Run every plugin's `flush_stream` after the source is exhausted.
    pub async fn flush(&self) -> Vec<String> {
        let ctx = PluginContext {
            chunk_index: self.chunk_index,
            is_first_chunk: false,
            is_last_chunk: true,
            ..Default::default()
        };
        self.plugins.flush(&ctx).await
    }

    fn expr_context(&self, body: &Value, index: u64) -> Context {
        let mut ctx = Context::default();
        ctx.body = body.clone();
        ctx.stream_chunk_index = Some(index as i64);
        ctx
    }

    /// Phase detection per SPEC_FULL §4.G:
    /// 1. `eventTypeMapping` + an `event:` line.
    /// 2. `phaseDetection`: isEnd, then isStart, then isChunk; first truthy wins.
    /// 3. First non-`[DONE]` frame is `start` only if a `start` rule exists;
    ///    everything else is `chunk`.
    fn detect_phase(&self, frame: &Frame) -> Phase {
        if let Some(event_type) = &frame.event_type
            && let Some(phase) = self.rules.event_type_mapping.get(event_type)
        {
            return *phase;
        }

        if let Some(detection) = &self.rules.phase_detection {
            let body: Value = serde_json::from_str(&frame.data).unwrap_or(Value::Null);
            let ctx = self.expr_context(&body, self.chunk_index);
            if let Some(expr) = &detection.is_end
                && eval_truthy(expr, &ctx)
            {
                return Phase::End;
            }
            if let Some(expr) = &detection.is_start
                && eval_truthy(expr, &ctx)
            {
                return Phase::Start;
            }
            if let Some(expr) = &detection.is_chunk
                && eval_truthy(expr, &ctx)
            {
                return Phase::Chunk;
            }
            return Phase::Chunk;
        }

        if !self.seen_start && self.rules.start.is_some() {
            return Phase::Start;
        }
        Phase::Chunk
    }
}

fn eval_truthy(expr_src: &str, ctx: &Context) -> bool {
    match super::expr::parse(expr_src).and_then(|e| super::expr::eval(&e, ctx)) {
        Ok(value) => is_truthy(&value),
        Err(e) => {
            tracing::warn!(error = %e, expr = expr_src, "phase detection expression failed");
            false
        }
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Unwrap a `__multi_events` body into its N constituent events, re-applying
/// the phase rule's `remove` keys to each (SPEC_FULL §4.G).
fn expand_multi_events(body: Value, rules: Option<&ModificationRules>) -> Vec<Value> {
    let events = modify::unwrap_multi_events(body);
    let Some(remove_keys) = rules.and_then(|r| r.body.as_ref()).map(|b| &b.remove) else {
        return events;
    };
    if remove_keys.is_empty() {
        return events;
    }
    events
        .into_iter()
        .map(|mut event| {
            for key in remove_keys {
                remove_path(&mut event, key);
            }
            event
        })
        .collect()
}

fn remove_path(root: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Some(obj) = current.as_object_mut() {
                obj.remove(*part);
            }
        } else {
            match current.as_object_mut().and_then(|obj| obj.get_mut(*part)) {
                Some(next) => current = next,
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::PhaseDetection;
    use serde_json::json;

    fn frame(data: &str) -> Frame {
        Frame {
            event_type: None,
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn done_sentinel_is_end_and_passes_through() {
        let mut exec = StreamExecutor::new(StreamTransformRules::default(), PluginChain::default());
        let out = exec.process_frame(frame("[DONE]"), true).await;
        assert_eq!(out, vec!["[DONE]".to_string()]);
    }

    #[tokio::test]
    async fn no_start_rule_means_every_frame_is_chunk() {
        let mut exec = StreamExecutor::new(StreamTransformRules::default(), PluginChain::default());
        let out = exec.process_frame(frame(r#"{"a":1}"#), false).await;
        assert_eq!(out, vec![json!({"a":1}).to_string()]);
    }

    #[tokio::test]
    async fn first_frame_is_start_when_start_rule_declared() {
        let rules = StreamTransformRules {
            start: Some(ModificationRules {
                headers: None,
                body: Some(prism_types::FieldRules {
                    add: std::collections::HashMap::from([(
                        "phase".to_string(),
                        json!("start-marker"),
                    )]),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let mut exec = StreamExecutor::new(rules, PluginChain::default());
        let out = exec.process_frame(frame(r#"{"a":1}"#), false).await;
        let parsed: Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed["phase"], "start-marker");

        // Second frame is no longer start.
        let out2 = exec.process_frame(frame(r#"{"a":2}"#), false).await;
        let parsed2: Value = serde_json::from_str(&out2[0]).unwrap();
        assert!(parsed2.get("phase").is_none());
    }

    #[tokio::test]
    async fn event_type_mapping_selects_phase() {
        let mut mapping = std::collections::HashMap::new();
        mapping.insert("message_stop".to_string(), Phase::End);
        let rules = StreamTransformRules {
            event_type_mapping: mapping,
            end: Some(ModificationRules {
                headers: None,
                body: Some(prism_types::FieldRules {
                    add: std::collections::HashMap::from([(
                        "terminal".to_string(),
                        json!(true),
                    )]),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let mut exec = StreamExecutor::new(rules, PluginChain::default());
        let mut f = frame(r#"{"type":"message_stop"}"#);
        f.event_type = Some("message_stop".to_string());
        let out = exec.process_frame(f, true).await;
        let parsed: Value = serde_json::from_str(&out[0]).unwrap();
        assert_eq!(parsed["terminal"], true);
    }

    #[tokio::test]
    async fn phase_detection_expressions_pick_end_over_start() {
        let rules = StreamTransformRules {
            phase_detection: Some(PhaseDetection {
                is_end: Some("body.done == true".to_string()),
                is_start: Some("body.first == true".to_string()),
                is_chunk: None,
            }),
            ..Default::default()
        };
        let mut exec = StreamExecutor::new(rules, PluginChain::default());
        let out = exec
            .process_frame(frame(r#"{"done": true, "first": true}"#), true)
            .await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn multi_events_fans_out_and_reapplies_remove() {
        let rules = StreamTransformRules {
            chunk: Some(ModificationRules {
                headers: None,
                body: Some(prism_types::FieldRules {
                    add: std::collections::HashMap::from([(
                        "__multi_events".to_string(),
                        json!([{"a": 1, "drop_me": "x"}, {"a": 2, "drop_me": "y"}]),
                    )]),
                    remove: vec!["drop_me".to_string()],
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let mut exec = StreamExecutor::new(rules, PluginChain::default());
        let out = exec.process_frame(frame(r#"{}"#), false).await;
        assert_eq!(out.len(), 2);
        for line in &out {
            let parsed: Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("drop_me").is_none());
        }
    }
}
