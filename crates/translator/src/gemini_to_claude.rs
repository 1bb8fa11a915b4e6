use crate::TranslateState;
use prism_core::error::ProxyError;
use serde_json::{Value, json};

/// Gemini `generateContent` request -> Claude Messages API request.
pub fn translate_request(
    model: &str,
    raw_json: &[u8],
    stream: bool,
) -> Result<Vec<u8>, ProxyError> {
    let req: Value = serde_json::from_slice(raw_json)?;

    let mut messages = Vec::new();
    if let Some(contents) = req.get("contents").and_then(|c| c.as_array()) {
        for entry in contents {
            let role = match entry.get("role").and_then(|r| r.as_str()) {
                Some("model") => "assistant",
                _ => "user",
            };
            let mut blocks = Vec::new();
            if let Some(parts) = entry.get("parts").and_then(|p| p.as_array()) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        blocks.push(json!({ "type": "text", "text": text }));
                    } else if let Some(fc) = part.get("functionCall") {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": format!("toolu_{}", uuid::Uuid::new_v4()),
                            "name": fc.get("name").cloned().unwrap_or(Value::Null),
                            "input": fc.get("args").cloned().unwrap_or(json!({})),
                        }));
                    } else if let Some(fr) = part.get("functionResponse") {
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": fr.get("name").cloned().unwrap_or(Value::Null),
                            "content": fr.get("response").cloned().unwrap_or(Value::Null),
                        }));
                    }
                }
            }
            if !blocks.is_empty() {
                messages.push(json!({ "role": role, "content": blocks }));
            }
        }
    }

    let system = req
        .get("systemInstruction")
        .and_then(|s| s.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|parts| parts.first())
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str());

    let gen_config = req.get("generationConfig");
    let max_tokens = gen_config
        .and_then(|g| g.get("maxOutputTokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(8192);

    let mut claude_req = json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": stream,
    });
    if let Some(system) = system {
        claude_req["system"] = json!(system);
    }
    if let Some(temp) = gen_config.and_then(|g| g.get("temperature")) {
        claude_req["temperature"] = temp.clone();
    }
    if let Some(top_p) = gen_config.and_then(|g| g.get("topP")) {
        claude_req["top_p"] = top_p.clone();
    }
    if let Some(stop) = gen_config.and_then(|g| g.get("stopSequences")) {
        claude_req["stop_sequences"] = stop.clone();
    }
    if let Some(tools) = req.get("tools").and_then(|t| t.as_array()) {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|t| t.get("functionDeclarations"))
            .filter_map(|d| d.as_array())
            .flatten()
            .map(|d| {
                json!({
                    "name": d.get("name").cloned().unwrap_or(Value::Null),
                    "description": d.get("description").cloned().unwrap_or(Value::Null),
                    "input_schema": d.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect();
        if !declarations.is_empty() {
            claude_req["tools"] = json!(declarations);
        }
    }

    serde_json::to_vec(&claude_req).map_err(|e| ProxyError::Translation(e.to_string()))
}

/// Gemini `generateContent` response -> Claude Messages API response.
pub fn translate_non_stream(
    _model: &str,
    _original_req: &[u8],
    data: &[u8],
) -> Result<String, ProxyError> {
    let resp: Value = serde_json::from_slice(data)?;
    let id = format!("msg_{}", uuid::Uuid::new_v4());
    let model = resp
        .get("modelVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("gemini")
        .to_string();

    let candidate = resp
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    let mut content = Vec::new();
    let mut stop_reason = "end_turn";
    if let Some(candidate) = candidate {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    content.push(json!({ "type": "text", "text": text }));
                } else if let Some(fc) = part.get("functionCall") {
                    content.push(json!({
                        "type": "tool_use",
                        "id": format!("toolu_{}", uuid::Uuid::new_v4()),
                        "name": fc.get("name").cloned().unwrap_or(Value::Null),
                        "input": fc.get("args").cloned().unwrap_or(json!({})),
                    }));
                }
            }
        }
        stop_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
            Some("MAX_TOKENS") => "max_tokens",
            Some(_) if content.iter().any(|c| c["type"] == "tool_use") => "tool_use",
            _ => "end_turn",
        };
    }

    let usage = resp.get("usageMetadata").map(|u| {
        json!({
            "input_tokens": u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0),
            "output_tokens": u.get("candidatesTokenCount").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    });

    let mut claude_resp = json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
    });
    if let Some(usage) = usage {
        claude_resp["usage"] = usage;
    }

    serde_json::to_string(&claude_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}

pub fn translate_stream(
    _model: &str,
    _original_req: &[u8],
    _event_type: Option<&str>,
    data: &[u8],
    state: &mut TranslateState,
) -> Result<Vec<String>, ProxyError> {
    let resp: Value = serde_json::from_slice(data)?;
    let mut frames = Vec::new();

    if state.response_id.is_empty() {
        state.response_id = format!("msg_{}", uuid::Uuid::new_v4());
        state.current_content_index = -1;
        let start = json!({
            "type": "message_start",
            "message": {
                "id": state.response_id,
                "type": "message",
                "role": "assistant",
                "model": state.model,
                "content": [],
            }
        });
        frames.push(format!("event: message_start\ndata: {start}"));
    }

    let candidate = resp
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first());

    if let Some(candidate) = candidate {
        if let Some(model_ver) = resp.get("modelVersion").and_then(|v| v.as_str()) {
            state.model = model_ver.to_string();
        }
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                state.current_content_index += 1;
                let index = state.current_content_index;
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    let start = json!({
                        "type": "content_block_start", "index": index,
                        "content_block": { "type": "text", "text": "" },
                    });
                    let delta = json!({
                        "type": "content_block_delta", "index": index,
                        "delta": { "type": "text_delta", "text": text },
                    });
                    let stop = json!({ "type": "content_block_stop", "index": index });
                    frames.push(format!("event: content_block_start\ndata: {start}"));
                    frames.push(format!("event: content_block_delta\ndata: {delta}"));
                    frames.push(format!("event: content_block_stop\ndata: {stop}"));
                } else if let Some(fc) = part.get("functionCall") {
                    let start = json!({
                        "type": "content_block_start", "index": index,
                        "content_block": {
                            "type": "tool_use",
                            "id": format!("toolu_{}", uuid::Uuid::new_v4()),
                            "name": fc.get("name").cloned().unwrap_or(Value::Null),
                        },
                    });
                    let delta = json!({
                        "type": "content_block_delta", "index": index,
                        "delta": {
                            "type": "input_json_delta",
                            "partial_json": serde_json::to_string(&fc.get("args").cloned().unwrap_or(json!({}))).unwrap_or_default(),
                        },
                    });
                    let stop = json!({ "type": "content_block_stop", "index": index });
                    frames.push(format!("event: content_block_start\ndata: {start}"));
                    frames.push(format!("event: content_block_delta\ndata: {delta}"));
                    frames.push(format!("event: content_block_stop\ndata: {stop}"));
                }
            }
        }

        if let Some(finish) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            let stop_reason = match finish {
                "MAX_TOKENS" => "max_tokens",
                _ => "end_turn",
            };
            let delta = json!({
                "type": "message_delta",
                "delta": { "stop_reason": stop_reason },
            });
            frames.push(format!("event: message_delta\ndata: {delta}"));
            let stop = json!({ "type": "message_stop" });
            frames.push(format!("event: message_stop\ndata: {stop}"));
            frames.push("[DONE]".to_string());
        }
    }

    Ok(frames)
}
