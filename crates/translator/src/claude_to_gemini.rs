use crate::TranslateState;
use prism_core::error::ProxyError;
use serde_json::{Value, json};

/// Claude Messages API request -> Gemini `generateContent` request.
pub fn translate_request(
    model: &str,
    raw_json: &[u8],
    _stream: bool,
) -> Result<Vec<u8>, ProxyError> {
    let req: Value = serde_json::from_slice(raw_json)?;
    let _ = model; // Gemini routes the model via URL, not the body.

    let contents = convert_messages(&req)?;
    let generation_config = build_generation_config(&req);
    let tools = convert_tools(&req);

    let mut gemini_req = json!({ "contents": contents });

    if let Some(system) = req.get("system").and_then(|s| s.as_str())
        && !system.is_empty()
    {
        gemini_req["systemInstruction"] = json!({
            "parts": [{ "text": system }],
        });
    }
    if let Some(gc) = generation_config {
        gemini_req["generationConfig"] = gc;
    }
    if let Some(tools) = tools {
        gemini_req["tools"] = tools;
    }

    serde_json::to_vec(&gemini_req).map_err(|e| ProxyError::Translation(e.to_string()))
}

fn convert_messages(req: &Value) -> Result<Vec<Value>, ProxyError> {
    let mut contents = Vec::new();
    let Some(messages) = req.get("messages").and_then(|m| m.as_array()) else {
        return Ok(contents);
    };

    for msg in messages {
        let role = match msg.get("role").and_then(|r| r.as_str()) {
            Some("assistant") => "model",
            _ => "user",
        };

        let mut parts = Vec::new();
        match msg.get("content") {
            Some(Value::String(text)) => parts.push(json!({ "text": text })),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
                    match block_type {
                        "text" => {
                            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                                parts.push(json!({ "text": text }));
                            }
                        }
                        "tool_use" => {
                            parts.push(json!({
                                "functionCall": {
                                    "name": block.get("name").cloned().unwrap_or(Value::Null),
                                    "args": block.get("input").cloned().unwrap_or(json!({})),
                                }
                            }));
                        }
                        "tool_result" => {
                            parts.push(json!({
                                "functionResponse": {
                                    "name": block.get("tool_use_id").cloned().unwrap_or(Value::Null),
                                    "response": { "content": block.get("content").cloned().unwrap_or(Value::Null) },
                                }
                            }));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }

    Ok(contents)
}

fn build_generation_config(req: &Value) -> Option<Value> {
    let mut gc = serde_json::Map::new();
    if let Some(max_tokens) = req.get("max_tokens") {
        gc.insert("maxOutputTokens".to_string(), max_tokens.clone());
    }
    if let Some(temp) = req.get("temperature") {
        gc.insert("temperature".to_string(), temp.clone());
    }
    if let Some(top_p) = req.get("top_p") {
        gc.insert("topP".to_string(), top_p.clone());
    }
    if let Some(stop) = req.get("stop_sequences") {
        gc.insert("stopSequences".to_string(), stop.clone());
    }
    if gc.is_empty() { None } else { Some(Value::Object(gc)) }
}

fn convert_tools(req: &Value) -> Option<Value> {
    let tools = req.get("tools")?.as_array()?;
    if tools.is_empty() {
        return None;
    }
    let declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.get("name").cloned().unwrap_or(Value::Null),
                "description": t.get("description").cloned().unwrap_or(Value::Null),
                "parameters": t.get("input_schema").cloned().unwrap_or(json!({})),
            })
        })
        .collect();
    Some(json!([{ "functionDeclarations": declarations }]))
}

/// Claude Messages API response -> Gemini `generateContent` response.
pub fn translate_non_stream(
    _model: &str,
    _original_req: &[u8],
    data: &[u8],
) -> Result<String, ProxyError> {
    let resp: Value = serde_json::from_slice(data)?;
    let model = resp
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("claude")
        .to_string();

    let mut parts = Vec::new();
    if let Some(blocks) = resp.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        parts.push(json!({ "text": text }));
                    }
                }
                Some("tool_use") => {
                    parts.push(json!({
                        "functionCall": {
                            "name": block.get("name").cloned().unwrap_or(Value::Null),
                            "args": block.get("input").cloned().unwrap_or(json!({})),
                        }
                    }));
                }
                _ => {}
            }
        }
    }

    let finish_reason = match resp.get("stop_reason").and_then(|v| v.as_str()) {
        Some("max_tokens") => "MAX_TOKENS",
        _ => "STOP",
    };

    let usage = resp.get("usage").map(|u| {
        let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let output = u
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        json!({
            "promptTokenCount": input,
            "candidatesTokenCount": output,
            "totalTokenCount": input + output,
        })
    });

    let mut gemini_resp = json!({
        "modelVersion": model,
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": finish_reason,
            "index": 0,
        }],
    });
    if let Some(usage) = usage {
        gemini_resp["usageMetadata"] = usage;
    }

    serde_json::to_string(&gemini_resp).map_err(|e| ProxyError::Translation(e.to_string()))
}

pub fn translate_stream(
    model: &str,
    _original_req: &[u8],
    event_type: Option<&str>,
    data: &[u8],
    state: &mut TranslateState,
) -> Result<Vec<String>, ProxyError> {
    let evt: Value = serde_json::from_slice(data)?;
    let mut frames = Vec::new();

    match event_type {
        Some("message_start") => {
            state.response_id = evt["message"]["id"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            state.model = evt["message"]["model"]
                .as_str()
                .unwrap_or(model)
                .to_string();
            state.current_content_index = -1;
            state.current_tool_call_index = -1;
            state.input_tokens = evt["message"]["usage"]["input_tokens"]
                .as_u64()
                .unwrap_or(0);
        }
        Some("content_block_start") => {
            state.current_content_index += 1;
            let block = &evt["content_block"];
            if block["type"] == "tool_use" {
                state.current_tool_call_index += 1;
            }
        }
        Some("content_block_delta") => {
            let delta = &evt["delta"];
            let mut parts = Vec::new();
            match delta.get("type").and_then(|t| t.as_str()) {
                Some("text_delta") => {
                    if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                        parts.push(json!({ "text": text }));
                    }
                }
                Some("input_json_delta") => {
                    if let Some(partial) = delta.get("partial_json").and_then(|t| t.as_str())
                        && let Ok(args) = serde_json::from_str::<Value>(partial)
                    {
                        parts.push(json!({
                            "functionCall": { "name": Value::Null, "args": args }
                        }));
                    }
                }
                _ => {}
            }
            if !parts.is_empty() {
                let chunk = json!({
                    "modelVersion": state.model,
                    "candidates": [{
                        "content": { "role": "model", "parts": parts },
                        "index": 0,
                    }],
                });
                frames.push(chunk.to_string());
            }
        }
        Some("message_delta") => {
            let stop_reason = evt["delta"]["stop_reason"].as_str();
            let finish_reason = match stop_reason {
                Some("max_tokens") => Some("MAX_TOKENS"),
                Some(_) => Some("STOP"),
                None => None,
            };
            if let Some(finish_reason) = finish_reason {
                let output_tokens = evt["usage"]["output_tokens"].as_u64().unwrap_or(0);
                let chunk = json!({
                    "modelVersion": state.model,
                    "candidates": [{
                        "content": { "role": "model", "parts": [] },
                        "finishReason": finish_reason,
                        "index": 0,
                    }],
                    "usageMetadata": {
                        "promptTokenCount": state.input_tokens,
                        "candidatesTokenCount": output_tokens,
                        "totalTokenCount": state.input_tokens + output_tokens,
                    }
                });
                frames.push(chunk.to_string());
            }
        }
        Some("message_stop") => {
            frames.push("[DONE]".to_string());
        }
        _ => {}
    }

    Ok(frames)
}
