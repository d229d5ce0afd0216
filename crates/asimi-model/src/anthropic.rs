// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::from_status;
use crate::sse::SseReader;
use crate::{
    Auth, Choice, ContentResponse, GenerateOptions, Message, ModelClient, ModelError, Part, Role,
    StopReason, ToolCallRequest, ToolChoice, ToolSchema,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// Beta header required when authenticating with an OAuth bearer token.
const OAUTH_BETA: &str = "oauth-2025-04-20";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicClient {
    model: String,
    base_url: String,
    auth: Arc<dyn Auth>,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(model: String, auth: Arc<dyn Auth>, base_url: Option<String>) -> Self {
        Self {
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            auth,
            http: reqwest::Client::new(),
        }
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
        stream: bool,
    ) -> Value {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.text());

        let mut msgs: Vec<Value> = Vec::new();
        for m in messages.iter().filter(|m| m.role != Role::System) {
            match m.role {
                Role::Human => {
                    msgs.push(json!({ "role": "user", "content": m.text() }));
                }
                Role::Ai => {
                    let mut blocks: Vec<Value> = Vec::new();
                    for p in &m.parts {
                        match p {
                            Part::Text { text } if !text.is_empty() => {
                                blocks.push(json!({ "type": "text", "text": text }));
                            }
                            Part::ToolCall { id, name, arguments } => {
                                let input: Value = serde_json::from_str(arguments)
                                    .unwrap_or_else(|_| json!({}));
                                blocks.push(json!({
                                    "type": "tool_use",
                                    "id": id,
                                    "name": name,
                                    "input": input,
                                }));
                            }
                            _ => {}
                        }
                    }
                    msgs.push(json!({ "role": "assistant", "content": blocks }));
                }
                Role::Tool => {
                    for p in &m.parts {
                        if let Part::ToolCallResponse { id, content, .. } = p {
                            msgs.push(json!({
                                "role": "user",
                                "content": [{
                                    "type": "tool_result",
                                    "tool_use_id": id,
                                    "content": content,
                                }],
                            }));
                        }
                    }
                }
                Role::System => {}
            }
        }

        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": msgs,
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() && options.tool_choice == ToolChoice::Auto {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!({ "type": "auto" });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let mut req = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", API_VERSION)
            .json(body);

        // OAuth bearer takes precedence over a static API key.
        if let Some(token) = self.auth.get_oauth_token("anthropic").await {
            req = req
                .bearer_auth(token)
                .header("anthropic-beta", OAUTH_BETA);
        } else if let Some(key) = self.auth.get_api_key("anthropic") {
            req = req.header("x-api-key", key);
        } else {
            return Err(ModelError::Auth(
                "no Anthropic credentials: set ANTHROPIC_API_KEY or llm.auth_token".into(),
            ));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(status.as_u16(), body));
        }
        Ok(resp)
    }

    fn parse_response(&self, v: &Value) -> Choice {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(blocks) = v["content"].as_array() {
            for b in blocks {
                match b["type"].as_str() {
                    Some("text") => content.push_str(b["text"].as_str().unwrap_or("")),
                    Some("tool_use") => tool_calls.push(ToolCallRequest {
                        id: b["id"].as_str().unwrap_or("").to_string(),
                        name: b["name"].as_str().unwrap_or("").to_string(),
                        arguments: b["input"].to_string(),
                    }),
                    _ => {}
                }
            }
        }
        Choice {
            content,
            reasoning_content: None,
            stop_reason: parse_stop_reason(v["stop_reason"].as_str()),
            tool_calls,
        }
    }

    async fn stream_response(
        &self,
        resp: reqwest::Response,
        options: &GenerateOptions,
    ) -> Result<Choice, ModelError> {
        let mut reader = SseReader::new(resp);
        let mut content = String::new();
        let mut reasoning = String::new();
        let mut stop_reason = StopReason::EndTurn;
        // Keyed by the content-block index so parallel tool-use blocks
        // accumulate their JSON arguments independently.
        let mut pending: BTreeMap<u64, (String, String, String)> = BTreeMap::new();

        while let Some(data) = reader.next_data().await? {
            if let Some(cancel) = &options.cancel {
                if cancel.is_cancelled() {
                    return Err(ModelError::Cancelled);
                }
            }
            let ev: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable stream event");
                    continue;
                }
            };
            match ev["type"].as_str() {
                Some("content_block_start") => {
                    let block = &ev["content_block"];
                    if block["type"] == "tool_use" {
                        let index = ev["index"].as_u64().unwrap_or(0);
                        pending.insert(
                            index,
                            (
                                block["id"].as_str().unwrap_or("").to_string(),
                                block["name"].as_str().unwrap_or("").to_string(),
                                String::new(),
                            ),
                        );
                    }
                }
                Some("content_block_delta") => match ev["delta"]["type"].as_str() {
                    Some("text_delta") => {
                        let text = ev["delta"]["text"].as_str().unwrap_or("");
                        content.push_str(text);
                        if let Some(cb) = &options.on_chunk {
                            cb(text);
                        }
                    }
                    Some("thinking_delta") => {
                        let text = ev["delta"]["thinking"].as_str().unwrap_or("");
                        reasoning.push_str(text);
                        if let Some(cb) = &options.on_reasoning {
                            cb(text);
                        }
                    }
                    Some("input_json_delta") => {
                        let index = ev["index"].as_u64().unwrap_or(0);
                        if let Some(entry) = pending.get_mut(&index) {
                            entry.2.push_str(ev["delta"]["partial_json"].as_str().unwrap_or(""));
                        }
                    }
                    _ => {}
                },
                Some("message_delta") => {
                    if let Some(sr) = ev["delta"]["stop_reason"].as_str() {
                        stop_reason = parse_stop_reason(Some(sr));
                    }
                }
                Some("message_stop") => break,
                Some("error") => {
                    return Err(ModelError::Api {
                        status: 0,
                        body: ev["error"].to_string(),
                    });
                }
                _ => {}
            }
        }

        let tool_calls = pending
            .into_values()
            .map(|(id, name, args)| ToolCallRequest {
                id,
                name,
                arguments: if args.is_empty() { "{}".into() } else { args },
            })
            .collect();

        Ok(Choice {
            content,
            reasoning_content: if reasoning.is_empty() { None } else { Some(reasoning) },
            stop_reason,
            tool_calls,
        })
    }
}

fn parse_stop_reason(s: Option<&str>) -> StopReason {
    match s {
        Some("max_tokens") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerateOptions,
    ) -> Result<ContentResponse, ModelError> {
        if options.is_cancelled() {
            return Err(ModelError::Cancelled);
        }
        let streaming = options.on_chunk.is_some();
        let body = self.build_body(messages, tools, options, streaming);
        let resp = self.send(&body).await?;
        let choice = if streaming {
            self.stream_response(resp, options).await?
        } else {
            let v: Value = resp
                .json()
                .await
                .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
            self.parse_response(&v)
        };
        Ok(ContentResponse::from_choice(choice))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
