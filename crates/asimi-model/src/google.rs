// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GoogleClient {
    model: String,
    base_url: String,
    auth: Arc<dyn Auth>,
    http: reqwest::Client,
}

impl GoogleClient {
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
    ) -> Value {
        let mut contents: Vec<Value> = Vec::new();
        for m in messages.iter().filter(|m| m.role != Role::System) {
            let (role, parts) = match m.role {
                Role::Human => ("user", vec![json!({ "text": m.text() })]),
                Role::Ai => {
                    let mut parts: Vec<Value> = Vec::new();
                    for p in &m.parts {
                        match p {
                            Part::Text { text } if !text.is_empty() => {
                                parts.push(json!({ "text": text }));
                            }
                            Part::ToolCall { name, arguments, .. } => {
                                let args: Value =
                                    serde_json::from_str(arguments).unwrap_or_else(|_| json!({}));
                                parts.push(json!({
                                    "functionCall": { "name": name, "args": args }
                                }));
                            }
                            _ => {}
                        }
                    }
                    ("model", parts)
                }
                Role::Tool => {
                    let mut parts: Vec<Value> = Vec::new();
                    for p in &m.parts {
                        if let Part::ToolCallResponse { name, content, .. } = p {
                            parts.push(json!({
                                "functionResponse": {
                                    "name": name,
                                    "response": { "result": content },
                                }
                            }));
                        }
                    }
                    ("user", parts)
                }
                Role::System => unreachable!(),
            };
            contents.push(json!({ "role": role, "parts": parts }));
        }

        let mut body = json!({ "contents": contents });
        if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.text() }] });
        }
        if let Some(max) = options.max_tokens {
            body["generationConfig"] = json!({ "maxOutputTokens": max });
        }
        if !tools.is_empty() && options.tool_choice == ToolChoice::Auto {
            body["tools"] = json!([{
                "functionDeclarations": tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }))
                    .collect::<Vec<_>>()
            }]);
        }
        body
    }

    /// Merge one response (or stream chunk) into the accumulating choice.
    fn merge_chunk(choice: &mut Choice, v: &Value, options: &GenerateOptions, call_seq: &mut u32) {
        let candidate = &v["candidates"][0];
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for p in parts {
                if let Some(text) = p["text"].as_str() {
                    choice.content.push_str(text);
                    if let Some(cb) = &options.on_chunk {
                        cb(text);
                    }
                }
                if p["functionCall"].is_object() {
                    // Gemini does not assign call ids; synthesize stable ones
                    // so responses can be correlated.
                    *call_seq += 1;
                    choice.tool_calls.push(ToolCallRequest {
                        id: format!("call_{call_seq}"),
                        name: p["functionCall"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: p["functionCall"]["args"].to_string(),
                    });
                }
            }
        }
        if let Some(fr) = candidate["finishReason"].as_str() {
            choice.stop_reason = match fr {
                "MAX_TOKENS" => StopReason::MaxTokens,
                _ if !choice.tool_calls.is_empty() => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
        }
    }

    async fn send(&self, body: &Value, streaming: bool) -> Result<reqwest::Response, ModelError> {
        let key = self
            .auth
            .get_api_key("google")
            .ok_or_else(|| ModelError::Auth("no Google credentials: set GEMINI_API_KEY".into()))?;
        let method = if streaming {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        let url = format!("{}/v1beta/models/{}:{}{}", self.base_url, self.model, method, key);
        let resp = self.http.post(&url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(from_status(status.as_u16(), body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for GoogleClient {
    fn provider(&self) -> &str {
        "google"
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
        let body = self.build_body(messages, tools, options);
        let resp = self.send(&body, streaming).await?;

        let mut choice = Choice::default();
        let mut call_seq = 0u32;
        if streaming {
            let mut reader = SseReader::new(resp);
            while let Some(data) = reader.next_data().await? {
                if let Some(cancel) = &options.cancel {
                    if cancel.is_cancelled() {
                        return Err(ModelError::Cancelled);
                    }
                }
                match serde_json::from_str::<Value>(&data) {
                    Ok(v) => Self::merge_chunk(&mut choice, &v, options, &mut call_seq),
                    Err(e) => warn!(error = %e, "skipping unparseable stream event"),
                }
            }
        } else {
            let v: Value = resp
                .json()
                .await
                .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
            Self::merge_chunk(&mut choice, &v, options, &mut call_seq);
        }
        Ok(ContentResponse::from_choice(choice))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
