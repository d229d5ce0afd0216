// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
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

/// Driver for the OpenAI chat-completions wire format.
///
/// Covers OpenAI itself and any compatible endpoint; Ollama ships the same
/// surface at `http://localhost:11434/v1` and runs keyless.
pub struct OpenAiCompatClient {
    provider_id: &'static str,
    model: String,
    base_url: String,
    auth: Arc<dyn Auth>,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        provider_id: &'static str,
        model: String,
        auth: Arc<dyn Auth>,
        base_url: &str,
    ) -> Self {
        Self {
            provider_id,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
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
        let mut msgs: Vec<Value> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => msgs.push(json!({ "role": "system", "content": m.text() })),
                Role::Human => msgs.push(json!({ "role": "user", "content": m.text() })),
                Role::Ai => {
                    let calls: Vec<Value> = m
                        .tool_calls()
                        .into_iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments },
                            })
                        })
                        .collect();
                    let mut msg = json!({ "role": "assistant" });
                    let text = m.text();
                    msg["content"] = if text.is_empty() { Value::Null } else { json!(text) };
                    if !calls.is_empty() {
                        msg["tool_calls"] = Value::Array(calls);
                    }
                    msgs.push(msg);
                }
                Role::Tool => {
                    for p in &m.parts {
                        if let Part::ToolCallResponse { id, content, .. } = p {
                            msgs.push(json!({
                                "role": "tool",
                                "tool_call_id": id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": msgs,
            "stream": stream,
        });
        if let Some(max) = options.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if !tools.is_empty() && options.tool_choice == ToolChoice::Auto {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ModelError> {
        let mut req = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = self.auth.get_api_key(self.provider_id) {
            req = req.bearer_auth(key);
        } else if self.provider_id == "openai" {
            return Err(ModelError::Auth(
                "no OpenAI credentials: set OPENAI_API_KEY".into(),
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
        let msg = &v["choices"][0]["message"];
        let tool_calls = msg["tool_calls"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|c| ToolCallRequest {
                        id: c["id"].as_str().unwrap_or("").to_string(),
                        name: c["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: c["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Choice {
            content: msg["content"].as_str().unwrap_or("").to_string(),
            reasoning_content: msg["reasoning_content"].as_str().map(str::to_string),
            stop_reason: parse_finish_reason(v["choices"][0]["finish_reason"].as_str()),
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
        // OpenAI interleaves argument chunks for parallel calls by index.
        let mut pending: BTreeMap<u64, (String, String, String)> = BTreeMap::new();

        while let Some(data) = reader.next_data().await? {
            if let Some(cancel) = &options.cancel {
                if cancel.is_cancelled() {
                    return Err(ModelError::Cancelled);
                }
            }
            if data == "[DONE]" {
                break;
            }
            let ev: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable stream event");
                    continue;
                }
            };
            let choice = &ev["choices"][0];
            if let Some(fr) = choice["finish_reason"].as_str() {
                stop_reason = parse_finish_reason(Some(fr));
            }
            let delta = &choice["delta"];
            if let Some(text) = delta["content"].as_str() {
                if !text.is_empty() {
                    content.push_str(text);
                    if let Some(cb) = &options.on_chunk {
                        cb(text);
                    }
                }
            }
            if let Some(text) = delta["reasoning_content"].as_str() {
                if !text.is_empty() {
                    reasoning.push_str(text);
                    if let Some(cb) = &options.on_reasoning {
                        cb(text);
                    }
                }
            }
            if let Some(calls) = delta["tool_calls"].as_array() {
                for c in calls {
                    let index = c["index"].as_u64().unwrap_or(0);
                    let entry = pending.entry(index).or_default();
                    if let Some(id) = c["id"].as_str() {
                        entry.0 = id.to_string();
                    }
                    if let Some(name) = c["function"]["name"].as_str() {
                        entry.1.push_str(name);
                    }
                    if let Some(args) = c["function"]["arguments"].as_str() {
                        entry.2.push_str(args);
                    }
                }
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

fn parse_finish_reason(s: Option<&str>) -> StopReason {
    match s {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn provider(&self) -> &str {
        self.provider_id
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigAuth;

    fn client() -> OpenAiCompatClient {
        OpenAiCompatClient::new(
            "openai",
            "gpt-4o".into(),
            Arc::new(ConfigAuth::default()),
            "https://api.openai.com/v1",
        )
    }

    #[test]
    fn body_maps_roles_to_wire_names() {
        let msgs = vec![
            Message::system("sys"),
            Message::human("hi"),
            Message::ai("hello"),
        ];
        let body = client().build_body(&msgs, &[], &GenerateOptions::default(), false);
        let m = body["messages"].as_array().unwrap();
        assert_eq!(m[0]["role"], "system");
        assert_eq!(m[1]["role"], "user");
        assert_eq!(m[2]["role"], "assistant");
        assert_eq!(m[2]["content"], "hello");
    }

    #[test]
    fn assistant_tool_calls_use_function_envelope() {
        let msgs = vec![Message::ai_with_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "grep".into(),
                arguments: r#"{"pattern":"x"}"#.into(),
            }],
        )];
        let body = client().build_body(&msgs, &[], &GenerateOptions::default(), false);
        let m = &body["messages"][0];
        assert!(m["content"].is_null(), "empty assistant text must be null");
        assert_eq!(m["tool_calls"][0]["type"], "function");
        assert_eq!(m["tool_calls"][0]["function"]["name"], "grep");
    }

    #[test]
    fn tool_responses_carry_tool_call_id() {
        let msgs = vec![Message::tool_response("call_1", "grep", "out")];
        let body = client().build_body(&msgs, &[], &GenerateOptions::default(), false);
        assert_eq!(body["messages"][0]["role"], "tool");
        assert_eq!(body["messages"][0]["tool_call_id"], "call_1");
    }

    #[test]
    fn tools_are_wrapped_as_functions() {
        let tools = vec![ToolSchema {
            name: "glob".into(),
            description: "d".into(),
            parameters: json!({"type":"object"}),
        }];
        let body = client().build_body(&[], &tools, &GenerateOptions::default(), false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(parse_finish_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(parse_finish_reason(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(parse_finish_reason(Some("stop")), StopReason::EndTurn);
    }

    #[test]
    fn parse_response_reads_message_fields() {
        let v = json!({
            "choices": [{
                "message": {
                    "content": "answer",
                    "tool_calls": [
                        { "id": "c1", "function": { "name": "glob", "arguments": "{}" } }
                    ],
                },
                "finish_reason": "tool_calls",
            }]
        });
        let choice = client().parse_response(&v);
        assert_eq!(choice.content, "answer");
        assert_eq!(choice.tool_calls[0].id, "c1");
        assert_eq!(choice.stop_reason, StopReason::ToolUse);
    }

    #[tokio::test]
    async fn openai_without_key_is_auth_error() {
        let msgs = vec![Message::human("hi")];
        let err = client()
            .generate_content(&msgs, &[], &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Auth(_)), "{err:?}");
    }
}
