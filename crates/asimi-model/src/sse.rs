// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Minimal server-sent-events reader shared by the streaming drivers.

use crate::ModelError;

/// Incremental SSE reader over a streaming HTTP response body.
pub(crate) struct SseReader {
    resp: reqwest::Response,
    buf: String,
}

impl SseReader {
    pub(crate) fn new(resp: reqwest::Response) -> Self {
        Self { resp, buf: String::new() }
    }

    /// Next `data:` payload, or `None` at end of stream.  `event:` lines,
    /// comments, and blank keep-alive lines are skipped.
    pub(crate) async fn next_data(&mut self) -> Result<Option<String>, ModelError> {
        loop {
            if let Some(data) = take_data_line(&mut self.buf) {
                return Ok(Some(data));
            }
            match self.resp.chunk().await {
                Ok(Some(chunk)) => self.buf.push_str(&String::from_utf8_lossy(&chunk)),
                Ok(None) => {
                    // Flush a final unterminated line, if any.
                    let rest = std::mem::take(&mut self.buf);
                    return Ok(parse_data(rest.trim_end()));
                }
                Err(e) => return Err(ModelError::Transport(e.to_string())),
            }
        }
    }
}

/// Pop complete lines off the front of `buf` until a `data:` line is found.
fn take_data_line(buf: &mut String) -> Option<String> {
    while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        if let Some(data) = parse_data(line.trim_end()) {
            return Some(data);
        }
    }
    None
}

fn parse_data(line: &str) -> Option<String> {
    line.strip_prefix("data:").map(|d| d.trim_start().to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
