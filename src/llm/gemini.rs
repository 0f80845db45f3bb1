//! Google Gemini provider implementation

use super::sse::{SseDecoder, SseFrame};
use super::types::{LlmRequest, LlmResponse, MessageRole, ResponseFormat, TextStream, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

const DIRECT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const COMPLETE_TIMEOUT: Duration = Duration::from_secs(120);

/// Gemini models
#[derive(Debug, Clone, Copy)]
pub enum GeminiModel {
    Gemini25Flash,
    Gemini25Pro,
    Gemini25FlashLite,
}

impl GeminiModel {
    pub fn api_name(self) -> &'static str {
        match self {
            GeminiModel::Gemini25Flash => "gemini-2.5-flash",
            GeminiModel::Gemini25Pro => "gemini-2.5-pro",
            GeminiModel::Gemini25FlashLite => "gemini-2.5-flash-lite",
        }
    }
}

/// Gemini service implementation
pub struct GeminiService {
    client: Client,
    api_key: String,
    model: GeminiModel,
    base_url: String,
}

impl GeminiService {
    pub fn new(
        api_key: String,
        model: GeminiModel,
        gateway: Option<&str>,
    ) -> Result<Self, LlmError> {
        let base_url = match gateway {
            Some(gw) => format!("{}/gemini/v1beta", gw.trim_end_matches('/')),
            None => DIRECT_BASE_URL.to_string(),
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        let suffix = if method == "streamGenerateContent" {
            "?alt=sse"
        } else {
            ""
        };
        format!(
            "{}/models/{}:{method}{suffix}",
            self.base_url,
            self.model.api_name()
        )
    }

    fn post(&self, url: &str, body: &GeminiRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        // Gateway mode authenticates on our behalf
        if self.api_key.starts_with("implicit") {
            builder
        } else {
            builder.header("x-goog-api-key", &self.api_key)
        }
    }

    fn translate_request(request: &LlmRequest) -> GeminiRequest {
        let system_instruction = request
            .system
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(text.clone())],
            });

        let contents = request
            .messages
            .iter()
            .filter(|m| !m.text.is_empty())
            .map(|m| GeminiContent {
                role: Some(
                    match m.role {
                        MessageRole::User => "user",
                        MessageRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart::text(m.text.clone())],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                response_mime_type: match request.response_format {
                    ResponseFormat::Json => Some("application/json".to_string()),
                    ResponseFormat::Text => None,
                },
            },
        }
    }

    fn normalize_response(resp: GeminiResponse) -> Result<LlmResponse, LlmError> {
        let usage = resp.usage();
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No candidates in response"))?;

        let end_turn = candidate.finish_reason.as_deref() == Some("STOP");
        Ok(LlmResponse {
            text: candidate.text(),
            end_turn,
            usage,
        })
    }

    async fn send(
        &self,
        url: &str,
        body: &GeminiRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self.post(url, body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;
        let message = serde_json::from_str::<GeminiErrorResponse>(&body)
            .map_or(body, |e| e.error.message);

        let err = LlmError::from_status(status.as_u16(), &message);
        Err(match retry_after {
            Some(after) => err.with_retry_after(after),
            None => err,
        })
    }
}

#[async_trait]
impl LlmService for GeminiService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = Self::translate_request(request);
        let response = self
            .send(&self.endpoint("generateContent"), &body, Some(COMPLETE_TIMEOUT))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::from_transport(&e))?;
        let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {text}"))
        })?;
        Self::normalize_response(parsed)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let body = Self::translate_request(request);
        let response = self
            .send(&self.endpoint("streamGenerateContent"), &body, None)
            .await?;
        Ok(decode_stream(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        self.model.api_name()
    }
}

struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    queued: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl<S> StreamState<S> {
    fn push_frame(&mut self, frame: &SseFrame) {
        match serde_json::from_str::<GeminiResponse>(&frame.data) {
            Ok(chunk) => {
                let text: String = chunk.candidates.iter().map(GeminiCandidate::text).collect();
                if !text.is_empty() {
                    self.queued.push_back(Ok(text));
                }
            }
            Err(e) => {
                self.finished = true;
                self.queued
                    .push_back(Err(LlmError::unknown(format!("Malformed stream chunk: {e}"))));
            }
        }
    }
}

/// Turn a `streamGenerateContent?alt=sse` body into text fragments
fn decode_stream<S, B>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        queued: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.queued.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for frame in state.decoder.feed(chunk.as_ref()) {
                        state.push_frame(&frame);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.queued.push_back(Err(LlmError::from_transport(&e)));
                }
                None => {
                    state.finished = true;
                    if let Some(frame) = state.decoder.finish() {
                        state.push_frame(&frame);
                    }
                }
            }
        }
    }))
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    /// Set on reasoning summaries, which are not part of the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            thought: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

impl GeminiResponse {
    fn usage(&self) -> Usage {
        self.usage_metadata
            .as_ref()
            .map_or_else(Usage::default, |u| Usage {
                input_tokens: u64::from(u.prompt_token_count),
                output_tokens: u64::from(u.candidates_token_count),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl GeminiCandidate {
    fn text(&self) -> String {
        self.content
            .iter()
            .flat_map(|c| &c.parts)
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmMessage;

    fn chunk(text: &str) -> Vec<u8> {
        let body = serde_json::json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        });
        format!("data: {body}\r\n\r\n").into_bytes()
    }

    #[test]
    fn test_translate_request_maps_roles_and_json_mode() {
        let request = LlmRequest::new(
            Some("be brief".to_string()),
            vec![LlmMessage::user("hi"), LlmMessage::model("hello"), LlmMessage::user("")],
        )
        .json();

        let translated = GeminiService::translate_request(&request);
        let value = serde_json::to_value(&translated).unwrap();

        assert_eq!(value["contents"].as_array().unwrap().len(), 2);
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_normalize_response_skips_thoughts() {
        let resp: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "answer" }
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 3 }
        }))
        .unwrap();

        let normalized = GeminiService::normalize_response(resp).unwrap();
        assert_eq!(normalized.text, "answer");
        assert!(normalized.end_turn);
        assert_eq!(normalized.usage.total(), 10);
    }

    #[test]
    fn test_normalize_response_without_candidates_fails() {
        let resp: GeminiResponse = serde_json::from_str("{}").unwrap();
        assert!(GeminiService::normalize_response(resp).is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_yields_fragments_across_chunks() {
        let mut body = chunk("Hel");
        body.extend(chunk("lo"));
        let (first, second) = body.split_at(10);
        let parts: Vec<Result<Vec<u8>, reqwest::Error>> =
            vec![Ok(first.to_vec()), Ok(second.to_vec())];

        let fragments: Vec<String> = decode_stream(futures::stream::iter(parts))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_stream_reports_malformed_chunk() {
        let parts: Vec<Result<Vec<u8>, reqwest::Error>> = vec![Ok(b"data: not json\n\n".to_vec())];
        let items: Vec<_> = decode_stream(futures::stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
