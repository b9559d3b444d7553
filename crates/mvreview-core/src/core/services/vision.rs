//! OpenAI-compatible vision classifier
//!
//! Sends one JPEG frame per chat completion and asks for a strict JSON
//! verdict per requested category.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::http::{build_client, rate_limiter, send, DirectLimiter};
use super::{CategoryScore, Classification, VisionClassifier};
use crate::core::config::VisionConfig;
use crate::core::review::{ContentCategory, Frame};
use crate::core::{clamp_confidence, CoreError, CoreResult};

pub const SERVICE: &str = "vision";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Review prompt listing the requested categories and the reply schema
pub fn build_prompt(categories: &[ContentCategory]) -> String {
    let mut prompt = String::from(
        "You are a professional video content moderator. Inspect this music video frame \
         and check for the following kinds of content:\n\n",
    );
    for (i, category) in categories.iter().enumerate() {
        prompt.push_str(&format!(
            "{}. {}: {}\n",
            i + 1,
            category.key(),
            category.prompt_hint()
        ));
    }

    let schema: Vec<String> = categories
        .iter()
        .map(|c| {
            format!(
                "  \"{}\": {{\"detected\": false, \"confidence\": 0.0, \"description\": \"\"}}",
                c.key()
            )
        })
        .collect();
    prompt.push_str(
        "\nReply with strict JSON only, no other text, using exactly this shape:\n{\n",
    );
    prompt.push_str(&schema.join(",\n"));
    prompt.push_str(
        "\n}\n\ndetected: whether the content is present (true/false)\n\
         confidence: how sure you are (0.0-1.0)\n\
         description: a short description of what was seen\n\
         If the frame is unremarkable every detected must be false.",
    );
    prompt
}

/// Extracts the first-`{`-to-last-`}` span of a model reply
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn score_from(value: &Value) -> Option<CategoryScore> {
    let obj = value.as_object()?;
    let detected = match obj.get("detected") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    let description = obj
        .get("description")
        .and_then(|d| d.as_str())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from);

    Some(CategoryScore {
        detected,
        confidence: clamp_confidence(confidence),
        description,
    })
}

/// Parses a model reply into scores for the requested categories.
/// Categories the reply leaves out are absent from the result.
pub fn parse_classification(
    reply: &str,
    categories: &[ContentCategory],
) -> CoreResult<Classification> {
    let span = json_span(reply)
        .ok_or_else(|| CoreError::invalid_response(SERVICE, "reply contains no JSON object"))?;
    let parsed: Value = serde_json::from_str(span)
        .map_err(|e| CoreError::invalid_response(SERVICE, format!("malformed JSON: {}", e)))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| CoreError::invalid_response(SERVICE, "reply is not a JSON object"))?;

    let mut classification = Classification::new();
    for (key, value) in obj {
        let Some(category) = ContentCategory::from_key(key) else {
            continue;
        };
        if !categories.contains(&category) {
            continue;
        }
        if let Some(score) = score_from(value) {
            classification.insert(category, score);
        }
    }
    Ok(classification)
}

fn reply_text(body: &str) -> CoreResult<String> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| CoreError::invalid_response(SERVICE, format!("unparseable body: {}", e)))?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| CoreError::invalid_response(SERVICE, "no completion returned"))
}

/// Vision-language classifier over an OpenAI-compatible chat endpoint
pub struct VisionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    limiter: DirectLimiter,
}

impl VisionClient {
    pub fn new(config: &VisionConfig, user_agent: &str, timeout: Duration) -> CoreResult<Self> {
        if config.api_url.trim().is_empty() {
            return Err(CoreError::InvalidConfig("vision api_url is empty".into()));
        }
        Ok(Self {
            client: build_client(user_agent, timeout)?,
            endpoint: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            limiter: rate_limiter(config.requests_per_second),
        })
    }

    fn request_body(&self, image: &[u8], categories: &[ContentCategory]) -> ChatCompletionRequest {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![json!({
                "role": "user",
                "content": [
                    {"type": "image_url", "image_url": {"url": data_url}},
                    {"type": "text", "text": build_prompt(categories)}
                ]
            })],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl VisionClassifier for VisionClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn classify(
        &self,
        frame: &Frame,
        categories: &[ContentCategory],
    ) -> CoreResult<Classification> {
        let image = frame.image.as_deref().ok_or_else(|| {
            CoreError::MediaTool(format!(
                "frame at {:.2}s has no encoded image",
                frame.timestamp_sec
            ))
        })?;

        self.limiter.until_ready().await;

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(image, categories));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let body = send(SERVICE, request).await?;
        let reply = reply_text(&body)?;
        let classification = parse_classification(&reply, categories)?;
        debug!(
            "Frame at {:.2}s: {} categor(ies) scored",
            frame.timestamp_sec,
            classification.len()
        );
        Ok(classification)
    }
}
