//! AcoustID fingerprint lookup

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{build_client, rate_limiter, send, DirectLimiter};
use super::FingerprintService;
use crate::core::config::AcoustIdConfig;
use crate::core::review::{AudioSample, FingerprintMatch};
use crate::core::{clamp_confidence, CoreError, CoreResult};

pub const SERVICE: &str = "acoustid";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    results: Vec<LookupResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    score: f64,
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Deserialize)]
struct Recording {
    title: Option<String>,
    #[serde(default)]
    artists: Vec<Artist>,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
    joinphrase: Option<String>,
}

fn performer_name(artists: &[Artist]) -> String {
    let mut name = String::new();
    for (i, artist) in artists.iter().enumerate() {
        name.push_str(&artist.name);
        if i + 1 < artists.len() {
            name.push_str(artist.joinphrase.as_deref().unwrap_or(", "));
        }
    }
    name
}

/// Picks the best-scored result that names a recording
pub fn parse_lookup_response(body: &str) -> CoreResult<Option<FingerprintMatch>> {
    let response: LookupResponse = serde_json::from_str(body)
        .map_err(|e| CoreError::invalid_response(SERVICE, format!("unparseable body: {}", e)))?;

    if response.status != "ok" {
        let message = response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| format!("status {}", response.status));
        return Err(CoreError::invalid_response(SERVICE, message));
    }

    let best = response
        .results
        .iter()
        .filter_map(|result| {
            result
                .recordings
                .iter()
                .find_map(|rec| rec.title.as_deref().filter(|t| !t.is_empty()).map(|t| (t, rec)))
                .map(|(title, rec)| (result.score, title, rec))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0));

    Ok(best.map(|(score, title, rec)| FingerprintMatch {
        title: title.to_string(),
        performer: performer_name(&rec.artists),
        confidence: clamp_confidence(score),
    }))
}

/// AcoustID client
pub struct AcoustIdClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: DirectLimiter,
}

impl AcoustIdClient {
    /// Creates a client; fails without an API key
    pub fn new(config: &AcoustIdConfig, user_agent: &str, timeout: Duration) -> CoreResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidConfig("AcoustID API key is required".into()))?;

        Ok(Self {
            client: build_client(user_agent, timeout)?,
            base_url: config.base_url.clone(),
            api_key,
            limiter: rate_limiter(config.requests_per_second),
        })
    }
}

#[async_trait]
impl FingerprintService for AcoustIdClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn identify(&self, sample: &AudioSample) -> CoreResult<Option<FingerprintMatch>> {
        self.limiter.until_ready().await;

        let duration = sample.duration_sec.to_string();
        let params = [
            ("client", self.api_key.as_str()),
            ("meta", "recordings"),
            ("duration", duration.as_str()),
            ("fingerprint", sample.fingerprint.as_str()),
        ];
        debug!(duration_sec = sample.duration_sec, "Querying AcoustID");

        let body = send(SERVICE, self.client.post(&self.base_url).form(&params)).await?;
        let found = parse_lookup_response(&body)?;
        if let Some(m) = &found {
            info!(
                title = %m.title,
                performer = %m.performer,
                score = m.confidence,
                "AcoustID match"
            );
        }
        Ok(found)
    }
}
