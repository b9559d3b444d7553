//! External Service Adapters
//!
//! Contracts for audio fingerprint identification, credit lookup and
//! vision-language classification, plus the retry decorator shared by all of
//! them. HTTP implementations live behind the `remote-services` feature.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::review::context::{AudioSample, FingerprintMatch, Frame};
use crate::core::review::rules::content::ContentCategory;
use crate::core::{Confidence, CoreResult};

pub mod retry;

#[cfg(feature = "remote-services")]
pub mod acoustid;
#[cfg(feature = "remote-services")]
pub mod http;
#[cfg(feature = "remote-services")]
pub mod musicbrainz;
#[cfg(feature = "remote-services")]
pub mod vision;

pub use retry::{RetryPolicy, Retrying};

#[cfg(feature = "remote-services")]
pub use remote::connect;

// =============================================================================
// Credits
// =============================================================================

/// Role a person played in writing a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditRole {
    Lyricist,
    Composer,
    /// Credited for both words and music
    Writer,
}

impl CreditRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditRole::Lyricist => "lyricist",
            CreditRole::Composer => "composer",
            CreditRole::Writer => "writer",
        }
    }
}

/// One writing credit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub role: CreditRole,
    pub name: String,
}

impl Credit {
    pub fn new(role: CreditRole, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifier verdict for one category on one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub detected: bool,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CategoryScore {
    pub fn new(detected: bool, confidence: Confidence) -> Self {
        Self {
            detected,
            confidence,
            description: None,
        }
    }
}

/// Per-category verdicts for one frame
pub type Classification = BTreeMap<ContentCategory, CategoryScore>;

// =============================================================================
// Service Contracts
// =============================================================================

/// Identifies a song from an audio fingerprint
#[async_trait]
pub trait FingerprintService: Send + Sync {
    fn service_name(&self) -> &str;

    /// `Ok(None)` when nothing matched
    async fn identify(&self, sample: &AudioSample) -> CoreResult<Option<FingerprintMatch>>;
}

/// Looks up writing credits for a song
#[async_trait]
pub trait MetadataService: Send + Sync {
    fn service_name(&self) -> &str;

    /// An empty list is a valid answer
    async fn lookup(&self, title: &str, performer: &str) -> CoreResult<Vec<Credit>>;
}

/// Classifies a single frame against a category schema
#[async_trait]
pub trait VisionClassifier: Send + Sync {
    fn service_name(&self) -> &str;

    async fn classify(
        &self,
        frame: &Frame,
        categories: &[ContentCategory],
    ) -> CoreResult<Classification>;
}

// =============================================================================
// Remote Wiring
// =============================================================================

#[cfg(feature = "remote-services")]
mod remote {
    use std::sync::Arc;

    use tracing::info;

    use super::acoustid::AcoustIdClient;
    use super::musicbrainz::MusicBrainzClient;
    use super::vision::VisionClient;
    use super::{FingerprintService, MetadataService, RetryPolicy, Retrying, VisionClassifier};
    use crate::core::config::ReviewConfig;
    use crate::core::review::RuleServices;
    use crate::core::CoreResult;

    /// Builds the HTTP adapters the enabled rules need, each behind a retry
    /// decorator.
    pub fn connect(config: &ReviewConfig) -> CoreResult<RuleServices> {
        let policy = RetryPolicy::from_config(&config.retry);
        let timeout = policy.call_timeout;
        let user_agent = config.services.musicbrainz.user_agent.as_str();
        let mut services = RuleServices::default();

        if config.rules.metadata.enabled {
            if config.services.acoustid.api_key.is_some() {
                let client = AcoustIdClient::new(&config.services.acoustid, user_agent, timeout)?;
                let client: Arc<dyn FingerprintService> = Arc::new(Retrying::new(client, policy));
                services.fingerprint = Some(client);
            }
            let client = MusicBrainzClient::new(&config.services.musicbrainz, timeout)?;
            let client: Arc<dyn MetadataService> = Arc::new(Retrying::new(client, policy));
            services.metadata = Some(client);
        }

        if config.rules.content.enabled {
            let client = VisionClient::new(&config.services.vision, user_agent, timeout)?;
            info!(
                "Vision classifier: {} at {}",
                config.services.vision.model, config.services.vision.api_url
            );
            let client: Arc<dyn VisionClassifier> = Arc::new(Retrying::new(client, policy));
            services.vision = Some(client);
        }

        Ok(services)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_connect_builds_only_needed_adapters() {
            let mut config = ReviewConfig::default();
            config.rules.content.enabled = false;
            let services = connect(&config).unwrap();
            assert!(services.fingerprint.is_none());
            assert!(services.metadata.is_some());
            assert!(services.vision.is_none());

            config.services.acoustid.api_key = Some("key".into());
            config.rules.content.enabled = true;
            let services = connect(&config).unwrap();
            assert!(services.fingerprint.is_some());
            assert!(services.vision.is_some());
        }
    }
}
