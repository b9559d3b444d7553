//! Review Rules
//!
//! The closed set of checks a video goes through. Each rule reads the shared
//! [`ReviewContext`] and returns exactly one [`RuleOutcome`]; failures are
//! reported as `RuleOutcome::Error`, never propagated.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::ReviewContext;
use super::violation::RuleOutcome;
use crate::core::config::ReviewConfig;
use crate::core::services::{FingerprintService, MetadataService, VisionClassifier};
use crate::core::{CoreError, CoreResult, RuleId};

pub mod aspect;
pub mod content;
pub mod metadata;
pub mod volume;

pub use aspect::AspectRule;
pub use content::{ContentCategory, ContentRule};
pub use metadata::MetadataRule;
pub use volume::VolumeRule;

/// Contract shared by every rule
#[async_trait]
pub trait ReviewRule: Send + Sync {
    /// Stable identifier used for ordering and reports
    fn id(&self) -> RuleId;

    /// Human-readable name
    fn name(&self) -> &'static str;

    /// What the rule checks
    fn description(&self) -> &'static str;

    /// Disabled rules are skipped and contribute no outcome
    fn is_enabled(&self) -> bool;

    /// Checks the context. Read-only and safe to run concurrently with other
    /// rules on the same context.
    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome;
}

/// One of the built-in rules
pub enum Rule {
    Metadata(MetadataRule),
    Aspect(AspectRule),
    Volume(VolumeRule),
    Content(ContentRule),
}

impl Rule {
    fn inner(&self) -> &dyn ReviewRule {
        match self {
            Rule::Metadata(r) => r,
            Rule::Aspect(r) => r,
            Rule::Volume(r) => r,
            Rule::Content(r) => r,
        }
    }
}

#[async_trait]
impl ReviewRule for Rule {
    fn id(&self) -> RuleId {
        self.inner().id()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn description(&self) -> &'static str {
        self.inner().description()
    }

    fn is_enabled(&self) -> bool {
        self.inner().is_enabled()
    }

    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome {
        self.inner().check(ctx).await
    }
}

/// Service adapters handed to rules that need them
#[derive(Clone, Default)]
pub struct RuleServices {
    pub fingerprint: Option<Arc<dyn FingerprintService>>,
    pub metadata: Option<Arc<dyn MetadataService>>,
    pub vision: Option<Arc<dyn VisionClassifier>>,
}

/// Builds the rule set described by `config`, ordered by rule id.
///
/// An enabled rule whose required service is missing is a configuration
/// error.
pub fn build_rules(config: &ReviewConfig, services: &RuleServices) -> CoreResult<Vec<Rule>> {
    let rules_cfg = &config.rules;
    let mut rules = Vec::with_capacity(4);

    if rules_cfg.metadata.enabled {
        let lookup = services.metadata.clone().ok_or_else(|| {
            CoreError::InvalidConfig(
                "metadata rule is enabled but no credit lookup service is configured".to_string(),
            )
        })?;
        rules.push(Rule::Metadata(MetadataRule::new(
            rules_cfg.metadata.clone(),
            services.fingerprint.clone(),
            lookup,
        )));
    } else {
        rules.push(Rule::Metadata(MetadataRule::disabled()));
    }

    rules.push(Rule::Aspect(AspectRule::new(rules_cfg.aspect.clone())));
    rules.push(Rule::Volume(VolumeRule::new(rules_cfg.volume.clone())));

    if rules_cfg.content.enabled {
        let classifier = services.vision.clone().ok_or_else(|| {
            CoreError::InvalidConfig(
                "content rule is enabled but no vision classifier is configured".to_string(),
            )
        })?;
        rules.push(Rule::Content(ContentRule::new(
            rules_cfg.content.clone(),
            classifier,
        )));
    } else {
        rules.push(Rule::Content(ContentRule::disabled()));
    }

    Ok(rules)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory service fakes shared by rule and engine tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::core::review::context::{AudioSample, FingerprintMatch, Frame};
    use crate::core::services::{CategoryScore, Classification, Credit};

    pub struct FakeFingerprinter {
        pub result: Result<Option<FingerprintMatch>, fn() -> CoreError>,
        pub calls: AtomicU32,
    }

    impl FakeFingerprinter {
        pub fn matching(title: &str, performer: &str, confidence: f64) -> Self {
            Self {
                result: Ok(Some(FingerprintMatch {
                    title: title.into(),
                    performer: performer.into(),
                    confidence,
                })),
                calls: AtomicU32::new(0),
            }
        }

        pub fn miss() -> Self {
            Self {
                result: Ok(None),
                calls: AtomicU32::new(0),
            }
        }

        pub fn failing(make: fn() -> CoreError) -> Self {
            Self {
                result: Err(make),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl FingerprintService for FakeFingerprinter {
        fn service_name(&self) -> &str {
            "fake-fingerprint"
        }

        async fn identify(&self, _sample: &AudioSample) -> CoreResult<Option<FingerprintMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(m) => Ok(m.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    pub struct FakeCredits {
        pub credits: Vec<Credit>,
    }

    #[async_trait]
    impl MetadataService for FakeCredits {
        fn service_name(&self) -> &str {
            "fake-credits"
        }

        async fn lookup(&self, _title: &str, _performer: &str) -> CoreResult<Vec<Credit>> {
            Ok(self.credits.clone())
        }
    }

    /// Returns a fixed classification per frame timestamp; frames without an
    /// entry fail.
    pub struct FakeClassifier {
        pub by_timestamp: HashMap<u64, Vec<(ContentCategory, bool, f64)>>,
    }

    impl FakeClassifier {
        pub fn key(ts: f64) -> u64 {
            (ts * 1000.0).round() as u64
        }
    }

    #[async_trait]
    impl VisionClassifier for FakeClassifier {
        fn service_name(&self) -> &str {
            "fake-vision"
        }

        async fn classify(
            &self,
            frame: &Frame,
            categories: &[ContentCategory],
        ) -> CoreResult<Classification> {
            let entries = self
                .by_timestamp
                .get(&Self::key(frame.timestamp_sec))
                .ok_or_else(|| CoreError::request_failed("fake-vision", Some(500), "boom"))?;
            Ok(entries
                .iter()
                .filter(|(c, _, _)| categories.contains(c))
                .map(|(c, detected, conf)| (*c, CategoryScore::new(*detected, *conf)))
                .collect())
        }
    }
}
