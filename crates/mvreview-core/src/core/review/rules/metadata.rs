//! Metadata Rule
//!
//! Identifies the song from its audio fingerprint, looks up its writing
//! credits and flags songs written by a blocked lyricist or composer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::ReviewRule;
use crate::core::config::MetadataRuleConfig;
use crate::core::review::context::{FingerprintMatch, ReviewContext};
use crate::core::review::violation::{Details, RuleError, RuleErrorKind, RuleOutcome, Violation};
use crate::core::services::{Credit, FingerprintService, MetadataService};
use crate::core::RuleId;

pub const RULE_ID: RuleId = 1;
pub const RULE_NAME: &str = "metadata";

/// Normalizes a person's name for comparison: lowercase, punctuation removed,
/// whitespace trimmed and collapsed.
pub fn normalize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized blocklist: every accepted spelling mapped to its canonical name
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    entries: BTreeMap<String, String>,
}

impl Blocklist {
    pub fn from_config(config: &MetadataRuleConfig) -> Self {
        let mut entries = BTreeMap::new();
        for name in &config.blocked_creators {
            let key = normalize_name(name);
            if !key.is_empty() {
                entries.insert(key, name.trim().to_string());
            }
        }
        for (canonical, aliases) in &config.aliases {
            for alias in aliases {
                let key = normalize_name(alias);
                if !key.is_empty() {
                    entries.insert(key, canonical.trim().to_string());
                }
            }
        }
        Self { entries }
    }

    /// Canonical blocked name for `name`, if it is blocked
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.entries.get(&normalize_name(name)).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Blocked-creator detection
pub struct MetadataRule {
    config: MetadataRuleConfig,
    blocklist: Blocklist,
    fingerprinter: Option<Arc<dyn FingerprintService>>,
    credits: Option<Arc<dyn MetadataService>>,
}

impl MetadataRule {
    pub fn new(
        config: MetadataRuleConfig,
        fingerprinter: Option<Arc<dyn FingerprintService>>,
        credits: Arc<dyn MetadataService>,
    ) -> Self {
        let blocklist = Blocklist::from_config(&config);
        Self {
            config,
            blocklist,
            fingerprinter,
            credits: Some(credits),
        }
    }

    /// A rule that is switched off and never consulted
    pub fn disabled() -> Self {
        Self {
            config: MetadataRuleConfig {
                enabled: false,
                ..Default::default()
            },
            blocklist: Blocklist::default(),
            fingerprinter: None,
            credits: None,
        }
    }

    fn error_from(&self, err: &crate::core::CoreError) -> RuleOutcome {
        RuleOutcome::Error(RuleError::from_core(RULE_ID, RULE_NAME, err))
    }

    /// Finds the song, either from the context or through the fingerprint
    /// service. `Err` carries the outcome to return immediately.
    async fn identify(&self, ctx: &ReviewContext) -> Result<FingerprintMatch, RuleOutcome> {
        if let Some(candidate) = ctx.fingerprint() {
            return Ok(candidate.clone());
        }

        let Some(sample) = ctx.audio_sample() else {
            let mut details = Details::new();
            details.insert("identified".into(), json!(false));
            details.insert("identification".into(), json!("no_audio_sample"));
            if let Some(reason) = ctx.audio_error() {
                details.insert("audio_error".into(), json!(reason));
            }
            return Err(RuleOutcome::Pass(details));
        };

        let Some(fingerprinter) = &self.fingerprinter else {
            let mut details = Details::new();
            details.insert("identified".into(), json!(false));
            details.insert("identification".into(), json!("no_fingerprint_service"));
            return Err(RuleOutcome::Pass(details));
        };

        match fingerprinter.identify(sample).await {
            Ok(Some(m)) => Ok(m),
            Ok(None) => Err(RuleOutcome::pass_with("identified", false)),
            Err(e) => Err(self.error_from(&e)),
        }
    }
}

#[async_trait]
impl ReviewRule for MetadataRule {
    fn id(&self) -> RuleId {
        RULE_ID
    }

    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn description(&self) -> &'static str {
        "Flags songs credited to a blocked lyricist or composer"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn check(&self, ctx: &ReviewContext) -> RuleOutcome {
        let Some(credit_service) = &self.credits else {
            return RuleOutcome::Error(RuleError::new(
                RULE_ID,
                RULE_NAME,
                RuleErrorKind::Internal,
                "no credit lookup service configured",
            ));
        };

        let song = match self.identify(ctx).await {
            Ok(song) => song,
            Err(outcome) => return outcome,
        };

        if song.confidence < self.config.min_match_confidence {
            let mut details = Details::new();
            details.insert("identified".into(), json!(false));
            details.insert("best_confidence".into(), json!(song.confidence));
            return RuleOutcome::Pass(details);
        }

        debug!(
            "Identified {} as \"{}\" by {} ({:.2})",
            ctx.path().display(),
            song.title,
            song.performer,
            song.confidence
        );

        let mut credits: Vec<Credit> = match credit_service.lookup(&song.title, &song.performer).await
        {
            Ok(c) => c,
            Err(e) => return self.error_from(&e),
        };
        credits.sort_by(|a, b| (a.role, &a.name).cmp(&(b.role, &b.name)));
        credits.dedup();

        if credits.is_empty() {
            let mut details = Details::new();
            details.insert("identified".into(), json!(true));
            details.insert("song_title".into(), json!(song.title));
            details.insert("performer".into(), json!(song.performer));
            details.insert("credits_found".into(), json!(0));
            return RuleOutcome::Pass(details);
        }

        let matches: Vec<(&Credit, &str)> = credits
            .iter()
            .filter_map(|c| self.blocklist.lookup(&c.name).map(|blocked| (c, blocked)))
            .collect();

        let Some((first, blocked)) = matches.first() else {
            let mut details = Details::new();
            details.insert("identified".into(), json!(true));
            details.insert("song_title".into(), json!(song.title));
            details.insert("performer".into(), json!(song.performer));
            details.insert("credits_found".into(), json!(credits.len()));
            return RuleOutcome::Pass(details);
        };

        info!(
            "Blocked creator {} credited as {} on \"{}\"",
            blocked,
            first.role.as_str(),
            song.title
        );

        let all_matches: Vec<serde_json::Value> = matches
            .iter()
            .map(|(credit, blocked)| {
                json!({
                    "name": credit.name,
                    "blocked_creator": blocked,
                    "role": credit.role,
                })
            })
            .collect();

        RuleOutcome::Violation(
            Violation::new(
                RULE_ID,
                RULE_NAME,
                format!(
                    "\"{}\" by {} credits blocked {} {}",
                    song.title,
                    song.performer,
                    first.role.as_str(),
                    blocked
                ),
                song.confidence,
            )
            .with_detail("song_title", song.title.clone())
            .with_detail("performer", song.performer.clone())
            .with_detail("matched_credit", first.name.clone())
            .with_detail("blocked_creator", *blocked)
            .with_detail("role", first.role.as_str())
            .with_detail("matches", json!(all_matches)),
        )
    }
}
