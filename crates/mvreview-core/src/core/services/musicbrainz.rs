//! MusicBrainz credit lookup
//!
//! Search the recording, follow its work relations, then read the writing
//! credits off each work's artist relations.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::http::{build_client, rate_limiter, send, DirectLimiter};
use super::{Credit, CreditRole, MetadataService};
use crate::core::config::MusicBrainzConfig;
use crate::core::{CoreError, CoreResult};

pub const SERVICE: &str = "musicbrainz";

/// Search hits whose works are inspected before giving up
const MAX_RECORDINGS: usize = 3;
const SEARCH_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Related {
    #[serde(default)]
    relations: Vec<Relation>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    #[serde(rename = "type", default)]
    relation_type: String,
    work: Option<Entity>,
    artist: Option<Entity>,
}

#[derive(Debug, Deserialize)]
struct Entity {
    id: String,
    #[serde(default)]
    name: String,
}

fn parse<'a, T: Deserialize<'a>>(body: &'a str) -> CoreResult<T> {
    serde_json::from_str(body)
        .map_err(|e| CoreError::invalid_response(SERVICE, format!("unparseable body: {}", e)))
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Lucene query for a recording by title and (optionally) artist
pub fn search_query(title: &str, performer: &str) -> String {
    let mut query = format!("recording:{}", quote(title));
    if !performer.trim().is_empty() {
        query.push_str(&format!(" AND artist:{}", quote(performer)));
    }
    query
}

/// Maps a work-artist relation type to a credit role
pub fn role_for(relation_type: &str) -> Option<CreditRole> {
    match relation_type.to_ascii_lowercase().as_str() {
        "lyricist" | "lyrics" | "librettist" => Some(CreditRole::Lyricist),
        "composer" | "music" => Some(CreditRole::Composer),
        "writer" => Some(CreditRole::Writer),
        _ => None,
    }
}

/// Recording ids from a search response, best first
pub fn parse_recording_ids(body: &str) -> CoreResult<Vec<String>> {
    let response: SearchResponse = parse(body)?;
    Ok(response.recordings.into_iter().map(|r| r.id).collect())
}

/// Work ids related to a recording
pub fn parse_work_ids(body: &str) -> CoreResult<Vec<String>> {
    let related: Related = parse(body)?;
    Ok(related
        .relations
        .into_iter()
        .filter_map(|r| r.work.map(|w| w.id))
        .collect())
}

/// Writing credits from a work's artist relations
pub fn parse_work_credits(body: &str) -> CoreResult<Vec<Credit>> {
    let related: Related = parse(body)?;
    Ok(related
        .relations
        .into_iter()
        .filter_map(|r| {
            let role = role_for(&r.relation_type)?;
            let artist = r.artist.filter(|a| !a.name.is_empty())?;
            Some(Credit::new(role, artist.name))
        })
        .collect())
}

/// MusicBrainz client
pub struct MusicBrainzClient {
    client: reqwest::Client,
    base_url: String,
    limiter: DirectLimiter,
}

impl MusicBrainzClient {
    pub fn new(config: &MusicBrainzConfig, timeout: Duration) -> CoreResult<Self> {
        if config.user_agent.trim().is_empty() {
            return Err(CoreError::InvalidConfig(
                "MusicBrainz requires a user agent".into(),
            ));
        }
        Ok(Self {
            client: build_client(&config.user_agent, timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: rate_limiter(config.requests_per_second),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> CoreResult<String> {
        self.limiter.until_ready().await;
        let url = format!("{}/{}", self.base_url, path);
        send(
            SERVICE,
            self.client
                .get(&url)
                .query(query)
                .query(&[("fmt", "json")]),
        )
        .await
    }

    async fn work_credits(&self, recording_id: &str) -> CoreResult<Vec<Credit>> {
        let body = self
            .get(&format!("recording/{}", recording_id), &[("inc", "work-rels")])
            .await?;

        let mut credits = Vec::new();
        for work_id in parse_work_ids(&body)? {
            let body = self
                .get(&format!("work/{}", work_id), &[("inc", "artist-rels")])
                .await?;
            credits.extend(parse_work_credits(&body)?);
        }
        Ok(credits)
    }
}

#[async_trait]
impl MetadataService for MusicBrainzClient {
    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn lookup(&self, title: &str, performer: &str) -> CoreResult<Vec<Credit>> {
        let query = search_query(title, performer);
        let limit = SEARCH_LIMIT.to_string();
        let body = self
            .get("recording", &[("query", query.as_str()), ("limit", limit.as_str())])
            .await?;

        let ids = parse_recording_ids(&body)?;
        if ids.is_empty() {
            debug!("No MusicBrainz recordings for {} - {}", title, performer);
            return Ok(Vec::new());
        }

        for id in ids.iter().take(MAX_RECORDINGS) {
            let mut credits = self.work_credits(id).await?;
            if !credits.is_empty() {
                credits.sort_by(|a, b| (a.role, &a.name).cmp(&(b.role, &b.name)));
                credits.dedup();
                debug!("{} credit(s) for {} via recording {}", credits.len(), title, id);
                return Ok(credits);
            }
        }
        Ok(Vec::new())
    }
}
