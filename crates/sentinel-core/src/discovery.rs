//! Threat discovery
//!
//! Queries the intelligence feed for a client's entities, drops records
//! already known for the client and persists the rest in one batch.

use crate::config::SentinelConfig;
use crate::error::SentinelError;
use crate::ports::{
    IntelligenceFeed, IntelligenceQuery, IntelligenceRecord, OperatorEvent, OperatorNotifier,
    SentinelStore,
};
use crate::types::{ClientId, DiscoveryResult, Fingerprint, ThreatDiscovery, ThreatId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Trim, lowercase and collapse internal whitespace
#[must_use]
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deduplication key for a (platform, content) pair
#[must_use]
pub fn fingerprint(platform: &str, content: &str) -> Fingerprint {
    let digest = Sha256::digest(normalize_content(content).as_bytes());
    Fingerprint {
        platform: platform.trim().to_lowercase(),
        content_hash: hex::encode(digest),
    }
}

/// Validate and dedupe entity names, keeping first-seen order
///
/// # Errors
/// - `SentinelError::InvalidRequest` if the list is empty or a name is blank
pub fn normalize_entity_names(names: &[String]) -> Result<Vec<String>, SentinelError> {
    if names.is_empty() {
        return Err(SentinelError::InvalidRequest(
            "entity names cannot be empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            return Err(SentinelError::InvalidRequest(
                "entity names cannot be blank".to_string(),
            ));
        }
        if seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

/// Threats found in one run, keyed by fingerprint in feed order
#[derive(Debug, Default)]
struct DiscoveryBatch {
    threats: IndexMap<Fingerprint, ThreatDiscovery>,
    duplicates: usize,
}

impl DiscoveryBatch {
    fn offer(&mut self, known: &HashSet<Fingerprint>, threat: ThreatDiscovery) {
        if known.contains(&threat.fingerprint) || self.threats.contains_key(&threat.fingerprint) {
            self.duplicates += 1;
            return;
        }
        self.threats.insert(threat.fingerprint.clone(), threat);
    }

    fn into_parts(self) -> (Vec<ThreatDiscovery>, usize) {
        (self.threats.into_values().collect(), self.duplicates)
    }
}

/// Coordinates feed queries and threat persistence
pub struct DiscoveryCoordinator {
    config: SentinelConfig,
    store: Arc<dyn SentinelStore>,
    feed: Arc<dyn IntelligenceFeed>,
    notifier: Arc<dyn OperatorNotifier>,
}

impl DiscoveryCoordinator {
    /// Create coordinator
    #[must_use]
    pub fn new(
        config: SentinelConfig,
        store: Arc<dyn SentinelStore>,
        feed: Arc<dyn IntelligenceFeed>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            config,
            store,
            feed,
            notifier,
        }
    }

    /// Discover new threats for a client's entities
    ///
    /// Names match literally against each record's detected entities. Plans
    /// are not generated here.
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` on an empty list or blank name
    /// - `SentinelError::ClientNotFound` if the client is unknown
    /// - `SentinelError::IntelligenceUnavailable` if the feed fails; nothing is written
    /// - `SentinelError::PersistenceFailure` if the batch write fails; nothing is written
    pub async fn discover_threats(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<DiscoveryResult, SentinelError> {
        let names = normalize_entity_names(entity_names)?;
        if self.store.get_client(client_id).await?.is_none() {
            return Err(SentinelError::ClientNotFound(client_id));
        }

        let now = Utc::now();
        let query = IntelligenceQuery {
            entity_names: names.clone(),
            since: now - self.config.recency_window(),
        };
        let records = self.feed.query(&query).await.map_err(|err| {
            tracing::warn!(client = %client_id, error = %err, "intelligence feed failed");
            SentinelError::IntelligenceUnavailable(err)
        })?;

        let known = self.store.threat_fingerprints(client_id).await?;
        let mut batch = DiscoveryBatch::default();
        for record in records {
            if record.published_at < query.since {
                continue;
            }
            let Some(entity) = match_entity(&names, &record) else {
                continue;
            };
            batch.offer(&known, to_threat(client_id, entity, record, now));
        }

        let (threats, mut duplicates_skipped) = batch.into_parts();
        let offered = threats.len();
        let created: Vec<ThreatId> = if threats.is_empty() {
            Vec::new()
        } else {
            // a concurrent run may have stored some of these since `known` was read
            let written = self.store.insert_threats(threats).await?;
            duplicates_skipped += offered - written.len();
            written.iter().map(|t| t.id).collect()
        };

        let count = created.len();
        tracing::info!(client = %client_id, count, duplicates_skipped, "threat discovery finished");
        if count > 0 {
            self.notifier
                .notify(OperatorEvent::ThreatsDiscovered { client_id, count });
        }

        Ok(DiscoveryResult {
            client_id,
            created,
            count,
            duplicates_skipped,
        })
    }

    /// Threats stored for a client, newest first
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn list_threats(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<ThreatDiscovery>, SentinelError> {
        Ok(self.store.list_threats(client_id).await?)
    }

    /// Fetch one threat
    ///
    /// # Errors
    /// - `SentinelError::ThreatNotFound` if the threat is unknown
    pub async fn get_threat(&self, threat_id: ThreatId) -> Result<ThreatDiscovery, SentinelError> {
        self.store
            .get_threat(threat_id)
            .await?
            .ok_or(SentinelError::ThreatNotFound(threat_id))
    }

    /// Mark a threat resolved; the first resolution time is kept
    ///
    /// # Errors
    /// - `SentinelError::ThreatNotFound` if the threat is unknown
    pub async fn resolve_threat(
        &self,
        threat_id: ThreatId,
    ) -> Result<ThreatDiscovery, SentinelError> {
        self.store
            .resolve_threat(threat_id, Utc::now())
            .await?
            .ok_or(SentinelError::ThreatNotFound(threat_id))
    }
}

fn match_entity<'a>(names: &'a [String], record: &IntelligenceRecord) -> Option<&'a str> {
    names
        .iter()
        .find(|name| record.detected_entities.iter().any(|e| e == *name))
        .map(String::as_str)
}

fn to_threat(
    client_id: ClientId,
    entity: &str,
    record: IntelligenceRecord,
    discovered_at: DateTime<Utc>,
) -> ThreatDiscovery {
    ThreatDiscovery {
        id: ThreatId::new(),
        client_id,
        entity_name: entity.to_string(),
        fingerprint: fingerprint(&record.platform, &record.content),
        platform: record.platform,
        content: record.content,
        url: record.url,
        discovered_at,
        severity: record.severity,
        resolved_at: None,
    }
}
