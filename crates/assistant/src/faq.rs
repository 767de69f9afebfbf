//! Answer cache keyed on the normalized question.
//!
//! Expired entries are a miss for live traffic but stay in the map until
//! `purge_expired` runs. Admin entries only expire when they were given a ttl.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use askdesk_core::text::normalize_question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaqSource {
    Rag,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaqEntry {
    pub normalized_question: String,
    /// The question as first asked, for operators.
    pub question: String,
    pub answer: String,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    /// `None` never expires.
    pub ttl_expiry: Option<DateTime<Utc>>,
    pub source: FaqSource,
}

impl FaqEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_expiry.is_some_and(|expiry| now >= expiry)
    }
}

/// What a live lookup returns on a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaqHit {
    pub answer: String,
    pub hit_count: u64,
    pub source: FaqSource,
}

pub struct FaqCache {
    entries: DashMap<String, FaqEntry>,
    default_ttl: Duration,
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

impl FaqCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self { entries: DashMap::new(), default_ttl }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, question: &str) -> Option<FaqHit> {
        self.lookup_at(question, Utc::now())
    }

    /// Live lookup. Each hit bumps `hit_count` by exactly one.
    pub fn lookup_at(&self, question: &str, now: DateTime<Utc>) -> Option<FaqHit> {
        let key = normalize_question(question);
        if key.is_empty() {
            return None;
        }
        let mut entry = self.entries.get_mut(&key)?;
        if entry.is_expired_at(now) {
            debug!(question = %key, "faq entry expired");
            return None;
        }
        entry.hit_count += 1;
        Some(FaqHit {
            answer: entry.answer.clone(),
            hit_count: entry.hit_count,
            source: entry.source,
        })
    }

    /// Cache a generated answer with the default ttl.
    pub fn record(&self, question: &str, answer: &str) -> bool {
        self.record_at(question, answer, self.default_ttl, Utc::now())
    }

    /// Cache a generated answer. A live admin entry for the same question wins
    /// and the call returns false.
    pub fn record_at(&self, question: &str, answer: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
        let key = normalize_question(question);
        if key.is_empty() {
            return false;
        }
        let mut slot = self.entries.entry(key.clone()).or_insert_with(|| FaqEntry {
            normalized_question: key,
            question: question.trim().to_string(),
            answer: String::new(),
            hit_count: 0,
            created_at: now,
            ttl_expiry: None,
            source: FaqSource::Rag,
        });
        if slot.source == FaqSource::Admin && !slot.is_expired_at(now) {
            return false;
        }
        slot.answer = answer.to_string();
        slot.created_at = now;
        slot.ttl_expiry = expiry(now, ttl);
        slot.source = FaqSource::Rag;
        true
    }

    /// Insert or replace an operator-curated answer.
    pub fn record_admin(&self, question: &str, answer: &str, ttl: Option<Duration>) -> Option<FaqEntry> {
        let key = normalize_question(question);
        if key.is_empty() {
            return None;
        }
        let now = Utc::now();
        let hit_count = self.entries.get(&key).map_or(0, |e| e.hit_count);
        let entry = FaqEntry {
            normalized_question: key.clone(),
            question: question.trim().to_string(),
            answer: answer.to_string(),
            hit_count,
            created_at: now,
            ttl_expiry: ttl.and_then(|t| expiry(now, t)),
            source: FaqSource::Admin,
        };
        self.entries.insert(key.clone(), entry.clone());
        info!(question = %key, ttl_secs = ?ttl.map(|t| t.as_secs()), "admin faq entry saved");
        Some(entry)
    }

    pub fn remove(&self, question: &str) -> bool {
        self.entries.remove(&normalize_question(question)).is_some()
    }

    /// Operator view. Expired entries only appear with `include_expired`.
    pub fn inspect(&self, include_expired: bool) -> Vec<FaqEntry> {
        let now = Utc::now();
        let mut entries: Vec<FaqEntry> = self
            .entries
            .iter()
            .filter(|e| include_expired || !e.is_expired_at(now))
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| {
            b.hit_count
                .cmp(&a.hit_count)
                .then_with(|| a.normalized_question.cmp(&b.normalized_question))
        });
        entries
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired_at(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            info!(purged, remaining = self.entries.len(), "faq cache purged");
        }
        purged
    }
}
