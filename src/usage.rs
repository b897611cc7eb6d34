//! Billable usage accounting.
//!
//! [`UsageRecord`] is the dialect-neutral token tally attached to every response.
//! Metered tool invocations (web search) are charged separately in quota units,
//! after [`SearchMeter`] has collapsed repeated reports of the same call.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Authoritative when the provider reports it; otherwise prompt + completion.
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cached_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reasoning_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub audio_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub image_tokens: u64,
    /// Charge for metered tool invocations, in quota units, kept apart from token cost.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tools_cost: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub web_search_calls: u64,
    /// True when some figure was estimated locally rather than reported upstream.
    #[serde(default)]
    pub estimated: bool,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl UsageRecord {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Self::default()
        }
    }

    /// Build from provider-reported counts; a missing or zero total is recomputed.
    pub fn reported(prompt_tokens: u64, completion_tokens: u64, total_tokens: Option<u64>) -> Self {
        let mut usage = Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or(0),
            ..Self::default()
        };
        usage.finalize_total();
        usage
    }

    pub fn is_empty(&self) -> bool {
        self == &UsageRecord::default()
    }

    /// Never lets the total fall below prompt + completion.
    pub fn finalize_total(&mut self) {
        let sum = self.prompt_tokens + self.completion_tokens;
        if self.total_tokens < sum {
            self.total_tokens = sum;
        }
    }

    /// Fold a later provider report into the running record of the same response.
    /// Counts only move upward, so a late partial report cannot shrink the total.
    pub fn merge_report(&mut self, report: &UsageRecord) {
        self.prompt_tokens = self.prompt_tokens.max(report.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(report.completion_tokens);
        self.total_tokens = self.total_tokens.max(report.total_tokens);
        self.cached_tokens = self.cached_tokens.max(report.cached_tokens);
        self.reasoning_tokens = self.reasoning_tokens.max(report.reasoning_tokens);
        self.audio_tokens = self.audio_tokens.max(report.audio_tokens);
        self.image_tokens = self.image_tokens.max(report.image_tokens);
        self.estimated = self.estimated && report.estimated;
        self.finalize_total();
    }

    /// Sum two independent records (e.g. successive realtime responses).
    pub fn add(&mut self, other: &UsageRecord) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cached_tokens += other.cached_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.audio_tokens += other.audio_tokens;
        self.image_tokens += other.image_tokens;
        self.tools_cost += other.tools_cost;
        self.web_search_calls += other.web_search_calls;
        self.estimated |= other.estimated;
        self.finalize_total();
    }

    /// Fill in counts the provider never reported from local estimates.
    pub fn fill_missing(&mut self, prompt_estimate: u64, completion_estimate: u64) {
        if self.prompt_tokens == 0 && prompt_estimate > 0 {
            self.prompt_tokens = prompt_estimate;
            self.estimated = true;
        }
        if self.completion_tokens == 0 && completion_estimate > 0 {
            self.completion_tokens = completion_estimate;
            self.estimated = true;
        }
        self.finalize_total();
    }

    /// Charge `calls` metered web searches for `model`.
    pub fn charge_web_search(&mut self, model: &str, calls: u64, quota_per_usd: f64) {
        self.web_search_calls += calls;
        self.tools_cost += calls * web_search_call_quota(model, quota_per_usd);
    }
}

// ---------------------------------------------------------------------------
// Web search pricing
// ---------------------------------------------------------------------------

/// USD per thousand calls for reasoning-capable and preview-search families.
const WEB_SEARCH_PREMIUM_USD_PER_1K: f64 = 25.0;
/// USD per thousand calls for dated snapshots and deep-research families.
const WEB_SEARCH_STANDARD_USD_PER_1K: f64 = 10.0;

/// Price tier for one thousand web-search calls made by `model`.
pub fn web_search_price_per_thousand(model: &str) -> f64 {
    let model = model.to_lowercase();
    if model.contains("deep-research") || is_dated_snapshot(&model) {
        return WEB_SEARCH_STANDARD_USD_PER_1K;
    }
    if model.contains("search-preview") || crate::translate::bridge::is_reasoning_model(&model) {
        return WEB_SEARCH_PREMIUM_USD_PER_1K;
    }
    WEB_SEARCH_STANDARD_USD_PER_1K
}

/// Quota charged per call: `ceil(usd_per_1000 / 1000 * quota_per_usd)`.
pub fn web_search_call_quota(model: &str, quota_per_usd: f64) -> u64 {
    let per_call = web_search_price_per_thousand(model) / 1000.0 * quota_per_usd;
    per_call.ceil() as u64
}

/// `gpt-4o-2024-08-06`-style names end in a `YYYY-MM-DD` date.
fn is_dated_snapshot(model: &str) -> bool {
    let parts: Vec<&str> = model.rsplitn(4, '-').collect();
    parts.len() == 4
        && parts[0].len() == 2
        && parts[1].len() == 2
        && parts[2].len() == 4
        && parts[..3]
            .iter()
            .all(|p| p.chars().all(|c| c.is_ascii_digit()))
}

/// Deduplicates web-search invocations reported across streaming chunks.
#[derive(Debug, Default)]
pub struct SearchMeter {
    seen: HashSet<String>,
}

impl SearchMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed call. Returns true only the first time a call is seen.
    ///
    /// The key is the explicit call id, else the normalized query, else the sorted
    /// domain list. Calls with none of these cannot be told apart and always count.
    pub fn record(&mut self, id: Option<&str>, query: Option<&str>, domains: &[String]) -> bool {
        match dedup_key(id, query, domains) {
            Some(key) => self.seen.insert(key),
            None => true,
        }
    }

    pub fn calls(&self) -> u64 {
        self.seen.len() as u64
    }
}

fn dedup_key(id: Option<&str>, query: Option<&str>, domains: &[String]) -> Option<String> {
    if let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(format!("id:{id}"));
    }
    if let Some(query) = query {
        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if !normalized.is_empty() {
            return Some(format!("query:{normalized}"));
        }
    }
    if !domains.is_empty() {
        let mut sorted: Vec<String> = domains.iter().map(|d| d.trim().to_lowercase()).collect();
        sorted.sort();
        sorted.dedup();
        return Some(format!("domains:{}", sorted.join(",")));
    }
    None
}
