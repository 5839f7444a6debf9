//! Last-known pull-request state per branch, shared between the RPC server
//! and the refresh scheduler.
//!
//! Reads are synchronous and never touch the network; the store mutex is
//! held only for the in-memory map access, never across a fetch. At most one
//! refresh runs at a time — a refresh requested while one is in flight waits
//! for it and reports `Coalesced` instead of issuing a duplicate call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wt_github::{GitHubUnavailable, GithubClient, PullRequestSummary};

/// Where PR summaries come from. The daemon plugs in the `gh`-backed client;
/// tests plug in scripted sources.
pub trait PullRequestSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<PullRequestSummary>, GitHubUnavailable>;
}

impl PullRequestSource for GithubClient {
    fn fetch(&self) -> Result<Vec<PullRequestSummary>, GitHubUnavailable> {
        self.fetch_open_pull_requests()
    }
}

/// Per-branch snapshot. Overwritten wholesale on a successful refresh;
/// on failure only `fetch_error` changes, so stale data stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestState {
    pub number: Option<u64>,
    pub head_branch: String,
    pub merged_at: Option<DateTime<Utc>>,
    /// When this entry's data was actually retrieved from the provider.
    pub fetched_at: DateTime<Utc>,
    /// Set when the most recent refresh attempt failed; the rest of the
    /// entry still holds the last-known-good data.
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { branches: usize },
    Unavailable { cause: String },
    /// Another refresh was already in flight; this call waited for it
    /// instead of issuing a second fetch.
    Coalesced,
}

pub struct PrCache {
    source: Arc<dyn PullRequestSource>,
    entries: Mutex<HashMap<String, PullRequestState>>,
    status: Mutex<CacheStatus>,
    refresh_gate: tokio::sync::Mutex<()>,
    generation: AtomicU64,
}

impl PrCache {
    pub fn new(source: Arc<dyn PullRequestSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            status: Mutex::new(CacheStatus {
                last_success: None,
                last_error: None,
                last_error_message: None,
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Whatever is currently cached for `branch`; an explicit `None` for the
    /// never-fetched case. Never blocks on I/O, never fails.
    pub fn get(&self, branch: &str) -> Option<PullRequestState> {
        let entries = self.entries.lock().expect("pr cache poisoned");
        entries.get(branch).cloned()
    }

    pub fn snapshot(&self) -> Vec<PullRequestState> {
        let entries = self.entries.lock().expect("pr cache poisoned");
        let mut all: Vec<PullRequestState> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.head_branch.cmp(&b.head_branch));
        all
    }

    pub fn status(&self) -> CacheStatus {
        self.status.lock().expect("pr cache poisoned").clone()
    }

    /// Fetch once from the source and apply the result. Concurrent callers
    /// coalesce: whoever holds the gate fetches, everyone queued behind it
    /// observes the bumped generation and returns without fetching.
    pub async fn refresh(&self) -> RefreshOutcome {
        let generation_before = self.generation.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation_before {
            return RefreshOutcome::Coalesced;
        }

        let source = Arc::clone(&self.source);
        let fetched = tokio::task::spawn_blocking(move || source.fetch()).await;
        let outcome = match fetched {
            Ok(Ok(summaries)) => self.apply_success(summaries),
            Ok(Err(unavailable)) => self.apply_failure(unavailable.cause),
            Err(join_err) => self.apply_failure(format!("refresh task failed: {join_err}")),
        };
        self.generation.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn apply_success(&self, summaries: Vec<PullRequestSummary>) -> RefreshOutcome {
        let now = Utc::now();
        let mut fresh = HashMap::with_capacity(summaries.len());
        for summary in summaries {
            fresh.insert(
                summary.head_branch.clone(),
                PullRequestState {
                    number: Some(summary.number),
                    head_branch: summary.head_branch,
                    merged_at: summary.merged_at,
                    fetched_at: now,
                    fetch_error: None,
                },
            );
        }
        let branches = fresh.len();

        // The swap itself is the only section the store lock guards.
        {
            let mut entries = self.entries.lock().expect("pr cache poisoned");
            *entries = fresh;
        }
        {
            let mut status = self.status.lock().expect("pr cache poisoned");
            status.last_success = Some(now);
        }
        RefreshOutcome::Refreshed { branches }
    }

    fn apply_failure(&self, cause: String) -> RefreshOutcome {
        let now = Utc::now();
        {
            let mut entries = self.entries.lock().expect("pr cache poisoned");
            for entry in entries.values_mut() {
                entry.fetch_error = Some(cause.clone());
            }
        }
        {
            let mut status = self.status.lock().expect("pr cache poisoned");
            status.last_error = Some(now);
            status.last_error_message = Some(cause.clone());
        }
        RefreshOutcome::Unavailable { cause }
    }
}
