use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Local};

#[derive(Debug, Clone, PartialEq)]
pub struct FailureEntry {
    pub url: String,
    pub reason: String,
}

/// Counters for a single enrichment run. Nothing here outlives the process;
/// the record store itself is the durable checkpoint.
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: DateTime<Local>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub challenges: usize,
    pub failures: Vec<FailureEntry>,
    failed_urls: HashSet<String>,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            challenges: 0,
            failures: Vec::new(),
            failed_urls: HashSet::new(),
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempted += 1;
    }

    pub fn record_success(&mut self, url: &str) {
        self.succeeded += 1;
        self.failed_urls.remove(url);
    }

    pub fn record_failure(&mut self, url: &str, reason: impl Into<String>) {
        self.failed += 1;
        self.failed_urls.insert(url.to_string());
        self.failures.push(FailureEntry {
            url: url.to_string(),
            reason: reason.into(),
        });
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_challenge(&mut self) {
        self.challenges += 1;
    }

    pub fn has_failed(&self, url: &str) -> bool {
        self.failed_urls.contains(url)
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Local::now() - self.started_at
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted: {}, succeeded: {}, failed: {}, skipped: {}, challenges: {} (elapsed {}s)",
            self.attempted,
            self.succeeded,
            self.failed,
            self.skipped,
            self.challenges,
            self.elapsed().num_seconds()
        )
    }
}
