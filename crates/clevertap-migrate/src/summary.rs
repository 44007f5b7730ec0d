//! Run accounting shared by every pipeline stage.

use parking_lot::Mutex;
use tracing::info;

/// Parse-error lines kept for the final report.
pub const MAX_PARSE_ERRORS: usize = 20;

/// Snapshot of the run counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SummaryCounts {
    /// Records the destination accepted.
    pub processed: u64,
    /// Records the destination reported as unprocessed.
    pub unprocessed: u64,
    /// First [`MAX_PARSE_ERRORS`] source lines that failed to parse.
    pub parse_errors: Vec<String>,
    /// Total source lines that failed to parse.
    pub parse_error_count: u64,
    /// Leanplum sessions read.
    pub sessions: u64,
    /// Records skipped for a missing identity, timestamp or name.
    pub skipped: u64,
    /// Events dropped by the allow/deny list.
    pub filtered: u64,
    /// Records dropped by the Europe filter.
    pub europe_dropped: u64,
    /// Records in batches rejected with a 400.
    pub rejected: u64,
    /// Payloads delivered (API batches and SDK payloads).
    pub batches: u64,
}

/// Thread-safe run summary.
#[derive(Debug, Default)]
pub struct Summary {
    inner: Mutex<SummaryCounts>,
}

impl Summary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a destination response.
    pub fn record_response(&self, processed: u64, unprocessed: u64) {
        let mut s = self.inner.lock();
        s.processed += processed;
        s.unprocessed += unprocessed;
    }

    /// Records a source line that failed to parse.
    pub fn add_parse_error(&self, line: &str) {
        let mut s = self.inner.lock();
        s.parse_error_count += 1;
        if s.parse_errors.len() < MAX_PARSE_ERRORS {
            s.parse_errors.push(line.to_string());
        }
    }

    /// Counts a Leanplum session.
    pub fn add_session(&self) {
        self.inner.lock().sessions += 1;
    }

    /// Counts skipped records.
    pub fn add_skipped(&self, n: u64) {
        self.inner.lock().skipped += n;
    }

    /// Counts events dropped by the event filter.
    pub fn add_filtered(&self, n: u64) {
        self.inner.lock().filtered += n;
    }

    /// Counts records dropped by the Europe filter.
    pub fn add_europe_dropped(&self, n: u64) {
        self.inner.lock().europe_dropped += n;
    }

    /// Counts records of a rejected batch.
    pub fn add_rejected(&self, n: u64) {
        self.inner.lock().rejected += n;
    }

    /// Counts a delivered payload.
    pub fn add_batch(&self) {
        self.inner.lock().batches += 1;
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> SummaryCounts {
        self.inner.lock().clone()
    }

    /// Logs the summary block.
    pub fn log(&self, label: &str) {
        let s = self.snapshot();
        info!("---------------------Summary---------------------");
        info!(
            "{} Processed: {} , Unprocessed: {}",
            label, s.processed, s.unprocessed
        );
        info!(
            batches = s.batches,
            skipped = s.skipped,
            filtered = s.filtered,
            europe_dropped = s.europe_dropped,
            rejected = s.rejected,
            sessions = s.sessions,
            "Run counters"
        );
        if s.parse_error_count > 0 {
            info!(
                "Parse errors: {} (showing first {})",
                s.parse_error_count,
                s.parse_errors.len()
            );
            for line in &s.parse_errors {
                info!("{}", line);
            }
        }
    }
}
