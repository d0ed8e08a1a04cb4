//! Centralized default constants for gazette.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates and the CLI should reference these constants instead of defining
//! their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// PAGINATION
// =============================================================================

/// Page size for index queries driven by paginated workers.
pub const PAGE_LIMIT: i64 = 100;

/// Fallback per-user cap on pages a single paginated job may process,
/// for users without an explicit `max_loops_allowed` value.
pub const MAX_LOOPS: i64 = 100;

/// Default per-user cap on concurrently active jobs.
/// Stored per user as `max_parallel_jobs`.
pub const MAX_PARALLEL_JOBS: i64 = 2;

// =============================================================================
// INDEX CLIENT
// =============================================================================

/// Timeout for index HTTP requests in seconds.
/// Configurable via `INDEX_TIMEOUT_SECS` env var.
pub const INDEX_TIMEOUT_SECS: u64 = 30;

/// Maximum attempts for a retryable index operation (initial try included).
pub const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff between retries, in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Upper bound on a single backoff delay, in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default job worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default maximum concurrent tasks per worker process.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EXPORT
// =============================================================================

/// Publication year at or after which unresolved redaction applies.
/// Configurable via `YEAR_CUTOFF` env var.
pub const YEAR_CUTOFF: i32 = 1871;

/// Placeholder written in place of redacted text fields.
/// Configurable via `REDACTED_LABEL` env var.
pub const REDACTED_LABEL: &str = "[Copyright restricted]";

/// CSV field delimiter for exports.
pub const CSV_DELIMITER: char = ';';

/// Base URL used to build deep links in export preambles.
/// Configurable via `BASE_URL` env var.
pub const BASE_URL: &str = "https://gazette.example.org";

/// Sender address for notification mail.
pub const MAIL_FROM: &str = "noreply@gazette.example.org";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_are_positive() {
        const {
            assert!(PAGE_LIMIT > 0);
            assert!(MAX_LOOPS > 0);
            assert!(MAX_PARALLEL_JOBS > 0);
        }
    }

    #[test]
    fn retry_delays_ordered() {
        const {
            assert!(RETRY_BASE_DELAY_MS < RETRY_MAX_DELAY_MS);
            assert!(MAX_RETRIES >= 1);
        }
    }
}
