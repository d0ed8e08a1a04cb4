//! Structured logging schema and field name constants for gazette.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools can query by standardized field names
//! across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (pages, documents) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "index", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "pool", "primary_index", "passages_index", "mailer"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "find_all", "update", "claim_next", "export"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Task queue row UUID.
pub const TASK_ID: &str = "task_id";

/// User UUID an operation acts for.
pub const USER_ID: &str = "user_id";

/// Collection id being synchronized.
pub const COLLECTION_ID: &str = "collection_id";

/// Index query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Zero-based page number within a paginated job.
pub const PAGE: &str = "page";

/// Total documents matched by an index query.
pub const TOTAL: &str = "total";

/// Number of documents affected by a page of work.
pub const DOC_COUNT: &str = "doc_count";

/// Retry attempt counter (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
