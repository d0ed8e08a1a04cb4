//! Shared pagination arithmetic for multi-step jobs.
//!
//! Every paginated worker follows the same template: a step claims one
//! page, does its work, and either enqueues the next page or finishes.
//! The cursor stored on each queued step is the zero-based page number,
//! so a job resumes exactly where the last completed step left it.

use gazette_core::defaults::PAGE_LIMIT;

/// The slice of work one step covers, and where the job stands after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePlan {
    /// Zero-based page number (the step cursor).
    pub page: i64,
    /// Offset of the first row in this page.
    pub offset: i64,
    /// Rows requested for this page.
    pub limit: i64,
    /// Whether this is the final page the job will process.
    pub is_last: bool,
    /// Whether the per-user loop ceiling cut the job short of the full
    /// result set.
    pub truncated: bool,
    /// Job progress once this page completes, in `0.0..=1.0`.
    pub progress: f64,
}

/// Plan the page at `cursor` over a result set of `total` rows.
///
/// `max_loops` is the per-user ceiling on pages a single job may walk;
/// a job whose result set needs more pages than that finishes early with
/// `truncated` set so the outcome can say so. An empty result set yields
/// a single terminal page, which lets every worker report completion
/// through the same path.
pub fn plan_page(cursor: i64, total: i64, max_loops: i64) -> PagePlan {
    let limit = PAGE_LIMIT;
    let pages_needed = if total <= 0 {
        1
    } else {
        (total + limit - 1) / limit
    };
    let pages_allowed = pages_needed.min(max_loops.max(1));
    let truncated = pages_needed > pages_allowed;

    let page = cursor.clamp(0, pages_allowed - 1);
    let is_last = page + 1 >= pages_allowed;
    let progress = (page + 1) as f64 / pages_allowed as f64;

    PagePlan {
        page,
        offset: page * limit,
        limit,
        is_last,
        truncated,
        progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_page() {
        let plan = plan_page(0, 40, 100);
        assert_eq!(plan.page, 0);
        assert_eq!(plan.offset, 0);
        assert!(plan.is_last);
        assert!(!plan.truncated);
        assert_eq!(plan.progress, 1.0);
    }

    #[test]
    fn test_exact_page_boundary() {
        // 200 rows at 100 per page is exactly two pages, not three.
        let first = plan_page(0, 200, 100);
        assert!(!first.is_last);
        assert_eq!(first.progress, 0.5);

        let second = plan_page(1, 200, 100);
        assert!(second.is_last);
        assert_eq!(second.offset, 100);
        assert_eq!(second.progress, 1.0);
    }

    #[test]
    fn test_empty_result_set_is_one_terminal_page() {
        let plan = plan_page(0, 0, 100);
        assert!(plan.is_last);
        assert!(!plan.truncated);
        assert_eq!(plan.progress, 1.0);
    }

    #[test]
    fn test_truncated_by_loop_ceiling() {
        // 1000 rows need 10 pages but the user is capped at 3.
        let plan = plan_page(2, 1000, 3);
        assert!(plan.is_last);
        assert!(plan.truncated);
        assert_eq!(plan.progress, 1.0);

        let mid = plan_page(1, 1000, 3);
        assert!(!mid.is_last);
        assert!(mid.truncated);
    }

    #[test]
    fn test_cursor_clamped_to_allowed_range() {
        // A cursor past the allowed range still yields a terminal page.
        let plan = plan_page(50, 200, 100);
        assert_eq!(plan.page, 1);
        assert!(plan.is_last);
    }

    #[test]
    fn test_progress_monotonic() {
        let mut last = 0.0;
        for cursor in 0..5 {
            let plan = plan_page(cursor, 450, 100);
            assert!(plan.progress > last);
            last = plan.progress;
        }
        assert_eq!(last, 1.0);
    }
}
