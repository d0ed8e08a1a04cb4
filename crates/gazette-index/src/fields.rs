//! Index schema field names.
//!
//! Both indices share the envelope fields (`id`, `_version_`, `score`);
//! the collection tag field `ucoll_ss` exists in both, while `ci_id_s`
//! only exists in the passages index, where it points at the parent
//! content item.

/// Unique document id.
pub const ID: &str = "id";

/// Optimistic-concurrency version. Sending a stale value back with an
/// atomic update makes the index answer 409.
pub const VERSION: &str = "_version_";

/// Multi-valued collection tag field ("user collections").
pub const USER_COLLECTIONS: &str = "ucoll_ss";

/// Parent content-item id carried by every passage document.
pub const CONTENT_ITEM_ID: &str = "ci_id_s";

/// Relevance score pseudo-field.
pub const SCORE: &str = "score";

/// Content-item kind: "A" (article), "P" (page), "I" (issue).
pub const ITEM_TYPE: &str = "item_type_s";

/// Filter query collapsing passages onto their parent content item.
pub const COLLAPSE_ON_CONTENT_ITEM: &str = "{!collapse field=ci_id_s}";

/// Publication year of a content item.
pub const YEAR: &str = "meta_year_i";

/// Full text transcript of a content item.
pub const TRANSCRIPT: &str = "content_txt";

/// Short excerpt of the transcript, shown in result listings.
pub const EXCERPT: &str = "excerpt_txt";

/// Per-document access bitmask for the transcript field, 64-bit integer.
pub const TRANSCRIPT_BITMASK: &str = "rights_bm_get_tr_l";

/// Stable deterministic sort for resumable pagination.
pub const SORT_BY_ID: &str = "id ASC";

/// Relevance sort with the id tiebreaker, for exports.
pub const SORT_BY_SCORE: &str = "score DESC,id ASC";
