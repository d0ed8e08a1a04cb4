//! CSV export machinery: column planning, per-row redaction, the file
//! format itself, and ZIP finalization.
//!
//! The export worker drives these helpers one page at a time. The file
//! layout is fixed: UTF-8 with BOM, `;` delimiter with minimal quoting,
//! CRLF line endings, four informational lines (summary, deep link,
//! disclaimer, blank) ahead of the header row. Finalization wraps the
//! CSV in a single-entry deflate ZIP and removes the original.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;

use gazette_core::defaults::{CSV_DELIMITER, REDACTED_LABEL, YEAR_CUTOFF};
use gazette_core::models::collection_owned_by;
use gazette_core::{BitMask64, Error, Result};
use gazette_index::fields;
use gazette_index::Doc;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DELIMITER: char = CSV_DELIMITER;
const LINE_ENDING: &str = "\r\n";

/// Column carrying the redaction verdict for each row.
pub const AVAILABILITY_COLUMN: &str = "is_content_available";

/// Redaction settings, overridable from the environment.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    /// Literal substituted for transcript and excerpt text the caller
    /// may not read.
    pub redacted_label: String,
    /// Documents without a bitmask are readable only below this year.
    pub year_cutoff: i32,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            redacted_label: REDACTED_LABEL.to_string(),
            year_cutoff: YEAR_CUTOFF,
        }
    }
}

impl RedactionPolicy {
    /// Load the policy from `REDACTED_LABEL` and `YEAR_CUTOFF`, falling
    /// back to the built-in defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redacted_label: std::env::var("REDACTED_LABEL").unwrap_or(defaults.redacted_label),
            year_cutoff: std::env::var("YEAR_CUTOFF")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.year_cutoff),
        }
    }

    /// Whether the caller's bitmask clears a document for full-text
    /// access. Documents carrying no bitmask fall back to the year rule.
    pub fn allows(&self, user_mask: BitMask64, doc: &Doc) -> bool {
        match doc.get(fields::TRANSCRIPT_BITMASK).and_then(JsonValue::as_u64) {
            Some(doc_mask) => user_mask.overlaps(&BitMask64::from_int(doc_mask)),
            None => doc
                .get(fields::YEAR)
                .and_then(JsonValue::as_i64)
                .is_some_and(|year| (year as i32) < self.year_cutoff),
        }
    }
}

/// Plan the column list from the first page of documents.
///
/// The opaque document id leads, the availability column and every
/// remaining public field follow alphabetically. Private fields (leading
/// underscore, `_version_` among them) are never emitted. The list is
/// frozen on page one and carried in the step payload so later pages
/// stay aligned even if their documents are sparser.
pub fn plan_columns(docs: &[Doc]) -> Vec<String> {
    let mut rest: Vec<String> = docs
        .iter()
        .flat_map(|doc| doc.keys())
        .filter(|key| !key.starts_with('_') && *key != fields::ID)
        .cloned()
        .collect();
    rest.push(AVAILABILITY_COLUMN.to_string());
    rest.sort_unstable();
    rest.dedup();

    let mut columns = Vec::with_capacity(rest.len() + 1);
    columns.push(fields::ID.to_string());
    columns.extend(rest);
    columns
}

/// Project one document onto the frozen column list, applying redaction
/// and stripping collection tags the caller does not own.
pub fn project_row(
    doc: &Doc,
    columns: &[String],
    user_mask: BitMask64,
    owner_uid: &str,
    policy: &RedactionPolicy,
) -> Vec<String> {
    let available = policy.allows(user_mask, doc);

    columns
        .iter()
        .map(|column| match column.as_str() {
            AVAILABILITY_COLUMN => if available { "Y" } else { "N" }.to_string(),
            fields::TRANSCRIPT | fields::EXCERPT if !available => policy.redacted_label.clone(),
            fields::USER_COLLECTIONS => doc
                .get(column)
                .and_then(JsonValue::as_array)
                .map(|tags| {
                    tags.iter()
                        .filter_map(JsonValue::as_str)
                        .filter(|tag| collection_owned_by(tag, owner_uid))
                        .collect::<Vec<_>>()
                        .join("|")
                })
                .unwrap_or_default(),
            _ => doc.get(column).map(render_value).unwrap_or_default(),
        })
        .collect()
}

/// Render a field value as CSV cell text. Arrays join with `|`.
fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join("|"),
        other => other.to_string(),
    }
}

/// Quote a cell only when the delimiter, a quote, or a line break forces
/// it. Embedded quotes are doubled.
fn csv_field(value: &str) -> String {
    if value.contains(DELIMITER) || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string());
    line.push_str(LINE_ENDING);
    line
}

/// Web-UI deep link for the exported query, addressed by its hash.
pub fn query_deep_link(base_url: &str, query: &str) -> String {
    format!("{}/search?sq={:x}", base_url, md5::compute(query.as_bytes()))
}

/// Create the CSV file with the BOM, the four informational lines, and
/// the header row. Called exactly once, on page one.
pub fn start_csv(
    path: &Path,
    total: i64,
    query: &str,
    base_url: &str,
    columns: &[String],
) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(UTF8_BOM)?;

    let summary = format!("{total} results for query: {query}");
    let link = query_deep_link(base_url, query);
    let disclaimer =
        "Redistribution of copyright-restricted content is not permitted.".to_string();
    for line in [summary, link, disclaimer, String::new()] {
        file.write_all(csv_line(&[line]).as_bytes())?;
    }

    file.write_all(csv_line(&columns.to_vec()).as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Append projected rows to the CSV. The file is reopened in append mode
/// each page so no handle survives a suspension point.
pub fn append_rows(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    for row in rows {
        file.write_all(csv_line(row).as_bytes())?;
    }
    file.flush()?;
    Ok(())
}

/// Wrap the finished CSV in a single-entry deflate ZIP at the same path
/// plus `.zip`, then delete the CSV. Returns the ZIP path.
pub fn finalize_zip(csv_path: &Path) -> Result<PathBuf> {
    let zip_path = PathBuf::from(format!("{}.zip", csv_path.display()));
    let entry_name = csv_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("bad export path: {}", csv_path.display())))?;

    let file = File::create(&zip_path)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer
        .start_file(entry_name, options)
        .map_err(|e| Error::Internal(format!("zip entry: {e}")))?;
    let mut csv = File::open(csv_path)?;
    io::copy(&mut csv, &mut writer)?;
    writer
        .finish()
        .map_err(|e| Error::Internal(format!("zip finish: {e}")))?;

    std::fs::remove_file(csv_path)?;
    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Read;

    fn doc(entries: &[(&str, JsonValue)]) -> Doc {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_csv_field_minimal_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("has;delim"), "\"has;delim\"");
        assert_eq!(csv_field("has \"quote\""), "\"has \"\"quote\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_csv_line_crlf() {
        let line = csv_line(&["a".to_string(), "b".to_string()]);
        assert_eq!(line, "a;b\r\n");
    }

    #[test]
    fn test_plan_columns_id_first_then_sorted() {
        let docs = vec![
            doc(&[
                ("meta_year_i", json!(1900)),
                ("id", json!("x")),
                ("_version_", json!(1)),
                ("content_txt", json!("t")),
            ]),
            doc(&[("id", json!("y")), ("excerpt_txt", json!("e"))]),
        ];
        let columns = plan_columns(&docs);
        assert_eq!(
            columns,
            vec![
                "id",
                "content_txt",
                "excerpt_txt",
                "is_content_available",
                "meta_year_i"
            ]
        );
    }

    #[test]
    fn test_year_fallback_when_no_bitmask() {
        let policy = RedactionPolicy::default();
        let old = doc(&[("meta_year_i", json!(1850))]);
        let recent = doc(&[("meta_year_i", json!(1999))]);
        let mask = BitMask64::from_int(0b10);
        assert!(policy.allows(mask, &old));
        assert!(!policy.allows(mask, &recent));
    }

    #[test]
    fn test_redaction_rows() {
        // Three docs: year-cutoff pass, bitmask miss, bitmask hit.
        let policy = RedactionPolicy::default();
        let user_mask = BitMask64::from_int(0b010);
        let columns = vec![
            "id".to_string(),
            "content_txt".to_string(),
            "excerpt_txt".to_string(),
            "is_content_available".to_string(),
            "meta_year_i".to_string(),
        ];

        let a = doc(&[
            ("id", json!("doc-a")),
            ("meta_year_i", json!(1800)),
            ("content_txt", json!("old text")),
            ("excerpt_txt", json!("old...")),
        ]);
        let b = doc(&[
            ("id", json!("doc-b")),
            ("meta_year_i", json!(1999)),
            ("rights_bm_get_tr_l", json!(0b100)),
            ("content_txt", json!("restricted text")),
            ("excerpt_txt", json!("restricted...")),
        ]);
        let c = doc(&[
            ("id", json!("doc-c")),
            ("meta_year_i", json!(1999)),
            ("rights_bm_get_tr_l", json!(0b010)),
            ("content_txt", json!("open text")),
            ("excerpt_txt", json!("open...")),
        ]);

        let row_a = project_row(&a, &columns, user_mask, "alice", &policy);
        assert_eq!(row_a[3], "Y");
        assert_eq!(row_a[1], "old text");

        let row_b = project_row(&b, &columns, user_mask, "alice", &policy);
        assert_eq!(row_b[3], "N");
        assert_eq!(row_b[1], REDACTED_LABEL);
        assert_eq!(row_b[2], REDACTED_LABEL);

        let row_c = project_row(&c, &columns, user_mask, "alice", &policy);
        assert_eq!(row_c[3], "Y");
        assert_eq!(row_c[1], "open text");
    }

    #[test]
    fn test_foreign_collections_stripped() {
        let policy = RedactionPolicy::default();
        let columns = vec!["id".to_string(), "ucoll_ss".to_string()];
        let d = doc(&[
            ("id", json!("doc-1")),
            ("meta_year_i", json!(1800)),
            ("ucoll_ss", json!(["alice-birds", "bob-ships", "alice-maps"])),
        ]);
        let row = project_row(&d, &columns, BitMask64::from_int(0), "alice", &policy);
        assert_eq!(row[1], "alice-birds|alice-maps");
    }

    #[test]
    fn test_start_csv_preamble_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let columns = vec!["id".to_string(), "meta_year_i".to_string()];
        start_csv(&path, 42, "mountain", "https://gazette.example.org", &columns).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let body = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let lines: Vec<&str> = body.split("\r\n").collect();
        assert!(lines[0].contains("42 results"));
        assert!(lines[1].contains("sq="));
        assert!(!lines[2].is_empty());
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "id;meta_year_i");
    }

    #[test]
    fn test_append_and_finalize_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let columns = vec!["id".to_string()];
        start_csv(&path, 1, "q", "https://gazette.example.org", &columns).unwrap();
        append_rows(&path, &[vec!["doc-1".to_string()]]).unwrap();

        let zip_path = finalize_zip(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(zip_path, dir.path().join("export.csv.zip"));

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "export.csv");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("doc-1"));
    }

    #[test]
    fn test_deep_link_stable_per_query() {
        let a = query_deep_link("https://gazette.example.org", "mountain");
        let b = query_deep_link("https://gazette.example.org", "mountain");
        let c = query_deep_link("https://gazette.example.org", "valley");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
