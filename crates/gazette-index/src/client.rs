//! HTTP client for one search index.
//!
//! Speaks the select/update JSON protocol: `find_all` pages through a
//! query with a deterministic sort, `update` posts atomic field updates
//! with optimistic-concurrency versions. Responses are classified into
//! the retryable/permanent error taxonomy here, at the protocol edge.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, instrument};

use gazette_core::defaults::INDEX_TIMEOUT_SECS;
use gazette_core::{Error, Result};

use crate::fields;

/// A single index document, as returned by the select handler.
pub type Doc = Map<String, JsonValue>;

/// One page request against the select handler.
#[derive(Debug, Clone)]
pub struct FindAllRequest {
    /// Query in the index's own syntax; passed through verbatim.
    pub query: String,
    /// Optional filter query, also used for field collapse.
    pub fq: Option<String>,
    /// Comma-separated field list, `None` for all stored fields.
    pub fl: Option<String>,
    /// Deterministic sort; resumable pagination depends on it.
    pub sort: String,
    pub start: i64,
    pub rows: i64,
}

impl FindAllRequest {
    /// A count-only probe: zero rows, id sort.
    pub fn count(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            fq: None,
            fl: Some(fields::ID.to_string()),
            sort: fields::SORT_BY_ID.to_string(),
            start: 0,
            rows: 0,
        }
    }
}

/// One page of select results.
#[derive(Debug, Clone)]
pub struct FindAllResponse {
    /// Total documents matched by the query, independent of paging.
    pub total: i64,
    pub start: i64,
    pub docs: Vec<Doc>,
}

#[derive(Deserialize)]
struct SelectBody {
    response: SelectResponse,
}

#[derive(Deserialize)]
struct SelectResponse {
    #[serde(rename = "numFound")]
    num_found: i64,
    start: i64,
    docs: Vec<Doc>,
}

/// Build an atomic set-update document for a multi-valued field.
///
/// The stale `_version_` travels with the update so the index can answer
/// 409 when the document changed since it was read.
pub fn atomic_set(id: &str, version: i64, field: &str, values: &[String]) -> JsonValue {
    json!({
        fields::ID: id,
        fields::VERSION: version,
        field: { "set": values },
    })
}

/// Client for one index core.
#[derive(Debug, Clone)]
pub struct IndexClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    /// Short name used in logs ("primary" / "passages").
    label: String,
}

impl IndexClient {
    /// Create a client for the given core base URL.
    pub fn new(base_url: impl Into<String>, label: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, label, Duration::from_secs(INDEX_TIMEOUT_SECS))
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        label: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build index HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
            label: label.into(),
        })
    }

    /// Attach basic-auth credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// The core base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }

    /// Run one select page.
    #[instrument(skip(self, req), fields(component = %self.label, op = "find_all"))]
    pub async fn find_all(&self, req: &FindAllRequest) -> Result<FindAllResponse> {
        let url = format!("{}/select", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("q", req.query.clone()),
            ("sort", req.sort.clone()),
            ("start", req.start.to_string()),
            ("rows", req.rows.to_string()),
            ("wt", "json".to_string()),
        ];
        if let Some(fq) = &req.fq {
            params.push(("fq", fq.clone()));
        }
        if let Some(fl) = &req.fl {
            params.push(("fl", fl.clone()));
        }

        let response = self
            .authorized(self.http.get(&url).query(&params))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        let body: SelectBody = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("malformed select response: {e}")))?;

        debug!(
            subsystem = "index",
            component = %self.label,
            op = "find_all",
            query = %req.query,
            start = req.start,
            total = body.response.num_found,
            doc_count = body.response.docs.len(),
            "Select page fetched"
        );

        Ok(FindAllResponse {
            total: body.response.num_found,
            start: body.response.start,
            docs: body.response.docs,
        })
    }

    /// Post a batch of atomic updates with an immediate commit.
    #[instrument(skip(self, docs), fields(component = %self.label, op = "update"))]
    pub async fn update(&self, docs: &[JsonValue]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let url = format!("{}/update", self.base_url);
        let response = self
            .authorized(
                self.http
                    .post(&url)
                    .query(&[("commit", "true"), ("versions", "true"), ("wt", "json")])
                    .json(&docs),
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }

        debug!(
            subsystem = "index",
            component = %self.label,
            op = "update",
            doc_count = docs.len(),
            "Update batch committed"
        );
        Ok(())
    }

    /// Map an error status to the retry taxonomy.
    ///
    /// 409 is an optimistic-concurrency conflict (retry after re-read),
    /// 5xx is transient, every other 4xx is permanent.
    fn classify(status: reqwest::StatusCode, body: &str) -> Error {
        let detail = if body.len() > 200 { &body[..200] } else { body };
        if status == reqwest::StatusCode::CONFLICT {
            Error::VersionConflict(format!("index answered 409: {detail}"))
        } else if status.is_server_error() {
            Error::Transient(format!("index answered {status}: {detail}"))
        } else {
            Error::Permanent(format!("index answered {status}: {detail}"))
        }
    }
}

/// The pair of indices every worker talks to.
#[derive(Debug, Clone)]
pub struct IndexGateway {
    /// Content-item index.
    pub primary: IndexClient,
    /// Text-reuse passages index.
    pub passages: IndexClient,
}

impl IndexGateway {
    /// Build both clients from the environment.
    ///
    /// Reads `PRIMARY_INDEX_URL` and `PASSAGES_INDEX_URL` (required),
    /// `INDEX_USERNAME` / `INDEX_PASSWORD` (optional, shared), and
    /// `INDEX_TIMEOUT_SECS` (optional).
    pub fn from_env() -> Result<Self> {
        let primary_url = std::env::var("PRIMARY_INDEX_URL")
            .map_err(|_| Error::Config("PRIMARY_INDEX_URL is not set".to_string()))?;
        let passages_url = std::env::var("PASSAGES_INDEX_URL")
            .map_err(|_| Error::Config("PASSAGES_INDEX_URL is not set".to_string()))?;

        let timeout = std::env::var("INDEX_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(INDEX_TIMEOUT_SECS));

        let mut primary = IndexClient::with_timeout(primary_url, "primary", timeout)?;
        let mut passages = IndexClient::with_timeout(passages_url, "passages", timeout)?;

        if let Ok(username) = std::env::var("INDEX_USERNAME") {
            let password = std::env::var("INDEX_PASSWORD").unwrap_or_default();
            primary = primary.with_auth(username.clone(), password.clone());
            passages = passages.with_auth(username, password);
        }

        Ok(Self { primary, passages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn select_body(num_found: i64, start: i64, docs: JsonValue) -> JsonValue {
        json!({
            "responseHeader": { "status": 0 },
            "response": { "numFound": num_found, "start": start, "docs": docs }
        })
    }

    #[tokio::test]
    async fn test_find_all_parses_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/select"))
            .and(query_param("q", "ucoll_ss:abc-def"))
            .and(query_param("start", "0"))
            .and(query_param("rows", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(select_body(
                5,
                0,
                json!([
                    { "id": "doc-1", "_version_": 17 },
                    { "id": "doc-2", "_version_": 18 }
                ]),
            )))
            .mount(&server)
            .await;

        let client = IndexClient::new(server.uri(), "primary").unwrap();
        let page = client
            .find_all(&FindAllRequest {
                query: "ucoll_ss:abc-def".to_string(),
                fq: None,
                fl: None,
                sort: fields::SORT_BY_ID.to_string(),
                start: 0,
                rows: 2,
            })
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        assert_eq!(page.docs.len(), 2);
        assert_eq!(page.docs[0]["id"], "doc-1");
    }

    #[tokio::test]
    async fn test_count_request_shape() {
        let req = FindAllRequest::count("content_txt:tramway");
        assert_eq!(req.rows, 0);
        assert_eq!(req.fl.as_deref(), Some("id"));
        assert_eq!(req.sort, fields::SORT_BY_ID);
    }

    #[tokio::test]
    async fn test_update_conflict_is_version_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update"))
            .respond_with(ResponseTemplate::new(409).set_body_string("version conflict"))
            .mount(&server)
            .await;

        let client = IndexClient::new(server.uri(), "primary").unwrap();
        let err = client
            .update(&[atomic_set("doc-1", 17, fields::USER_COLLECTIONS, &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/select"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = IndexClient::new(server.uri(), "primary").unwrap();
        let err = client
            .find_all(&FindAllRequest::count("id:*"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/select"))
            .respond_with(ResponseTemplate::new(400).set_body_string("undefined field"))
            .mount(&server)
            .await;

        let client = IndexClient::new(server.uri(), "primary").unwrap();
        let err = client
            .find_all(&FindAllRequest::count("bogus:[* TO"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Permanent(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_conflict_then_success_with_backoff() {
        // A contended document: the first update hits a stale version,
        // the retried one (after a fresh read) lands.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/update"))
            .respond_with(ResponseTemplate::new(409))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/update"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "responseHeader": { "status": 0 }
            })))
            .mount(&server)
            .await;

        let client = IndexClient::new(server.uri(), "passages").unwrap();
        let docs = vec![atomic_set(
            "pass-1",
            42,
            fields::USER_COLLECTIONS,
            &["abc-def".to_string()],
        )];
        crate::retry::with_backoff("update", || client.update(&docs))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_update_is_noop() {
        // No server: an empty batch must not make a request at all.
        let client = IndexClient::new("http://127.0.0.1:1", "primary").unwrap();
        client.update(&[]).await.unwrap();
    }

    #[test]
    fn test_atomic_set_shape() {
        let doc = atomic_set("doc-1", 99, fields::USER_COLLECTIONS, &[
            "abc-one".to_string(),
            "abc-two".to_string(),
        ]);
        assert_eq!(doc["id"], "doc-1");
        assert_eq!(doc["_version_"], 99);
        assert_eq!(doc["ucoll_ss"]["set"][1], "abc-two");
    }
}
