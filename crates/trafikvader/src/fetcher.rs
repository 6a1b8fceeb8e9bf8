//! Trafikinfo fetcher.
//!
//! Issues one POST per poll, maps the HTTP status to a [`FetchError`] and
//! hands successful bodies to the configured [`StationSchema`]. Nothing is
//! retried here; a failed fetch is the scheduler's problem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::Config;
use crate::query::{Query, QueryError, Request};
use crate::reading::StationReading;
use crate::schema::StationSchema;
use crate::selector::StationSelector;

/// Default Trafikinfo JSON endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.trafikinfo.trafikverket.se/v2/data.json";

/// Errors from a single fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("failed to decode API error response: {0}")]
    ApiErrorDecode(String),

    #[error("got status code: {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("expected 1 query result, got {0}")]
    ResultCount(usize),

    #[error("failed to build request: {0}")]
    Query(#[from] QueryError),
}

/// Anything that can produce a list of fresh readings.
///
/// The lifecycle only talks to this trait so tests can drive it without
/// an HTTP server.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<StationReading>, FetchError>;
}

/// HTTP-backed reading source.
pub struct Fetcher {
    client: reqwest::Client,
    endpoint: String,
    body: String,
    schema: Box<dyn StationSchema>,
    max_sample_age: Duration,
}

impl Fetcher {
    /// Build a fetcher from the daemon configuration.
    ///
    /// The request body is rendered once; it never changes between polls.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let schema = config.schema.adapter();
        let body = build_request(config.token.as_str(), &config.selector, schema.as_ref())?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self::with_client(
            client,
            &config.endpoint,
            body,
            schema,
            config.max_sample_age,
        ))
    }

    /// Build a fetcher from explicit parts.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: &str,
        body: String,
        schema: Box<dyn StationSchema>,
        max_sample_age: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            body,
            schema,
            max_sample_age,
        }
    }

    /// Fetch and decode, judging freshness against `now`.
    pub async fn fetch_at(&self, now: DateTime<Utc>) -> Result<Vec<StationReading>, FetchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml")
            .body(self.body.clone())
            .send()
            .await?;

        let status = response.status();
        // The body is always read so the connection goes back to the pool.
        let body = response.bytes().await.map_err(FetchError::from);
        let body = check_status(status, body)?;

        self.schema.decode(&body, now, self.max_sample_age)
    }
}

#[async_trait]
impl ReadingSource for Fetcher {
    async fn fetch(&self) -> Result<Vec<StationReading>, FetchError> {
        self.fetch_at(Utc::now()).await
    }
}

/// Map the response status to an error, consuming the body read.
///
/// Failures reading the body only matter when the body is needed: on 401
/// and non-400 error statuses the status wins.
fn check_status<B: AsRef<[u8]>>(
    status: StatusCode,
    body: Result<B, FetchError>,
) -> Result<B, FetchError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(FetchError::Unauthorized);
    }
    if status == StatusCode::BAD_REQUEST {
        return Err(FetchError::BadRequest(api_error_message(body?.as_ref())?));
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        });
    }
    body
}

/// Render the request body for a selector and schema.
pub fn build_request(
    token: &str,
    selector: &StationSelector,
    schema: &dyn StationSchema,
) -> Result<String, QueryError> {
    Request::new()
        .api_key(token)
        .query(
            Query::new(schema.object_type(), schema.schema_version())
                .filter(selector.filter())
                .include(schema.include_fields()),
        )
        .build()
}

/// Extract the human-readable message from a 400 response body.
///
/// Trafikinfo nests it as `RESPONSE.RESULT[0].ERROR.MESSAGE`; a bare
/// top-level `MESSAGE` is accepted too.
pub fn api_error_message(body: &[u8]) -> Result<String, FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::ApiErrorDecode(e.to_string()))?;

    ["/RESPONSE/RESULT/0/ERROR/MESSAGE", "/MESSAGE"]
        .iter()
        .find_map(|pointer| value.pointer(pointer).and_then(|m| m.as_str()))
        .map(str::to_string)
        .ok_or_else(|| FetchError::ApiErrorDecode("no error message in response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::WeatherStationV1;

    #[test]
    fn test_api_error_message_nested() {
        let body = br#"{"RESPONSE":{"RESULT":[{"ERROR":{"SOURCE":"Request","MESSAGE":"bad filter"}}]}}"#;
        assert_eq!(api_error_message(body).unwrap(), "bad filter");
    }

    #[test]
    fn test_api_error_message_flat() {
        let body = br#"{"MESSAGE": "bad filter"}"#;
        assert_eq!(api_error_message(body).unwrap(), "bad filter");
    }

    #[test]
    fn test_api_error_message_missing() {
        let err = api_error_message(br#"{"RESPONSE":{"RESULT":[]}}"#).unwrap_err();
        assert!(matches!(err, FetchError::ApiErrorDecode(_)));

        let err = api_error_message(b"not json").unwrap_err();
        assert!(matches!(err, FetchError::ApiErrorDecode(_)));
    }

    fn truncated() -> Result<Vec<u8>, FetchError> {
        Err(FetchError::ApiErrorDecode("body truncated".to_string()))
    }

    #[test]
    fn test_status_wins_over_body_read_failure() {
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, truncated()),
            Err(FetchError::Unauthorized)
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, truncated()),
            Err(FetchError::Status { status: 502, .. })
        ));
    }

    #[test]
    fn test_body_read_failure_surfaces_when_body_needed() {
        assert!(matches!(
            check_status(StatusCode::OK, truncated()),
            Err(FetchError::ApiErrorDecode(_))
        ));
        assert!(matches!(
            check_status(StatusCode::BAD_REQUEST, truncated()),
            Err(FetchError::ApiErrorDecode(_))
        ));
    }

    #[test]
    fn test_success_passes_body_through() {
        let body = check_status(StatusCode::OK, Ok(b"{}".to_vec())).unwrap();
        assert_eq!(body, b"{}".to_vec());
        let body = check_status(StatusCode::NO_CONTENT, Ok(Vec::new())).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_build_request_for_ids() {
        let selector = StationSelector::Ids(vec!["1".to_string(), "2".to_string()]);
        let body = build_request("key", &selector, &WeatherStationV1).unwrap();
        assert!(body.contains(r#"<QUERY objecttype="WeatherStation" schemaversion="1.0">"#));
        assert!(body.contains(r#"<OR><EQ name="Id" value="1"/><EQ name="Id" value="2"/></OR>"#));
        assert!(body.contains("<INCLUDE>RoadNumberNumeric</INCLUDE>"));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(FetchError::Unauthorized.to_string(), "invalid credentials");
        assert_eq!(
            FetchError::BadRequest("bad filter".to_string()).to_string(),
            "invalid request: bad filter"
        );
        assert_eq!(
            FetchError::Status {
                status: 503,
                reason: "Service Unavailable".to_string()
            }
            .to_string(),
            "got status code: 503 Service Unavailable"
        );
        assert_eq!(
            FetchError::ResultCount(2).to_string(),
            "expected 1 query result, got 2"
        );
    }
}
