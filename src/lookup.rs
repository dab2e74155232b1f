//! Lookup client boundary and the blocking HTTP adapter.
//!
//! The adapter owns everything transport related: the shared connection
//! pool, per-request jitter, client-identity rotation, retry with backoff on
//! throttling / server errors, and classification of failures into
//! transient vs permanent.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LookupConfig;
use crate::error::{HarvestError, LookupError};
use crate::models::{LookupMode, RawMatch};

/// One keyword search against one partition.
pub trait Lookup: Sync {
    fn lookup(
        &self,
        partition: &str,
        query: &str,
        mode: LookupMode,
    ) -> Result<Vec<RawMatch>, LookupError>;
}

impl<L: Lookup + ?Sized> Lookup for &L {
    fn lookup(
        &self,
        partition: &str,
        query: &str,
        mode: LookupMode,
    ) -> Result<Vec<RawMatch>, LookupError> {
        (**self).lookup(partition, query, mode)
    }
}

// ============================================================================
// HTTP Adapter
// ============================================================================

/// Lookup client backed by the vendor search endpoint.
///
/// The underlying `reqwest` client is shared read-only across workers; each
/// request carries its own randomly chosen user agent.
pub struct HttpLookup {
    http: reqwest::blocking::Client,
    config: LookupConfig,
}

impl HttpLookup {
    pub fn new(config: LookupConfig) -> Result<Self, HarvestError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| HarvestError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.endpoint
        )
    }

    fn pause(&self) {
        let (lo, hi) = (self.config.min_delay_ms, self.config.max_delay_ms);
        if hi == 0 {
            return;
        }
        let ms = if lo >= hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        };
        thread::sleep(Duration::from_millis(ms));
    }

    fn user_agent(&self) -> Option<&str> {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    fn send(
        &self,
        partition: &str,
        query: &str,
        mode: LookupMode,
    ) -> reqwest::Result<reqwest::blocking::Response> {
        let mut req = self
            .http
            .get(self.url())
            .query(&[
                ("company", partition),
                ("cusType", mode.wire_name()),
                ("keyword", query),
            ])
            .header(
                reqwest::header::ACCEPT,
                "application/json, text/javascript, */*; q=0.01",
            )
            .header(
                reqwest::header::ACCEPT_LANGUAGE,
                self.config.accept_language.as_str(),
            )
            .header(reqwest::header::REFERER, self.config.referer.as_str())
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(agent) = self.user_agent() {
            req = req.header(reqwest::header::USER_AGENT, agent);
        }
        req.send()
    }
}

impl Lookup for HttpLookup {
    fn lookup(
        &self,
        partition: &str,
        query: &str,
        mode: LookupMode,
    ) -> Result<Vec<RawMatch>, LookupError> {
        let mut backoff_ms = self.config.initial_backoff_ms;

        for attempt in 0..=self.config.max_retries {
            self.pause();

            let resp = match self.send(partition, query, mode) {
                Ok(resp) => resp,
                Err(e) => {
                    let cause = if e.is_timeout() {
                        format!("timed out: {}", e)
                    } else {
                        format!("request failed: {}", e)
                    };
                    return Err(LookupError::transient(cause));
                }
            };

            let status = resp.status().as_u16();

            // Throttled, timed out or server-side failure: back off and retry
            if is_retryable(status) {
                if attempt == self.config.max_retries {
                    return Err(LookupError::transient(format!(
                        "HTTP {} after {} attempts",
                        status,
                        attempt + 1
                    )));
                }
                warn!(
                    partition,
                    query,
                    %mode,
                    status,
                    "retry {}/{} in {}ms",
                    attempt + 1,
                    self.config.max_retries,
                    backoff_ms
                );
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
                continue;
            }

            if status >= 400 {
                return Err(LookupError::permanent(format!(
                    "HTTP {} for partition '{}'",
                    status, partition
                )));
            }

            let body = resp
                .text()
                .map_err(|e| LookupError::transient(format!("failed to read body: {}", e)))?;
            let records = parse_records(&body)?;
            debug!(partition, query, %mode, count = records.len(), "lookup ok");
            return Ok(records);
        }

        Err(LookupError::transient("retries exhausted"))
    }
}

/// 408, 429 and 5xx mean "try again later", every other 4xx is final.
fn is_retryable(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parse a response body into raw matches.
///
/// A JSON array of objects is the normal shape; any other JSON value means
/// the source found nothing. Bodies that are not JSON at all are transient
/// failures (the source answers with an HTML error page under load).
pub fn parse_records(body: &str) -> Result<Vec<RawMatch>, LookupError> {
    let body = body.trim_start_matches('\u{feff}');
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LookupError::transient(format!("malformed response body: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        _ => return Ok(Vec::new()),
    };

    Ok(items.iter().filter_map(parse_record).collect())
}

fn parse_record(item: &Value) -> Option<RawMatch> {
    let obj = item.as_object()?;
    let field = |name: &str| -> String {
        match obj.get(name) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };
    let optional = |name: &str| -> Option<String> {
        let value = field(name);
        (!value.is_empty()).then_some(value)
    };

    Some(RawMatch {
        title: field("name"),
        performer_name: field("singer"),
        partition_id: field("company"),
        source_code: field("code"),
        language: optional("lang"),
        sex: optional("sex"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Instant;

    fn test_config(base_url: String) -> LookupConfig {
        LookupConfig {
            base_url,
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_retries: 1,
            initial_backoff_ms: 0,
            timeout_secs: 5,
            ..LookupConfig::default()
        }
    }

    #[test]
    fn test_parse_records_array() {
        let body = r#"[
            {"name": "晴天", "singer": "周杰倫", "code": "12345", "company": "錢櫃", "lang": "國語", "sex": "男"},
            {"name": "稻香", "singer": "周杰倫", "code": 67890, "company": "好樂迪", "lang": ""}
        ]"#;
        let records = parse_records(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "晴天");
        assert_eq!(records[0].partition_id, "錢櫃");
        assert_eq!(records[0].language.as_deref(), Some("國語"));
        assert_eq!(records[0].sex.as_deref(), Some("男"));
        assert_eq!(records[1].source_code, "67890");
        assert_eq!(records[1].language, None);
    }

    #[test]
    fn test_parse_records_non_array_is_empty() {
        assert!(parse_records("null").unwrap().is_empty());
        assert!(parse_records(r#"{"error": "none"}"#).unwrap().is_empty());
        assert!(parse_records("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_records_malformed_is_transient() {
        let err = parse_records("<html>busy</html>").unwrap_err();
        assert!(err.is_transient());
        assert!(err.cause().contains("malformed"));
    }

    #[test]
    fn test_parse_records_skips_non_objects() {
        let records = parse_records(r#"[1, "x", {"name": "A", "singer": "X"}]"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_code, "");
    }

    #[test]
    fn test_http_lookup_sends_query_params() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/song.aspx")
                .query_param("company", "錢櫃")
                .query_param("cusType", "newSong")
                .query_param("keyword", "周杰倫")
                .header("X-Requested-With", "XMLHttpRequest");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!([
                    {"name": "晴天", "singer": "周杰倫", "code": "1", "company": "錢櫃"}
                ]));
        });

        let client = HttpLookup::new(test_config(server.base_url())).unwrap();
        let records = client
            .lookup("錢櫃", "周杰倫", LookupMode::NewArrivals)
            .unwrap();

        mock.assert();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "晴天");
    }

    #[test]
    fn test_http_lookup_client_error_is_permanent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(404);
        });

        let client = HttpLookup::new(test_config(server.base_url())).unwrap();
        let err = client.lookup("nope", "X", LookupMode::Default).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.cause().contains("404"));
    }

    #[test]
    fn test_http_lookup_server_error_retries_then_transient() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(503);
        });

        let mut config = test_config(server.base_url());
        config.max_retries = 0;
        let client = HttpLookup::new(config).unwrap();
        let err = client.lookup("P1", "X", LookupMode::Default).unwrap_err();
        assert!(err.is_transient());
        mock.assert_calls(1);
    }

    #[test]
    fn test_http_lookup_request_timeout_is_retried_then_transient() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(408);
        });

        let client = HttpLookup::new(test_config(server.base_url())).unwrap();
        let err = client.lookup("P1", "X", LookupMode::Default).unwrap_err();
        assert!(err.is_transient());
        assert!(err.cause().contains("408"));
        mock.assert_calls(2);
    }

    #[test]
    fn test_http_lookup_throttled_exhausts_retries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(429);
        });

        let mut config = test_config(server.base_url());
        config.max_retries = 2;
        let client = HttpLookup::new(config).unwrap();
        let err = client.lookup("P1", "X", LookupMode::Default).unwrap_err();
        assert!(err.is_transient());
        assert!(err.cause().contains("after 3 attempts"));
        mock.assert_calls(3);
    }

    #[test]
    fn test_http_lookup_recovers_after_server_error() {
        let server = MockServer::start();
        let mut failing = server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(503);
        });

        let mut config = test_config(server.base_url());
        config.initial_backoff_ms = 500;
        let client = HttpLookup::new(config).unwrap();

        // Swap the 503 for a 200 while the client sleeps through its backoff.
        let (result, ok) = thread::scope(|s| {
            let pending = s.spawn(|| client.lookup("P1", "X", LookupMode::Default));
            let deadline = Instant::now() + Duration::from_secs(5);
            while failing.calls() == 0 && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            failing.assert_calls(1);
            failing.delete();
            let ok = server.mock(|when, then| {
                when.method(GET).path("/api/song.aspx");
                then.status(200).json_body(serde_json::json!([
                    {"name": "A", "singer": "X", "code": "1", "company": "P1"}
                ]));
            });
            (pending.join().unwrap(), ok)
        });

        let records = result.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].partition_id, "P1");
        ok.assert_calls(1);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(408));
        assert!(is_retryable(429));
        assert!(is_retryable(500));
        assert!(is_retryable(503));
        assert!(!is_retryable(400));
        assert!(!is_retryable(404));
    }

    #[test]
    fn test_http_lookup_malformed_body_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/song.aspx");
            then.status(200).body("<html>maintenance</html>");
        });

        let client = HttpLookup::new(test_config(server.base_url())).unwrap();
        let err = client.lookup("P1", "X", LookupMode::Default).unwrap_err();
        assert!(err.is_transient());
    }
}
