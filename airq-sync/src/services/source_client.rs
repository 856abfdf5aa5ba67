//! Upstream source client
//!
//! The source publishes one HTML page per calendar month with the hourly readings
//! embedded as an HTML-escaped JSON array inside a `<pre>` block.

use airq_common::config::SourceConfig;
use airq_common::time::PeriodKey;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::models::remote::truncate;
use crate::models::RawSourceRow;
use crate::types::SourceExtractor;

const USER_AGENT: &str = concat!("airq-sync/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the monthly source pages
pub struct HttpSourceClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSourceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> SyncResult<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn period_url(&self, period: PeriodKey) -> String {
        format!("{}/api/60min/json/{}", self.base_url, period)
    }
}

#[async_trait::async_trait]
impl SourceExtractor for HttpSourceClient {
    async fn fetch_period(&self, period: PeriodKey) -> SyncResult<Vec<RawSourceRow>> {
        let url = self.period_url(period);
        tracing::debug!(period = %period, url = %url, "Fetching source period");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transport(format!(
                "source GET {} failed: {} | body: {}",
                period,
                status.as_u16(),
                truncate(&body, 300)
            )));
        }

        let page = response.text().await?;
        let rows = parse_period_page(&page)?;
        tracing::debug!(period = %period, rows = rows.len(), "Source period loaded");
        Ok(rows)
    }
}

/// Extract the JSON array embedded in a source page
pub fn parse_period_page(page: &str) -> SyncResult<Vec<RawSourceRow>> {
    let start = page
        .find("<pre>")
        .ok_or_else(|| SyncError::Schema("no <pre> block in source page".to_string()))?;
    let end = page
        .find("</pre>")
        .filter(|end| *end > start)
        .ok_or_else(|| SyncError::Schema("unterminated <pre> block in source page".to_string()))?;

    let content = unescape_html(page[start + "<pre>".len()..end].trim());
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| SyncError::Schema(format!("source <pre> block is not JSON: {}", e)))?;
    if !value.is_array() {
        return Err(SyncError::Schema("source data is not a JSON array".to_string()));
    }

    serde_json::from_value(value)
        .map_err(|e| SyncError::Schema(format!("unexpected source row shape: {}", e)))
}

/// Decode the entities a `<pre>` block can contain
fn unescape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let Some(semi) = rest.find(';').filter(|i| *i <= 10) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Pollutant;

    #[test]
    fn test_parse_period_page_unescapes_json() {
        let page = r#"<html><body><pre>
            [{&quot;日期時間&quot;:&quot;2026/01/11 05:00:00&quot;,&quot;PM25&quot;:&quot;12&quot;,&quot;NO&quot;:&#34;1.5&#34;}]
        </pre></body></html>"#;
        let rows = parse_period_page(page).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].observed_at.as_deref(), Some("2026/01/11 05:00:00"));
        assert_eq!(rows[0].value(Pollutant::Pm25), Some(12.0));
        assert_eq!(rows[0].value(Pollutant::No), Some(1.5));
    }

    #[test]
    fn test_parse_period_page_errors() {
        assert!(matches!(parse_period_page("<html></html>"), Err(SyncError::Schema(_))));
        assert!(matches!(parse_period_page("</pre><pre>[]"), Err(SyncError::Schema(_))));
        assert!(matches!(parse_period_page("<pre>{}</pre>"), Err(SyncError::Schema(_))));
        assert!(matches!(parse_period_page("<pre>not json</pre>"), Err(SyncError::Schema(_))));
        assert!(parse_period_page("<pre>[]</pre>").unwrap().is_empty());
    }

    #[test]
    fn test_unescape_html_entities() {
        assert_eq!(unescape_html("a &amp; b &lt;c&gt; &#x27;d&#39;"), "a & b <c> 'd'");
        assert_eq!(unescape_html("AT&T &unknown; tail &"), "AT&T &unknown; tail &");
    }

    #[test]
    fn test_period_url() {
        let client = HttpSourceClient::new("http://example.test/", Duration::from_secs(5)).unwrap();
        let period = PeriodKey { year: 2026, month: 1 };
        assert_eq!(client.period_url(period), "http://example.test/api/60min/json/202601");
    }
}
