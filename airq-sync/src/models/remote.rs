//! Remote-store wire types

use airq_common::time::normalize_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// Sort field used for most-recent-first listings
pub const SORT_FIELD: &str = "DetectedAtUtc";

/// Body of `POST /api/AirQuality/list`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub sort_model: SortModel,
    pub filter_model: FilterModel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortModel {
    pub items: Vec<SortItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortItem {
    pub field: String,
    pub sort: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterModel {
    pub items: Vec<Value>,
}

impl ListQuery {
    /// Newest rows first, no filter
    pub fn latest(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            sort_model: SortModel {
                items: vec![SortItem {
                    field: SORT_FIELD.to_string(),
                    sort: "desc".to_string(),
                }],
            },
            filter_model: FilterModel::default(),
        }
    }
}

/// One row of a listing; only the fields the pipeline reads are typed
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteRow {
    #[serde(rename = "detectedAtUtc", default, skip_serializing_if = "Option::is_none")]
    pub detected_at_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Some backend versions capitalize the identifier
    #[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
    pub id_upper: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteRow {
    /// Row identifier from `id` or `Id`, string or number
    pub fn row_id(&self) -> Option<String> {
        [self.id.as_ref(), self.id_upper.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    /// Normalized detection timestamp; unparsable or missing timestamps yield `None`
    pub fn normalized_timestamp(&self) -> Option<String> {
        self.detected_at_utc
            .as_deref()
            .and_then(|s| normalize_timestamp(s).ok())
    }

    pub fn row_ref(&self) -> Option<RemoteRowRef> {
        Some(RemoteRowRef {
            id: self.row_id(),
            detected_at: self.normalized_timestamp()?,
        })
    }
}

/// Response of a listing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub rows: Vec<RemoteRow>,
}

impl ListPage {
    /// Parse a listing body: malformed JSON is a transport failure, a missing `rows`
    /// list is a schema failure
    pub fn from_body(body: &str) -> SyncResult<Self> {
        let value: Value = serde_json::from_str(body).map_err(|_| {
            SyncError::Transport(format!(
                "LIST response is not valid JSON | body: {}",
                truncate(body, 300)
            ))
        })?;

        let rows = value
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SyncError::Schema("LIST response schema unexpected (missing 'rows' list)".to_string())
            })?;

        let rows = rows
            .iter()
            .map(|row| {
                serde_json::from_value::<RemoteRow>(row.clone())
                    .map_err(|e| SyncError::Schema(format!("LIST row is not an object: {}", e)))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Self { rows })
    }

    /// Normalized timestamps present in this page
    pub fn timestamps(&self) -> impl Iterator<Item = String> + '_ {
        self.rows.iter().filter_map(RemoteRow::normalized_timestamp)
    }

    /// First row whose normalized timestamp matches
    pub fn find(&self, normalized: &str) -> Option<&RemoteRow> {
        self.rows
            .iter()
            .find(|row| row.normalized_timestamp().as_deref() == Some(normalized))
    }
}

/// Identifier and detection timestamp of an existing remote row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteRowRef {
    /// `None` when the backend returned the row without a usable identifier
    pub id: Option<String>,
    /// Normalized detection timestamp
    pub detected_at: String,
}

/// Acknowledgment of a successful submit or delete
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    Empty,
    Json(Value),
    Text(String),
}

impl Ack {
    pub fn from_body(body: String) -> Self {
        if body.trim().is_empty() {
            return Ack::Empty;
        }
        match serde_json::from_str(&body) {
            Ok(value) => Ack::Json(value),
            Err(_) => Ack::Text(body),
        }
    }
}

/// Shorten a response body for error messages
pub fn truncate(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_query_wire_shape() {
        let value = serde_json::to_value(ListQuery::latest(0, 24)).unwrap();
        assert_eq!(
            value,
            json!({
                "page": 0,
                "pageSize": 24,
                "sortModel": {"items": [{"field": "DetectedAtUtc", "sort": "desc"}]},
                "filterModel": {"items": []}
            })
        );
    }

    #[test]
    fn test_row_id_variants() {
        let lower: RemoteRow = serde_json::from_value(json!({"id": "abc"})).unwrap();
        let upper: RemoteRow = serde_json::from_value(json!({"Id": 42})).unwrap();
        let blank: RemoteRow = serde_json::from_value(json!({"id": "", "pm_25": 1.0})).unwrap();
        assert_eq!(lower.row_id().as_deref(), Some("abc"));
        assert_eq!(upper.row_id().as_deref(), Some("42"));
        assert_eq!(blank.row_id(), None);
        assert_eq!(blank.extra.get("pm_25"), Some(&json!(1.0)));
    }

    #[test]
    fn test_list_page_parsing_and_lookup() {
        let page = ListPage::from_body(
            r#"{"rows": [
                {"id": 1, "detectedAtUtc": "2026-01-11T03:00:00"},
                {"id": 2, "detectedAtUtc": "garbage"},
                {"id": 3},
                {"id": 4, "detectedAtUtc": "2026-01-11T02:00:00.000Z"}
            ], "rowCount": 4}"#,
        )
        .unwrap();

        let stamps: Vec<String> = page.timestamps().collect();
        assert_eq!(stamps, vec!["2026-01-11T03:00:00Z", "2026-01-11T02:00:00Z"]);

        let found = page.find("2026-01-11T02:00:00Z").unwrap();
        assert_eq!(found.row_id().as_deref(), Some("4"));
        assert!(page.find("2026-01-11T01:00:00Z").is_none());
    }

    #[test]
    fn test_list_page_error_classes() {
        assert!(matches!(ListPage::from_body("<html>"), Err(SyncError::Transport(_))));
        assert!(matches!(ListPage::from_body(r#"{"data": []}"#), Err(SyncError::Schema(_))));
        assert!(matches!(ListPage::from_body(r#"{"rows": {}}"#), Err(SyncError::Schema(_))));
        assert!(matches!(ListPage::from_body(r#"{"rows": [1]}"#), Err(SyncError::Schema(_))));
    }

    #[test]
    fn test_ack_from_body() {
        assert_eq!(Ack::from_body(String::new()), Ack::Empty);
        assert_eq!(Ack::from_body("{\"id\":7}".to_string()), Ack::Json(json!({"id": 7})));
        assert_eq!(Ack::from_body("created".to_string()), Ack::Text("created".to_string()));
    }
}
