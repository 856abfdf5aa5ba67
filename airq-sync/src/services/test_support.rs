//! In-memory fakes for the source and remote store, shared by unit tests

use airq_common::config::Credentials;
use airq_common::time::{fixed_offset, parse_source_timestamp, PeriodKey};
use airq_common::HourBucket;
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::models::{Ack, ListPage, ListQuery, RawSourceRow, Record, RemoteRow};
use crate::types::{Authorized, RemoteStore, SessionToken, SourceExtractor};

pub fn tw() -> FixedOffset {
    fixed_offset(8).unwrap()
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn hour(s: &str) -> HourBucket {
    HourBucket::floor(DateTime::parse_from_rfc3339(s).unwrap())
}

pub fn creds() -> Credentials {
    Credentials::new("station", "secret")
}

/// Raw upstream row at a local `YYYY/MM/DD HH:MM:SS` time; every pollutant is "1.0"
/// except PM2.5
pub fn raw_row(local: &str, pm25: Value) -> RawSourceRow {
    serde_json::from_value(json!({
        "日期時間": local,
        "PM25": pm25,
        "NMHC": "1.0", "THC": "1.0", "CH4": "1.0", "SO2": "1.0",
        "O3": "1.0", "NOX": "1.0", "NO": "1.0", "CO": "1.0", "CO2": "1.0"
    }))
    .unwrap()
}

/// Source fake keyed by reporting period; records every fetch
#[derive(Default)]
pub struct FakeSource {
    periods: HashMap<PeriodKey, Vec<RawSourceRow>>,
    failing: Vec<PeriodKey>,
    fetches: Mutex<Vec<PeriodKey>>,
}

impl FakeSource {
    /// Group rows by the local (+08:00) month of their timestamp
    pub fn with_rows(rows: Vec<RawSourceRow>) -> Self {
        let mut periods: HashMap<PeriodKey, Vec<RawSourceRow>> = HashMap::new();
        for row in rows {
            let local = parse_source_timestamp(row.observed_at.as_deref().unwrap(), tw()).unwrap();
            periods
                .entry(HourBucket::floor(local).period())
                .or_default()
                .push(row);
        }
        Self {
            periods,
            ..Default::default()
        }
    }

    pub fn fail_period(mut self, period: PeriodKey) -> Self {
        self.failing.push(period);
        self
    }

    pub fn fetches(&self) -> Vec<PeriodKey> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SourceExtractor for FakeSource {
    async fn fetch_period(&self, period: PeriodKey) -> SyncResult<Vec<RawSourceRow>> {
        self.fetches.lock().unwrap().push(period);
        if self.failing.contains(&period) {
            return Err(SyncError::Transport(format!("source unavailable for {}", period)));
        }
        Ok(self.periods.get(&period).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct RemoteState {
    rows: Vec<RemoteRow>,
    next_id: u64,
    valid_token: Option<String>,
    login_calls: u32,
    list_calls: u32,
    submit_calls: u32,
    delete_calls: u32,
    reject_logins: bool,
    deny_lists: u32,
    deny_submits: u32,
    deny_submits_after_commit: u32,
    fail_submit_status: Option<u16>,
    fail_lists_from: Option<u32>,
    submitted: Vec<Value>,
}

/// Remote-store fake with scripted authorization failures
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an existing row; returns its id
    pub fn seed_row(&self, detected_at_utc: &str) -> String {
        let mut state = self.state.lock().unwrap();
        Self::insert(&mut state, detected_at_utc.to_string())
    }

    pub fn reject_logins(&self) {
        self.state.lock().unwrap().reject_logins = true;
    }

    /// Invalidate every issued token, as if the backend expired the session
    pub fn expire_sessions(&self) {
        self.state.lock().unwrap().valid_token = None;
    }

    pub fn deny_lists(&self, times: u32) {
        self.state.lock().unwrap().deny_lists = times;
    }

    pub fn deny_submits(&self, times: u32) {
        self.state.lock().unwrap().deny_submits = times;
    }

    /// The submit is stored but the response is still a 401
    pub fn deny_submits_after_commit(&self, times: u32) {
        self.state.lock().unwrap().deny_submits_after_commit = times;
    }

    pub fn fail_submits(&self, status: u16) {
        self.state.lock().unwrap().fail_submit_status = Some(status);
    }

    /// Listing calls numbered `n` and later (1-based) fail with a transport error
    pub fn fail_lists_from(&self, n: u32) {
        self.state.lock().unwrap().fail_lists_from = Some(n);
    }

    pub fn login_calls(&self) -> u32 {
        self.state.lock().unwrap().login_calls
    }

    pub fn list_calls(&self) -> u32 {
        self.state.lock().unwrap().list_calls
    }

    pub fn submit_calls(&self) -> u32 {
        self.state.lock().unwrap().submit_calls
    }

    pub fn delete_calls(&self) -> u32 {
        self.state.lock().unwrap().delete_calls
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    /// Bodies of accepted submits, in order
    pub fn submitted(&self) -> Vec<Value> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Normalized timestamps of stored rows, oldest insert first
    pub fn timestamps(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter_map(RemoteRow::normalized_timestamp)
            .collect()
    }

    fn insert(state: &mut RemoteState, detected_at_utc: String) -> String {
        state.next_id += 1;
        let id = state.next_id.to_string();
        state.rows.push(RemoteRow {
            detected_at_utc: Some(detected_at_utc),
            id: Some(json!(id)),
            ..Default::default()
        });
        id
    }

    fn authorized(state: &RemoteState, session: &SessionToken) -> bool {
        state.valid_token.as_deref() == Some(session.as_str())
    }
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn login(&self, credentials: &Credentials) -> SyncResult<SessionToken> {
        let mut state = self.state.lock().unwrap();
        state.login_calls += 1;
        if state.reject_logins || credentials.password != "secret" {
            return Err(SyncError::Auth("Login failed: 401".to_string()));
        }
        let token = format!("session-{}", state.login_calls);
        state.valid_token = Some(token.clone());
        Ok(SessionToken::new(token))
    }

    async fn list(&self, session: &SessionToken, query: &ListQuery) -> SyncResult<Authorized<ListPage>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if let Some(n) = state.fail_lists_from {
            if state.list_calls >= n {
                return Err(SyncError::Transport("LIST failed: 503".to_string()));
            }
        }
        if !Self::authorized(&state, session) {
            return Ok(Authorized::Denied(401));
        }
        if state.deny_lists > 0 {
            state.deny_lists -= 1;
            return Ok(Authorized::Denied(401));
        }

        let mut rows = state.rows.clone();
        rows.sort_by_key(|row| std::cmp::Reverse(row.normalized_timestamp()));
        let rows = rows
            .into_iter()
            .skip((query.page * query.page_size) as usize)
            .take(query.page_size as usize)
            .collect();
        Ok(Authorized::Granted(ListPage { rows }))
    }

    async fn submit(&self, session: &SessionToken, record: &Record) -> SyncResult<Authorized<Ack>> {
        let mut state = self.state.lock().unwrap();
        state.submit_calls += 1;
        if !Self::authorized(&state, session) {
            return Ok(Authorized::Denied(401));
        }
        if state.deny_submits > 0 {
            state.deny_submits -= 1;
            return Ok(Authorized::Denied(401));
        }
        if state.deny_submits_after_commit > 0 {
            state.deny_submits_after_commit -= 1;
            Self::insert(&mut state, record.hour.detected_at_utc());
            return Ok(Authorized::Denied(401));
        }
        if let Some(status) = state.fail_submit_status {
            return Err(SyncError::Transport(format!("POST failed: {}", status)));
        }
        state
            .submitted
            .push(serde_json::to_value(record.payload()).unwrap());
        let id = Self::insert(&mut state, record.hour.detected_at_utc());
        Ok(Authorized::Granted(Ack::Json(json!({ "id": id }))))
    }

    async fn delete(&self, session: &SessionToken, id: &str) -> SyncResult<Authorized<Ack>> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        if !Self::authorized(&state, session) {
            return Ok(Authorized::Denied(401));
        }
        let before = state.rows.len();
        state.rows.retain(|row| row.row_id().as_deref() != Some(id));
        if state.rows.len() == before {
            return Err(SyncError::Transport(format!("DELETE failed: 404 ({})", id)));
        }
        Ok(Authorized::Granted(Ack::Empty))
    }
}
