//! Remote store HTTP client
//!
//! Cookie-authenticated JSON API:
//! - `POST /api/Account/login` issues the `.AspNetCore.Cookies` session cookie
//! - `POST /api/AirQuality/list` pages rows
//! - `POST /api/AirQuality` creates a row
//! - `DELETE /api/AirQuality?id=` removes a row
//!
//! The client keeps no cookie jar. The session cookie is returned to the caller as a
//! [`SessionToken`] and sent back explicitly, so its lifetime is owned by the session manager.

use airq_common::config::{Credentials, RemoteConfig};
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::models::remote::truncate;
use crate::models::{Ack, ListPage, ListQuery, Record};
use crate::types::{is_auth_failure, Authorized, RemoteStore, SessionToken};

/// Name of the session cookie issued by login
pub const SESSION_COOKIE: &str = ".AspNetCore.Cookies";

const USER_AGENT: &str = concat!("airq-sync/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct LoginRequest<'a> {
    account: &'a str,
    password: &'a str,
}

/// reqwest-backed [`RemoteStore`]
pub struct HttpRemoteStore {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteStore {
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

    pub fn from_config(config: &RemoteConfig) -> SyncResult<Self> {
        Self::new(&config.base_url, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_session(&self, request: RequestBuilder, session: &SessionToken) -> RequestBuilder {
        request.header(COOKIE, format!("{}={}", SESSION_COOKIE, session.as_str()))
    }

    /// Split a response into granted body, denial, or transport error
    async fn read_authorized(call: &str, response: Response) -> SyncResult<Authorized<String>> {
        let status = response.status();
        if is_auth_failure(status.as_u16()) {
            return Ok(Authorized::Denied(status.as_u16()));
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Transport(format!(
                "{} failed: {} | body: {}",
                call,
                status.as_u16(),
                truncate(&body, 300)
            )));
        }
        Ok(Authorized::Granted(body))
    }
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn login(&self, credentials: &Credentials) -> SyncResult<SessionToken> {
        let response = self
            .http_client
            .post(self.url("/api/Account/login"))
            .json(&LoginRequest {
                account: &credentials.account,
                password: &credentials.password,
            })
            .send()
            .await?;

        let status = response.status();
        let cookie = response
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "Login failed: {} | body: {}",
                status.as_u16(),
                truncate(&body, 300)
            )));
        }

        match cookie {
            Some(value) if !value.is_empty() => {
                debug!("Login succeeded");
                Ok(SessionToken::new(value))
            }
            _ => Err(SyncError::Auth(format!(
                "Login succeeded but no {} cookie was issued",
                SESSION_COOKIE
            ))),
        }
    }

    async fn list(&self, session: &SessionToken, query: &ListQuery) -> SyncResult<Authorized<ListPage>> {
        let request = self.http_client.post(self.url("/api/AirQuality/list")).json(query);
        let response = self.with_session(request, session).send().await?;

        match Self::read_authorized("LIST", response).await? {
            Authorized::Granted(body) => Ok(Authorized::Granted(ListPage::from_body(&body)?)),
            Authorized::Denied(status) => Ok(Authorized::Denied(status)),
        }
    }

    async fn submit(&self, session: &SessionToken, record: &Record) -> SyncResult<Authorized<Ack>> {
        let request = self
            .http_client
            .post(self.url("/api/AirQuality"))
            .json(&record.payload());
        let response = self.with_session(request, session).send().await?;

        match Self::read_authorized("POST", response).await? {
            Authorized::Granted(body) => Ok(Authorized::Granted(Ack::from_body(body))),
            Authorized::Denied(status) => Ok(Authorized::Denied(status)),
        }
    }

    async fn delete(&self, session: &SessionToken, id: &str) -> SyncResult<Authorized<Ack>> {
        let request = self
            .http_client
            .delete(self.url("/api/AirQuality"))
            .query(&[("id", id)]);
        let response = self.with_session(request, session).send().await?;

        match Self::read_authorized("DELETE", response).await? {
            Authorized::Granted(body) => Ok(Authorized::Granted(Ack::from_body(body))),
            Authorized::Denied(status) => Ok(Authorized::Denied(status)),
        }
    }
}
