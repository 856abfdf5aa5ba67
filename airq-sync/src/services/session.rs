//! Session manager for the remote store
//!
//! Owns exactly one session for the lifetime of one logical operation. The session is a
//! two-state machine, Unauthenticated ⇄ Authenticated, and permits exactly one
//! Authenticated → Unauthenticated → Authenticated transition (re-login after a 401/403).
//! A second authorization failure is fatal for the operation.
//!
//! Sessions are never persisted or shared: dropping the manager drops the token.

use airq_common::config::Credentials;
use std::future::Future;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{Ack, ListPage, ListQuery, Record};
use crate::types::{Authorized, RemoteStore, SessionToken};

/// Session lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(SessionToken),
}

/// One authenticated session against a [`RemoteStore`]
pub struct SessionManager<'a, S: RemoteStore> {
    store: &'a S,
    credentials: &'a Credentials,
    state: SessionState,
    reauth_used: bool,
    login_count: u32,
}

impl<'a, S: RemoteStore> SessionManager<'a, S> {
    pub fn new(store: &'a S, credentials: &'a Credentials) -> Self {
        Self {
            store,
            credentials,
            state: SessionState::Unauthenticated,
            reauth_used: false,
            login_count: 0,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    /// Login calls made by this session (initial plus any re-authentication)
    pub fn login_count(&self) -> u32 {
        self.login_count
    }

    /// Whether the single re-authentication has been spent
    pub fn reauth_used(&self) -> bool {
        self.reauth_used
    }

    /// Submit credentials and enter the Authenticated state
    pub async fn authenticate(&mut self) -> SyncResult<()> {
        if !self.credentials.is_complete() {
            return Err(SyncError::Auth(
                "account and password must both be non-empty".to_string(),
            ));
        }

        self.login_count += 1;
        let token = self.store.login(self.credentials).await?;
        debug!(login_count = self.login_count, "Remote session established");
        self.state = SessionState::Authenticated(token);
        Ok(())
    }

    /// Authenticate if no session exists yet
    pub async fn ensure_authenticated(&mut self) -> SyncResult<SessionToken> {
        if let SessionState::Authenticated(token) = &self.state {
            return Ok(token.clone());
        }
        self.authenticate().await?;
        self.current_token()
    }

    /// Discard the session and log in again, at most once per operation
    ///
    /// `status` and `call` describe the authorization failure that triggered it.
    pub async fn reauthenticate(&mut self, call: &str, status: u16) -> SyncResult<()> {
        if self.reauth_used {
            return Err(SyncError::Auth(format!(
                "{} auth failed ({}) after re-login; giving up",
                call, status
            )));
        }

        warn!(call, status, "Auth failed. Re-login and retry once");
        self.reauth_used = true;
        self.state = SessionState::Unauthenticated;
        self.authenticate().await
    }

    /// One page of the listing, re-authenticating once on 401/403
    pub async fn list(&mut self, query: &ListQuery) -> SyncResult<ListPage> {
        self.call_with_reauth("LIST", move |store: &'a S, token: SessionToken| async move {
            store.list(&token, query).await
        })
        .await
    }

    /// Delete one row, re-authenticating once on 401/403
    pub async fn delete(&mut self, id: &str) -> SyncResult<Ack> {
        self.call_with_reauth("DELETE", move |store: &'a S, token: SessionToken| async move {
            store.delete(&token, id).await
        })
        .await
    }

    /// Single submit attempt with no retry
    ///
    /// Submits are not retried here: the uploader must re-check for duplicates between
    /// re-authentication and resubmission.
    pub async fn submit_once(&mut self, record: &Record) -> SyncResult<Authorized<Ack>> {
        let token = self.ensure_authenticated().await?;
        self.store.submit(&token, record).await
    }

    fn current_token(&self) -> SyncResult<SessionToken> {
        match &self.state {
            SessionState::Authenticated(token) => Ok(token.clone()),
            SessionState::Unauthenticated => {
                Err(SyncError::Auth("no active session".to_string()))
            }
        }
    }

    async fn call_with_reauth<T, F, Fut>(&mut self, call: &str, op: F) -> SyncResult<T>
    where
        F: Fn(&'a S, SessionToken) -> Fut,
        Fut: Future<Output = SyncResult<Authorized<T>>>,
    {
        let token = self.ensure_authenticated().await?;
        match op(self.store, token).await? {
            Authorized::Granted(value) => Ok(value),
            Authorized::Denied(status) => {
                self.reauthenticate(call, status).await?;
                let token = self.current_token()?;
                match op(self.store, token).await? {
                    Authorized::Granted(value) => Ok(value),
                    Authorized::Denied(status) => Err(SyncError::Auth(format!(
                        "{} auth failed ({}) after re-login",
                        call, status
                    ))),
                }
            }
        }
    }
}
