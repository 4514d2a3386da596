//! Access-token acquisition on top of the platform credential store.
//!
//! [`IdentitySource`] lives on the main context. Replies from the credential
//! backend arrive through relays and are handled in
//! [`IdentitySource::process_pending`].

use std::fmt;

use thin_client_core::{RelayReceiver, RelaySender, relay};
use thiserror::Error;

/// Failure reported by the credential backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Transient. Retried automatically up to the configured bound.
    #[error("Token request was cancelled")]
    RequestCancelled,
    #[error("Credential is no longer valid: {0}")]
    InvalidCredential(String),
    #[error("Token service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Token request failed: {0}")]
    Other(String),
}

/// Reply to one token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub account_id: String,
    pub result: Result<String, TokenError>,
}

/// Handle of a credential-available subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The platform credential store.
///
/// Replies are posted to the relays handed in; the backend may answer from
/// any context.
pub trait CredentialBackend {
    fn active_account_id(&self) -> Option<String>;

    fn active_username(&self) -> Option<String>;

    /// Whether a refresh credential for `account_id` is available yet.
    fn has_refresh_credential(&self, account_id: &str) -> bool;

    /// Start fetching an access token. Exactly one reply is posted.
    fn request_token(&mut self, account_id: &str, reply: RelaySender<TokenResponse>);

    /// Post the account id to `notify` whenever a refresh credential appears.
    fn subscribe_credential_available(&mut self, notify: RelaySender<String>) -> SubscriptionId;

    fn unsubscribe(&mut self, subscription: SubscriptionId);
}

/// Outcome surfaced to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    Token { account_id: String, token: String },
    Failed(TokenError),
}

/// Fetches access tokens with bounded retry on cancellation.
pub struct IdentitySource {
    backend: Box<dyn CredentialBackend>,
    max_retries: u32,
    retries: u32,
    outstanding: bool,
    waiting: Option<SubscriptionId>,
    token_tx: RelaySender<TokenResponse>,
    token_rx: RelayReceiver<TokenResponse>,
    credential_tx: RelaySender<String>,
    credential_rx: RelayReceiver<String>,
}

impl IdentitySource {
    #[must_use]
    pub fn new(backend: Box<dyn CredentialBackend>, max_retries: u32) -> Self {
        let (token_tx, token_rx) = relay();
        let (credential_tx, credential_rx) = relay();
        Self {
            backend,
            max_retries,
            retries: 0,
            outstanding: false,
            waiting: None,
            token_tx,
            token_rx,
            credential_tx,
            credential_rx,
        }
    }

    /// Request a token for the signed-in account.
    ///
    /// No-op while a request is outstanding or no account is signed in. If
    /// the refresh credential is not there yet, the request is deferred until
    /// the backend announces it.
    pub fn connect(&mut self) {
        if self.outstanding {
            tracing::trace!("Token request already outstanding");
            return;
        }

        let Some(account_id) = self.backend.active_account_id() else {
            tracing::debug!("No signed-in account, not requesting a token");
            return;
        };

        if !self.backend.has_refresh_credential(&account_id) {
            if self.waiting.is_none() {
                tracing::debug!(%account_id, "Waiting for refresh credential");
                let subscription = self
                    .backend
                    .subscribe_credential_available(self.credential_tx.clone());
                self.waiting = Some(subscription);
            }
            return;
        }

        self.request(&account_id);
    }

    #[must_use]
    pub fn active_username(&self) -> Option<String> {
        self.backend.active_username()
    }

    #[must_use]
    pub const fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    #[must_use]
    pub const fn is_waiting_for_credential(&self) -> bool {
        self.waiting.is_some()
    }

    /// Consecutive cancelled requests retried so far.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retries
    }

    /// Handle queued backend replies.
    pub fn process_pending(&mut self) -> Vec<IdentityEvent> {
        for account_id in self.credential_rx.drain() {
            self.on_credential_available(&account_id);
        }

        let mut events = Vec::new();
        for response in self.token_rx.drain() {
            if let Some(event) = self.on_token_response(response) {
                events.push(event);
            }
        }
        events
    }

    fn request(&mut self, account_id: &str) {
        self.outstanding = true;
        self.backend
            .request_token(account_id, self.token_tx.clone());
    }

    fn on_credential_available(&mut self, account_id: &str) {
        if self.waiting.is_none() {
            tracing::trace!(%account_id, "Ignoring credential notice, not waiting");
            return;
        }
        if self.backend.active_account_id().as_deref() != Some(account_id) {
            tracing::debug!(%account_id, "Ignoring credential notice for inactive account");
            return;
        }

        if let Some(subscription) = self.waiting.take() {
            self.backend.unsubscribe(subscription);
        }
        self.connect();
    }

    fn on_token_response(&mut self, response: TokenResponse) -> Option<IdentityEvent> {
        self.outstanding = false;
        let TokenResponse { account_id, result } = response;

        match result {
            Ok(token) => {
                self.retries = 0;
                tracing::info!(
                    %account_id,
                    username = ?self.backend.active_username(),
                    "Access token acquired"
                );
                Some(IdentityEvent::Token { account_id, token })
            }
            Err(TokenError::RequestCancelled) if self.retries < self.max_retries => {
                self.retries += 1;
                tracing::warn!(
                    %account_id,
                    attempt = self.retries,
                    max = self.max_retries,
                    "Token request cancelled, retrying"
                );
                self.request(&account_id);
                None
            }
            Err(error) => {
                self.retries = 0;
                tracing::error!(%account_id, "Token request failed: {error}");
                Some(IdentityEvent::Failed(error))
            }
        }
    }
}

impl Drop for IdentitySource {
    fn drop(&mut self) {
        if let Some(subscription) = self.waiting.take() {
            self.backend.unsubscribe(subscription);
        }
    }
}

impl fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySource")
            .field("max_retries", &self.max_retries)
            .field("retries", &self.retries)
            .field("outstanding", &self.outstanding)
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}
