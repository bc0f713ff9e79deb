//! # Remote Interaction Sessions
//!
//! A [`Session`] wraps one remote interaction handle ([`SessionDriver`])
//! with an identity and an explicit [`SessionState`]. Sessions are expensive
//! to create, so they are pooled and recovered in place when the remote
//! side starts blocking them.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::domain::{ExtractedFields, SessionId};
use crate::infrastructure::config::defaults;

/// Session lifecycle and navigation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session initialization failed after {attempts} attempt(s): {reason}")]
    Init { attempts: u32, reason: String },

    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Field extraction failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Required field '{field}' is missing")]
    RequiredFieldMissing { field: String },

    #[error("Field '{field}' is not numeric: '{value}'")]
    NonNumeric { field: String, value: String },

    #[error("Page shows no result rows")]
    NoResultRows,
}

impl ExtractionError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing { field: field.into() }
    }

    pub fn non_numeric(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::NonNumeric {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Signs that the remote side is challenging the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockingIndicator {
    AccessDenied,
    BrowserCheck,
    HumanVerification,
    Recaptcha,
    Challenge,
}

impl fmt::Display for BlockingIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AccessDenied => "access denied banner",
            Self::BrowserCheck => "browser check",
            Self::HumanVerification => "human verification prompt",
            Self::Recaptcha => "reCAPTCHA frame",
            Self::Challenge => "challenge container",
        };
        f.write_str(label)
    }
}

/// One step of a human-like interaction sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStep {
    PointerMove { dx: i32, dy: i32 },
    Scroll { pixels: u32 },
    Pause(Duration),
}

/// Remote interaction environment behind a session
#[async_trait]
pub trait SessionDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// First blocking indicator present on the current page, if any
    async fn blocking_indicator(&mut self) -> Result<Option<BlockingIndicator>, SessionError>;

    /// Clears cookies and any stored client state
    async fn clear_state(&mut self) -> Result<(), SessionError>;

    async fn interact(&mut self, steps: &[InteractionStep]) -> Result<(), SessionError>;

    /// Resolves once the page signals it finished loading. Callers bound it.
    async fn wait_until_loaded(&mut self) -> Result<(), SessionError>;

    async fn has_no_results(&mut self) -> Result<bool, SessionError>;

    async fn extract(&mut self) -> Result<ExtractedFields, ExtractionError>;

    async fn shutdown(&mut self) -> Result<(), SessionError>;
}

/// Opens new remote interaction handles
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn SessionDriver>, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Navigating,
    Blocked,
    Recovering,
    Extracting,
    Discarded,
}

/// Creation and recovery parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub init_attempts: u32,
    pub init_retry_delay: Duration,
    pub navigation_timeout: Duration,
    pub recovery_cooldown: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            init_attempts: defaults::SESSION_INIT_ATTEMPTS,
            init_retry_delay: Duration::from_millis(defaults::SESSION_INIT_RETRY_DELAY_MS),
            navigation_timeout: Duration::from_secs(defaults::NAVIGATION_TIMEOUT_SECS),
            recovery_cooldown: Duration::from_secs(defaults::RECOVERY_COOLDOWN_SECS),
        }
    }
}

pub struct Session {
    id: SessionId,
    state: SessionState,
    driver: Box<dyn SessionDriver>,
    shut_down: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a session, retrying with a fixed delay up to `init_attempts` times.
    pub async fn create(
        factory: &dyn SessionFactory,
        policy: &SessionPolicy,
    ) -> Result<Self, SessionError> {
        let attempts = policy.init_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            match factory.open().await {
                Ok(driver) => {
                    let session = Self {
                        id: SessionId::new(),
                        state: SessionState::Idle,
                        driver,
                        shut_down: false,
                    };
                    debug!("Session {} opened (attempt {}/{})", session.id.short(), attempt, attempts);
                    return Ok(session);
                }
                Err(e) => {
                    warn!("❌ Session initialization attempt {}/{} failed: {}", attempt, attempts, e);
                    last_reason = e.to_string();
                    if attempt < attempts {
                        sleep(policy.init_retry_delay).await;
                    }
                }
            }
        }

        Err(SessionError::Init {
            attempts,
            reason: last_reason,
        })
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Navigates to `url`, bounded by `limit`.
    pub async fn navigate(&mut self, url: &str, limit: Duration) -> Result<(), SessionError> {
        self.state = SessionState::Navigating;
        match timeout(limit, self.driver.navigate(url)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::NavigationTimeout {
                url: url.to_string(),
                timeout: limit,
            }),
        }
    }

    /// Observes the page for blocking indicators.
    ///
    /// Moves the session to `Blocked` when one is present; nothing else changes.
    pub async fn detect_blocking(&mut self) -> Result<bool, SessionError> {
        match self.driver.blocking_indicator().await? {
            Some(indicator) => {
                warn!("⚠️ Session {} blocked: {}", self.id.short(), indicator);
                self.state = SessionState::Blocked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn interact(&mut self, steps: &[InteractionStep]) -> Result<(), SessionError> {
        self.driver.interact(steps).await
    }

    pub async fn wait_until_loaded(&mut self) -> Result<(), SessionError> {
        self.driver.wait_until_loaded().await
    }

    pub async fn has_no_results(&mut self) -> Result<bool, SessionError> {
        self.driver.has_no_results().await
    }

    pub async fn extract(&mut self) -> Result<ExtractedFields, ExtractionError> {
        self.state = SessionState::Extracting;
        self.driver.extract().await
    }

    /// Replaces a blocked session in place.
    ///
    /// Clears client state, waits out the cooldown, discards the current
    /// handle, opens a replacement, re-navigates to `url` and performs the
    /// given interaction. On success `self` is the replacement session (new
    /// id). On failure `self` stays `Discarded`.
    pub async fn recover(
        &mut self,
        factory: &dyn SessionFactory,
        url: &str,
        policy: &SessionPolicy,
        steps: &[InteractionStep],
    ) -> Result<(), SessionError> {
        info!(
            "🔄 Recovering session {}: clearing state, cooling down for {:?}",
            self.id.short(),
            policy.recovery_cooldown
        );
        self.state = SessionState::Recovering;
        if let Err(e) = self.driver.clear_state().await {
            warn!("Failed to clear state of session {}: {}", self.id.short(), e);
        }

        sleep(policy.recovery_cooldown).await;
        self.shutdown().await;

        let mut replacement = Self::create(factory, policy).await?;
        if let Err(e) = replacement.navigate(url, policy.navigation_timeout).await {
            replacement.shutdown().await;
            return Err(SessionError::Init {
                attempts: 1,
                reason: format!("replacement could not reach {url}: {e}"),
            });
        }
        if let Err(e) = replacement.interact(steps).await {
            debug!("Interaction after recovery failed (ignored): {}", e);
        }

        info!("✅ Session {} replaced by {}", self.id.short(), replacement.id.short());
        *self = replacement;
        Ok(())
    }

    /// Flags the session for replacement at release time
    pub fn mark_discarded(&mut self) {
        self.state = SessionState::Discarded;
    }

    pub(crate) fn reset_idle(&mut self) {
        if self.state != SessionState::Discarded {
            self.state = SessionState::Idle;
        }
    }

    /// Closes the remote handle. Idempotent.
    pub async fn shutdown(&mut self) {
        self.state = SessionState::Discarded;
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Err(e) = self.driver.shutdown().await {
            warn!("Error shutting down session {}: {}", self.id.short(), e);
        }
    }
}
