//! HTTP remote sessions
//!
//! [`HttpSessionFactory`] opens [`HttpSession`]s: one `reqwest` client per
//! session with its own cookie jar and a randomly picked desktop user agent.
//! All sessions of a run share one `governor` rate limiter so the combined
//! request rate stays bounded regardless of pool size.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::crawling::session::{
    BlockingIndicator, ExtractionError, InteractionStep, SessionDriver, SessionError, SessionFactory,
};
use crate::domain::ExtractedFields;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::html_extractor::PageInspector;
use crate::infrastructure::parsing_error::ParsingError;

type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

#[derive(Debug, Clone)]
struct HttpSettings {
    request_timeout: Duration,
    poll_interval: Duration,
    user_agents: Vec<String>,
}

/// Opens HTTP sessions that share one rate limiter
pub struct HttpSessionFactory {
    settings: HttpSettings,
    limiter: SharedLimiter,
    inspector: Arc<PageInspector>,
}

impl HttpSessionFactory {
    pub fn from_config(config: &AppConfig) -> Result<Self, ParsingError> {
        let per_second = NonZeroU32::new(config.session.max_requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            settings: HttpSettings {
                request_timeout: config.session.request_timeout(),
                poll_interval: config.timing.load_poll_interval(),
                user_agents: config.session.user_agents.clone(),
            },
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            inspector: Arc::new(PageInspector::new(config.search.market)?),
        })
    }

    fn pick_user_agent(&self) -> String {
        fastrand::choice(&self.settings.user_agents)
            .cloned()
            .unwrap_or_else(|| "Mozilla/5.0".to_string())
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn SessionDriver>, SessionError> {
        let user_agent = self.pick_user_agent();
        let jar = Arc::new(Jar::default());
        let client = build_client(&user_agent, self.settings.request_timeout, Arc::clone(&jar))?;

        debug!("Opened HTTP session ({})", user_agent);
        Ok(Box::new(HttpSession {
            client,
            user_agent,
            settings: self.settings.clone(),
            limiter: Arc::clone(&self.limiter),
            inspector: Arc::clone(&self.inspector),
            current_url: None,
            last_status: None,
            body: String::new(),
        }))
    }
}

fn build_client(user_agent: &str, timeout: Duration, jar: Arc<Jar>) -> Result<Client, SessionError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|e| SessionError::Driver(format!("Invalid user agent: {e}")))?,
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .cookie_provider(jar)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| SessionError::Driver(format!("Failed to create HTTP client: {e}")))
}

/// One HTTP client with its own cookie jar
pub struct HttpSession {
    client: Client,
    user_agent: String,
    settings: HttpSettings,
    limiter: SharedLimiter,
    inspector: Arc<PageInspector>,
    current_url: Option<String>,
    last_status: Option<StatusCode>,
    body: String,
}

impl HttpSession {
    async fn fetch(&mut self, url: &str) -> Result<(), SessionError> {
        self.limiter.until_ready().await;
        trace!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::Navigation(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!("{} answered {}", url, status);
        }
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Navigation(format!("Failed to read body of {url}: {e}")))?;

        self.last_status = Some(status);
        self.body = body;
        Ok(())
    }
}

#[async_trait]
impl SessionDriver for HttpSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.current_url = Some(url.to_string());
        self.fetch(url).await
    }

    async fn blocking_indicator(&mut self) -> Result<Option<BlockingIndicator>, SessionError> {
        if let Some(indicator) = self.inspector.blocking_indicator(&self.body) {
            return Ok(Some(indicator));
        }
        // 본문에 표시가 없어도 403/429는 차단으로 본다
        Ok(match self.last_status {
            Some(StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS) => Some(BlockingIndicator::AccessDenied),
            _ => None,
        })
    }

    async fn clear_state(&mut self) -> Result<(), SessionError> {
        // A fresh jar is the only way to drop every stored cookie
        self.client = build_client(&self.user_agent, self.settings.request_timeout, Arc::new(Jar::default()))?;
        self.body.clear();
        self.last_status = None;
        Ok(())
    }

    async fn interact(&mut self, steps: &[InteractionStep]) -> Result<(), SessionError> {
        for step in steps {
            match step {
                InteractionStep::Pause(pause) => sleep(*pause).await,
                InteractionStep::PointerMove { .. } | InteractionStep::Scroll { .. } => {
                    trace!("No pointer on an HTTP session, skipping {:?}", step);
                }
            }
        }
        Ok(())
    }

    async fn wait_until_loaded(&mut self) -> Result<(), SessionError> {
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| SessionError::Driver("no page has been requested yet".to_string()))?;

        loop {
            if self.inspector.is_loaded(&self.body) {
                return Ok(());
            }
            sleep(self.settings.poll_interval).await;
            if let Err(e) = self.fetch(&url).await {
                warn!("Reload while waiting for results failed: {}", e);
            }
        }
    }

    async fn has_no_results(&mut self) -> Result<bool, SessionError> {
        Ok(self.inspector.has_no_results(&self.body))
    }

    async fn extract(&mut self) -> Result<ExtractedFields, ExtractionError> {
        self.inspector.extract(&self.body)
    }

    async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.body.clear();
        self.current_url = None;
        Ok(())
    }
}
