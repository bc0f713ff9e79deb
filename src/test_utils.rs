//! Test utilities for fare-sweep
//!
//! Provides a scripted session backend so pool, runner and orchestrator
//! tests run without network access. Each departure date gets a queue of
//! [`PageBehavior`]s; every navigation to that date's URL consumes the next
//! one (falling back to a default result page once the queue is empty).

#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::crawling::session::{
    BlockingIndicator, ExtractionError, InteractionStep, SessionDriver, SessionError, SessionFactory,
};
use crate::domain::{ExtractedFields, FieldValue, SearchParams};

/// What the remote page does for one navigation
#[derive(Debug, Clone, PartialEq)]
pub enum PageBehavior {
    Results { price: f64, airline: String },
    NoResults,
    Blocked,
    /// Loads, but the load signal never arrives
    NeverLoads,
    /// Navigation itself never completes
    HangOnNavigate,
    NavigationError,
    ExtractionFailure,
    /// Extraction fails `failures` times on this page, then succeeds
    FlakyExtraction { failures: u32, price: f64 },
}

impl PageBehavior {
    #[must_use]
    pub fn results(price: f64, airline: &str) -> Self {
        Self::Results {
            price,
            airline: airline.to_string(),
        }
    }
}

#[derive(Debug)]
struct ScriptInner {
    scripts: Mutex<HashMap<NaiveDate, VecDeque<PageBehavior>>>,
    default_behavior: Mutex<PageBehavior>,
    navigation_delay: Mutex<Duration>,
    fail_first_opens: AtomicU32,
    open_failures: AtomicBool,
    open_attempts: AtomicU32,
    drivers_opened: AtomicU32,
    navigations: AtomicU32,
    state_clears: AtomicU32,
    shutdowns: AtomicU32,
}

impl ScriptInner {
    fn next_behavior(&self, url: &str) -> PageBehavior {
        let date = date_in_url(url);
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        date.and_then(|d| scripts.get_mut(&d).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| {
                self.default_behavior
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
    }

    fn navigation_delay(&self) -> Duration {
        *self.navigation_delay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scripted [`SessionFactory`] with call counters
#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    inner: Arc<ScriptInner>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScriptInner {
                scripts: Mutex::new(HashMap::new()),
                default_behavior: Mutex::new(PageBehavior::results(199.0, "Scripted Air")),
                navigation_delay: Mutex::new(Duration::from_millis(200)),
                fail_first_opens: AtomicU32::new(0),
                open_failures: AtomicBool::new(false),
                open_attempts: AtomicU32::new(0),
                drivers_opened: AtomicU32::new(0),
                navigations: AtomicU32::new(0),
                state_clears: AtomicU32::new(0),
                shutdowns: AtomicU32::new(0),
            }),
        }
    }

    /// Behavior for every navigation without a scripted entry
    #[must_use]
    pub fn with_default(self, behavior: PageBehavior) -> Self {
        *self.inner.default_behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
        self
    }

    /// Simulated page fetch time
    #[must_use]
    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        *self.inner.navigation_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    /// Queues behaviors for the date (`YYYY-MM-DD`), consumed one per navigation
    #[must_use]
    pub fn script(self, date: &str, behaviors: impl IntoIterator<Item = PageBehavior>) -> Self {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("scripted date must be YYYY-MM-DD");
        self.inner
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(date)
            .or_default()
            .extend(behaviors);
        self
    }

    #[must_use]
    pub fn failing_first_opens(self, count: u32) -> Self {
        self.inner.fail_first_opens.store(count, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn always_failing_opens(self) -> Self {
        self.set_open_failures(true);
        self
    }

    pub fn set_open_failures(&self, failing: bool) {
        self.inner.open_failures.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn open_attempts(&self) -> u32 {
        self.inner.open_attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn drivers_opened(&self) -> u32 {
        self.inner.drivers_opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn navigations(&self) -> u32 {
        self.inner.navigations.load(Ordering::SeqCst)
    }

    /// Cookie/storage clears, i.e. recoveries started
    #[must_use]
    pub fn state_clears(&self) -> u32 {
        self.inner.state_clears.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn shutdowns(&self) -> u32 {
        self.inner.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> Result<Box<dyn SessionDriver>, SessionError> {
        self.inner.open_attempts.fetch_add(1, Ordering::SeqCst);

        let scheduled_failure = self
            .inner
            .fail_first_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scheduled_failure || self.inner.open_failures.load(Ordering::SeqCst) {
            return Err(SessionError::Driver("scripted open failure".to_string()));
        }

        self.inner.drivers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDriver {
            inner: Arc::clone(&self.inner),
            page: None,
            extract_failures_left: 0,
        }))
    }
}

struct ScriptedDriver {
    inner: Arc<ScriptInner>,
    page: Option<PageBehavior>,
    extract_failures_left: u32,
}

#[async_trait]
impl SessionDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.inner.navigations.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.next_behavior(url);

        match behavior {
            PageBehavior::HangOnNavigate => std::future::pending::<()>().await,
            PageBehavior::NavigationError => {
                return Err(SessionError::Navigation(format!("scripted failure for {url}")));
            }
            _ => {}
        }

        tokio::time::sleep(self.inner.navigation_delay()).await;
        if let PageBehavior::FlakyExtraction { failures, .. } = behavior {
            self.extract_failures_left = failures;
        }
        self.page = Some(behavior);
        Ok(())
    }

    async fn blocking_indicator(&mut self) -> Result<Option<BlockingIndicator>, SessionError> {
        Ok(matches!(self.page, Some(PageBehavior::Blocked)).then_some(BlockingIndicator::HumanVerification))
    }

    async fn clear_state(&mut self) -> Result<(), SessionError> {
        self.inner.state_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn interact(&mut self, _steps: &[InteractionStep]) -> Result<(), SessionError> {
        Ok(())
    }

    async fn wait_until_loaded(&mut self) -> Result<(), SessionError> {
        match self.page {
            Some(PageBehavior::NeverLoads) => std::future::pending().await,
            Some(_) => Ok(()),
            None => Err(SessionError::Driver("nothing to load".to_string())),
        }
    }

    async fn has_no_results(&mut self) -> Result<bool, SessionError> {
        Ok(matches!(self.page, Some(PageBehavior::NoResults)))
    }

    async fn extract(&mut self) -> Result<ExtractedFields, ExtractionError> {
        match &self.page {
            Some(PageBehavior::Results { price, airline }) => Ok(fields(*price, airline)),
            Some(PageBehavior::FlakyExtraction { price, .. }) => {
                if self.extract_failures_left > 0 {
                    self.extract_failures_left -= 1;
                    Err(ExtractionError::missing("price"))
                } else {
                    Ok(fields(*price, "Flaky Air"))
                }
            }
            Some(PageBehavior::ExtractionFailure) => Err(ExtractionError::non_numeric("price", "N/A")),
            _ => Err(ExtractionError::NoResultRows),
        }
    }

    async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.inner.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fields(price: f64, airline: &str) -> ExtractedFields {
    let mut fields = ExtractedFields::new();
    fields.insert("price".into(), FieldValue::Number(price));
    fields.insert("airline".into(), FieldValue::from(airline));
    fields
}

/// First path segment that is a `YYYY-MM-DD` date
fn date_in_url(url: &str) -> Option<NaiveDate> {
    url.split(['/', '?'])
        .find_map(|segment| NaiveDate::parse_from_str(segment, "%Y-%m-%d").ok())
}

/// JFK → LAX search over `[from, to]`, 5 nights
#[must_use]
pub fn search_between(from: &str, to: &str) -> SearchParams {
    SearchParams {
        origin: "JFK".to_string(),
        destination: "LAX".to_string(),
        date_from: NaiveDate::parse_from_str(from, "%Y-%m-%d").expect("valid start date"),
        date_to: NaiveDate::parse_from_str(to, "%Y-%m-%d").expect("valid end date"),
        stay_nights: 5,
        max_duration_hours: 12,
        stops: vec![0, 1],
        ..SearchParams::default()
    }
}
