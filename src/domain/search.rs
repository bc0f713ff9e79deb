//! Search parameters and deterministic target URL construction.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::value_objects::{DateWindow, Market};

/// Fixed query suffix: no virtual interlining, no airport changes
const LEG_FILTER_SUFFIX: &str = "virtualinterline=-virtualinterline;airportchange=-airportchange";

/// Longest accepted leg duration ceiling: one week
pub const MAX_DURATION_HOURS: u32 = 168;

/// Search/run parameter validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid date range: end {end} is before start {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid airport code for {field}: '{code}' (expected three letters)")]
    InvalidAirportCode { field: &'static str, code: String },

    #[error("Open-jaw search needs both return_origin and return_destination")]
    IncompleteOpenJaw,

    #[error("Stay length must be at least one night")]
    InvalidStayLength,

    #[error("Maximum leg duration must be between 1 and 168 hours")]
    InvalidDurationCeiling,

    #[error("At least one adult passenger is required")]
    InvalidPassengerCount,

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Target URL cannot be built: {0}")]
    UnbuildableUrl(String),
}

/// User supplied search parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub origin: String,
    pub destination: String,
    /// Open-jaw return leg departure airport
    pub return_origin: Option<String>,
    /// Open-jaw return leg arrival airport
    pub return_destination: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub stay_nights: u32,
    pub max_duration_hours: u32,
    /// Allowed stop counts; empty means no stop filter
    pub stops: Vec<u8>,
    pub market: Market,
    pub adults: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            origin: String::new(),
            destination: String::new(),
            return_origin: None,
            return_destination: None,
            date_from: NaiveDate::default(),
            date_to: NaiveDate::default(),
            stay_nights: 7,
            max_duration_hours: 24,
            stops: Vec::new(),
            market: Market::Usa,
            adults: 2,
        }
    }
}

impl SearchParams {
    /// Checks every parameter the URL builder and the orchestrator rely on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.date_to < self.date_from {
            return Err(ValidationError::InvalidDateRange {
                start: self.date_from,
                end: self.date_to,
            });
        }

        check_airport("origin", &self.origin)?;
        check_airport("destination", &self.destination)?;
        match (&self.return_origin, &self.return_destination) {
            (Some(ro), Some(rd)) => {
                check_airport("return_origin", ro)?;
                check_airport("return_destination", rd)?;
            }
            (None, None) => {}
            _ => return Err(ValidationError::IncompleteOpenJaw),
        }

        if self.stay_nights == 0 {
            return Err(ValidationError::InvalidStayLength);
        }
        if !(1..=MAX_DURATION_HOURS).contains(&self.max_duration_hours) {
            return Err(ValidationError::InvalidDurationCeiling);
        }
        if self.adults == 0 {
            return Err(ValidationError::InvalidPassengerCount);
        }

        // 마지막 날짜 기준으로 URL이 실제로 만들어지는지 확인
        let window = DateWindow::starting(self.date_to, self.stay_nights).ok_or_else(|| {
            ValidationError::UnbuildableUrl(format!(
                "return date overflows after {} + {} nights",
                self.date_to, self.stay_nights
            ))
        })?;
        Url::parse(&self.url_for(&window))
            .map_err(|e| ValidationError::UnbuildableUrl(e.to_string()))?;

        Ok(())
    }

    #[must_use]
    pub const fn is_open_jaw(&self) -> bool {
        self.return_origin.is_some() && self.return_destination.is_some()
    }

    /// Every calendar day in `[date_from, date_to]`
    #[must_use]
    pub fn expected_dates(&self) -> Vec<NaiveDate> {
        enumerate_dates(self.date_from, self.date_to)
    }

    /// Builds the search page URL for one travel window.
    ///
    /// Pure function of the parameters and the window.
    #[must_use]
    pub fn url_for(&self, window: &DateWindow) -> String {
        let depart = window.depart.format("%Y-%m-%d");
        let back = window.return_date.format("%Y-%m-%d");
        let outbound = format!("{}-{}", code(&self.origin), code(&self.destination));

        let path = match (&self.return_origin, &self.return_destination) {
            (Some(ro), Some(rd)) => {
                format!("{outbound}/{depart}/{}-{}/{back}", code(ro), code(rd))
            }
            _ => format!("{outbound}/{depart}/{back}"),
        };

        format!(
            "{}/{path}/{}adults?sort=price_a&fs=legdur=-{}{};{LEG_FILTER_SUFFIX}",
            self.market.base_url(),
            self.adults,
            u64::from(self.max_duration_hours) * 60,
            self.stops_filter(),
        )
    }

    /// `;stops=0,1` style filter, sorted and deduplicated; empty without stops
    #[must_use]
    pub fn stops_filter(&self) -> String {
        if self.stops.is_empty() {
            return String::new();
        }
        let unique: BTreeSet<u8> = self.stops.iter().copied().collect();
        let joined = unique
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(";stops={joined}")
    }

    /// Arrival airport label for records; `"DST x RO"` for open-jaw searches
    #[must_use]
    pub fn arrival_label(&self) -> String {
        match &self.return_origin {
            Some(ro) if self.is_open_jaw() => format!("{} x {}", code(&self.destination), code(ro)),
            _ => code(&self.destination),
        }
    }

    /// Route label used for output naming: `"ORIGIN - DESTINATION[ x RETURN_ORIGIN]"`
    #[must_use]
    pub fn route_label(&self) -> String {
        format!("{} - {}", code(&self.origin), self.arrival_label())
    }
}

/// Every calendar day from `start` to `end` inclusive; empty when `end < start`.
#[must_use]
pub fn enumerate_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|day| *day <= end).collect()
}

fn code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

fn check_airport(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    let trimmed = raw.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAirportCode {
            field,
            code: raw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn jfk_lax() -> SearchParams {
        SearchParams {
            origin: "JFK".into(),
            destination: "LAX".into(),
            date_from: day(2025, 3, 1),
            date_to: day(2025, 3, 3),
            stay_nights: 5,
            max_duration_hours: 10,
            stops: vec![1, 0],
            ..SearchParams::default()
        }
    }

    #[test]
    fn test_enumerate_dates_inclusive() {
        let dates = enumerate_dates(day(2025, 2, 27), day(2025, 3, 2));
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.first(), Some(&day(2025, 2, 27)));
        assert_eq!(dates.last(), Some(&day(2025, 3, 2)));
        assert!(enumerate_dates(day(2025, 3, 2), day(2025, 3, 1)).is_empty());
    }

    #[test]
    fn test_url_for_round_trip_search() {
        let params = jfk_lax();
        let window = DateWindow::starting(day(2025, 3, 1), 5).unwrap();
        assert_eq!(
            params.url_for(&window),
            "https://www.kayak.com/flights/JFK-LAX/2025-03-01/2025-03-06/2adults?sort=price_a&fs=legdur=-600;stops=0,1;virtualinterline=-virtualinterline;airportchange=-airportchange"
        );
    }

    #[test]
    fn test_url_open_jaw_canada_without_stops() {
        let params = SearchParams {
            origin: "yyz".into(),
            destination: "LHR".into(),
            return_origin: Some("CDG".into()),
            return_destination: Some("YYZ".into()),
            market: Market::Canada,
            stops: Vec::new(),
            ..jfk_lax()
        };
        let window = DateWindow::starting(day(2025, 3, 1), 5).unwrap();
        assert_eq!(
            params.url_for(&window),
            "https://www.ca.kayak.com/flights/YYZ-LHR/2025-03-01/CDG-YYZ/2025-03-06/2adults?sort=price_a&fs=legdur=-600;virtualinterline=-virtualinterline;airportchange=-airportchange"
        );
        assert_eq!(params.arrival_label(), "LHR x CDG");
        assert_eq!(params.route_label(), "YYZ - LHR x CDG");
    }

    #[test]
    fn test_stops_filter_sorted_and_deduplicated() {
        let params = SearchParams { stops: vec![2, 0, 2, 1], ..jfk_lax() };
        assert_eq!(params.stops_filter(), ";stops=0,1,2");
    }

    #[rstest]
    #[case::reversed_range(SearchParams { date_to: day(2025, 2, 1), ..jfk_lax() })]
    #[case::short_code(SearchParams { origin: "JF".into(), ..jfk_lax() })]
    #[case::numeric_code(SearchParams { destination: "L4X".into(), ..jfk_lax() })]
    #[case::half_open_jaw(SearchParams { return_origin: Some("SFO".into()), ..jfk_lax() })]
    #[case::zero_nights(SearchParams { stay_nights: 0, ..jfk_lax() })]
    #[case::zero_hours(SearchParams { max_duration_hours: 0, ..jfk_lax() })]
    #[case::week_plus_one_hour(SearchParams { max_duration_hours: MAX_DURATION_HOURS + 1, ..jfk_lax() })]
    #[case::huge_hours(SearchParams { max_duration_hours: u32::MAX, ..jfk_lax() })]
    #[case::no_adults(SearchParams { adults: 0, ..jfk_lax() })]
    fn test_invalid_parameters_rejected(#[case] params: SearchParams) {
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_duration_ceiling_error_and_url_never_overflow() {
        let params = SearchParams { max_duration_hours: u32::MAX, ..jfk_lax() };
        assert_eq!(params.validate(), Err(ValidationError::InvalidDurationCeiling));

        let window = DateWindow::starting(day(2025, 3, 1), 5).unwrap();
        assert!(params.url_for(&window).contains("legdur=-257698037700;"));

        let longest = SearchParams { max_duration_hours: MAX_DURATION_HOURS, ..jfk_lax() };
        assert_eq!(longest.validate(), Ok(()));
    }

    #[test]
    fn test_valid_parameters_accepted() {
        assert_eq!(jfk_lax().validate(), Ok(()));
        assert_eq!(jfk_lax().expected_dates().len(), 3);
    }
}
