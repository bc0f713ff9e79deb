//! HTML inspection for flight search result pages
//!
//! [`PageInspector`] holds precompiled selectors and answers the questions
//! the task runner asks of a page: is it a blocking challenge, has it
//! finished loading, does it explicitly show no results, and what does the
//! cheapest (first) result row contain.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::crawling::session::{BlockingIndicator, ExtractionError};
use crate::domain::{ExtractedFields, FieldValue, Market};

use super::parsing_error::ParsingError;

/// Placeholder for optional text fields that are absent
pub const UNKNOWN: &str = "Unknown";

/// Text banners that mean the request was challenged
const BLOCKING_PHRASES: &[(&str, BlockingIndicator)] = &[
    ("Access Denied", BlockingIndicator::AccessDenied),
    ("Checking your browser", BlockingIndicator::BrowserCheck),
    ("Please verify you are a human", BlockingIndicator::HumanVerification),
];

/// CSS selectors for the result page
#[derive(Debug, Clone)]
pub struct PageSelectors {
    pub text_container: &'static str,
    pub recaptcha_frame: &'static str,
    pub challenge_container: &'static str,
    /// Progress bar once hidden
    pub loaded_marker: &'static str,
    pub result_row: &'static str,
    pub price: &'static str,
    pub airline_usa: &'static str,
    pub airline_default: &'static str,
    pub leg_duration: &'static str,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            text_container: "div",
            recaptcha_frame: "iframe[title*='recaptcha']",
            challenge_container: "div[class*='cf-challenge']",
            loaded_marker: "div.skp2.skp2-hidden[role='progressbar']",
            result_row: "div[class*='nrc6']",
            price: "div[class*='e2GB-price-text-container'] div[class*='e2GB-price-text']",
            airline_usa: "div.c_cgF.c_cgF-mod-variant-default",
            airline_default: "div[class*='J0g6-operator-text']",
            leg_duration: "div[class*='xdW8'] > div[class*='vmXl']",
        }
    }
}

#[derive(Debug, Clone)]
struct Compiled {
    text_container: Selector,
    recaptcha_frame: Selector,
    challenge_container: Selector,
    loaded_marker: Selector,
    result_row: Selector,
    price: Selector,
    airline: Selector,
    leg_duration: Selector,
}

/// Market-aware inspector for search result pages
#[derive(Debug, Clone)]
pub struct PageInspector {
    market: Market,
    compiled: Compiled,
    duration_pattern: Regex,
}

impl PageInspector {
    pub fn new(market: Market) -> Result<Self, ParsingError> {
        Self::with_selectors(market, &PageSelectors::default())
    }

    pub fn with_selectors(market: Market, selectors: &PageSelectors) -> Result<Self, ParsingError> {
        let airline = match market {
            Market::Usa => selectors.airline_usa,
            Market::Canada => selectors.airline_default,
        };
        let compiled = Compiled {
            text_container: compile(selectors.text_container)?,
            recaptcha_frame: compile(selectors.recaptcha_frame)?,
            challenge_container: compile(selectors.challenge_container)?,
            loaded_marker: compile(selectors.loaded_marker)?,
            result_row: compile(selectors.result_row)?,
            price: compile(selectors.price)?,
            airline: compile(airline)?,
            leg_duration: compile(selectors.leg_duration)?,
        };

        Ok(Self {
            market,
            compiled,
            duration_pattern: Regex::new(r"^\s*(?:(\d+)\s*h)?\s*(?:(\d+)\s*m)?\s*$")?,
        })
    }

    #[must_use]
    pub const fn market(&self) -> Market {
        self.market
    }

    /// First blocking indicator found in the page, in a fixed check order
    #[must_use]
    pub fn blocking_indicator(&self, html: &str) -> Option<BlockingIndicator> {
        let document = Html::parse_document(html);

        for (phrase, indicator) in BLOCKING_PHRASES {
            let found = document
                .select(&self.compiled.text_container)
                .any(|div| own_text(&div).contains(phrase));
            if found {
                return Some(*indicator);
            }
        }
        if document.select(&self.compiled.recaptcha_frame).next().is_some() {
            return Some(BlockingIndicator::Recaptcha);
        }
        if document.select(&self.compiled.challenge_container).next().is_some() {
            return Some(BlockingIndicator::Challenge);
        }
        None
    }

    /// Loaded once the progress bar is hidden or result rows are present
    #[must_use]
    pub fn is_loaded(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        document.select(&self.compiled.loaded_marker).next().is_some()
            || document.select(&self.compiled.result_row).next().is_some()
    }

    /// A loaded page without a single result row
    #[must_use]
    pub fn has_no_results(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        document.select(&self.compiled.loaded_marker).next().is_some()
            && document.select(&self.compiled.result_row).next().is_none()
    }

    /// Extracts the page-level fields of the first result row
    pub fn extract(&self, html: &str) -> Result<ExtractedFields, ExtractionError> {
        let document = Html::parse_document(html);
        let row = document
            .select(&self.compiled.result_row)
            .next()
            .ok_or(ExtractionError::NoResultRows)?;

        let raw_price = row
            .select(&self.compiled.price)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ExtractionError::missing("price"))?;
        let cleaned = self.market.strip_currency(&raw_price);
        let price = cleaned
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ExtractionError::non_numeric("price", raw_price.clone()))?;

        let airline = row
            .select(&self.compiled.airline)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        let durations: Vec<String> = row
            .select(&self.compiled.leg_duration)
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .collect();
        let outbound = durations.first().cloned().unwrap_or_else(|| UNKNOWN.to_string());
        let inbound = durations.get(1).cloned().unwrap_or_else(|| UNKNOWN.to_string());

        debug!("Extracted first row: {} for {} ({} / {})", airline, price, outbound, inbound);

        let mut fields = ExtractedFields::new();
        fields.insert("price".into(), FieldValue::Number(price));
        fields.insert("airline".into(), FieldValue::Text(airline));
        if let Some(minutes) = self.duration_minutes(&outbound) {
            fields.insert("outbound_minutes".into(), FieldValue::from(minutes));
        }
        if let Some(minutes) = self.duration_minutes(&inbound) {
            fields.insert("return_minutes".into(), FieldValue::from(minutes));
        }
        fields.insert("outbound_duration".into(), FieldValue::Text(outbound));
        fields.insert("return_duration".into(), FieldValue::Text(inbound));
        Ok(fields)
    }

    /// `"25h 30m"` → 1530; `None` when the text is not a duration
    #[must_use]
    pub fn duration_minutes(&self, text: &str) -> Option<u32> {
        let captures = self.duration_pattern.captures(text)?;
        let hours = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
        let minutes = captures.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        match (hours, minutes) {
            (None, None) => None,
            (h, m) => h.unwrap_or(0).checked_mul(60)?.checked_add(m.unwrap_or(0)),
        }
    }
}

fn compile(selector: &str) -> Result<Selector, ParsingError> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(selector, e.to_string()))
}

/// Text directly inside an element, excluding nested elements
fn own_text(element: &ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <div class="skp2 skp2-hidden skp2-inlined" role="progressbar"></div>
          <div class="nrc6 nrc6-mod-pres-default">
            <div class="c_cgF c_cgF-mod-variant-default">Delta</div>
            <div class="J0g6-operator-text">Air Canada</div>
            <div class="xdW8"><div class="vmXl vmXl-mod-variant-default">5h 42m</div></div>
            <div class="xdW8"><div class="vmXl vmXl-mod-variant-default">6h 05m</div></div>
            <div class="e2GB-price-text-container"><div class="e2GB-price-text">$1,234</div></div>
          </div>
          <div class="nrc6"><div class="e2GB-price-text-container"><div class="e2GB-price-text">$2,000</div></div></div>
        </body></html>
    "#;

    #[test]
    fn test_extracts_first_row_for_usa() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        let fields = inspector.extract(RESULTS_PAGE).unwrap();

        assert_eq!(fields["price"], FieldValue::Number(1234.0));
        assert_eq!(fields["airline"], FieldValue::from("Delta"));
        assert_eq!(fields["outbound_duration"], FieldValue::from("5h 42m"));
        assert_eq!(fields["outbound_minutes"], FieldValue::Number(342.0));
        assert_eq!(fields["return_minutes"], FieldValue::Number(365.0));
    }

    #[test]
    fn test_canada_uses_operator_selector_and_strips_prefix() {
        let page = RESULTS_PAGE.replace("$1,234", "C $1,050");
        let inspector = PageInspector::new(Market::Canada).unwrap();
        let fields = inspector.extract(&page).unwrap();

        assert_eq!(fields["price"], FieldValue::Number(1050.0));
        assert_eq!(fields["airline"], FieldValue::from("Air Canada"));
    }

    #[test]
    fn test_missing_and_non_numeric_price() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        let no_price = r#"<div class="nrc6"><div class="c_cgF c_cgF-mod-variant-default">Delta</div></div>"#;
        assert_eq!(inspector.extract(no_price).unwrap_err(), ExtractionError::missing("price"));

        let bad_price = RESULTS_PAGE.replace("$1,234", "Sold out");
        assert!(matches!(
            inspector.extract(&bad_price).unwrap_err(),
            ExtractionError::NonNumeric { .. }
        ));
        assert_eq!(inspector.extract("<html></html>").unwrap_err(), ExtractionError::NoResultRows);
    }

    #[rstest::rstest]
    #[case("NaN")]
    #[case("inf")]
    #[case("-infinity")]
    fn test_non_finite_price_rejected(#[case] text: &str) {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        let page = RESULTS_PAGE.replace("$1,234", text);
        assert!(matches!(
            inspector.extract(&page).unwrap_err(),
            ExtractionError::NonNumeric { .. }
        ));
    }

    #[test]
    fn test_airline_defaults_to_unknown() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        let page = RESULTS_PAGE.replace("c_cgF c_cgF-mod-variant-default", "other");
        let fields = inspector.extract(&page).unwrap();
        assert_eq!(fields["airline"], FieldValue::from(UNKNOWN));
    }

    #[test]
    fn test_blocking_indicators() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        assert_eq!(
            inspector.blocking_indicator("<div>Please verify you are a human</div>"),
            Some(BlockingIndicator::HumanVerification)
        );
        assert_eq!(
            inspector.blocking_indicator(r#"<iframe title="reCAPTCHA recaptcha challenge"></iframe>"#),
            Some(BlockingIndicator::Recaptcha)
        );
        assert_eq!(
            inspector.blocking_indicator(r#"<div class="cf-challenge-running"></div>"#),
            Some(BlockingIndicator::Challenge)
        );
        assert_eq!(inspector.blocking_indicator(RESULTS_PAGE), None);
    }

    #[test]
    fn test_load_and_no_results_signals() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        let loading = r#"<div class="skp2" role="progressbar"></div>"#;
        let empty = r#"<div class="skp2 skp2-hidden" role="progressbar"></div>"#;

        assert!(!inspector.is_loaded(loading));
        assert!(inspector.is_loaded(empty));
        assert!(inspector.has_no_results(empty));
        assert!(!inspector.has_no_results(RESULTS_PAGE));
    }

    #[test]
    fn test_duration_parsing() {
        let inspector = PageInspector::new(Market::Usa).unwrap();
        assert_eq!(inspector.duration_minutes("25h 30m"), Some(1530));
        assert_eq!(inspector.duration_minutes("7h"), Some(420));
        assert_eq!(inspector.duration_minutes("45m"), Some(45));
        assert_eq!(inspector.duration_minutes(UNKNOWN), None);
        assert_eq!(inspector.duration_minutes(""), None);
        assert_eq!(inspector.duration_minutes("99999999h 0m"), None);
        assert_eq!(inspector.duration_minutes("71582788h 15m"), Some(4_294_967_295));
    }
}
