//! Extraction of the "listing essentials" sidebar from a detail page.
//!
//! The sidebar is free text with no stable markup, so it is flattened into
//! lines and each line is tagged by keyword. Tagging is driven by an ordered
//! rule table; the first matching rule whose field is still open claims the
//! line.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use crate::config::{Config, FieldLabels};
use crate::error::ExtractionError;
use crate::types::{AuctionRecord, Essentials};

static ESSENTIALS_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.listing-essentials").expect("static selector"));

/// "12k Miles", "33k Indicated Miles"
static THOUSANDS_MILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+)k\s+(?:[a-z]+\s+)?miles").expect("static regex")
});

/// "14,820 Miles", "7,200 Kilometers (~4,500 Miles)"
static EXACT_MILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,3}(?:,\d{3})+|\d+)\s+(?:[a-z]+\s+)?miles").expect("static regex")
});

const BLOCK_ELEMENTS: &[&str] = &[
    "br", "div", "p", "ul", "ol", "li", "dl", "dt", "dd", "table", "tr", "h1", "h2", "h3", "h4",
    "h5", "h6", "section", "hr",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Mileage,
    Transmission,
    Vin,
    Location,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: Field,
    pattern: Regex,
}

impl FieldRule {
    pub fn new(field: Field, keyword: &str) -> Self {
        let pattern = Regex::new(&format!(r"(?i)\s*{}\s*", regex::escape(keyword.trim())))
            .expect("escaped keyword is a valid regex");
        Self { field, pattern }
    }

    pub fn matches(&self, entry: &str) -> bool {
        self.pattern.is_match(entry)
    }

    /// Entry text with the keyword and its surrounding whitespace removed.
    pub fn strip(&self, entry: &str) -> Option<String> {
        let value = self.pattern.replace(entry, " ");
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// Priority order: mileage, transmission, VIN, location.
pub fn default_rules(labels: &FieldLabels) -> Vec<FieldRule> {
    vec![
        FieldRule::new(Field::Mileage, &labels.mileage),
        FieldRule::new(Field::Transmission, &labels.transmission),
        FieldRule::new(Field::Vin, &labels.vin),
        FieldRule::new(Field::Location, &labels.location),
    ]
}

#[derive(Debug, Clone)]
pub struct EssentialsExtractor {
    rules: Vec<FieldRule>,
    line_break_marker: String,
    mileage_strip_digits: bool,
}

impl EssentialsExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            rules: default_rules(&config.labels),
            line_break_marker: config.line_break_marker.clone(),
            mileage_strip_digits: config.mileage_strip_digits,
        }
    }

    #[cfg(test)]
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn extract(&self, html: &str, record: &AuctionRecord) -> Result<Essentials, ExtractionError> {
        let document = Html::parse_document(html);
        let container = document
            .select(&ESSENTIALS_SELECTOR)
            .next()
            .ok_or(ExtractionError::MissingEssentials)?;

        let entries = sidebar_lines(container);
        let mut essentials = self.tag_entries(&entries);
        essentials.text = self.essentials_text(record, &entries);
        Ok(essentials)
    }

    /// Tag sidebar entries in document order. `text` is left empty.
    pub fn tag_entries<S: AsRef<str>>(&self, entries: &[S]) -> Essentials {
        let mut essentials = Essentials::default();
        let mut mileage_claimed = false;

        for entry in entries {
            let entry = entry.as_ref();
            for rule in &self.rules {
                if !rule.matches(entry) {
                    continue;
                }
                let claimed = match rule.field {
                    // The first mileage line is final, even if it does not parse
                    Field::Mileage if !mileage_claimed => {
                        mileage_claimed = true;
                        essentials.mileage = normalize_mileage(entry, self.mileage_strip_digits);
                        true
                    }
                    Field::Transmission if essentials.transmission.is_none() => {
                        essentials.transmission = rule.strip(entry);
                        essentials.transmission.is_some()
                    }
                    Field::Vin if essentials.vin.is_none() => {
                        essentials.vin = rule.strip(entry);
                        essentials.vin.is_some()
                    }
                    Field::Location if essentials.location.is_none() => {
                        essentials.location = rule.strip(entry);
                        essentials.location.is_some()
                    }
                    _ => false,
                };
                if claimed {
                    break;
                }
            }
        }

        essentials
    }

    fn essentials_text<S: AsRef<str>>(&self, record: &AuctionRecord, entries: &[S]) -> String {
        let mut parts = Vec::with_capacity(entries.len() + 2);
        push_lines(&mut parts, &record.title);
        push_lines(&mut parts, &record.subtitle);
        for entry in entries {
            push_lines(&mut parts, entry.as_ref());
        }
        parts.join(&self.line_break_marker)
    }
}

/// Mileage from a sidebar entry: "12k Miles" first, then "14,820 Miles".
///
/// With `strip_digits` an unrecognised entry falls back to all of its digits
/// glued together; otherwise it is unknown. No digits at all is always unknown.
pub fn normalize_mileage(text: &str, strip_digits: bool) -> Option<u64> {
    if let Some(caps) = THOUSANDS_MILES.captures(text) {
        return caps[1].parse::<u64>().ok()?.checked_mul(1000);
    }
    if let Some(caps) = EXACT_MILES.captures(text) {
        return caps[1].replace(',', "").parse().ok();
    }
    if !strip_digits {
        return None;
    }

    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    tracing::debug!("mileage fallback for '{}': {}", text, digits);
    digits.parse().ok()
}

/// Flatten the sidebar into trimmed, non-empty lines, breaking at block elements.
fn sidebar_lines(container: ElementRef) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    collect_text(container, &mut lines, &mut current);
    flush_line(&mut lines, &mut current);
    lines
}

fn collect_text(element: ElementRef, lines: &mut Vec<String>, current: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            current.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            let block = BLOCK_ELEMENTS.contains(&name);
            if block {
                flush_line(lines, current);
            }
            collect_text(child, lines, current);
            if block {
                flush_line(lines, current);
            }
        }
    }
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    push_lines(lines, current);
    current.clear();
}

/// Append each non-blank line of `text` with its whitespace collapsed.
fn push_lines(lines: &mut Vec<String>, text: &str) {
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_record;

    const DETAIL_PAGE: &str = r#"
<html><body>
<div class="listing-essentials">
  <div class="item"><strong>Seller</strong>: <a href="/member/jdoe/">jdoe</a></div>
  <strong>Location</strong>: <a href="/map">Austin, Texas 78701</a><br>
  <div class="item"><strong>Lot</strong> #41234</div>
  <strong>Listing Details</strong>
  <ul>
    <li>Chassis: <a href="/search?q=WP0AB0916LS123456">WP0AB0916LS123456</a></li>
    <li>33k Indicated Miles</li>
    <li>3.6-Liter Flat-Six</li>
    <li>Five-Speed Manual Transmission</li>
    <li>Limited-Slip Differential</li>
    <li>Replacement Engine With 12k Miles</li>
  </ul>
  <script>var miles = 1;</script>
</div>
</body></html>"#;

    fn extractor() -> EssentialsExtractor {
        EssentialsExtractor::new(&Config::default())
    }

    fn record() -> AuctionRecord {
        sample_record("1990 Porsche 911 Carrera 4", "Sold for $45,000 on 6/1/21", 45000.0, 0)
    }

    #[test]
    fn test_mileage_patterns() {
        assert_eq!(normalize_mileage("12k Miles", false), Some(12000));
        assert_eq!(normalize_mileage("14,820 Miles", false), Some(14820));
        assert_eq!(normalize_mileage("33k Indicated Miles", false), Some(33000));
        assert_eq!(normalize_mileage("7,200 Kilometers (~4,500 Miles)", false), Some(4500));
        assert_eq!(normalize_mileage("1,234,567 Miles", false), Some(1234567));
        assert_eq!(normalize_mileage("850 Miles", false), Some(850));
    }

    #[test]
    fn test_unknown_mileage_is_missing() {
        assert_eq!(normalize_mileage("Unknown", false), None);
        assert_eq!(normalize_mileage("Unknown", true), None);
        assert_eq!(normalize_mileage("TMU Miles", false), None);
    }

    #[test]
    fn test_strip_digits_fallback_is_opt_in() {
        assert_eq!(normalize_mileage("Odometer shows 98765 (TMU)", false), None);
        assert_eq!(normalize_mileage("Odometer shows 98765 (TMU)", true), Some(98765));
    }

    #[test]
    fn test_rule_table_order() {
        let fields: Vec<Field> = extractor().rules().iter().map(|r| r.field).collect();
        assert_eq!(
            fields,
            vec![Field::Mileage, Field::Transmission, Field::Vin, Field::Location]
        );
    }

    #[test]
    fn test_rule_strip_is_case_insensitive() {
        let rule = FieldRule::new(Field::Vin, "chassis:");
        assert!(rule.matches("CHASSIS: WP0AB0916LS123456"));
        assert_eq!(rule.strip("CHASSIS:   WP0AB0916LS123456 ").as_deref(), Some("WP0AB0916LS123456"));
        assert_eq!(rule.strip("Chassis:"), None);

        let rule = FieldRule::new(Field::Transmission, "transmission");
        assert_eq!(
            rule.strip("Five-Speed Manual Transmission").as_deref(),
            Some("Five-Speed Manual")
        );
    }

    #[test]
    fn test_extract_detail_page() {
        let essentials = extractor().extract(DETAIL_PAGE, &record()).unwrap();

        assert_eq!(essentials.mileage, Some(33000));
        assert_eq!(essentials.transmission.as_deref(), Some("Five-Speed Manual"));
        assert_eq!(essentials.vin.as_deref(), Some("WP0AB0916LS123456"));
        assert_eq!(essentials.location.as_deref(), Some("Austin, Texas 78701"));
    }

    #[test]
    fn test_essentials_text_uses_marker() {
        let essentials = extractor().extract(DETAIL_PAGE, &record()).unwrap();

        assert!(!essentials.text.contains('\n'));
        assert!(essentials
            .text
            .starts_with("1990 Porsche 911 Carrera 4<br />Sold for $45,000 on 6/1/21<br />Seller: jdoe"));
        assert!(essentials.text.contains("<br />Location: Austin, Texas 78701<br />"));
        assert!(essentials.text.ends_with("<br />Replacement Engine With 12k Miles"));
        assert!(!essentials.text.contains("var miles"));
    }

    #[test]
    fn test_multiline_title_is_split_at_the_marker() {
        let record = sample_record(
            "1990 Porsche\n 911  Carrera 4 ",
            "Sold for $45,000\r\non 6/1/21",
            45000.0,
            0,
        );
        let essentials = extractor().extract(DETAIL_PAGE, &record).unwrap();

        assert!(!essentials.text.contains('\n'));
        assert!(!essentials.text.contains('\r'));
        assert!(essentials.text.starts_with(
            "1990 Porsche<br />911 Carrera 4<br />Sold for $45,000<br />on 6/1/21<br />Seller: jdoe"
        ));
    }

    #[test]
    fn test_later_miles_mention_is_ignored() {
        let entries = ["Unknown Miles", "Engine Rebuilt 5k Miles Ago"];
        let essentials = extractor().tag_entries(&entries);
        assert_eq!(essentials.mileage, None);
    }

    #[test]
    fn test_first_entry_wins_per_field() {
        let entries = [
            "Location: Portland, Oregon",
            "Six-Speed Manual Transmission",
            "Rebuilt Transmission",
            "Location: nowhere",
        ];
        let essentials = extractor().tag_entries(&entries);
        assert_eq!(essentials.transmission.as_deref(), Some("Six-Speed Manual"));
        assert_eq!(essentials.location.as_deref(), Some("Portland, Oregon"));
    }

    #[test]
    fn test_configured_labels() {
        let mut config = Config::default();
        config.labels.vin = "vin:".to_string();
        let essentials = EssentialsExtractor::new(&config).tag_entries(&["VIN: 1G1YY22G965100001"]);
        assert_eq!(essentials.vin.as_deref(), Some("1G1YY22G965100001"));
    }

    #[test]
    fn test_missing_container() {
        let err = extractor()
            .extract("<html><body><div class=\"listing\"></div></body></html>", &record())
            .unwrap_err();
        assert_eq!(err, ExtractionError::MissingEssentials);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let first = extractor().extract(DETAIL_PAGE, &record()).unwrap();
        let second = extractor().extract(DETAIL_PAGE, &record()).unwrap();
        assert_eq!(first, second);
    }
}
