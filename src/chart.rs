//! Decoding of the statistics blob embedded in a results page.
//!
//! Results pages carry every listing's price, time and status as JSON in the
//! `data-stats` attribute of `div.chart`, split into `s` (sold) and `u` (unsold).

use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::LazyLock;

use crate::error::ParseError;

static CHART_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.chart").expect("static selector"));

const STATS_ATTRIBUTE: &str = "data-stats";

/// One listing as it appears in the payload. `image` and `timestampms` are
/// present in the source but never read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawListing {
    pub title: String,
    #[serde(rename = "titlesub", default)]
    pub subtitle: String,
    pub amount: f64,
    pub timestamp: i64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChartPayload {
    #[serde(rename = "s")]
    pub sold: Vec<RawListing>,
    #[serde(rename = "u")]
    pub unsold: Vec<RawListing>,
}

impl ChartPayload {
    pub fn len(&self) -> usize {
        self.sold.len() + self.unsold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn parse(html: &str) -> Result<ChartPayload, ParseError> {
    let document = Html::parse_document(html);
    let container = document
        .select(&CHART_SELECTOR)
        .next()
        .ok_or(ParseError::MissingContainer)?;
    let stats = container
        .value()
        .attr(STATS_ATTRIBUTE)
        .ok_or(ParseError::MissingAttribute)?;

    let payload: ChartPayload = serde_json::from_str(stats)?;

    if let Some(bad) = payload
        .sold
        .iter()
        .chain(&payload.unsold)
        .find(|listing| !listing.amount.is_finite() || listing.amount < 0.0)
    {
        return Err(ParseError::InvalidAmount {
            title: bad.title.clone(),
            amount: bad.amount,
        });
    }

    tracing::debug!(
        "chart payload: {} sold, {} unsold",
        payload.sold.len(),
        payload.unsold.len()
    );
    Ok(payload)
}

#[cfg(test)]
pub(crate) fn results_page(stats_json: &str) -> String {
    format!(
        "<html><body><h1>Porsche</h1><div class=\"chart\" data-stats='{}'></div></body></html>",
        stats_json
    )
}
