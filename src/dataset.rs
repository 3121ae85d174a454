//! Table assembly: merge the payload groups, sort, project to output rows, write CSV.

use anyhow::{Context, Result};
use chrono::DateTime;
use std::io::Write;

use crate::chart::{ChartPayload, RawListing};
use crate::error::AssembleError;
use crate::types::{AuctionRecord, SoldFlag, SortKey};

const BASE_COLUMNS: &[&str] = &["sold", "amount", "date", "title", "url"];
const ENRICHMENT_COLUMNS: &[&str] = &["mileage", "transmission", "vin", "location"];
/// Always the final column so the long free text does not push the rest off-screen
const ESSENTIALS_COLUMN: &str = "essentials";

/// Epoch seconds to `YYYY-MM-DD` (UTC). Out-of-range timestamps give an empty string.
pub fn epoch_to_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

fn to_record(listing: RawListing) -> AuctionRecord {
    AuctionRecord {
        sold: SoldFlag::from_subtitle(&listing.subtitle),
        date: epoch_to_date(listing.timestamp),
        title: listing.title,
        subtitle: listing.subtitle,
        amount: listing.amount,
        timestamp: listing.timestamp,
        url: listing.url,
        essentials: None,
        mileage: None,
        transmission: None,
        vin: None,
        location: None,
    }
}

/// Sold group first, then unsold, each in payload order.
///
/// The sold flag comes from the subtitle text. A record whose subtitle disagrees
/// with its payload group is logged, or rejected when `strict` is set.
pub fn merge(payload: ChartPayload, strict: bool) -> Result<Vec<AuctionRecord>, AssembleError> {
    let groups = [(payload.sold, SoldFlag::Yes), (payload.unsold, SoldFlag::No)];
    let mut records = Vec::new();
    let mut mismatches = 0;

    for (listings, group) in groups {
        for listing in listings {
            let record = to_record(listing);
            if record.sold != group {
                let group_name = if group.is_sold() { "sold" } else { "unsold" };
                if strict {
                    return Err(AssembleError::SoldFlagMismatch {
                        title: record.title,
                        subtitle: record.subtitle,
                        group: group_name,
                    });
                }
                tracing::warn!(
                    "'{}' is in the {} group but subtitle '{}' gives sold={}",
                    record.title,
                    group_name,
                    record.subtitle,
                    record.sold.as_str()
                );
                mismatches += 1;
            }
            records.push(record);
        }
    }

    if mismatches > 0 {
        tracing::warn!("{} records use a sold flag that differs from their payload group", mismatches);
    }
    Ok(records)
}

/// Stable ascending sort; ties keep their merged order.
pub fn sort_records(records: &mut [AuctionRecord], key: SortKey) {
    match key {
        SortKey::Amount => records.sort_by(|a, b| a.amount.total_cmp(&b.amount)),
        SortKey::Date => records.sort_by_key(|r| r.timestamp),
        SortKey::Sold => records.sort_by_key(|r| r.sold),
    }
}

/// Read-only view of a record in output form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub sold: String,
    pub amount: String,
    pub date: String,
    pub title: String,
    pub url: String,
    pub mileage: String,
    pub transmission: String,
    pub vin: String,
    pub location: String,
    pub essentials: String,
}

impl From<&AuctionRecord> for Row {
    fn from(record: &AuctionRecord) -> Self {
        Self {
            sold: record.sold.as_str().to_string(),
            amount: record.amount.to_string(),
            date: record.date.clone(),
            title: record.title.clone(),
            url: record.url.clone(),
            mileage: record.mileage.map(|m| m.to_string()).unwrap_or_default(),
            transmission: record.transmission.clone().unwrap_or_default(),
            vin: record.vin.clone().unwrap_or_default(),
            location: record.location.clone().unwrap_or_default(),
            essentials: record.essentials.clone().unwrap_or_default(),
        }
    }
}

impl Row {
    fn fields(&self, enrichment: bool) -> Vec<&str> {
        let mut fields = vec![
            self.sold.as_str(),
            self.amount.as_str(),
            self.date.as_str(),
            self.title.as_str(),
            self.url.as_str(),
        ];
        if enrichment {
            fields.extend([
                self.mileage.as_str(),
                self.transmission.as_str(),
                self.vin.as_str(),
                self.location.as_str(),
            ]);
        }
        fields.push(self.essentials.as_str());
        fields
    }
}

pub fn rows(records: &[AuctionRecord]) -> Vec<Row> {
    records.iter().map(Row::from).collect()
}

/// Output header. Enrichment columns are left out for results-only runs.
pub fn columns(enrichment: bool) -> Vec<&'static str> {
    let mut columns = BASE_COLUMNS.to_vec();
    if enrichment {
        columns.extend_from_slice(ENRICHMENT_COLUMNS);
    }
    columns.push(ESSENTIALS_COLUMN);
    columns
}

pub fn write_csv<W: Write>(writer: W, rows: &[Row], enrichment: bool) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(columns(enrichment))
        .context("Failed to write CSV header")?;
    for row in rows {
        csv.write_record(row.fields(enrichment))
            .with_context(|| format!("Failed to write CSV row for {}", row.url))?;
    }
    csv.flush().context("Failed to flush CSV output")?;
    Ok(())
}
