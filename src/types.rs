//! Auction record types shared by the pipeline stages

use clap::ValueEnum;

/// Whether a listing sold, derived from its subtitle text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SoldFlag {
    No,
    Yes,
}

impl SoldFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoldFlag::Yes => "Y",
            SoldFlag::No => "N",
        }
    }

    /// "Sold for $45,000 on 6/1/21" is sold, "Bid to $12,000" is not
    pub fn from_subtitle(subtitle: &str) -> Self {
        if subtitle.to_lowercase().starts_with("sold for") {
            SoldFlag::Yes
        } else {
            SoldFlag::No
        }
    }

    pub fn is_sold(&self) -> bool {
        matches!(self, SoldFlag::Yes)
    }
}

/// Column to order the finished table by (always ascending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SortKey {
    #[default]
    #[value(name = "a", alias = "amount")]
    Amount,
    #[value(name = "d", alias = "date")]
    Date,
    #[value(name = "s", alias = "sold")]
    Sold,
}

/// One auction listing, created from the chart payload and enriched from its detail page
#[derive(Debug, Clone, PartialEq)]
pub struct AuctionRecord {
    pub title: String,
    /// Raw status text, e.g. "Sold for $45,000 on 6/1/21"
    pub subtitle: String,
    pub amount: f64,
    /// Epoch seconds
    pub timestamp: i64,
    /// `YYYY-MM-DD` in UTC
    pub date: String,
    pub sold: SoldFlag,
    pub url: String,

    pub essentials: Option<String>,
    pub mileage: Option<u64>,
    pub transmission: Option<String>,
    pub vin: Option<String>,
    pub location: Option<String>,
}

impl AuctionRecord {
    #[cfg(test)]
    pub fn is_enriched(&self) -> bool {
        self.essentials.is_some()
    }

    /// Copy the extracted fields onto this record, leaving absent ones untouched.
    pub fn merge_essentials(&mut self, essentials: Essentials) {
        self.essentials = Some(essentials.text);
        if essentials.mileage.is_some() {
            self.mileage = essentials.mileage;
        }
        if essentials.transmission.is_some() {
            self.transmission = essentials.transmission;
        }
        if essentials.vin.is_some() {
            self.vin = essentials.vin;
        }
        if essentials.location.is_some() {
            self.location = essentials.location;
        }
    }
}

/// Fields pulled from a listing's essentials sidebar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Essentials {
    pub text: String,
    pub mileage: Option<u64>,
    pub transmission: Option<String>,
    pub vin: Option<String>,
    pub location: Option<String>,
}

#[cfg(test)]
pub(crate) fn sample_record(title: &str, subtitle: &str, amount: f64, timestamp: i64) -> AuctionRecord {
    AuctionRecord {
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        amount,
        timestamp,
        date: String::new(),
        sold: SoldFlag::from_subtitle(subtitle),
        url: format!(
            "https://bringatrailer.com/listing/{}/",
            title.to_lowercase().replace(' ', "-")
        ),
        essentials: None,
        mileage: None,
        transmission: None,
        vin: None,
        location: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sold_flag_from_subtitle() {
        assert_eq!(SoldFlag::from_subtitle("Sold for $45,000 on 6/1/21"), SoldFlag::Yes);
        assert_eq!(SoldFlag::from_subtitle("SOLD FOR $1"), SoldFlag::Yes);
        assert_eq!(SoldFlag::from_subtitle("sold for"), SoldFlag::Yes);
        assert_eq!(SoldFlag::from_subtitle("Bid to $12,000"), SoldFlag::No);
        assert_eq!(SoldFlag::from_subtitle("Withdrawn, sold for $1"), SoldFlag::No);
        assert_eq!(SoldFlag::from_subtitle(""), SoldFlag::No);
    }

    #[test]
    fn test_merge_keeps_existing_when_absent() {
        let mut record = sample_record("1990 Porsche 911", "Bid to $30,000", 30000.0, 0);
        record.vin = Some("WP0AB0916LS123456".to_string());

        record.merge_essentials(Essentials {
            text: "essentials".to_string(),
            mileage: Some(12000),
            ..Essentials::default()
        });

        assert!(record.is_enriched());
        assert_eq!(record.mileage, Some(12000));
        assert_eq!(record.vin.as_deref(), Some("WP0AB0916LS123456"));
        assert_eq!(record.transmission, None);
    }
}
