//! Sequential enrichment of auction records from their detail pages.

use std::time::Duration;
use thiserror::Error;

use crate::error::{ExtractionError, FetchFailure};
use crate::essentials::EssentialsExtractor;
use crate::fetch::{FetchResult, PageFetcher};
use crate::types::AuctionRecord;
use crate::utils::osc8_link;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// A record whose detail page could not be used. Its enrichment fields stay empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlFailure {
    pub index: usize,
    pub url: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub fresh: usize,
    pub cached: usize,
    pub enriched: usize,
    pub failures: Vec<CrawlFailure>,
}

pub struct ListingCrawler<'a> {
    fetcher: &'a mut PageFetcher,
    extractor: &'a EssentialsExtractor,
    min_delay: Duration,
    quiet: bool,
}

impl<'a> ListingCrawler<'a> {
    pub fn new(
        fetcher: &'a mut PageFetcher,
        extractor: &'a EssentialsExtractor,
        min_delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            min_delay,
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Enrich every record in place, in order.
    ///
    /// Sleeps `min_delay` after each page that came from the network; cached
    /// pages are replayed without pause.
    pub fn run(&mut self, records: &mut [AuctionRecord]) -> CrawlReport {
        let mut report = CrawlReport::default();
        let total = records.len();

        for index in 0..total {
            let url = records[index].url.clone();
            let result = self.fetcher.resolve(&url);
            let fresh = result.is_fresh();

            let source = match &result {
                FetchResult::Fresh(_) => {
                    report.fresh += 1;
                    "downloaded"
                }
                FetchResult::CachedHit(_) => {
                    report.cached += 1;
                    "cached"
                }
                _ => "failed",
            };

            let outcome = match result {
                FetchResult::Fresh(body) | FetchResult::CachedHit(body) => {
                    let html = String::from_utf8_lossy(&body);
                    self.extractor
                        .extract(&html, &records[index])
                        .map_err(FailureReason::from)
                }
                FetchResult::Failed(failure) => Err(FailureReason::Fetch(failure)),
                // resolve() never hands back a bare redirect
                FetchResult::Redirect(location) => {
                    Err(FailureReason::Fetch(FetchFailure::BadRedirect(location)))
                }
            };

            match outcome {
                Ok(essentials) => {
                    records[index].merge_essentials(essentials);
                    report.enriched += 1;
                    if !self.quiet {
                        println!(
                            "[{:02}/{:02}] {} ({})",
                            index + 1,
                            total,
                            osc8_link(&url, &records[index].title),
                            source
                        );
                    }
                }
                Err(reason) => {
                    tracing::warn!("skipping enrichment for {}: {}", url, reason);
                    if !self.quiet {
                        println!(
                            "[{:02}/{:02}] {} ({}: {})",
                            index + 1,
                            total,
                            osc8_link(&url, &records[index].title),
                            source,
                            reason
                        );
                    }
                    report.failures.push(CrawlFailure { index, url, reason });
                }
            }

            if fresh {
                self.fetcher.pause(self.min_delay);
            }
        }

        tracing::info!(
            "crawl finished: {} enriched, {} downloaded, {} cached, {} failed",
            report.enriched,
            report.fresh,
            report.cached,
            report.failures.len()
        );
        report
    }
}
