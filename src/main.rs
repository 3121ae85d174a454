use anyhow::{bail, Context, Result};
use clap::{Args, Parser};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cache;
mod chart;
mod config;
mod crawl;
mod dataset;
mod error;
mod essentials;
mod fetch;
mod types;
mod utils;

use cache::ContentCache;
use config::Config;
use crawl::ListingCrawler;
use essentials::EssentialsExtractor;
use fetch::{FetchResult, HttpTransport, PageFetcher};
use types::SortKey;
use utils::{category_from_url, osc8_file_link, osc8_link};

#[derive(Parser)]
#[command(name = "bat-trend")]
#[command(about = "Bring a Trailer auction price trend scraper")]
struct Cli {
    #[command(flatten)]
    source: Source,

    /// Output CSV file (default: ./<category>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Sort by (a)mount, (d)ate or (s)old/not sold
    #[arg(short, long, value_enum, default_value = "a")]
    sort: SortKey,

    /// Only use the results page; skip fetching each listing
    #[arg(long)]
    results_only: bool,

    /// Minimum seconds between listing downloads (raised to the configured floor)
    #[arg(long, value_name = "SECONDS")]
    delay: Option<f64>,

    /// Ignore cached pages and download everything again
    #[arg(long)]
    force: bool,

    /// Page cache directory (default: <temp dir>/bat-trend)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// CONL configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Category on the site or search term, e.g. "porsche"
    #[arg(short = 'f', value_name = "FOLDER")]
    folder: Option<String>,

    /// Full URL of a results page
    #[arg(short = 'u', value_name = "URL")]
    url: Option<String>,
}

/// Results-page URL and the category name used for the default output file.
fn resolve_source(source: &Source, config: &Config) -> Result<(String, String)> {
    match (&source.url, &source.folder) {
        (Some(url), _) => {
            let category = category_from_url(url)
                .with_context(|| format!("Cannot derive a category from URL: {}", url))?;
            Ok((url.clone(), category))
        }
        (None, Some(folder)) => {
            let folder = folder.trim_matches('/');
            if folder.is_empty() {
                bail!("Folder name must not be empty");
            }
            let url = format!("{}/{}/", config.site_root.trim_end_matches('/'), folder);
            let category = folder.rsplit('/').next().unwrap_or(folder).to_string();
            Ok((url, category))
        }
        (None, None) => bail!("Either -f FOLDER or -u URL is required"),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bat_trend=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let (url, category) = resolve_source(&cli.source, &config)?;
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("./{}.csv", category)));
    let cache_root = cli
        .cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("bat-trend"));

    let cache = ContentCache::new(&cache_root);
    let mut fetcher = PageFetcher::new(HttpTransport::new(&config)?, cache, &config)
        .force_refresh(cli.force);

    let body = match fetcher.resolve(&url) {
        FetchResult::Fresh(body) => {
            if !cli.quiet {
                println!("Downloaded {}", osc8_link(&url, &url));
            }
            body
        }
        FetchResult::CachedHit(body) => {
            if !cli.quiet {
                println!(
                    "Reading from cache {} ...",
                    fetcher.cache().path_for(&url).display()
                );
            }
            body
        }
        FetchResult::Failed(failure) => match failure.status_code() {
            Some(code) => bail!("Failed to download stats from {} with code {}", url, code),
            None => bail!("Failed to download stats from {}: {}", url, failure),
        },
        FetchResult::Redirect(location) => bail!("Unfollowed redirect from {} to {}", url, location),
    };

    let html = String::from_utf8_lossy(&body);
    let payload = chart::parse(&html)
        .with_context(|| format!("No listing statistics found on {}", url))?;
    if payload.is_empty() {
        tracing::warn!("results page {} lists no auctions", url);
    }
    let mut records = dataset::merge(payload, config.strict_sold_flag)?;

    if !cli.results_only {
        let extractor = EssentialsExtractor::new(&config);
        let delay = config.effective_delay(cli.delay)?;
        if !cli.quiet {
            println!("Getting listing essentials for {} listings...\n", records.len());
        }
        let report = ListingCrawler::new(&mut fetcher, &extractor, delay)
            .quiet(cli.quiet)
            .run(&mut records);

        if !report.failures.is_empty() {
            eprintln!("\n{} listings without essentials:", report.failures.len());
            for failure in &report.failures {
                eprintln!("  #{} {}: {}", failure.index + 1, failure.url, failure.reason);
            }
        }
    }

    dataset::sort_records(&mut records, cli.sort);
    let rows = dataset::rows(&records);

    let file = File::create(&output)
        .with_context(|| format!("Failed to create output file: {}", output.display()))?;
    dataset::write_csv(BufWriter::new(file), &rows, !cli.results_only)?;

    if !cli.quiet {
        let output = output.to_string_lossy();
        println!("\nDone: {}", osc8_file_link(&output, &output));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "bat-trend", "-f", "porsche", "-s", "d", "--results-only", "--delay", "2.5", "--force",
        ])
        .unwrap();
        assert_eq!(cli.source.folder.as_deref(), Some("porsche"));
        assert_eq!(cli.sort, SortKey::Date);
        assert!(cli.results_only);
        assert!(cli.force);
        assert_eq!(cli.delay, Some(2.5));
    }

    #[test]
    fn test_cli_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["bat-trend"]).is_err());
        assert!(Cli::try_parse_from(["bat-trend", "-f", "porsche", "-u", "https://bringatrailer.com/porsche/"]).is_err());
    }

    #[test]
    fn test_sort_defaults_to_amount() {
        let cli = Cli::try_parse_from(["bat-trend", "-f", "porsche"]).unwrap();
        assert_eq!(cli.sort, SortKey::Amount);
        let cli = Cli::try_parse_from(["bat-trend", "-f", "porsche", "-s", "sold"]).unwrap();
        assert_eq!(cli.sort, SortKey::Sold);
    }

    #[test]
    fn test_resolve_source() {
        let config = Config::default();
        let source = Source {
            folder: Some("porsche".to_string()),
            url: None,
        };
        assert_eq!(
            resolve_source(&source, &config).unwrap(),
            ("https://bringatrailer.com/porsche/".to_string(), "porsche".to_string())
        );

        let source = Source {
            folder: None,
            url: Some("https://bringatrailer.com/bmw/m3/".to_string()),
        };
        assert_eq!(
            resolve_source(&source, &config).unwrap(),
            ("https://bringatrailer.com/bmw/m3/".to_string(), "m3".to_string())
        );
    }
}
