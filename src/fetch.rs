//! Page fetching with cache lookup, bounded retries and bounded redirects.
//!
//! - Cache hit: returned as `CachedHit` with no network call (unless forced)
//! - 200: `Fresh`, written to the cache
//! - 3xx: `Redirect` to the absolute `Location`; `resolve` follows at most `max_redirects`
//! - 429/5xx and transport errors: retried with exponential backoff
//! - Anything else: `Failed`, never cached

use reqwest::header::LOCATION;
use reqwest::Url;
use std::thread;
use std::time::Duration;

use crate::cache::ContentCache;
use crate::config::Config;
use crate::error::FetchFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Fresh(Vec<u8>),
    CachedHit(Vec<u8>),
    Redirect(String),
    Failed(FetchFailure),
}

impl FetchResult {
    pub fn body(&self) -> Option<&[u8]> {
        match self {
            FetchResult::Fresh(body) | FetchResult::CachedHit(body) => Some(body),
            _ => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, FetchResult::Fresh(_))
    }
}

/// A single HTTP response, before any redirect or cache policy is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

/// One GET request. Implementations must not follow redirects themselves.
pub trait Transport {
    fn get(&self, url: &str) -> Result<RawResponse, FetchFailure>;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Blocking reqwest client with a timeout and redirects disabled.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<RawResponse, FetchFailure> {
        let response = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .send()
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .map_err(|e| FetchFailure::Transport(format!("failed to read response: {}", e)))?
            .to_vec();

        Ok(RawResponse { status, location, body })
    }
}

pub struct PageFetcher {
    transport: Box<dyn Transport>,
    cache: ContentCache,
    sleeper: Box<dyn Sleeper>,
    max_redirects: usize,
    max_retries: u32,
    retry_backoff: Duration,
    force_refresh: bool,
}

impl PageFetcher {
    pub fn new(transport: impl Transport + 'static, cache: ContentCache, config: &Config) -> Self {
        Self {
            transport: Box::new(transport),
            cache,
            sleeper: Box::new(ThreadSleeper),
            max_redirects: config.max_redirects,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
            force_refresh: false,
        }
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Box::new(sleeper);
        self
    }

    /// Skip cache reads. Fetched pages are still written back.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Block for `duration` using the fetcher's sleeper.
    pub fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }

    /// One hop: cache, then network. Redirects are returned, not followed.
    pub fn fetch(&mut self, url: &str) -> FetchResult {
        if !self.force_refresh {
            if let Some(body) = self.cache.get(url) {
                tracing::debug!("cache hit {}", url);
                return FetchResult::CachedHit(body);
            }
        }

        let response = match self.get_with_retry(url) {
            Ok(response) => response,
            Err(failure) => return FetchResult::Failed(failure),
        };

        match response.status {
            200 => {
                tracing::debug!("downloaded {} ({} bytes)", url, response.body.len());
                if let Err(e) = self.cache.put(url, &response.body) {
                    tracing::warn!("{}", e);
                }
                FetchResult::Fresh(response.body)
            }
            300..=399 => match response.location {
                Some(location) => match absolute_location(url, &location) {
                    Some(next) => {
                        tracing::debug!("{} redirected ({}) to {}", url, response.status, next);
                        FetchResult::Redirect(next)
                    }
                    None => FetchResult::Failed(FetchFailure::BadRedirect(location)),
                },
                None => FetchResult::Failed(FetchFailure::Status(response.status)),
            },
            code => FetchResult::Failed(FetchFailure::Status(code)),
        }
    }

    /// Fetch, following redirects up to the configured limit.
    ///
    /// A body reached through redirects is also cached under `url`, so the next
    /// run replays it without touching the network.
    pub fn resolve(&mut self, url: &str) -> FetchResult {
        let mut current = url.to_string();

        for hop in 0..=self.max_redirects {
            match self.fetch(&current) {
                FetchResult::Redirect(next) => current = next,
                done => {
                    if hop > 0 {
                        if let Some(body) = done.body() {
                            if let Err(e) = self.cache.put(url, body) {
                                tracing::warn!("{}", e);
                            }
                        }
                    }
                    return done;
                }
            }
        }

        tracing::warn!("{} exceeded {} redirects", url, self.max_redirects);
        FetchResult::Failed(FetchFailure::RedirectLoop(self.max_redirects))
    }

    fn get_with_retry(&mut self, url: &str) -> Result<RawResponse, FetchFailure> {
        let mut attempt = 0;
        loop {
            let outcome = self.transport.get(url);
            let retryable = match &outcome {
                Ok(response) => response.status == 429 || (500..600).contains(&response.status),
                Err(_) => true,
            };
            if !retryable || attempt >= self.max_retries {
                return outcome;
            }

            let backoff = self
                .retry_backoff
                .saturating_mul(2u32.saturating_pow(attempt));
            match &outcome {
                Ok(response) => tracing::warn!(
                    "{} returned {}, retrying in {:?}",
                    url,
                    response.status,
                    backoff
                ),
                Err(e) => tracing::warn!("{}: {}, retrying in {:?}", url, e, backoff),
            }
            self.sleeper.sleep(backoff);
            attempt += 1;
        }
    }
}

fn absolute_location(base: &str, location: &str) -> Option<String> {
    let resolved = match Url::parse(base) {
        Ok(base) => base.join(location).ok()?,
        Err(_) => Url::parse(location).ok()?,
    };
    Some(resolved.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;

    #[derive(Default)]
    struct Script {
        responses: HashMap<String, VecDeque<Result<RawResponse, FetchFailure>>>,
        requests: Vec<String>,
    }

    /// In-memory transport. Each URL replays its queued responses in order and
    /// then repeats the last one; unknown URLs get a 404.
    #[derive(Clone, Default)]
    pub struct ScriptedTransport {
        script: Rc<RefCell<Script>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn push(&self, url: &str, outcome: Result<RawResponse, FetchFailure>) -> &Self {
            self.script
                .borrow_mut()
                .responses
                .entry(url.to_string())
                .or_default()
                .push_back(outcome);
            self
        }

        pub fn respond(&self, url: &str, status: u16, body: &str) -> &Self {
            self.push(
                url,
                Ok(RawResponse {
                    status,
                    location: None,
                    body: body.as_bytes().to_vec(),
                }),
            )
        }

        pub fn redirect(&self, url: &str, to: &str) -> &Self {
            self.push(
                url,
                Ok(RawResponse {
                    status: 302,
                    location: Some(to.to_string()),
                    body: Vec::new(),
                }),
            )
        }

        pub fn fail(&self, url: &str, message: &str) -> &Self {
            self.push(url, Err(FetchFailure::Transport(message.to_string())))
        }

        pub fn requests(&self) -> Vec<String> {
            self.script.borrow().requests.clone()
        }

        pub fn count(&self, url: &str) -> usize {
            self.script
                .borrow()
                .requests
                .iter()
                .filter(|u| u.as_str() == url)
                .count()
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, url: &str) -> Result<RawResponse, FetchFailure> {
            let mut script = self.script.borrow_mut();
            script.requests.push(url.to_string());
            let queue = match script.responses.get_mut(url) {
                Some(queue) => queue,
                None => {
                    return Ok(RawResponse {
                        status: 404,
                        location: None,
                        body: Vec::new(),
                    })
                }
            };
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }

    #[derive(Clone, Default)]
    pub struct RecordingSleeper {
        slept: Rc<RefCell<Vec<Duration>>>,
    }

    impl RecordingSleeper {
        pub fn slept(&self) -> Vec<Duration> {
            self.slept.borrow().clone()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }
}
