use std::sync::Mutex;
use std::time::{Duration, Instant};

use backon::{ConstantBuilder, ExponentialBuilder, Retryable};
use log::{debug, info, trace, warn};
use rand::Rng;
use rand::seq::IndexedRandom;
use thiserror::Error;

use crate::utils::config::FetcherConfig;
use crate::utils::delay::{jitter, sleep_jittered};

#[derive(Debug, Error)]
pub enum FetchError {
    /// The interstitial was still up when the wait ceiling ran out. Carries the
    /// last content seen so it can be dumped.
    #[error("challenge did not clear within {waited:?}")]
    ChallengeTimeout { waited: Duration, content: String },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("fetch engine failed to start: {0}")]
    Init(String),
}

impl FetchError {
    /// Only a dead engine stops the run; everything else is per record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Init(_))
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            FetchError::ChallengeTimeout { content, .. } => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub content: String,
    pub challenge_encountered: bool,
}

/// Anything that can turn a URL into rendered page content.
pub trait PageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// Per-request browser identity. Built fresh for every page from the
/// immutable fetcher config, never stored globally.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintProfile {
    pub stealth: bool,
    pub user_agent: String,
    pub accept_language: String,
    pub locale: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub viewport: (u32, u32),
}

impl FingerprintProfile {
    pub fn pick(config: &FetcherConfig) -> Self {
        let user_agent = config
            .user_agents
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_default();

        Self {
            stealth: config.stealth,
            user_agent,
            accept_language: config.accept_language.clone(),
            locale: config.locale.clone(),
            timezone: config.timezone.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            viewport: (config.viewport_width, config.viewport_height),
        }
    }

    /// Languages for `navigator.languages`, taken from the Accept-Language list.
    pub fn languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self
            .accept_language
            .split(',')
            .filter_map(|part| part.split(';').next())
            .map(|lang| lang.trim().to_string())
            .filter(|lang| !lang.is_empty())
            .collect();
        if langs.is_empty() {
            langs.push(self.locale.clone());
        }
        langs
    }
}

/// A browser-like client that can open pages.
pub trait BrowserEngine {
    type Page: EnginePage;

    async fn open(&self, profile: &FingerprintProfile) -> Result<Self::Page, FetchError>;

    async fn shutdown(self);
}

pub trait EnginePage {
    async fn navigate(&self, url: &str) -> Result<(), FetchError>;

    async fn scroll_by(&self, dy: i32) -> Result<(), FetchError>;

    async fn content(&self) -> Result<String, FetchError>;

    async fn close(self);
}

/// Case-insensitive marker matching for bot interstitials.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    markers: Vec<String>,
    ready_markers: Vec<String>,
}

impl ChallengeDetector {
    pub fn new(markers: &[String], ready_markers: &[String]) -> Self {
        let lower = |v: &[String]| {
            v.iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };
        Self {
            markers: lower(markers),
            ready_markers: lower(ready_markers),
        }
    }

    /// A page is a challenge when it shows a challenge marker and none of the
    /// markers that only appear on the real page.
    pub fn is_challenge(&self, html: &str) -> bool {
        let html = html.to_lowercase();
        if self.ready_markers.iter().any(|m| html.contains(m.as_str())) {
            return false;
        }
        self.markers.iter().any(|m| html.contains(m.as_str()))
    }
}

pub struct Fetcher<E> {
    engine: E,
    config: FetcherConfig,
    detector: ChallengeDetector,
}

impl<E: BrowserEngine> Fetcher<E> {
    pub fn new(engine: E, config: FetcherConfig) -> Self {
        let detector = ChallengeDetector::new(&config.challenge_markers, &config.ready_markers);
        Self {
            engine,
            config,
            detector,
        }
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }

    async fn navigate(&self, page: &E::Page, url: &str) -> Result<(), FetchError> {
        let timeout = self.config.navigation_timeout();
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_secs_f64(self.config.navigation_backoff_secs))
            .with_max_times(self.config.navigation_retries)
            .with_jitter();

        (|| async {
            tokio::time::timeout(timeout, page.navigate(url))
                .await
                .map_err(|_| FetchError::Navigation(format!("timed out after {timeout:?}")))?
        })
        .retry(backoff)
        .when(|e| matches!(e, FetchError::Navigation(_)))
        .notify(|e, dur| warn!("{} ({}), retrying in {:.1?}", url, e, dur))
        .await
    }

    /// Scrolls down in uneven steps and back up a little, which is enough to
    /// trigger lazy-loaded sections. Scroll failures are not worth failing
    /// the record over.
    async fn scroll(&self, page: &E::Page) {
        let pause = self.config.scroll_pause();
        for _ in 0..self.config.scroll_steps {
            let dy = rand::rng().random_range(250..=450);
            if let Err(e) = page.scroll_by(dy).await {
                debug!("scroll failed: {}", e);
                return;
            }
            tokio::time::sleep(jitter(pause / 2, pause + pause / 2)).await;
        }
        if self.config.scroll_steps > 0 {
            if let Err(e) = page.scroll_by(-200).await {
                debug!("scroll back failed: {}", e);
            }
        }
    }

    /// Polls until the challenge clears or the ceiling is reached. The
    /// ceiling bounds wall-clock time, including slow content reads.
    async fn wait_out_challenge(
        &self,
        page: &E::Page,
        url: &str,
        challenge: String,
    ) -> Result<String, FetchError> {
        let ceiling = self.config.challenge_wait_ceiling();
        let interval = self.config.challenge_poll_interval();
        let polls = (ceiling.as_secs_f64() / interval.as_secs_f64()).floor() as usize;

        warn!(
            "challenge detected on {}, waiting up to {:?}",
            url, ceiling
        );

        let started = Instant::now();
        let last_seen = Mutex::new(challenge);
        let polling = (|| async {
            let html = page.content().await?;
            if !self.detector.is_challenge(&html) {
                return Ok(html);
            }
            if let Ok(mut last) = last_seen.lock() {
                *last = html;
            }
            Err(FetchError::ChallengeTimeout {
                waited: started.elapsed(),
                content: String::new(),
            })
        })
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(polls),
        )
        .when(|e| matches!(e, FetchError::ChallengeTimeout { .. }))
        .notify(|_, _| trace!("still challenged after {:.1?}", started.elapsed()));

        let result = tokio::time::timeout(ceiling, polling)
            .await
            .unwrap_or(Err(FetchError::ChallengeTimeout {
                waited: ceiling,
                content: String::new(),
            }));

        match result {
            Ok(html) => {
                info!("challenge passed after {:.1?}", started.elapsed());
                Ok(html)
            }
            Err(FetchError::ChallengeTimeout { .. }) => Err(FetchError::ChallengeTimeout {
                waited: started.elapsed(),
                content: last_seen
                    .into_inner()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            }),
            Err(e) => Err(e),
        }
    }

    async fn drive(&self, page: &E::Page, url: &str) -> Result<FetchedPage, FetchError> {
        self.navigate(page, url).await?;

        let (min, max) = self.config.settle_bounds();
        sleep_jittered(min, max).await;
        self.scroll(page).await;

        let timeout = self.config.navigation_timeout();
        let content = tokio::time::timeout(timeout, page.content())
            .await
            .map_err(|_| FetchError::Navigation(format!("reading content timed out after {timeout:?}")))??;
        if !self.detector.is_challenge(&content) {
            return Ok(FetchedPage {
                url: url.to_string(),
                content,
                challenge_encountered: false,
            });
        }

        let content = self.wait_out_challenge(page, url, content).await?;
        Ok(FetchedPage {
            url: url.to_string(),
            content,
            challenge_encountered: true,
        })
    }
}

impl<E: BrowserEngine> PageFetcher for Fetcher<E> {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let profile = FingerprintProfile::pick(&self.config);
        debug!("opening page for {} as {:?}", url, profile.user_agent);

        let page = self.engine.open(&profile).await?;
        let result = self.drive(&page, url).await;
        page.close().await;

        result
    }
}
