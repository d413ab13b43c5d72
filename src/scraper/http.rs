use std::sync::Mutex;

use log::{debug, info};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS, USER_AGENT};

use crate::scraper::fetcher::{BrowserEngine, EnginePage, FetchError, FingerprintProfile};
use crate::utils::config::FetcherConfig;

/// Fetches raw HTML without a browser. No JavaScript runs, so JS challenges
/// never clear; the fetcher still detects them and times out cleanly.
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.navigation_timeout())
            .build()
            .map_err(|e| FetchError::Init(e.to_string()))?;

        info!("using plain HTTP fetch engine");

        Ok(Self { client })
    }
}

fn browser_headers(profile: &FingerprintProfile) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Ok(value) = HeaderValue::from_str(&profile.user_agent) {
        headers.insert(USER_AGENT, value);
    }
    if let Ok(value) = HeaderValue::from_str(&profile.accept_language) {
        headers.insert(ACCEPT_LANGUAGE, value);
    }
    headers
}

impl BrowserEngine for HttpEngine {
    type Page = HttpPage;

    async fn open(&self, profile: &FingerprintProfile) -> Result<HttpPage, FetchError> {
        Ok(HttpPage {
            client: self.client.clone(),
            headers: browser_headers(profile),
            state: Mutex::new(PageState::default()),
        })
    }

    async fn shutdown(self) {}
}

#[derive(Default)]
struct PageState {
    url: Option<String>,
    /// Body of the last navigation, handed out once by `content()`.
    body: Option<String>,
}

pub struct HttpPage {
    client: reqwest::Client,
    headers: HeaderMap,
    state: Mutex<PageState>,
}

impl HttpPage {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::Navigation(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Navigation(format!("{url} returned {status}")));
        }
        debug!("{} returned {}", url, status);

        // 403/429 bodies are usually the challenge page itself, so keep them
        response
            .text()
            .await
            .map_err(|e| FetchError::Navigation(e.to_string()))
    }
}

impl EnginePage for HttpPage {
    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        let body = self.get(url).await?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| FetchError::Navigation("page state poisoned".to_string()))?;
        state.url = Some(url.to_string());
        state.body = Some(body);
        Ok(())
    }

    async fn scroll_by(&self, _dy: i32) -> Result<(), FetchError> {
        Ok(())
    }

    /// The first read returns the navigation response; later reads re-request
    /// the page, which is what polling a challenge means without a browser.
    async fn content(&self) -> Result<String, FetchError> {
        let url = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| FetchError::Navigation("page state poisoned".to_string()))?;
            if let Some(body) = state.body.take() {
                return Ok(body);
            }
            state
                .url
                .clone()
                .ok_or_else(|| FetchError::Navigation("content read before navigation".to_string()))?
        };
        self.get(&url).await
    }

    async fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::ConfigInner;

    #[test]
    fn headers_carry_profile_identity() {
        let profile = FingerprintProfile::pick(&ConfigInner::default().fetcher);
        let headers = browser_headers(&profile);

        assert_eq!(
            headers.get(USER_AGENT).unwrap().to_str().unwrap(),
            profile.user_agent
        );
        assert_eq!(
            headers.get(ACCEPT_LANGUAGE).unwrap().to_str().unwrap(),
            "en-IE,en;q=0.9"
        );
    }

    #[tokio::test]
    async fn content_before_navigation_is_an_error() {
        let engine = HttpEngine::new(&ConfigInner::default().fetcher).unwrap();
        let profile = FingerprintProfile::pick(&ConfigInner::default().fetcher);
        let page = engine.open(&profile).await.unwrap();

        assert!(matches!(page.content().await, Err(FetchError::Navigation(_))));
    }
}
