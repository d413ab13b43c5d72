use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use tokio::task::JoinHandle;

use crate::scraper::fetcher::{BrowserEngine, EnginePage, FetchError, FingerprintProfile};
use crate::utils::config::FetcherConfig;

const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-features=IsolateOrigins,site-per-process",
    "--no-first-run",
    "--no-default-browser-check",
];

/// Builds the script that runs before any page script to hide the usual
/// automation tells.
fn stealth_script(profile: &FingerprintProfile) -> String {
    let languages = serde_json::to_string(&profile.languages()).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"
Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => 8 }});
window.chrome = window.chrome || {{ runtime: {{}} }};
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {{
    window.navigator.permissions.query = (parameters) =>
        parameters.name === 'notifications'
            ? Promise.resolve({{ state: Notification.permission }})
            : originalQuery(parameters);
}}
"#
    )
}

/// One Chromium process for the whole run; every record gets a fresh tab.
pub struct ChromiumEngine {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumEngine {
    pub async fn launch(config: &FetcherConfig) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .args(LAUNCH_ARGS.iter().copied());
        if !config.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(FetchError::Init)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::Init(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    trace!("browser event error: {}", e);
                }
            }
            debug!("browser event handler finished");
        });

        let grant = GrantPermissionsParams::new(vec![PermissionType::Geolocation]);
        if let Err(e) = browser.execute(grant).await {
            warn!("could not grant geolocation permission: {}", e);
        }

        info!(
            "launched chromium ({})",
            if config.headless { "headless" } else { "visible" }
        );

        Ok(Self { browser, handler })
    }
}

async fn apply_profile(page: &Page, profile: &FingerprintProfile) -> Result<(), chromiumoxide::error::CdpError> {
    let mut user_agent = SetUserAgentOverrideParams::new(profile.user_agent.clone());
    user_agent.accept_language = Some(profile.accept_language.clone());
    page.execute(user_agent).await?;

    if !profile.stealth {
        return Ok(());
    }

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(profile)))
        .await?;
    page.execute(SetTimezoneOverrideParams::new(profile.timezone.clone()))
        .await?;
    page.execute(
        SetLocaleOverrideParams::builder()
            .locale(profile.locale.clone())
            .build(),
    )
    .await?;
    page.execute(
        SetGeolocationOverrideParams::builder()
            .latitude(profile.latitude)
            .longitude(profile.longitude)
            .accuracy(100.0)
            .build(),
    )
    .await?;

    Ok(())
}

impl BrowserEngine for ChromiumEngine {
    type Page = ChromiumPage;

    async fn open(&self, profile: &FingerprintProfile) -> Result<ChromiumPage, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Navigation(format!("could not open tab: {e}")))?;

        if let Err(e) = apply_profile(&page, profile).await {
            // A half-configured tab is still usable; the challenge wait decides
            warn!("failed to apply browser profile: {}", e);
        }

        Ok(ChromiumPage { page })
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("browser close failed: {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.browser.wait()).await;
        self.handler.abort();
        debug!("browser shut down");
    }
}

pub struct ChromiumPage {
    page: Page,
}

impl EnginePage for ChromiumPage {
    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| FetchError::Navigation(e.to_string()))
    }

    async fn scroll_by(&self, dy: i32) -> Result<(), FetchError> {
        self.page
            .evaluate(format!("window.scrollBy(0, {dy})"))
            .await
            .map(|_| ())
            .map_err(|e| FetchError::Navigation(e.to_string()))
    }

    async fn content(&self) -> Result<String, FetchError> {
        self.page
            .content()
            .await
            .map_err(|e| FetchError::Navigation(e.to_string()))
    }

    async fn close(self) {
        if let Err(e) = self.page.close().await {
            debug!("failed to close tab: {}", e);
        }
    }
}
