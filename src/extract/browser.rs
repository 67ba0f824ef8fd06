//! Browser-interception extraction
//!
//! Renders the page in headless Chromium, watches network responses for media
//! URLs and clicks likely play controls until something shows up. This is a
//! best-effort heuristic: it runs under a hard timeout and reports an explicit
//! failure when nothing was intercepted. The browser is closed on every path.

use super::ExtractedMedia;
use crate::config::ExtractionConfig;
use crate::url::{matches_domain, site_key};
use crate::{HarvestError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Path fragments of pages that never host a single asset
const FAST_FAIL_PATTERNS: &[&str] = &[
    "/tags/",
    "/tag/",
    "/category/",
    "/search/",
    "/page/",
    "/login",
    "/register",
    "/user/",
];

/// Substrings of URLs worth intercepting
const MEDIA_SIGNATURES: &[&str] = &[".mp4", ".m3u8", ".ts", "master.json", "manifest"];

/// Advertising and tracking patterns never taken as media
const EXCLUDED_PATTERNS: &[&str] = &[
    "analytics",
    "pixel",
    "track",
    "ad.",
    "ads.",
    "favicon",
    "dscgirls.live",
    "aucdn.net",
    "tsyndicate",
    "storagexhd",
    "b.b.js",
    "300x250",
    "banner",
    "preview",
    "intro",
    "outros",
];

/// Controls clicked to provoke playback, in order
pub const PLAY_SELECTORS: &[&str] = &[
    "button[aria-label='Play']",
    ".vjs-big-play-button",
    ".jw-display-icon-display",
    ".jw-display-icon-container",
    ".fp-ui",
    ".play-button",
    "#play-button",
    "div[class*='play']",
    "a.thumb-link",
    "video",
    "iframe",
];

/// Fingerprint-masking scripts installed before any page script runs
pub const STEALTH_SCRIPTS: &[&str] = &[
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    r#"
    window.chrome = {
        app: { isInstalled: false },
        runtime: {
            OnInstalledReason: { INSTALL: 'install' },
            PlatformOs: { WIN: 'win' }
        }
    };
    "#,
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3],
        configurable: true
    });
    "#,
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });
    "#,
    r#"
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications' ?
        Promise.resolve({ state: 'denied' }) :
        originalQuery(parameters)
    );
    "#,
];

/// Pause between interaction rounds
const INTERACTION_TICK: Duration = Duration::from_secs(1);

/// True for URLs whose path shows they are listings or account pages
pub fn is_fast_fail(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    FAST_FAIL_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// True for intercepted URLs that look like media and not like ads
pub fn is_media_candidate(url: &str) -> bool {
    let lowered = url.to_ascii_lowercase();
    MEDIA_SIGNATURES.iter().any(|s| lowered.contains(s))
        && !EXCLUDED_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Ranks a candidate; lower is better
///
/// 0: direct file on the page's own site, 1: any MP4, 2: HLS manifest,
/// 3: anything else that passed the filter.
pub fn rank_candidate(candidate: &str, site: &str) -> u8 {
    let Ok(url) = Url::parse(candidate) else {
        return 3;
    };
    let path = url.path().to_ascii_lowercase();

    let same_site = url
        .host_str()
        .map(|host| matches_domain(&format!("*.{}", site), host))
        .unwrap_or(false);

    if same_site && super::is_direct_media(&url) {
        0
    } else if path.ends_with(".mp4") || path.contains(".mp4") {
        1
    } else if path.contains(".m3u8") {
        2
    } else {
        3
    }
}

/// Picks the best candidate; ties keep interception order
pub fn select_best_candidate<'a>(candidates: &'a [String], site: &str) -> Option<&'a String> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(index, c)| (rank_candidate(c, site), *index))
        .map(|(_, c)| c)
}

/// One live browser page with network interception attached
#[async_trait]
pub trait BrowserSession: Send {
    async fn apply_stealth(&mut self) -> Result<()>;

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()>;

    async fn title(&mut self) -> Option<String>;

    /// Clicks every known play control in the page and its frames
    async fn click_play_controls(&mut self);

    /// Response URLs observed since the previous call
    fn drain_intercepted(&mut self) -> Vec<String>;

    async fn close(&mut self);
}

/// Starts browser sessions
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// Browser-interception strategy
pub struct BrowserExtractor {
    launcher: Arc<dyn BrowserLauncher>,
    page_load_timeout: Duration,
    interaction_window: Duration,
    hard_timeout: Duration,
}

impl BrowserExtractor {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: &ExtractionConfig) -> Self {
        Self {
            launcher,
            page_load_timeout: Duration::from_secs(config.page_load_timeout_secs),
            interaction_window: Duration::from_secs(config.interaction_window_secs),
            hard_timeout: Duration::from_secs(config.hard_timeout_secs),
        }
    }

    pub async fn extract(&self, url: &str) -> Result<ExtractedMedia> {
        if is_fast_fail(url) {
            return Err(HarvestError::extraction(
                url,
                "Skipping non-video page: URL matches a listing or account pattern",
            ));
        }

        let site = Url::parse(url)
            .ok()
            .and_then(|u| site_key(&u))
            .ok_or_else(|| HarvestError::extraction(url, "URL has no host"))?;

        tracing::info!("Launching headless browser for {}", url);
        let mut session = self.launcher.launch().await?;

        let outcome =
            tokio::time::timeout(self.hard_timeout, self.drive(session.as_mut(), url, &site))
                .await;

        session.close().await;
        tracing::debug!("Browser closed for {}", url);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(HarvestError::extraction(
                url,
                format!(
                    "Browser extraction timed out after {}s",
                    self.hard_timeout.as_secs()
                ),
            )),
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        site: &str,
    ) -> Result<ExtractedMedia> {
        session.apply_stealth().await?;

        if let Err(e) = session.navigate(url, self.page_load_timeout).await {
            // Players often start loading before navigation settles
            tracing::warn!("Navigation warning for {}: {}", url, e);
        }

        let title = session.title().await.filter(|t| !t.trim().is_empty());

        let mut candidates: Vec<String> = Vec::new();
        let started = Instant::now();
        loop {
            collect_candidates(session, &mut candidates);
            if !candidates.is_empty() {
                tracing::info!(
                    "Media intercepted for {} ({} candidates)",
                    url,
                    candidates.len()
                );
                break;
            }
            if started.elapsed() >= self.interaction_window {
                break;
            }

            session.click_play_controls().await;
            tokio::time::sleep(INTERACTION_TICK).await;
        }

        // Late responses from the last round still count
        collect_candidates(session, &mut candidates);

        let best = select_best_candidate(&candidates, site).ok_or_else(|| {
            HarvestError::extraction(
                url,
                format!(
                    "No video URLs intercepted after {}s interaction",
                    self.interaction_window.as_secs()
                ),
            )
        })?;

        Ok(ExtractedMedia {
            media_url: best.clone(),
            title,
        })
    }
}

fn collect_candidates(session: &mut dyn BrowserSession, candidates: &mut Vec<String>) {
    for url in session.drain_intercepted() {
        if is_media_candidate(&url) && !candidates.contains(&url) {
            tracing::debug!("Intercepted {}", url);
            candidates.push(url);
        }
    }
}

#[cfg(feature = "browser")]
mod chromium {
    use super::{BrowserLauncher, BrowserSession, PLAY_SELECTORS, STEALTH_SCRIPTS};
    use crate::config::ExtractionConfig;
    use crate::{HarvestError, Result};
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::network::{EnableParams, EventResponseReceived};
    use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures_util::StreamExt;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// Launches a fresh Chromium per extraction
    #[derive(Debug, Clone)]
    pub struct ChromiumLauncher {
        headless: bool,
        proxy: Option<String>,
        chrome_args: Vec<String>,
    }

    impl ChromiumLauncher {
        pub fn new(config: &ExtractionConfig, proxy: Option<&str>) -> Self {
            Self {
                headless: config.browser_headless,
                proxy: proxy.map(str::to_string),
                chrome_args: config.chrome_args.clone(),
            }
        }
    }

    fn launch_error(message: impl Into<String>) -> HarvestError {
        HarvestError::extraction("browser", message)
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
            let mut builder = BrowserConfig::builder().window_size(1920, 1080);

            // with_head means NOT headless
            if !self.headless {
                builder = builder.with_head();
            }
            if let Some(ref proxy) = self.proxy {
                builder = builder.arg(format!("--proxy-server={}", proxy));
            }

            builder = builder
                .arg("--autoplay-policy=no-user-gesture-required")
                .arg("--mute-audio")
                .arg("--disable-web-security")
                .arg("--disable-features=IsolateOrigins,site-per-process")
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-sandbox")
                .arg("--disable-gpu");
            for arg in &self.chrome_args {
                builder = builder.arg(arg);
            }

            let config = builder
                .build()
                .map_err(|e| launch_error(format!("Failed to build browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| launch_error(format!("Failed to launch browser: {}", e)))?;

            let handler_task = tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            let mut session = ChromiumSession {
                browser,
                page: None,
                intercepted: None,
                handler_task,
                listener_task: None,
            };

            // The session owns the browser now, so a failed page setup still closes it
            if let Err(e) = session.open_page().await {
                session.close().await;
                return Err(e);
            }

            Ok(Box::new(session))
        }
    }

    struct ChromiumSession {
        browser: Browser,
        page: Option<Page>,
        intercepted: Option<mpsc::UnboundedReceiver<String>>,
        handler_task: JoinHandle<()>,
        listener_task: Option<JoinHandle<()>>,
    }

    impl ChromiumSession {
        async fn open_page(&mut self) -> Result<()> {
            let page = self
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| launch_error(format!("Failed to open page: {}", e)))?;

            if let Err(e) = page.execute(EnableParams::default()).await {
                tracing::warn!("Failed to enable Network domain: {}", e);
            }

            let mut events = page
                .event_listener::<EventResponseReceived>()
                .await
                .map_err(|e| launch_error(format!("Failed to subscribe to responses: {}", e)))?;

            let (tx, rx) = mpsc::unbounded_channel();
            self.listener_task = Some(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if tx.send(event.response.url.clone()).is_err() {
                        break;
                    }
                }
            }));
            self.intercepted = Some(rx);
            self.page = Some(page);
            Ok(())
        }

        fn page(&self) -> Result<&Page> {
            self.page
                .as_ref()
                .ok_or_else(|| launch_error("browser page not open"))
        }
    }

    fn click_script() -> String {
        let selectors = serde_json::to_string(PLAY_SELECTORS).unwrap_or_else(|_| "[]".to_string());
        format!(
            r#"() => {{
                const selectors = {selectors};
                const docs = [document];
                for (const frame of document.querySelectorAll('iframe')) {{
                    try {{ if (frame.contentDocument) docs.push(frame.contentDocument); }} catch (e) {{}}
                }}
                for (const doc of docs) {{
                    for (const sel of selectors) {{
                        const el = doc.querySelector(sel);
                        if (!el) continue;
                        try {{
                            el.dispatchEvent(new MouseEvent('click', {{bubbles: true, cancelable: true, view: window}}));
                            if (el.tagName === 'VIDEO') el.play();
                            if (el.tagName === 'IFRAME') el.click();
                        }} catch (e) {{}}
                    }}
                }}
                return true;
            }}"#
        )
    }

    #[async_trait]
    impl BrowserSession for ChromiumSession {
        async fn apply_stealth(&mut self) -> Result<()> {
            let page = self.page()?;
            for script in STEALTH_SCRIPTS {
                let params = AddScriptToEvaluateOnNewDocumentParams::new(script.to_string());
                if let Err(e) = page.execute(params).await {
                    tracing::debug!("Stealth script injection skipped: {}", e);
                }
            }
            Ok(())
        }

        async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<()> {
            let page = self.page()?;
            match tokio::time::timeout(timeout, page.goto(url)).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(HarvestError::extraction(
                    url,
                    format!("Navigating to page failed: {}", e),
                )),
                Err(_) => Err(HarvestError::extraction(
                    url,
                    format!("Timeout after {}s navigating to page", timeout.as_secs()),
                )),
            }
        }

        async fn title(&mut self) -> Option<String> {
            let page = self.page.as_ref()?;
            page.get_title().await.ok().flatten()
        }

        async fn click_play_controls(&mut self) {
            let Some(page) = self.page.as_ref() else {
                return;
            };
            let script = click_script();
            if let Err(e) =
                tokio::time::timeout(Duration::from_secs(2), page.evaluate_function(script)).await
            {
                tracing::debug!("Play click round timed out: {}", e);
            }
        }

        fn drain_intercepted(&mut self) -> Vec<String> {
            let mut urls = Vec::new();
            if let Some(rx) = self.intercepted.as_mut() {
                while let Ok(url) = rx.try_recv() {
                    urls.push(url);
                }
            }
            urls
        }

        async fn close(&mut self) {
            if let Some(page) = self.page.take() {
                let _ = page.close().await;
            }
            if let Err(e) = self.browser.close().await {
                tracing::warn!("Error closing browser: {}", e);
            }
            let _ = self.browser.wait().await;
            if let Some(task) = self.listener_task.take() {
                task.abort();
            }
            self.handler_task.abort();
        }
    }
}

#[cfg(feature = "browser")]
pub use chromium::ChromiumLauncher;

/// Stand-in when browser support is not compiled in
#[cfg(not(feature = "browser"))]
#[derive(Debug, Clone)]
pub struct ChromiumLauncher;

#[cfg(not(feature = "browser"))]
impl ChromiumLauncher {
    pub fn new(_config: &ExtractionConfig, _proxy: Option<&str>) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        Err(HarvestError::extraction(
            "browser",
            "Browser support not compiled. Rebuild with: cargo build --features browser",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Session that replays scripted interception rounds
    struct ScriptedSession {
        rounds: VecDeque<Vec<String>>,
        title: Option<String>,
        hang_on_navigate: bool,
        clicks: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrowserSession for ScriptedSession {
        async fn apply_stealth(&mut self) -> Result<()> {
            Ok(())
        }

        async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<()> {
            if self.hang_on_navigate {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn title(&mut self) -> Option<String> {
            self.title.clone()
        }

        async fn click_play_controls(&mut self) {
            self.clicks.fetch_add(1, Ordering::SeqCst);
        }

        fn drain_intercepted(&mut self) -> Vec<String> {
            self.rounds.pop_front().unwrap_or_default()
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct ScriptedLauncher {
        rounds: Vec<Vec<String>>,
        hang_on_navigate: bool,
        launches: Arc<AtomicUsize>,
        clicks: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedLauncher {
        fn new(rounds: Vec<Vec<&str>>) -> Self {
            Self {
                rounds: rounds
                    .into_iter()
                    .map(|r| r.into_iter().map(String::from).collect())
                    .collect(),
                hang_on_navigate: false,
                launches: Arc::new(AtomicUsize::new(0)),
                clicks: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for ScriptedLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                rounds: self.rounds.clone().into(),
                title: Some("Clip One".to_string()),
                hang_on_navigate: self.hang_on_navigate,
                clicks: Arc::clone(&self.clicks),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn extractor(launcher: Arc<ScriptedLauncher>, window: u64, hard: u64) -> BrowserExtractor {
        let config = ExtractionConfig {
            interaction_window_secs: window,
            hard_timeout_secs: hard,
            ..ExtractionConfig::default()
        };
        BrowserExtractor::new(launcher, &config)
    }

    #[test]
    fn test_fast_fail_patterns() {
        assert!(is_fast_fail("https://site.test/tag/funny/"));
        assert!(is_fast_fail("https://site.test/Category/new/"));
        assert!(is_fast_fail("https://site.test/login?next=/"));
        assert!(!is_fast_fail("https://site.test/clip-one/"));
    }

    #[test]
    fn test_candidate_filter() {
        assert!(is_media_candidate("https://cdn.site.test/v/clip.mp4"));
        assert!(is_media_candidate("https://cdn.test/hls/master.m3u8?token=1"));
        assert!(!is_media_candidate("https://cdn.test/banner-300x250.mp4"));
        assert!(!is_media_candidate("https://ads.example.test/spot.mp4"));
        assert!(!is_media_candidate("https://cdn.tsyndicate.test/x.mp4"));
        assert!(!is_media_candidate("https://site.test/style.css"));
    }

    #[test]
    fn test_candidate_ranking() {
        let candidates = vec![
            "https://cdn.test/hls/master.m3u8".to_string(),
            "https://other-cdn.test/clip.mp4".to_string(),
            "https://media.site.test/clip.mp4".to_string(),
            "https://cdn.test/manifest".to_string(),
        ];

        assert_eq!(
            select_best_candidate(&candidates, "site.test").unwrap(),
            "https://media.site.test/clip.mp4"
        );
        assert_eq!(
            select_best_candidate(&candidates[..2], "site.test").unwrap(),
            "https://other-cdn.test/clip.mp4"
        );
        assert_eq!(
            select_best_candidate(&[candidates[3].clone(), candidates[0].clone()], "site.test")
                .unwrap(),
            "https://cdn.test/hls/master.m3u8"
        );
        assert!(select_best_candidate(&[], "site.test").is_none());
    }

    #[tokio::test]
    async fn test_fast_fail_skips_launch() {
        let launcher = Arc::new(ScriptedLauncher::new(vec![]));
        let extractor = extractor(Arc::clone(&launcher), 2, 10);

        let err = extractor
            .extract("https://site.test/category/new/")
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Extraction { .. }));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_picks_best_intercepted_candidate() {
        let launcher = Arc::new(ScriptedLauncher::new(vec![
            vec!["https://site.test/app.js"],
            vec![
                "https://cdn.test/hls/master.m3u8",
                "https://ads.test/preview.mp4",
                "https://media.site.test/clip.mp4",
            ],
        ]));
        let extractor = extractor(Arc::clone(&launcher), 5, 10);

        let media = extractor
            .extract("https://site.test/clip-one/")
            .await
            .unwrap();

        assert_eq!(media.media_url, "https://media.site.test/clip.mp4");
        assert_eq!(media.title.as_deref(), Some("Clip One"));
        assert!(launcher.clicks.load(Ordering::SeqCst) >= 1);
        assert!(launcher.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_nothing_intercepted_fails_and_closes() {
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec!["https://site.test/app.js"]]));
        let extractor = extractor(Arc::clone(&launcher), 1, 10);

        let err = extractor
            .extract("https://site.test/clip-one/")
            .await
            .unwrap_err();

        assert!(err
            .to_string()
            .contains("No video URLs intercepted after 1s interaction"));
        assert!(launcher.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hard_timeout_closes_browser() {
        let mut scripted = ScriptedLauncher::new(vec![]);
        scripted.hang_on_navigate = true;
        let launcher = Arc::new(scripted);
        let extractor = extractor(Arc::clone(&launcher), 0, 1);

        let err = extractor
            .extract("https://site.test/clip-one/")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out after 1s"));
        assert!(launcher.closed.load(Ordering::SeqCst));
    }
}
