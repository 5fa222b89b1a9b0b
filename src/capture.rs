use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::models::CaptureKind;
use crate::settings::LinkCaptureSettings;

pub const VIEWPORT: (u32, u32) = (1280, 1024);
pub const SETTLE_WAIT: Duration = Duration::from_millis(1500);
pub const MIN_SNAPSHOT_BYTES: usize = 500;

// ---------------------------------------------------------------------------
// Engine seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub nav_timeout: Duration,
}

/// A running browser. Opens one isolated page per capture.
pub trait RenderEngine {
    fn open_page(&mut self, opts: &PageOptions) -> anyhow::Result<Box<dyn RenderPage>>;
    fn shutdown(&mut self);
}

pub trait RenderPage {
    fn navigate(&mut self, url: &str) -> anyhow::Result<()>;
    fn settle(&mut self, wait: Duration) {
        std::thread::sleep(wait);
    }
    fn pdf(&mut self) -> anyhow::Result<Vec<u8>>;
    fn screenshot_png(&mut self) -> anyhow::Result<Vec<u8>>;
    fn content(&mut self) -> anyhow::Result<String>;
    fn close(&mut self);
}

pub type EngineLauncher = Box<dyn FnMut() -> anyhow::Result<Box<dyn RenderEngine>>>;

/// Closes the page on every exit path out of `capture`.
struct PageGuard(Box<dyn RenderPage>);

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub kind: CaptureKind,
    pub local_path: PathBuf,
    pub filename: String,
    pub mime_type: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub source_url: String,
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub headless: bool,
    pub user_agent: String,
    pub nav_timeout: Duration,
    pub settle: Duration,
    pub blocklist: Vec<String>,
}

impl From<&LinkCaptureSettings> for CaptureOptions {
    fn from(s: &LinkCaptureSettings) -> Self {
        Self {
            headless: s.headless,
            user_agent: s.user_agent.clone(),
            nav_timeout: Duration::from_millis(s.nav_timeout_ms),
            settle: SETTLE_WAIT,
            blocklist: s.blocklist.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LinkCapturer
// ---------------------------------------------------------------------------

pub struct LinkCapturer {
    opts: CaptureOptions,
    launcher: EngineLauncher,
    engine: Option<Box<dyn RenderEngine>>,
}

impl LinkCapturer {
    pub fn new(opts: CaptureOptions, launcher: EngineLauncher) -> Self {
        Self { opts, launcher, engine: None }
    }

    /// Capturer backed by headless Chrome when the `capture` feature is on.
    pub fn from_settings(settings: &LinkCaptureSettings) -> Self {
        let opts = CaptureOptions::from(settings);
        #[cfg(feature = "capture")]
        let launcher: EngineLauncher = {
            let headless = settings.headless;
            Box::new(move || Ok(Box::new(chrome::ChromeEngine::launch(headless)?) as Box<dyn RenderEngine>))
        };
        #[cfg(not(feature = "capture"))]
        let launcher: EngineLauncher =
            Box::new(|| -> anyhow::Result<Box<dyn RenderEngine>> { anyhow::bail!("built without the `capture` feature") });
        Self::new(opts, launcher)
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Launch the engine if it is not running. A launch failure is logged
    /// and leaves the capturer uninitialised.
    pub fn init(&mut self) {
        if self.engine.is_some() {
            return;
        }
        info!("launching headless browser");
        match (self.launcher)() {
            Ok(engine) => self.engine = Some(engine),
            Err(e) => warn!(error = %e, "failed to launch headless browser"),
        }
    }

    pub fn close(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default();
        self.opts.blocklist.iter().any(|d| !d.is_empty() && host.contains(&d.to_ascii_lowercase()))
    }

    pub fn capture(&mut self, url: &str, out_dir: &Path, base: &str) -> Option<CaptureRecord> {
        if self.is_blocked(url) {
            info!(url, "skipping blocklisted domain");
            return None;
        }
        let opts = self.opts.clone();
        let engine = self.engine.as_mut()?;

        let page_opts = PageOptions {
            user_agent: opts.user_agent.clone(),
            viewport: VIEWPORT,
            nav_timeout: opts.nav_timeout,
        };
        let mut page = match engine.open_page(&page_opts) {
            Ok(p) => PageGuard(p),
            Err(e) => {
                warn!(url, error = %e, "could not open capture page");
                return None;
            }
        };

        match render(page.0.as_mut(), &opts, url, out_dir, base) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(url, error = %e, "link capture failed");
                salvage_html(page.0.as_mut(), url, out_dir, base)
            }
        }
    }
}

impl Drop for LinkCapturer {
    fn drop(&mut self) {
        self.close();
    }
}

fn render(
    page: &mut dyn RenderPage,
    opts: &CaptureOptions,
    url: &str,
    out_dir: &Path,
    base: &str,
) -> anyhow::Result<CaptureRecord> {
    debug!(url, "navigating");
    page.navigate(url)?;
    page.settle(opts.settle);
    std::fs::create_dir_all(out_dir)?;

    if opts.headless {
        match page.pdf() {
            Ok(bytes) => return write_record(CaptureKind::LinkPdf, &bytes, url, out_dir, base),
            Err(e) => debug!(url, error = %e, "pdf capture failed, falling back to screenshot"),
        }
    }
    let png = page.screenshot_png()?;
    write_record(CaptureKind::LinkScreenshot, &png, url, out_dir, base)
}

fn salvage_html(page: &mut dyn RenderPage, url: &str, out_dir: &Path, base: &str) -> Option<CaptureRecord> {
    let content = page.content().ok()?;
    if content.len() <= MIN_SNAPSHOT_BYTES {
        return None;
    }
    std::fs::create_dir_all(out_dir).ok()?;
    match write_record(CaptureKind::LinkHtmlSnapshot, content.as_bytes(), url, out_dir, base) {
        Ok(record) => {
            info!(url, "saved html snapshot fallback");
            Some(record)
        }
        Err(e) => {
            warn!(url, error = %e, "html snapshot write failed");
            None
        }
    }
}

fn write_record(kind: CaptureKind, bytes: &[u8], url: &str, out_dir: &Path, base: &str) -> anyhow::Result<CaptureRecord> {
    let (ext, mime) = match kind {
        CaptureKind::LinkPdf => ("pdf", "application/pdf"),
        CaptureKind::LinkScreenshot => ("png", "image/png"),
        CaptureKind::LinkHtmlSnapshot => ("html", "text/html"),
    };
    let filename = format!("{base}.{ext}");
    let local_path = out_dir.join(&filename);
    std::fs::write(&local_path, bytes)?;
    Ok(CaptureRecord {
        kind,
        local_path,
        filename,
        mime_type: mime.to_string(),
        sha256: hex::encode(Sha256::digest(bytes)),
        size_bytes: bytes.len() as u64,
        source_url: url.to_string(),
    })
}

// ---------------------------------------------------------------------------
// headless_chrome engine
// ---------------------------------------------------------------------------

#[cfg(feature = "capture")]
mod chrome {
    use std::sync::Arc;

    use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
    use headless_chrome::{Browser, LaunchOptions, Tab};

    use super::{PageOptions, RenderEngine, RenderPage, VIEWPORT};

    pub struct ChromeEngine {
        browser: Option<Browser>,
    }

    impl ChromeEngine {
        pub fn launch(headless: bool) -> anyhow::Result<Self> {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .sandbox(false)
                .window_size(Some(VIEWPORT))
                .build()
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(Self {
                browser: Some(Browser::new(options)?),
            })
        }
    }

    impl RenderEngine for ChromeEngine {
        fn open_page(&mut self, opts: &PageOptions) -> anyhow::Result<Box<dyn RenderPage>> {
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("browser already shut down"))?;
            let tab = browser.new_context()?.new_tab()?;
            tab.set_user_agent(&opts.user_agent, None, None)?;
            tab.set_default_timeout(opts.nav_timeout);
            Ok(Box::new(ChromePage { tab }))
        }

        fn shutdown(&mut self) {
            // Dropping the Browser terminates the child process.
            self.browser = None;
        }
    }

    struct ChromePage {
        tab: Arc<Tab>,
    }

    impl RenderPage for ChromePage {
        fn navigate(&mut self, url: &str) -> anyhow::Result<()> {
            self.tab.navigate_to(url)?.wait_until_navigated()?;
            Ok(())
        }

        fn pdf(&mut self) -> anyhow::Result<Vec<u8>> {
            self.tab.print_to_pdf(None)
        }

        fn screenshot_png(&mut self) -> anyhow::Result<Vec<u8>> {
            self.tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        }

        fn content(&mut self) -> anyhow::Result<String> {
            self.tab.get_content()
        }

        fn close(&mut self) {
            let _ = self.tab.close(false);
        }
    }
}

// ---------------------------------------------------------------------------
// Test engine
// ---------------------------------------------------------------------------
