use crate::errors::ScrapeError;
use async_trait::async_trait;
use fantoccini::wd::{Capabilities, WindowHandle};
use fantoccini::{Client, ClientBuilder, Locator};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a strategy finds candidate elements on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    XPath(String),
    Css(String),
    /// Any element whose own text contains the given fragment.
    Text(String),
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError>;
    /// Inner text of every element matching `selector`, in document order.
    async fn texts(&self, selector: &Selector) -> Result<Vec<String>, ScrapeError>;
    async fn close(&self) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, ScrapeError>;
    async fn shutdown(&self) -> Result<(), ScrapeError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Browser>, ScrapeError>;
}

/// Owns an open page and closes it on every exit path. `release` closes it
/// inline; dropping an unreleased guard (e.g. on timeout) closes it in the
/// background.
pub struct PageGuard {
    page: Arc<dyn BrowserPage>,
    closed: bool,
}

impl PageGuard {
    pub fn new(page: Box<dyn BrowserPage>) -> Self {
        Self {
            page: Arc::from(page),
            closed: false,
        }
    }

    pub fn page(&self) -> &dyn BrowserPage {
        self.page.as_ref()
    }

    pub async fn release(mut self) {
        self.closed = true;
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {}", e);
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = Arc::clone(&self.page);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!("Failed to close abandoned page: {}", e);
                }
            });
        }
    }
}

/// Lazily launched browser shared by all scrape attempts.
pub struct BrowserSession {
    launcher: Arc<dyn BrowserLauncher>,
    browser: Mutex<Option<Arc<dyn Browser>>>,
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            browser: Mutex::new(None),
        }
    }

    async fn browser(&self) -> Result<Arc<dyn Browser>, ScrapeError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }
        let browser = self.launcher.launch().await?;
        info!("Browser initialized successfully");
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    pub async fn open_page(&self) -> Result<PageGuard, ScrapeError> {
        let browser = self.browser().await?;
        Ok(PageGuard::new(browser.new_page().await?))
    }

    #[cfg(test)]
    pub async fn is_running(&self) -> bool {
        self.browser.lock().await.is_some()
    }

    /// Closes the browser if one is running. The next `open_page` relaunches.
    pub async fn teardown(&self) {
        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            match browser.shutdown().await {
                Ok(()) => info!("Browser closed"),
                Err(e) => warn!("Error during browser cleanup: {}", e),
            }
        }
    }
}

/// Launches headless Chrome sessions through a WebDriver server.
pub struct WebDriverLauncher {
    webdriver_url: String,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: &str) -> Self {
        Self {
            webdriver_url: webdriver_url.to_string(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn Browser>, ScrapeError> {
        let mut caps = Capabilities::new();
        caps.insert(
            "goog:chromeOptions".to_string(),
            json!({
                "args": [
                    "--headless=new",
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                    "--window-size=1280,720",
                    "--user-agent=Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                ]
            }),
        );
        caps.insert("acceptInsecureCerts".to_string(), json!(true));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to start session: {}", e)))?;
        Ok(Arc::new(WebDriverBrowser { client }))
    }
}

struct WebDriverBrowser {
    client: Client,
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, ScrapeError> {
        let window = self
            .client
            .new_window(true)
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;
        Ok(Box::new(WebDriverPage {
            client: self.client.clone(),
            handle: window.handle,
        }))
    }

    async fn shutdown(&self) -> Result<(), ScrapeError> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))
    }
}

struct WebDriverPage {
    client: Client,
    handle: WindowHandle,
}

impl WebDriverPage {
    async fn focus(&self) -> Result<(), ScrapeError> {
        self.client
            .switch_to_window(self.handle.clone())
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.focus().await?;
        self.client
            .goto(url)
            .await
            .map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn texts(&self, selector: &Selector) -> Result<Vec<String>, ScrapeError> {
        self.focus().await?;
        let text_xpath;
        let locator = match selector {
            Selector::XPath(xpath) => Locator::XPath(xpath),
            Selector::Css(css) => Locator::Css(css),
            Selector::Text(fragment) => {
                text_xpath = format!("//*[contains(text(), '{}')]", fragment);
                Locator::XPath(&text_xpath)
            }
        };
        let elements = self
            .client
            .find_all(locator)
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            match element.text().await {
                Ok(text) => texts.push(text),
                Err(e) => warn!("Skipping unreadable element: {}", e),
            }
        }
        Ok(texts)
    }

    async fn close(&self) -> Result<(), ScrapeError> {
        self.focus().await?;
        self.client
            .close_window()
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Per-URL page content: selector -> element texts.
    pub type PageContent = HashMap<Selector, Vec<String>>;

    #[derive(Default)]
    pub struct FakeWeb {
        pub pages: SyncMutex<HashMap<String, PageContent>>,
        /// Navigation to these URLs fails this many more times.
        pub nav_failures: SyncMutex<HashMap<String, usize>>,
        pub launches: AtomicUsize,
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub shutdowns: AtomicUsize,
        pub navigations: AtomicUsize,
    }

    impl FakeWeb {
        pub fn set_page(&self, url: &str, content: Vec<(Selector, &str)>) {
            let mut page = PageContent::new();
            for (selector, text) in content {
                page.entry(selector).or_default().push(text.to_string());
            }
            self.pages.lock().insert(url.to_string(), page);
        }

        pub fn fail_navigation(&self, url: &str, times: usize) {
            self.nav_failures.lock().insert(url.to_string(), times);
        }

        pub fn open_pages(&self) -> usize {
            self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
        }
    }

    pub struct FakeLauncher(pub Arc<FakeWeb>);

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Arc<dyn Browser>, ScrapeError> {
            self.0.launches.fetch_add(1, Ordering::SeqCst);
            // yield so concurrent initializers would interleave here
            tokio::task::yield_now().await;
            Ok(Arc::new(FakeBrowser(Arc::clone(&self.0))))
        }
    }

    struct FakeBrowser(Arc<FakeWeb>);

    #[async_trait]
    impl Browser for FakeBrowser {
        async fn new_page(&self) -> Result<Box<dyn BrowserPage>, ScrapeError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePage {
                web: Arc::clone(&self.0),
                url: SyncMutex::new(None),
            }))
        }

        async fn shutdown(&self) -> Result<(), ScrapeError> {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakePage {
        web: Arc<FakeWeb>,
        url: SyncMutex<Option<String>>,
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn goto(&self, url: &str) -> Result<(), ScrapeError> {
            self.web.navigations.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.web.nav_failures.lock();
            if let Some(remaining) = failures.get_mut(url) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScrapeError::Navigation {
                        url: url.to_string(),
                        reason: "net::ERR_TIMED_OUT".to_string(),
                    });
                }
            }
            *self.url.lock() = Some(url.to_string());
            Ok(())
        }

        async fn texts(&self, selector: &Selector) -> Result<Vec<String>, ScrapeError> {
            let url = self.url.lock().clone().unwrap_or_default();
            Ok(self
                .web
                .pages
                .lock()
                .get(&url)
                .and_then(|page| page.get(selector))
                .cloned()
                .unwrap_or_default())
        }

        async fn close(&self) -> Result<(), ScrapeError> {
            self.web.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
