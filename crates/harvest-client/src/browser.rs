//! Chromium-backed [`SessionDriver`] speaking the Chrome DevTools Protocol.
//!
//! One Chromium process is shared by every clone of [`ChromiumDriver`].
//! Each session gets its own browser context, so cookies never leak between
//! sessions, and a background task that forwards JSON responses of
//! XHR/Fetch requests to the registered hooks.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, EnableParams, EventLoadingFinished,
    EventResponseReceived, GetResponseBodyParams, ResourceType, TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use harvest_core::auth::{AuthState, SessionCookie};
use harvest_core::error::AppError;
use harvest_core::traits::{BrowserSession, PageSnapshot, ResponseHook, SessionDriver};
use tokio::task::JoinHandle;

use crate::fetcher::BROWSER_USER_AGENT;

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight)";

/// Launch settings for [`ChromiumDriver`].
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Explicit browser binary; discovered on well-known paths when unset.
    pub chrome_bin: Option<PathBuf>,
    pub user_agent: String,
    pub window_size: (u32, u32),
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_bin: None,
            user_agent: BROWSER_USER_AGENT.to_string(),
            window_size: (1280, 720),
        }
    }
}

impl BrowserOptions {
    /// Read `HARVEST_HEADLESS` and `CHROME_BIN` from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut options = Self::default();
        if let Some(raw) = lookup("HARVEST_HEADLESS") {
            options.headless = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(AppError::ConfigError(format!(
                        "HARVEST_HEADLESS must be a boolean, got '{other}'"
                    )));
                }
            };
        }
        options.chrome_bin = lookup("CHROME_BIN")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Ok(options)
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

/// Shared Chromium process that opens isolated [`ChromiumSession`]s.
#[derive(Clone)]
pub struct ChromiumDriver {
    browser: Arc<Browser>,
    handler: Arc<JoinHandle<()>>,
}

impl ChromiumDriver {
    /// Launch Chromium. Requires a Chrome/Chromium binary on the machine.
    pub async fn launch(options: &BrowserOptions) -> Result<Self, AppError> {
        let (width, height) = options.window_size;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(width, height);
        builder = if options.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };

        if let Some(bin) = options.chrome_bin.clone().or_else(find_chrome_binary) {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg(format!("--user-agent={}", options.user_agent))
            .build()
            .map_err(|e| AppError::BrowserError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser CDP handler error: {e}");
                    break;
                }
            }
        });

        tracing::debug!(headless = options.headless, "Browser launched");
        Ok(Self {
            browser: Arc::new(browser),
            handler: Arc::new(handler),
        })
    }

    /// Close the browser process. Only the last clone actually shuts it down.
    pub async fn shutdown(self) {
        let handler = self.handler;
        if let Ok(mut browser) = Arc::try_unwrap(self.browser) {
            if let Err(e) = browser.close().await {
                tracing::debug!("Browser close failed: {e}");
            }
            let _ = browser.wait().await;
            handler.abort();
        }
    }

    /// Interactive login: open `login_url`, wait for `done`, then save the
    /// session cookies to `state_path`.
    pub async fn login<W>(
        &self,
        login_url: &str,
        state_path: &Path,
        done: W,
    ) -> Result<AuthState, AppError>
    where
        W: Future<Output = ()>,
    {
        let mut session = self.open_session(None).await?;
        let cookies = async {
            session.navigate(login_url).await?;
            done.await;
            session.cookies().await
        }
        .await;
        session.close().await;

        let state = AuthState {
            cookies: cookies?,
            origins: Vec::new(),
        };
        state.save(state_path)?;
        tracing::info!(
            path = %state_path.display(),
            cookies = state.cookies.len(),
            "Login state saved"
        );
        Ok(state)
    }

    async fn dispose_context(&self, context_id: BrowserContextId) {
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            tracing::debug!("Failed to dispose browser context: {e}");
        }
    }
}

impl SessionDriver for ChromiumDriver {
    type Session = ChromiumSession;

    async fn open_session(
        &self,
        auth_state: Option<&AuthState>,
    ) -> Result<ChromiumSession, AppError> {
        let context_id = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to create context: {e}")))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(AppError::BrowserError)?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                self.dispose_context(context_id).await;
                return Err(AppError::BrowserError(format!("Failed to open page: {e}")));
            }
        };

        let streams = match prepare_page(&page, auth_state).await {
            Ok(streams) => streams,
            Err(e) => {
                let _ = page.close().await;
                self.dispose_context(context_id).await;
                return Err(e);
            }
        };

        let hooks: Arc<Mutex<Vec<ResponseHook>>> = Arc::default();
        let (responses, finished) = streams;
        let capture_task = tokio::spawn(forward_json_responses(
            page.clone(),
            responses,
            finished,
            Arc::clone(&hooks),
        ));

        Ok(ChromiumSession {
            page: Some(page),
            context_id: Some(context_id),
            browser: Arc::clone(&self.browser),
            hooks,
            capture_task,
        })
    }
}

type ResponseStreams = (
    EventStream<EventResponseReceived>,
    EventStream<EventLoadingFinished>,
);

/// Enable network events, subscribe to them and apply saved cookies.
async fn prepare_page(
    page: &Page,
    auth_state: Option<&AuthState>,
) -> Result<ResponseStreams, AppError> {
    page.execute(EnableParams::default())
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to enable network events: {e}")))?;

    let responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to subscribe to responses: {e}")))?;
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| AppError::BrowserError(format!("Failed to subscribe to responses: {e}")))?;

    if let Some(state) = auth_state {
        let cookies = state
            .cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        if !cookies.is_empty() {
            let count = cookies.len();
            page.set_cookies(cookies)
                .await
                .map_err(|e| AppError::BrowserError(format!("Failed to apply cookies: {e}")))?;
            tracing::debug!(cookies = count, "Applied saved login state");
        }
    }

    Ok((responses, finished))
}

/// Pair `responseReceived` with `loadingFinished` for XHR/Fetch requests,
/// fetch the body once it is complete and hand parsed JSON to the hooks.
async fn forward_json_responses(
    page: Page,
    mut responses: EventStream<EventResponseReceived>,
    mut finished: EventStream<EventLoadingFinished>,
    hooks: Arc<Mutex<Vec<ResponseHook>>>,
) {
    let mut pending: HashMap<String, String> = HashMap::new();

    loop {
        tokio::select! {
            Some(event) = responses.next() => {
                if matches!(event.r#type, ResourceType::Xhr | ResourceType::Fetch) {
                    pending.insert(event.request_id.inner().clone(), event.response.url.clone());
                }
            }
            Some(event) = finished.next() => {
                let Some(url) = pending.remove(event.request_id.inner()) else {
                    continue;
                };
                let body = match page
                    .execute(GetResponseBodyParams::new(event.request_id.clone()))
                    .await
                {
                    Ok(response) => response.result,
                    Err(e) => {
                        tracing::trace!(%url, "Response body unavailable: {e}");
                        continue;
                    }
                };
                if body.base64_encoded {
                    continue;
                }
                let Ok(payload) = serde_json::from_str::<serde_json::Value>(&body.body) else {
                    continue;
                };

                let current = hooks.lock().unwrap_or_else(PoisonError::into_inner).clone();
                for hook in &current {
                    hook(&url, &payload);
                }
            }
            else => break,
        }
    }
}

/// One page in its own browser context.
///
/// Released by [`BrowserSession::close`]; dropping an unclosed session
/// schedules the same cleanup on the runtime.
pub struct ChromiumSession {
    page: Option<Page>,
    context_id: Option<BrowserContextId>,
    browser: Arc<Browser>,
    hooks: Arc<Mutex<Vec<ResponseHook>>>,
    capture_task: JoinHandle<()>,
}

impl ChromiumSession {
    fn page(&self) -> Result<Page, AppError> {
        self.page
            .clone()
            .ok_or_else(|| AppError::BrowserError("Session already closed".to_string()))
    }

    /// Cookies currently held by the session's context.
    pub async fn cookies(&self) -> Result<Vec<SessionCookie>, AppError> {
        let cookies = self
            .page()?
            .get_cookies()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read cookies: {e}")))?;
        Ok(cookies.iter().map(from_cdp_cookie).collect())
    }
}

impl BrowserSession for ChromiumSession {
    fn on_response(&mut self, hook: ResponseHook) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        let page = self.page()?;
        page.goto(url)
            .await
            .map_err(|e| AppError::NavigationError {
                target: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn scroll_once(&mut self) -> Result<(), AppError> {
        let page = self.page()?;
        page.evaluate(SCROLL_TO_BOTTOM)
            .await
            .map_err(|e| AppError::BrowserError(format!("Scroll failed: {e}")))?;
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, AppError> {
        let page = self.page()?;
        let title = page
            .get_title()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read title: {e}")))?;
        let html = page
            .content()
            .await
            .map_err(|e| AppError::BrowserError(format!("Failed to read content: {e}")))?;
        Ok(PageSnapshot { title, html })
    }

    async fn close(mut self) {
        self.capture_task.abort();
        release(self.page.take(), self.context_id.take(), Arc::clone(&self.browser)).await;
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.capture_task.abort();
        if self.page.is_none() && self.context_id.is_none() {
            return;
        }
        let page = self.page.take();
        let context_id = self.context_id.take();
        let browser = Arc::clone(&self.browser);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(release(page, context_id, browser));
        }
    }
}

async fn release(page: Option<Page>, context_id: Option<BrowserContextId>, browser: Arc<Browser>) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page: {e}");
        }
    }
    if let Some(context_id) = context_id {
        if let Err(e) = browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            tracing::debug!("Failed to dispose browser context: {e}");
        }
    }
}

fn to_cookie_param(cookie: &SessionCookie) -> Result<CookieParam, AppError> {
    let mut param = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only)
        .build()
        .map_err(|e| AppError::BrowserError(format!("Invalid cookie '{}': {e}", cookie.name)))?;
    // Negative expiry marks a session cookie.
    if cookie.expires >= 0.0 {
        param.expires = Some(TimeSinceEpoch::new(cookie.expires));
    }
    param.same_site = cookie.same_site.as_deref().and_then(parse_same_site);
    Ok(param)
}

fn from_cdp_cookie(cookie: &Cookie) -> SessionCookie {
    SessionCookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        expires: cookie.expires,
        http_only: cookie.http_only,
        secure: cookie.secure,
        same_site: cookie.same_site.as_ref().map(|s| same_site_name(s).to_string()),
    }
}

fn parse_same_site(raw: &str) -> Option<CookieSameSite> {
    match raw.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

fn same_site_name(same_site: &CookieSameSite) -> &'static str {
    match same_site {
        CookieSameSite::Strict => "Strict",
        CookieSameSite::Lax => "Lax",
        CookieSameSite::None => "None",
    }
}

/// Locate a real Chrome/Chromium binary.
///
/// Snap-packaged Chromium exposes a wrapper that strips unknown flags, so the
/// binary inside the snap is preferred. Returns `None` to let `chromiumoxide`
/// do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    const CANDIDATES: &[&str] = &[
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ];

    CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists())
}
