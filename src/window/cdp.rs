//! Chromium window driven over the Chrome DevTools Protocol.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scripts;
use super::types::{
    CANVAS_CLASS_ID, ClickOutcome, ClickVia, DomClickOptions, OpenOutcome, ReadinessStrategy,
    WindowError, WindowHost, WindowMetrics, WindowResult, ensure_finite,
};
use crate::config::{self, WindowSettings};
use crate::detector::ClassId;

/// Pause after a successful in-page dispatch
const DOM_CLICK_SETTLE: Duration = Duration::from_millis(500);

/// Launch options for [`CdpWindow`]
#[derive(Debug, Clone)]
pub struct CdpWindowConfig {
    pub chromium_path: Option<String>,
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Disable the Chromium sandbox (containers/CI)
    pub no_sandbox: bool,
    pub readiness: ReadinessStrategy,
    pub settle_delay: Duration,
}

impl From<&WindowSettings> for CdpWindowConfig {
    fn from(settings: &WindowSettings) -> Self {
        Self {
            chromium_path: settings.chromium_path.clone(),
            headless: settings.headless,
            width: settings.width,
            height: settings.height,
            no_sandbox: false,
            readiness: settings.readiness.clone(),
            settle_delay: settings.settle_delay,
        }
    }
}

impl Default for CdpWindowConfig {
    fn default() -> Self {
        Self::from(&config::get().window)
    }
}

/// Real browser window
pub struct CdpWindow {
    config: CdpWindowConfig,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    /// Ready-event listener registered on the current page
    ready_hook: bool,
}

impl CdpWindow {
    pub fn new(config: CdpWindowConfig) -> Self {
        Self {
            config,
            browser: None,
            handler: None,
            page: None,
            ready_hook: false,
        }
    }

    pub fn config(&self) -> &CdpWindowConfig {
        &self.config
    }

    async fn launch(&mut self) -> WindowResult<()> {
        let mut builder = BrowserConfig::builder().window_size(self.config.width, self.config.height);
        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(ref path) = self.config.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let cdp_config = builder.build().map_err(WindowError::Launch)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| WindowError::Launch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(headless = self.config.headless, "browser launched");
        self.browser = Some(browser);
        self.handler = Some(handle);
        Ok(())
    }

    async fn ensure_page(&mut self) -> WindowResult<&Page> {
        if self.browser.is_none() {
            self.launch().await?;
        }
        if self.page.is_none() {
            let browser = self.browser.as_ref().ok_or(WindowError::NotOpen)?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| WindowError::Launch(e.to_string()))?;
            self.page = Some(page);
        }
        self.page.as_ref().ok_or(WindowError::NotOpen)
    }

    fn page(&self) -> WindowResult<&Page> {
        self.page.as_ref().ok_or(WindowError::NotOpen)
    }

    /// Listen for `event` in every document the page loads from now on
    async fn install_ready_hook(&mut self, event: &str) -> WindowResult<()> {
        if self.ready_hook {
            return Ok(());
        }
        let page = self.page()?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            scripts::ready_event_hook(event),
        ))
        .await
        .map_err(|e| WindowError::Script(e.to_string()))?;
        self.ready_hook = true;
        Ok(())
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, expr: String) -> WindowResult<T> {
        let page = self.page()?;
        let result = page
            .evaluate(expr)
            .await
            .map_err(|e| WindowError::Script(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| WindowError::Script(e.to_string()))
    }

    async fn wait_until_ready(&self) {
        match &self.config.readiness {
            ReadinessStrategy::PollSelector {
                selector,
                timeout,
                interval,
            } => {
                let start = Instant::now();
                let probe = scripts::selector_present(selector);
                loop {
                    match self.eval::<bool>(probe.clone()).await {
                        Ok(true) => {
                            debug!(%selector, elapsed = ?start.elapsed(), "page ready");
                            return;
                        }
                        Ok(false) => {}
                        // Navigation may still be tearing down the old context
                        Err(e) => debug!(error = %e, "readiness probe failed, retrying"),
                    }
                    if start.elapsed() >= *timeout {
                        warn!(%selector, ?timeout, "readiness selector not found, continuing");
                        return;
                    }
                    tokio::time::sleep(*interval).await;
                }
            }
            ReadinessStrategy::ReadyEvent { event, timeout } => {
                let wait = self.eval::<bool>(scripts::ready_event(event));
                match tokio::time::timeout(*timeout, wait).await {
                    Ok(Ok(_)) => debug!(%event, "page signalled ready"),
                    Ok(Err(e)) => warn!(%event, error = %e, "ready event wait failed, continuing"),
                    Err(_) => warn!(%event, ?timeout, "ready event not received, continuing"),
                }
            }
            ReadinessStrategy::FixedDelay(delay) => tokio::time::sleep(*delay).await,
        }
    }

    async fn dispatch_low_level(&self, x: f64, y: f64) -> WindowResult<()> {
        let page = self.page()?;
        let events = [
            DispatchMouseEventType::MouseMoved,
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ];
        for kind in events {
            let is_move = matches!(kind, DispatchMouseEventType::MouseMoved);
            let mut builder = DispatchMouseEventParams::builder().r#type(kind).x(x).y(y);
            if !is_move {
                builder = builder.button(MouseButton::Left).click_count(1);
            }
            let params = builder.build().map_err(WindowError::Input)?;
            page.execute(params)
                .await
                .map_err(|e| WindowError::Input(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl WindowHost for CdpWindow {
    async fn open_or_reuse(&mut self, url: &str) -> WindowResult<OpenOutcome> {
        let reused = self.is_alive().await;
        if !reused {
            // A dead page may still have a live browser behind it
            self.page = None;
            self.ready_hook = false;
        }
        let page = self.ensure_page().await?.clone();

        // The page may fire its ready event before navigation resolves
        if let ReadinessStrategy::ReadyEvent { event, .. } = self.config.readiness.clone() {
            if let Err(e) = self.install_ready_hook(&event).await {
                warn!(%event, error = %e, "failed to install ready event hook");
            }
        }

        if let Err(e) = page.goto(url).await.map(|_| ()) {
            warn!(%url, reused, error = %e, "failed to load test window");
            let _ = self.close().await;
            return Err(WindowError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            });
        }

        self.wait_until_ready().await;
        info!(%url, reused, "test window ready");
        Ok(OpenOutcome {
            success: true,
            reused,
        })
    }

    async fn is_alive(&mut self) -> bool {
        match self.page {
            Some(_) => self.eval::<String>("document.readyState".to_string()).await.is_ok(),
            None => false,
        }
    }

    async fn capture_screenshot(&mut self) -> WindowResult<Vec<u8>> {
        let page = self.page()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        page.screenshot(params)
            .await
            .map_err(|e| WindowError::Capture(e.to_string()))
    }

    async fn perform_click(
        &mut self,
        class_id: ClassId,
        x: f64,
        y: f64,
    ) -> WindowResult<ClickOutcome> {
        ensure_finite(x, y)?;
        let outcome = if class_id == CANVAS_CLASS_ID {
            debug!(x, y, "canvas pointer click");
            match self.eval::<serde_json::Value>(scripts::canvas_click(x, y)).await {
                Ok(report) => {
                    let success = report["success"].as_bool().unwrap_or(false);
                    if !success {
                        warn!(?report, "canvas pointer event simulation failed");
                    }
                    ClickOutcome {
                        success,
                        via: ClickVia::Canvas,
                        detail: Some(report),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "canvas pointer event simulation error");
                    ClickOutcome {
                        success: false,
                        via: ClickVia::Canvas,
                        detail: Some(serde_json::json!({ "error": e.to_string() })),
                    }
                }
            }
        } else {
            debug!(x, y, class_id, "low-level click");
            self.dispatch_low_level(x, y).await?;
            ClickOutcome::ok(ClickVia::LowLevel)
        };

        tokio::time::sleep(self.config.settle_delay).await;
        Ok(outcome)
    }

    async fn click_in_dom(
        &mut self,
        x: f64,
        y: f64,
        options: &DomClickOptions,
    ) -> WindowResult<ClickOutcome> {
        ensure_finite(x, y)?;
        match self
            .eval::<serde_json::Value>(scripts::dom_click(x, y, options))
            .await
        {
            Ok(report) if report["success"].as_bool() == Some(true) => {
                tokio::time::sleep(DOM_CLICK_SETTLE).await;
                Ok(ClickOutcome {
                    success: true,
                    via: ClickVia::InDom,
                    detail: Some(report),
                })
            }
            Ok(report) => {
                warn!(?report, "in-DOM click failed, falling back to low-level");
                self.dispatch_low_level(x, y).await?;
                tokio::time::sleep(self.config.settle_delay).await;
                Ok(ClickOutcome {
                    success: true,
                    via: ClickVia::FallbackLowLevel,
                    detail: Some(report),
                })
            }
            Err(e) => {
                warn!(error = %e, "in-DOM dispatcher error, falling back to low-level");
                self.dispatch_low_level(x, y).await?;
                tokio::time::sleep(self.config.settle_delay).await;
                Ok(ClickOutcome {
                    success: true,
                    via: ClickVia::FallbackOnError,
                    detail: Some(serde_json::json!({ "error": e.to_string() })),
                })
            }
        }
    }

    async fn window_metrics(&mut self) -> WindowResult<WindowMetrics> {
        self.eval(scripts::WINDOW_METRICS.to_string()).await
    }

    async fn close(&mut self) -> WindowResult<()> {
        self.page = None;
        self.ready_hook = false;
        if let Some(mut browser) = self.browser.take() {
            browser
                .close()
                .await
                .map_err(|e| WindowError::Launch(e.to_string()))?;
        }
        if let Some(handle) = self.handler.take() {
            handle.abort();
        }
        Ok(())
    }

    fn source_type(&self) -> &str {
        "cdp"
    }
}
