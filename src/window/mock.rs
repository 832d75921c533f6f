//! In-memory window for tests and offline runs.
//!
//! `MockWindow` renders a framebuffer (page url as a header, a crosshair per
//! received click) and records every interaction. A [`MockProbe`] cloned from
//! the window keeps access to that record after the window has been handed to
//! a flow controller.

use async_trait::async_trait;
use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::types::{
    CANVAS_CLASS_ID, ClickOutcome, ClickVia, DomClickOptions, OpenOutcome, WindowError,
    WindowHost, WindowMetrics, WindowResult, ensure_finite,
};
use crate::detector::ClassId;

const BACKGROUND: [u8; 3] = [24, 28, 36];
const HEADER: [u8; 3] = [60, 64, 80];
const TEXT: [u8; 3] = [230, 230, 230];
const MARKER: [u8; 3] = [255, 64, 64];

/// A virtual framebuffer with just enough drawing to tell frames apart
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a framebuffer filled with `color`
    pub fn new(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self {
            width,
            height,
            buffer: vec![0u8; (width * height * 3) as usize],
        };
        fb.fill(color);
        fb
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y.saturating_add(h)).min(self.height) {
            for px in x..(x.saturating_add(w)).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text with 8x8 glyphs; no wrapping
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
            for (row_idx, row) in glyph.iter().enumerate() {
                let py = y + row_idx as u32;
                for bit in 0..8 {
                    // font8x8 stores LSB as leftmost pixel
                    let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                    self.set_pixel(cursor_x + bit, py, color);
                }
            }
            cursor_x += 8;
        }
    }

    /// Crosshair centred on `(x, y)`
    pub fn draw_marker(&mut self, x: u32, y: u32, color: [u8; 3]) {
        const ARM: u32 = 6;
        self.draw_rect(x.saturating_sub(ARM), y, ARM * 2 + 1, 1, color);
        self.draw_rect(x, y.saturating_sub(ARM), 1, ARM * 2 + 1, color);
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    /// Encode as PNG bytes
    pub fn to_png(&self) -> WindowResult<Vec<u8>> {
        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| WindowError::Image("buffer size does not match dimensions".into()))?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }
}

/// One click the mock window received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedClick {
    /// `None` for in-DOM clicks, which carry no class id
    pub class_id: Option<ClassId>,
    pub x: f64,
    pub y: f64,
    pub via: ClickVia,
}

#[derive(Debug)]
struct MockState {
    frame: Framebuffer,
    open: bool,
    urls: Vec<String>,
    clicks: Vec<RecordedClick>,
    captures: usize,
    fail_capture: bool,
    fail_clicks: bool,
    dom_dispatcher: bool,
    device_pixel_ratio: f64,
}

/// Inspection and fault-injection handle for a [`MockWindow`]
#[derive(Debug, Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockProbe {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn clicks(&self) -> Vec<RecordedClick> {
        self.lock().clicks.clone()
    }

    pub fn captures(&self) -> usize {
        self.lock().captures
    }

    pub fn urls(&self) -> Vec<String> {
        self.lock().urls.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Make the next captures fail
    pub fn set_fail_capture(&self, fail: bool) {
        self.lock().fail_capture = fail;
    }

    /// Make the next clicks fail
    pub fn set_fail_clicks(&self, fail: bool) {
        self.lock().fail_clicks = fail;
    }

    /// Simulate the window being closed by the user
    pub fn close_externally(&self) {
        self.lock().open = false;
    }
}

/// Framebuffer-backed [`WindowHost`]
#[derive(Debug)]
pub struct MockWindow {
    state: Arc<Mutex<MockState>>,
    settle_delay: Duration,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                frame: Framebuffer::new(width, height, BACKGROUND),
                open: false,
                urls: Vec::new(),
                clicks: Vec::new(),
                captures: 0,
                fail_capture: false,
                fail_clicks: false,
                dom_dispatcher: true,
                device_pixel_ratio: 1.0,
            })),
            settle_delay: Duration::ZERO,
        }
    }

    /// Wait this long after each click
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Whether the in-page dispatcher "finds" a target
    pub fn dom_dispatcher(self, available: bool) -> Self {
        self.lock().dom_dispatcher = available;
        self
    }

    pub fn device_pixel_ratio(self, dpr: f64) -> Self {
        self.lock().device_pixel_ratio = dpr;
        self
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_click(&self, click: RecordedClick) -> WindowResult<()> {
        ensure_finite(click.x, click.y)?;
        let mut state = self.lock();
        if !state.open {
            return Err(WindowError::NotOpen);
        }
        if state.fail_clicks {
            return Err(WindowError::Input("injected click failure".into()));
        }
        state
            .frame
            .draw_marker(click.x.max(0.0) as u32, click.y.max(0.0) as u32, MARKER);
        state.clicks.push(click);
        Ok(())
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

impl Default for MockWindow {
    fn default() -> Self {
        let cfg = crate::config::get();
        Self::new(cfg.window.width, cfg.window.height)
    }
}

#[async_trait]
impl WindowHost for MockWindow {
    async fn open_or_reuse(&mut self, url: &str) -> WindowResult<OpenOutcome> {
        let mut state = self.lock();
        let reused = state.open;
        state.open = true;
        state.urls.push(url.to_string());

        let width = state.frame.width();
        state.frame.fill(BACKGROUND);
        state.frame.draw_rect(0, 0, width, 16, HEADER);
        state.frame.draw_text(4, 4, url, TEXT, HEADER);
        Ok(OpenOutcome {
            success: true,
            reused,
        })
    }

    async fn is_alive(&mut self) -> bool {
        self.lock().open
    }

    async fn capture_screenshot(&mut self) -> WindowResult<Vec<u8>> {
        let mut state = self.lock();
        if !state.open {
            return Err(WindowError::NotOpen);
        }
        if state.fail_capture {
            return Err(WindowError::Capture("injected capture failure".into()));
        }
        state.captures += 1;
        state.frame.to_png()
    }

    async fn perform_click(
        &mut self,
        class_id: ClassId,
        x: f64,
        y: f64,
    ) -> WindowResult<ClickOutcome> {
        let via = if class_id == CANVAS_CLASS_ID {
            ClickVia::Canvas
        } else {
            ClickVia::LowLevel
        };
        self.record_click(RecordedClick {
            class_id: Some(class_id),
            x,
            y,
            via,
        })?;
        self.settle().await;
        Ok(ClickOutcome::ok(via))
    }

    async fn click_in_dom(
        &mut self,
        x: f64,
        y: f64,
        options: &DomClickOptions,
    ) -> WindowResult<ClickOutcome> {
        let (dispatcher, dpr) = {
            let state = self.lock();
            (state.dom_dispatcher, state.device_pixel_ratio)
        };
        let via = if dispatcher {
            ClickVia::InDom
        } else {
            ClickVia::FallbackLowLevel
        };
        // The dispatcher works in CSS pixels; the fallback in raw pixels.
        let (cx, cy) = if dispatcher { (x / dpr, y / dpr) } else { (x, y) };
        self.record_click(RecordedClick {
            class_id: None,
            x: cx,
            y: cy,
            via,
        })?;
        if !dispatcher {
            self.settle().await;
        }
        Ok(ClickOutcome {
            success: true,
            via,
            detail: Some(serde_json::json!({ "maxRetries": options.max_retries })),
        })
    }

    async fn window_metrics(&mut self) -> WindowResult<WindowMetrics> {
        let state = self.lock();
        if !state.open {
            return Err(WindowError::NotOpen);
        }
        Ok(WindowMetrics {
            width: state.frame.width(),
            height: state.frame.height(),
            zoom_factor: 1.0,
            device_pixel_ratio: state.device_pixel_ratio,
        })
    }

    async fn close(&mut self) -> WindowResult<()> {
        self.lock().open = false;
        Ok(())
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}
