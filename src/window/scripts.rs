//! Page-side scripts evaluated in the controlled window.
//!
//! Every script is built from a fixed template; only numbers and
//! JSON-encoded strings are spliced in.

use super::types::DomClickOptions;

/// Dispatch pointerdown/pointerup/click on the topmost canvas at
/// canvas-relative `(x, y)`.
pub fn canvas_click(x: f64, y: f64) -> String {
    format!(
        r#"(function() {{
    const canvas = document.querySelector('canvas');
    if (!canvas) return {{ success: false, error: 'No canvas found' }};
    const rect = canvas.getBoundingClientRect();
    const clientX = rect.left + {x};
    const clientY = rect.top + {y};
    ['pointerdown', 'pointerup', 'click'].forEach(type => {{
        canvas.dispatchEvent(new PointerEvent(type, {{
            bubbles: true,
            cancelable: true,
            view: window,
            clientX,
            clientY,
            pointerType: 'mouse',
            isPrimary: true
        }}));
    }});
    return {{ success: true }};
}})()"#
    )
}

/// Element-stack click dispatcher.
///
/// Raw pixel coordinates are scaled by `devicePixelRatio`; the topmost
/// element is tried first, then the rest of the stack, retrying up to
/// `max_retries` times before the optional fallback selector.
pub fn dom_click(x: f64, y: f64, options: &DomClickOptions) -> String {
    let fallback = serde_json::to_string(&options.fallback_selector)
        .unwrap_or_else(|_| "null".to_string());
    format!(
        r#"(async () => {{
    const scale = window.devicePixelRatio || 1;
    const clientX = {x} / scale;
    const clientY = {y} / scale;
    const dispatch = (el) => {{
        if (!el) return false;
        ['mousedown', 'mouseup', 'click'].forEach(type => {{
            el.dispatchEvent(new MouseEvent(type, {{
                bubbles: true, cancelable: true, clientX, clientY, view: window, button: 0
            }}));
        }});
        return true;
    }};
    for (let attempt = 1; attempt <= {retries}; attempt++) {{
        const el = document.elementFromPoint(clientX, clientY);
        if (el && dispatch(el)) {{
            return {{ success: true, method: 'direct', tag: el.tagName, attempt }};
        }}
        for (const candidate of document.elementsFromPoint(clientX, clientY)) {{
            if (dispatch(candidate)) {{
                return {{ success: true, method: 'stack', tag: candidate.tagName, attempt }};
            }}
        }}
        await new Promise(r => setTimeout(r, {delay}));
    }}
    const fallbackSelector = {fallback};
    if (fallbackSelector) {{
        const fb = document.querySelector(fallbackSelector);
        if (fb) {{
            try {{
                fb.click();
                return {{ success: true, method: 'fallback-selector', selector: fallbackSelector }};
            }} catch (e) {{
                return {{ success: false, error: 'fallback-selector click threw: ' + e }};
            }}
        }}
    }}
    return {{ success: false, reason: 'no clickable target found after retries' }};
}})()"#,
        retries = options.max_retries.max(1),
        delay = options.retry_delay,
    )
}

/// Whether `selector` currently matches an element
pub fn selector_present(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"canvas\"".to_string());
    format!("!!document.querySelector({quoted})")
}

/// Set by [`ready_event_hook`] once the page signals readiness
const READY_FLAG: &str = "window.__gameQaReady";

/// Record `event` in a window flag.
///
/// Meant for `Page.addScriptToEvaluateOnNewDocument`, so the listener exists
/// before any page script can fire the event.
pub fn ready_event_hook(event: &str) -> String {
    let quoted = serde_json::to_string(event).unwrap_or_else(|_| "\"load\"".to_string());
    format!(
        "(() => {{ \
            const mark = () => {{ {READY_FLAG} = true; }}; \
            window.addEventListener({quoted}, mark, {{ once: true }}); \
            document.addEventListener({quoted}, mark, {{ once: true }}); \
        }})();"
    )
}

/// Resolve once the hook has seen `event`, or once it fires from now on
pub fn ready_event(event: &str) -> String {
    let quoted = serde_json::to_string(event).unwrap_or_else(|_| "\"load\"".to_string());
    format!(
        "new Promise(resolve => {{ \
            if ({READY_FLAG} === true) {{ resolve(true); return; }} \
            const done = () => {{ {READY_FLAG} = true; resolve(true); }}; \
            window.addEventListener({quoted}, done, {{ once: true }}); \
            document.addEventListener({quoted}, done, {{ once: true }}); \
        }})"
    )
}

/// Window size and scale as a JSON object
pub const WINDOW_METRICS: &str = "({ \
    width: window.outerWidth, \
    height: window.outerHeight, \
    zoomFactor: window.visualViewport ? window.visualViewport.scale : 1, \
    devicePixelRatio: (typeof window.devicePixelRatio === 'number' && !isNaN(window.devicePixelRatio)) ? window.devicePixelRatio : 1 \
})";
