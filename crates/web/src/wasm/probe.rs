use backdrop_core::{
    device::is_mobile_user_agent, CapabilityProbe, Clock, DeviceProfile, ViewportProbe,
};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Element, HtmlCanvasElement, Performance, VisibilityState, Window};

use crate::input::{intersects_viewport, Rect};

/// Reads cores, memory and user agent from `navigator`.
///
/// `deviceMemory` is not in every browser (or in web-sys), so it is read
/// reflectively and treated as unknown when absent.
#[derive(Debug, Clone, Copy)]
pub struct NavigatorProbe {
    webgl_supported: bool,
}

impl NavigatorProbe {
    /// Probe for a surface whose own context creation already succeeded or
    /// failed.
    pub fn with_webgl(webgl_supported: bool) -> Self {
        Self { webgl_supported }
    }

    /// Probe that tries a throwaway WebGL2 context.
    pub fn detect() -> Self {
        let supported = web_sys::window().map_or(false, |window| webgl2_available(&window));
        Self::with_webgl(supported)
    }
}

impl CapabilityProbe for NavigatorProbe {
    fn probe(&self) -> DeviceProfile {
        let Some(window) = web_sys::window() else {
            return DeviceProfile::new(1, None, false).without_webgl();
        };
        let navigator = window.navigator();

        let cores = navigator.hardware_concurrency();
        let cores = if cores.is_finite() && cores >= 1.0 {
            cores as u32
        } else {
            1
        };
        let memory = js_sys::Reflect::get(&navigator, &JsValue::from_str("deviceMemory"))
            .ok()
            .and_then(|value| value.as_f64())
            .map(|gb| gb as f32);
        let mobile = navigator
            .user_agent()
            .map(|ua| is_mobile_user_agent(&ua))
            .unwrap_or(false);

        let profile = DeviceProfile::new(cores, memory, mobile);
        if self.webgl_supported {
            profile
        } else {
            profile.without_webgl()
        }
    }
}

fn webgl2_available(window: &Window) -> bool {
    window
        .document()
        .and_then(|document| document.create_element("canvas").ok())
        .and_then(|element| element.dyn_into::<HtmlCanvasElement>().ok())
        .and_then(|canvas| canvas.get_context("webgl2").ok().flatten())
        .is_some()
}

/// Visible when the document is not hidden and the element is within
/// `margin_px` of the window.
pub struct DocumentViewport {
    element: Element,
    margin_px: f64,
}

impl DocumentViewport {
    pub fn new(element: Element, margin_px: f64) -> Self {
        Self { element, margin_px }
    }
}

impl ViewportProbe for DocumentViewport {
    fn is_visible(&self) -> bool {
        let Some(window) = web_sys::window() else {
            return false;
        };
        let hidden = window
            .document()
            .map_or(false, |document| document.visibility_state() == VisibilityState::Hidden);
        if hidden {
            return false;
        }

        let rect = self.element.get_bounding_client_rect();
        let width = window.inner_width().ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
        let height = window.inner_height().ok().and_then(|v| v.as_f64()).unwrap_or(0.0);
        intersects_viewport(
            Rect::new(rect.left(), rect.top(), rect.width(), rect.height()),
            width,
            height,
            self.margin_px,
        )
    }
}

/// `performance.now()`.
pub struct PerformanceClock {
    performance: Option<Performance>,
}

impl PerformanceClock {
    pub fn new() -> Self {
        Self {
            performance: web_sys::window().and_then(|window| window.performance()),
        }
    }
}

impl Default for PerformanceClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PerformanceClock {
    fn now_ms(&self) -> f64 {
        self.performance.as_ref().map_or(0.0, |performance| performance.now())
    }
}
