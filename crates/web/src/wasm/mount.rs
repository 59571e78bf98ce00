use std::{cell::RefCell, rc::Rc};

use backdrop_core::{
    gpu, Clock, Diagnostics, DitherEffect, DitherProps, Effect, FallbackReason, FallbackRenderer,
    FallbackStyle, FrameOutcome, FrameScheduler, FrameToken, FxConfig, FxError, FxServices,
    LoopState, MetaballsEffect, MetaballsProps, NetworkEffect, NetworkProps, PoolManager,
    RenderLoop, SharedPools,
};
use serde::de::DeserializeOwned;
use wasm_bindgen::{closure::Closure, prelude::*, JsCast};
use web_sys::{window, Event, EventTarget, HtmlCanvasElement, HtmlElement, MouseEvent};

use super::{
    gl::WebGlBackend,
    probe::{DocumentViewport, NavigatorProbe, PerformanceClock},
};
use crate::input::{drawing_buffer_size, normalized_pointer, parse_props, Rect};

type FrameSlot = Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>;
type Listener = (EventTarget, &'static str, Closure<dyn FnMut(Event)>);

thread_local! {
    static CONFIG: RefCell<FxConfig> = RefCell::new(FxConfig::default());
    static PAGE_POOLS: RefCell<Option<SharedPools>> = RefCell::new(None);
}

/// Replaces the configuration used by later mounts. Pool sizes only apply
/// if no effect has been mounted yet.
#[wasm_bindgen]
pub fn configure(config_json: &str) -> Result<(), JsValue> {
    let config = FxConfig::from_json_str(config_json).map_err(to_js)?;
    CONFIG.with(|slot| *slot.borrow_mut() = config);
    Ok(())
}

/// Page-wide pool statistics as JSON.
#[wasm_bindgen]
pub fn pool_stats() -> Result<String, JsValue> {
    let stats = page_pools().borrow().stats();
    serde_json::to_string(&stats).map_err(|err| to_js(err.into()))
}

#[wasm_bindgen]
pub fn mount_dither(container_id: &str, props_json: &str) -> Result<EffectHandle, JsValue> {
    let props: DitherProps = props_or_default(props_json);
    mount(container_id, DitherEffect::new(props))
}

#[wasm_bindgen]
pub fn mount_metaballs(container_id: &str, props_json: &str) -> Result<EffectHandle, JsValue> {
    let props: MetaballsProps = props_or_default(props_json);
    mount(container_id, MetaballsEffect::new(props))
}

#[wasm_bindgen]
pub fn mount_network(container_id: &str, props_json: &str) -> Result<EffectHandle, JsValue> {
    let props: NetworkProps = props_or_default(props_json);
    mount(container_id, NetworkEffect::new(props))
}

/// A mounted effect. Call `unmount` (or let JS free it) to stop it.
#[wasm_bindgen]
pub struct EffectHandle {
    container: HtmlElement,
    canvas: HtmlCanvasElement,
    surface: Option<Box<dyn Surface>>,
    frame_slot: Option<FrameSlot>,
    listeners: Vec<Listener>,
    /// Inline background of the container before mount.
    saved_background: SavedBackground,
    /// Set when no render loop could be created at all.
    fallback: Option<FallbackReason>,
}

#[wasm_bindgen]
impl EffectHandle {
    /// Cancels the pending frame, releases pooled objects and programs, and
    /// removes the canvas. Safe to call more than once.
    pub fn unmount(&mut self) {
        for (target, event, listener) in self.listeners.drain(..) {
            let callback = listener.as_ref().unchecked_ref();
            let _ = target.remove_event_listener_with_callback(event, callback);
        }
        if let Some(surface) = self.surface.take() {
            surface.dispose();
        }
        if let Some(slot) = self.frame_slot.take() {
            slot.borrow_mut().take();
        }
        self.fallback = None;
        self.canvas.remove();
        if let Err(err) = self.saved_background.restore(&self.container) {
            tracing::warn!(?err, "could not restore container background");
        }
    }

    pub fn state(&self) -> String {
        match (&self.surface, self.fallback) {
            (Some(surface), _) => surface.state().to_string(),
            (None, Some(reason)) => LoopState::Fallback(reason).to_string(),
            (None, None) => LoopState::Disposed.to_string(),
        }
    }

    /// Pool, cache and health diagnostics as JSON.
    pub fn diagnostics(&self) -> Result<String, JsValue> {
        let Some(surface) = &self.surface else {
            return Ok("null".to_string());
        };
        serde_json::to_string(&surface.diagnostics()).map_err(|err| to_js(err.into()))
    }

    #[wasm_bindgen(getter)]
    pub fn container_id(&self) -> String {
        self.container.id()
    }
}

impl Drop for EffectHandle {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Type-erased access to a mounted loop.
trait Surface {
    fn dispose(&self);
    fn state(&self) -> LoopState;
    fn diagnostics(&self) -> Diagnostics;
}

impl<E: Effect> Surface for Rc<RefCell<RenderLoop<E>>> {
    fn dispose(&self) {
        match self.try_borrow_mut() {
            Ok(mut render) => render.dispose(),
            Err(_) => tracing::warn!("render loop busy during unmount; disposing on drop"),
        }
    }

    fn state(&self) -> LoopState {
        self.borrow().state()
    }

    fn diagnostics(&self) -> Diagnostics {
        self.borrow().services().diagnostics()
    }
}

/// `requestAnimationFrame` behind the core scheduler seam. The callback
/// lives in a shared slot so the loop can re-arm it from inside itself.
struct RafScheduler {
    slot: FrameSlot,
}

impl FrameScheduler for RafScheduler {
    fn request(&mut self) -> FrameToken {
        let slot = self.slot.borrow();
        let id = match (window(), slot.as_ref()) {
            (Some(window), Some(callback)) => window
                .request_animation_frame(callback.as_ref().unchecked_ref())
                .unwrap_or_else(|err| {
                    tracing::warn!(?err, "requestAnimationFrame failed");
                    0
                }),
            _ => 0,
        };
        FrameToken(id as u64)
    }

    fn cancel(&mut self, token: FrameToken) {
        if token.0 == 0 {
            return;
        }
        if let Some(window) = window() {
            let _ = window.cancel_animation_frame(token.0 as i32);
        }
    }
}

fn mount<E: Effect + 'static>(container_id: &str, effect: E) -> Result<EffectHandle, JsValue> {
    let window = window().ok_or("no window")?;
    let document = window.document().ok_or("no document")?;
    let container = document
        .get_element_by_id(container_id)
        .ok_or_else(|| JsValue::from_str(&format!("container `{container_id}` not found")))?
        .dyn_into::<HtmlElement>()?;

    let saved_background = SavedBackground::read(&container)?;
    apply_background(&container, FallbackRenderer.style(FallbackReason::Loading))?;

    let canvas = document
        .create_element("canvas")?
        .dyn_into::<HtmlCanvasElement>()?;
    canvas.style().set_property("display", "block")?;
    canvas.style().set_property("width", "100%")?;
    canvas.style().set_property("height", "100%")?;
    container.append_child(&canvas)?;

    let gl = canvas
        .get_context("webgl2")
        .ok()
        .flatten()
        .and_then(|ctx| ctx.dyn_into::<web_sys::WebGl2RenderingContext>().ok());
    let Some(gl) = gl else {
        tracing::warn!(container_id, "webgl2 unavailable; showing fallback");
        hide(&canvas);
        return Ok(EffectHandle {
            container,
            canvas,
            surface: None,
            frame_slot: None,
            listeners: Vec::new(),
            saved_background,
            fallback: Some(FallbackReason::Unsupported),
        });
    };

    let config = CONFIG.with(|slot| slot.borrow().clone());
    let margin = config.render.viewport_margin_px;
    let (_, shared_gpu) = gpu::shared(WebGlBackend::new(gl));
    let services = FxServices::with_pools(
        config,
        shared_gpu,
        Rc::new(PerformanceClock::new()),
        page_pools(),
    );

    let slot: FrameSlot = Rc::new(RefCell::new(None));
    let render = Rc::new(RefCell::new(RenderLoop::new(
        effect,
        services,
        Box::new(RafScheduler { slot: slot.clone() }),
        Box::new(DocumentViewport::new(canvas.clone().into(), margin)),
    )));

    // The callback holds a weak handle; the loop owns the scheduler that
    // owns the slot, so a strong one would never be freed.
    {
        let weak = Rc::downgrade(&render);
        let canvas = canvas.clone();
        *slot.borrow_mut() = Some(Closure::wrap(Box::new(move |timestamp: f64| {
            let Some(render) = weak.upgrade() else {
                return;
            };
            let outcome = render.borrow_mut().on_frame(timestamp);
            if outcome == FrameOutcome::Failed {
                hide(&canvas);
            }
        }) as Box<dyn FnMut(f64)>));
    }

    sync_size(&canvas, &render);
    let probe = NavigatorProbe::with_webgl(true);
    let state = render.borrow_mut().start(&probe).map_err(to_js)?;
    tracing::info!(container_id, %state, "effect mounted");
    if matches!(state, LoopState::Fallback(_)) {
        hide(&canvas);
    }
    sync_size(&canvas, &render);

    let mut listeners = Vec::new();
    {
        let render = render.clone();
        let canvas = canvas.clone();
        let on_resize = Closure::wrap(Box::new(move |_: Event| {
            sync_size(&canvas, &render);
        }) as Box<dyn FnMut(Event)>);
        listen(&mut listeners, window.clone().into(), "resize", on_resize)?;
    }
    {
        let render = render.clone();
        let canvas = canvas.clone();
        let clock = PerformanceClock::new();
        let on_pointer = Closure::wrap(Box::new(move |event: Event| {
            let Some(event) = event.dyn_ref::<MouseEvent>() else {
                return;
            };
            let rect = canvas.get_bounding_client_rect();
            let rect = Rect::new(rect.left(), rect.top(), rect.width(), rect.height());
            if let Some((x, y)) =
                normalized_pointer(f64::from(event.client_x()), f64::from(event.client_y()), rect)
            {
                if let Ok(mut render) = render.try_borrow_mut() {
                    render.pointer_moved(x, y, clock.now_ms());
                }
            }
        }) as Box<dyn FnMut(Event)>);
        listen(&mut listeners, window.into(), "pointermove", on_pointer)?;
    }

    Ok(EffectHandle {
        container,
        canvas,
        surface: Some(Box::new(render)),
        frame_slot: Some(slot),
        listeners,
        saved_background,
        fallback: None,
    })
}

fn listen(
    listeners: &mut Vec<Listener>,
    target: EventTarget,
    event: &'static str,
    listener: Closure<dyn FnMut(Event)>,
) -> Result<(), JsValue> {
    target.add_event_listener_with_callback(event, listener.as_ref().unchecked_ref())?;
    listeners.push((target, event, listener));
    Ok(())
}

fn sync_size<E: Effect>(canvas: &HtmlCanvasElement, render: &Rc<RefCell<RenderLoop<E>>>) {
    let Ok(mut render) = render.try_borrow_mut() else {
        return;
    };
    let device_ratio = window().map_or(1.0, |window| window.device_pixel_ratio());
    let ratio = render.pixel_ratio(device_ratio);
    let (width, height) = drawing_buffer_size(
        f64::from(canvas.client_width()),
        f64::from(canvas.client_height()),
        ratio,
    );
    if canvas.width() != width || canvas.height() != height {
        canvas.set_width(width);
        canvas.set_height(height);
    }
    render.resize(width, height);
}

fn apply_background(element: &HtmlElement, style: FallbackStyle) -> Result<(), JsValue> {
    let css = element.style();
    css.set_property("background-color", style.background_color)?;
    css.set_property("background-image", style.background_image)?;
    Ok(())
}

/// Inline background properties, empty when the page set none.
#[derive(Debug, Default)]
struct SavedBackground {
    color: String,
    image: String,
}

impl SavedBackground {
    fn read(element: &HtmlElement) -> Result<Self, JsValue> {
        let css = element.style();
        Ok(Self {
            color: css.get_property_value("background-color")?,
            image: css.get_property_value("background-image")?,
        })
    }

    /// Puts the values back, or clears the property when there was none.
    fn restore(&self, element: &HtmlElement) -> Result<(), JsValue> {
        let css = element.style();
        let saved = [("background-color", &self.color), ("background-image", &self.image)];
        for (property, value) in saved {
            if value.is_empty() {
                css.remove_property(property)?;
            } else {
                css.set_property(property, value)?;
            }
        }
        Ok(())
    }
}

fn hide(canvas: &HtmlCanvasElement) {
    let _ = canvas.style().set_property("display", "none");
}

fn page_pools() -> SharedPools {
    PAGE_POOLS.with(|slot| {
        slot.borrow_mut()
            .get_or_insert_with(|| {
                let config = CONFIG.with(|config| config.borrow().pool.clone());
                PoolManager::shared(&config)
            })
            .clone()
    })
}

fn props_or_default<T: DeserializeOwned + Default>(json: &str) -> T {
    parse_props(json).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "invalid effect props; using defaults");
        T::default()
    })
}

fn to_js(err: FxError) -> JsValue {
    JsValue::from_str(&err.to_string())
}
