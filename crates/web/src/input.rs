use backdrop_core::Result;
use serde::de::DeserializeOwned;

/// Axis-aligned box in CSS pixels, as reported by `getBoundingClientRect`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Parses mount-time props. A blank string means "all defaults"; missing
/// fields keep their defaults.
pub fn parse_props<T: DeserializeOwned + Default>(json: &str) -> Result<T> {
    if json.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(json)?)
}

/// Maps a client-space pointer position into the canvas' normalised space
/// (origin bottom-left, y up). `None` for degenerate canvases.
pub fn normalized_pointer(client_x: f64, client_y: f64, canvas: Rect) -> Option<(f32, f32)> {
    if !(canvas.width > 0.0 && canvas.height > 0.0) {
        return None;
    }
    let x = (client_x - canvas.left) / canvas.width;
    let y = 1.0 - (client_y - canvas.top) / canvas.height;
    Some((x as f32, y as f32))
}

/// Drawing buffer size for a CSS box at the given pixel ratio.
pub fn drawing_buffer_size(css_width: f64, css_height: f64, pixel_ratio: f64) -> (u32, u32) {
    let scale = |v: f64| {
        let px = (v * pixel_ratio).round();
        if px.is_finite() && px >= 1.0 {
            px as u32
        } else {
            1
        }
    };
    (scale(css_width), scale(css_height))
}

/// Whether `rect` comes within `margin` pixels of a `width` x `height`
/// viewport.
pub fn intersects_viewport(rect: Rect, width: f64, height: f64, margin: f64) -> bool {
    rect.left + rect.width >= -margin
        && rect.top + rect.height >= -margin
        && rect.left <= width + margin
        && rect.top <= height + margin
}

#[cfg(test)]
mod tests {
    use super::*;
    use backdrop_core::{DitherProps, MetaballsProps};

    #[test]
    fn blank_props_use_defaults() {
        let props: MetaballsProps = parse_props("  ").unwrap();
        assert_eq!(props, MetaballsProps::default());

        let props: DitherProps = parse_props(r#"{ "color_num": 8 }"#).unwrap();
        assert_eq!(props.color_num, 8.0);
        assert_eq!(props.wave_speed, DitherProps::default().wave_speed);

        assert!(parse_props::<DitherProps>("{ nope").is_err());
    }

    #[test]
    fn pointer_is_flipped_to_y_up() {
        let canvas = Rect::new(100.0, 50.0, 200.0, 100.0);
        assert_eq!(normalized_pointer(100.0, 150.0, canvas), Some((0.0, 0.0)));
        assert_eq!(normalized_pointer(300.0, 50.0, canvas), Some((1.0, 1.0)));
        assert_eq!(normalized_pointer(200.0, 100.0, canvas), Some((0.5, 0.5)));
        assert_eq!(normalized_pointer(0.0, 0.0, Rect::new(0.0, 0.0, 0.0, 10.0)), None);
    }

    #[test]
    fn buffer_size_scales_and_never_hits_zero() {
        assert_eq!(drawing_buffer_size(400.0, 300.0, 1.5), (600, 450));
        assert_eq!(drawing_buffer_size(0.0, 300.0, 2.0), (1, 600));
        assert_eq!(drawing_buffer_size(400.0, f64::NAN, 1.0), (400, 1));
    }

    #[test]
    fn margin_extends_the_viewport() {
        let below = Rect::new(0.0, 850.0, 300.0, 200.0);
        assert!(!intersects_viewport(below, 1024.0, 768.0, 0.0));
        assert!(intersects_viewport(below, 1024.0, 768.0, 100.0));

        let above = Rect::new(0.0, -500.0, 300.0, 450.0);
        assert!(!intersects_viewport(above, 1024.0, 768.0, 10.0));
        assert!(intersects_viewport(above, 1024.0, 768.0, 60.0));
    }
}
