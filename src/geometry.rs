//! Normalized coordinate translation.
//!
//! The oracle speaks a resolution-independent 0..=1000 grid on both axes.
//! Every backend reports a [`SurfaceGeometry`] each step; this module maps
//! between the two frames.
//!
//! # Invariants
//! - `to_normalized(to_absolute(p, g), g)` is within ±1 unit of `p` on
//!   surfaces at least 500px along each axis, and within half a pixel otherwise
//! - rectangles translate each corner with [`to_absolute`], never by interpolation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound of the normalized grid on each axis.
pub const NORMALIZED_MAX: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("invalid surface geometry: {width}x{height} (both dimensions must be positive)")]
    InvalidGeometry { width: i32, height: i32 },
}

/// A resolution-independent location, both components clamped to `0..=1000`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

impl NormalizedPoint {
    /// Build a point, clamping each component into range.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: clamp_component(x),
            y: clamp_component(y),
        }
    }

    /// Whether a raw component lies inside the normalized grid.
    pub fn in_range(value: f64) -> bool {
        value.is_finite() && (0.0..=NORMALIZED_MAX).contains(&value)
    }
}

fn clamp_component(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, NORMALIZED_MAX)
}

/// Two corners in normalized space (drag source/destination, scroll regions).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub start: NormalizedPoint,
    pub end: NormalizedPoint,
}

/// Absolute pixel location on the bound surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsolutePoint {
    pub x: i32,
    pub y: i32,
}

impl AbsolutePoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsoluteRect {
    pub start: AbsolutePoint,
    pub end: AbsolutePoint,
}

/// Pixel frame of reference of the active surface.
///
/// Full screen, browser viewport, or background window client area.
/// Re-queried every step; never cached across steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceGeometry {
    pub width_px: i32,
    pub height_px: i32,
    pub origin_x: i32,
    pub origin_y: i32,
}

impl SurfaceGeometry {
    pub fn new(width_px: i32, height_px: i32) -> Self {
        Self {
            width_px,
            height_px,
            origin_x: 0,
            origin_y: 0,
        }
    }

    pub fn with_origin(mut self, origin_x: i32, origin_y: i32) -> Self {
        self.origin_x = origin_x;
        self.origin_y = origin_y;
        self
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.width_px <= 0 || self.height_px <= 0 {
            return Err(GeometryError::InvalidGeometry {
                width: self.width_px,
                height: self.height_px,
            });
        }
        Ok(())
    }

    /// Whether an absolute point falls inside this surface.
    pub fn contains(&self, point: AbsolutePoint) -> bool {
        point.x >= self.origin_x
            && point.y >= self.origin_y
            && point.x <= self.origin_x + self.width_px
            && point.y <= self.origin_y + self.height_px
    }
}

/// Map a normalized point onto absolute pixels of `geometry`.
///
/// `px = origin_x + round(x / 1000 * width_px)`, likewise for `py`.
pub fn to_absolute(
    point: NormalizedPoint,
    geometry: &SurfaceGeometry,
) -> Result<AbsolutePoint, GeometryError> {
    geometry.validate()?;
    let dx = (point.x / NORMALIZED_MAX * f64::from(geometry.width_px)).round() as i32;
    let dy = (point.y / NORMALIZED_MAX * f64::from(geometry.height_px)).round() as i32;
    Ok(AbsolutePoint::new(geometry.origin_x + dx, geometry.origin_y + dy))
}

/// Inverse of [`to_absolute`] before rounding. Used for reporting.
pub fn to_normalized(
    px: i32,
    py: i32,
    geometry: &SurfaceGeometry,
) -> Result<NormalizedPoint, GeometryError> {
    geometry.validate()?;
    let x = f64::from(px - geometry.origin_x) * NORMALIZED_MAX / f64::from(geometry.width_px);
    let y = f64::from(py - geometry.origin_y) * NORMALIZED_MAX / f64::from(geometry.height_px);
    Ok(NormalizedPoint { x, y })
}

/// Translate both corners of a rectangle independently.
pub fn rect_to_absolute(
    rect: NormalizedRect,
    geometry: &SurfaceGeometry,
) -> Result<AbsoluteRect, GeometryError> {
    Ok(AbsoluteRect {
        start: to_absolute(rect.start, geometry)?,
        end: to_absolute(rect.end, geometry)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_of_full_hd() {
        let g = SurfaceGeometry::new(1920, 1080);
        let p = to_absolute(NormalizedPoint::new(500.0, 500.0), &g).unwrap();
        assert_eq!(p, AbsolutePoint::new(960, 540));
    }

    #[test]
    fn test_origin_offset_is_added() {
        let g = SurfaceGeometry::new(800, 600).with_origin(100, 50);
        let p = to_absolute(NormalizedPoint::new(0.0, 0.0), &g).unwrap();
        assert_eq!(p, AbsolutePoint::new(100, 50));
        let p = to_absolute(NormalizedPoint::new(1000.0, 1000.0), &g).unwrap();
        assert_eq!(p, AbsolutePoint::new(900, 650));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        for (w, h) in [(0, 100), (100, 0), (-5, 100), (100, -1)] {
            let g = SurfaceGeometry::new(w, h);
            assert_eq!(
                to_absolute(NormalizedPoint::new(1.0, 1.0), &g),
                Err(GeometryError::InvalidGeometry { width: w, height: h })
            );
            assert!(to_normalized(1, 1, &g).is_err());
        }
    }

    fn round_trip_error(g: &SurfaceGeometry) -> (f64, f64) {
        let mut worst = (0.0_f64, 0.0_f64);
        let mut v = 0.0;
        while v <= NORMALIZED_MAX {
            let p = NormalizedPoint::new(v, NORMALIZED_MAX - v);
            let abs = to_absolute(p, g).unwrap();
            let back = to_normalized(abs.x, abs.y, g).unwrap();
            worst.0 = worst.0.max((back.x - p.x).abs());
            worst.1 = worst.1.max((back.y - p.y).abs());
            v += 12.5;
        }
        worst
    }

    #[test]
    fn test_round_trip_within_one_unit() {
        let geometries = [
            SurfaceGeometry::new(500, 500),
            SurfaceGeometry::new(1280, 800),
            SurfaceGeometry::new(1920, 1080).with_origin(-1920, 0),
            SurfaceGeometry::new(3840, 2160).with_origin(12, 34),
        ];
        for g in geometries {
            let (dx, dy) = round_trip_error(&g);
            assert!(dx <= 1.0 + 1e-9 && dy <= 1.0 + 1e-9, "{:?}: {} {}", g, dx, dy);
        }
    }

    #[test]
    fn test_small_surface_round_trip_within_half_pixel() {
        // Below 500px one pixel spans more than two grid units.
        for g in [
            SurfaceGeometry::new(1, 1),
            SurfaceGeometry::new(3, 7),
            SurfaceGeometry::new(333, 2001),
        ] {
            let half_x = NORMALIZED_MAX / f64::from(g.width_px) / 2.0;
            let half_y = NORMALIZED_MAX / f64::from(g.height_px) / 2.0;
            let (dx, dy) = round_trip_error(&g);
            assert!(dx <= half_x + 1e-9, "{:?}: {}", g, dx);
            assert!(dy <= half_y.max(1.0) + 1e-9, "{:?}: {}", g, dy);
        }
    }

    #[test]
    fn test_rect_corners_translate_independently() {
        let g = SurfaceGeometry::new(1001, 999);
        let rect = NormalizedRect {
            start: NormalizedPoint::new(250.0, 750.0),
            end: NormalizedPoint::new(750.0, 250.0),
        };
        let abs = rect_to_absolute(rect, &g).unwrap();
        assert_eq!(abs.start, to_absolute(rect.start, &g).unwrap());
        assert_eq!(abs.end, to_absolute(rect.end, &g).unwrap());
    }

    #[test]
    fn test_point_clamps_components() {
        let p = NormalizedPoint::new(-20.0, 1500.0);
        assert_eq!(p, NormalizedPoint { x: 0.0, y: 1000.0 });
        assert!(!NormalizedPoint::in_range(1000.5));
        assert!(!NormalizedPoint::in_range(f64::NAN));
        assert!(NormalizedPoint::in_range(0.0));
    }
}
