//! Maps decoder-space corner points into view-space coordinates.
//!
//! The decoder reports symbol corners in sensor (landscape) coordinates. What
//! the user sees is the preview surface, which may be rotated relative to the
//! sensor and, for front-facing cameras, mirrored. These transforms are pure
//! math over the current preview geometry.

/// Display orientation of the preview surface relative to the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    /// Derive the orientation from the clockwise rotation applied to the
    /// preview, which must be one of the four cardinal rotations.
    pub fn from_rotation(degrees: u32) -> Self {
        if degrees == 90 || degrees == 270 {
            Orientation::Portrait
        } else {
            Orientation::Landscape
        }
    }
}

/// A point in decoder (sensor) space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A point in view (display surface) space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPoint {
    pub x: f32,
    pub y: f32,
}

/// Transform a single decoder-space point into view space.
///
/// `view_size` and `preview_size` are (width, height). `preview_size` is the
/// raw sensor-facing resolution, not the display-oriented one.
pub fn transform(
    point: Point,
    mirrored: bool,
    orientation: Orientation,
    view_size: (u32, u32),
    preview_size: (u32, u32),
) -> ViewPoint {
    let (view_x, view_y) = (view_size.0 as f32, view_size.1 as f32);
    let (preview_x, preview_y) = (preview_size.0 as f32, preview_size.1 as f32);

    match orientation {
        Orientation::Portrait => {
            let scale_x = view_x / preview_y;
            let scale_y = view_y / preview_x;
            let mut transformed = ViewPoint {
                x: (preview_y - point.y) * scale_x,
                y: point.x * scale_y,
            };
            if mirrored {
                transformed.y = view_y - transformed.y;
            }
            transformed
        }
        Orientation::Landscape => {
            let scale_x = view_x / preview_x;
            let scale_y = view_y / preview_y;
            let mut transformed = ViewPoint {
                x: view_x - point.x * scale_x,
                y: view_y - point.y * scale_y,
            };
            if mirrored {
                transformed.x = view_x - transformed.x;
            }
            transformed
        }
    }
}

/// Transform every corner point independently. Empty input yields empty
/// output.
pub fn transform_points(
    points: &[Point],
    mirrored: bool,
    orientation: Orientation,
    view_size: (u32, u32),
    preview_size: (u32, u32),
) -> Vec<ViewPoint> {
    points
        .iter()
        .map(|&p| transform(p, mirrored, orientation, view_size, preview_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-4;

    fn assert_close(actual: ViewPoint, expected: (f32, f32)) {
        assert!(
            (actual.x - expected.0).abs() < TOLERANCE
                && (actual.y - expected.1).abs() < TOLERANCE,
            "expected ({}, {}), got ({}, {})",
            expected.0,
            expected.1,
            actual.x,
            actual.y
        );
    }

    #[test]
    fn portrait_without_mirror() {
        // scale_x = 1080/480 = 2.25, scale_y = 1920/640 = 3.0
        let result = transform(
            Point::new(320.0, 240.0),
            false,
            Orientation::Portrait,
            (1080, 1920),
            (640, 480),
        );
        assert_close(result, (540.0, 960.0));
    }

    #[test]
    fn landscape_with_mirror() {
        let result = transform(
            Point::new(0.0, 0.0),
            true,
            Orientation::Landscape,
            (1920, 1080),
            (1280, 720),
        );
        assert_close(result, (0.0, 1080.0));
    }

    #[test]
    fn preview_center_maps_to_view_center() {
        let preview = (640, 480);
        let center = Point::new(320.0, 240.0);

        let portrait_view = (1080, 1920);
        let result = transform(center, false, Orientation::Portrait, portrait_view, preview);
        assert_close(result, (540.0, 960.0));

        let landscape_view = (1920, 1080);
        let result = transform(
            center,
            false,
            Orientation::Landscape,
            landscape_view,
            preview,
        );
        assert_close(result, (960.0, 540.0));
    }

    #[test]
    fn portrait_mirror_flips_y() {
        let plain = transform(
            Point::new(100.0, 100.0),
            false,
            Orientation::Portrait,
            (1080, 1920),
            (640, 480),
        );
        let mirrored = transform(
            Point::new(100.0, 100.0),
            true,
            Orientation::Portrait,
            (1080, 1920),
            (640, 480),
        );
        assert!((mirrored.y - (1920.0 - plain.y)).abs() < TOLERANCE);
        assert!((mirrored.x - plain.x).abs() < TOLERANCE);
    }

    #[test]
    fn empty_points_yield_empty_output() {
        let result = transform_points(&[], false, Orientation::Portrait, (1080, 1920), (640, 480));
        assert!(result.is_empty());
    }

    #[test]
    fn orientation_from_rotation() {
        assert_eq!(Orientation::from_rotation(90), Orientation::Portrait);
        assert_eq!(Orientation::from_rotation(270), Orientation::Portrait);
        assert_eq!(Orientation::from_rotation(0), Orientation::Landscape);
        assert_eq!(Orientation::from_rotation(180), Orientation::Landscape);
    }
}
