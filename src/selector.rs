//! Computes the preview geometry for a capture session: rotation between the
//! display and the sensor, mirroring, and the preview resolution that best
//! fits the screen.

use crate::device::{CameraDevice, CameraFacing};
use crate::error::{QrcamError, Result};
use crate::geometry::Orientation;
use tracing::{debug, info, warn};

/// Excludes degenerate tiny preview sizes that some drivers advertise.
const MIN_PREVIEW_PIXELS: u32 = 470 * 320;
/// Caps the decode cost per frame.
const MAX_PREVIEW_PIXELS: u32 = 1280 * 720;

/// Everything the pipeline needs to know about how the chosen preview
/// relates to the screen. Computed once per session; recomputed when the
/// surface geometry changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewGeometry {
    /// Screen size in the current orientation (width, height).
    pub screen_size: (u32, u32),
    /// Clockwise rotation from natural orientation to the display.
    pub display_rotation: u32,
    /// Sensor orientation as reported by the device.
    pub sensor_orientation: u32,
    /// Clockwise rotation from the display to the camera sensor.
    pub rotation_display_to_camera: u32,
    /// Rotation actually pushed to the hardware (mirror-compensated for
    /// front-facing cameras).
    pub rotation_to_apply: u32,
    /// Chosen preview resolution in raw sensor terms.
    pub camera_resolution: (u32, u32),
    /// The same resolution oriented to the screen for display purposes.
    pub preview_size_on_screen: (u32, u32),
    /// True for front-facing cameras.
    pub mirrored: bool,
}

impl PreviewGeometry {
    pub fn orientation(&self) -> Orientation {
        Orientation::from_rotation(self.rotation_to_apply)
    }
}

/// Normalize a reported display rotation to one of the cardinal rotations.
/// Drivers have been seen reporting values like -90; anything that is not a
/// multiple of 90 is a fatal configuration error.
fn normalize_rotation(degrees: i32) -> Result<u32> {
    match degrees {
        0 | 90 | 180 | 270 => Ok(degrees as u32),
        _ if degrees % 90 == 0 => Ok((((degrees % 360) + 360) % 360) as u32),
        _ => Err(QrcamError::invalid_argument(format!(
            "Bad rotation: {}",
            degrees
        ))),
    }
}

/// Compute the rotation and preview-size geometry for the given device and
/// screen. Pure with respect to the device: only capability queries are made.
pub fn select_configuration(
    device: &dyn CameraDevice,
    screen_size: (u32, u32),
    display_rotation_degrees: i32,
) -> Result<PreviewGeometry> {
    let display_rotation = normalize_rotation(display_rotation_degrees)?;
    debug!("Display at: {}", display_rotation);

    let descriptor = device.descriptor();
    let mirrored = descriptor.facing == CameraFacing::Front;

    let mut camera_rotation = descriptor.sensor_orientation % 360;
    debug!("Camera at: {}", camera_rotation);
    if mirrored {
        camera_rotation = (360 - camera_rotation) % 360;
        debug!("Front camera overridden to: {}", camera_rotation);
    }

    let rotation_display_to_camera = (360 + camera_rotation - display_rotation) % 360;
    let rotation_to_apply = if mirrored {
        (360 - rotation_display_to_camera) % 360
    } else {
        rotation_display_to_camera
    };
    debug!(
        "Clockwise rotation from display to camera: {} (applying {})",
        rotation_display_to_camera, rotation_to_apply
    );

    let camera_resolution = find_best_preview_size(device, screen_size);
    info!(
        "Screen {}x{}, camera resolution {}x{}",
        screen_size.0, screen_size.1, camera_resolution.0, camera_resolution.1
    );

    let screen_portrait = screen_size.0 < screen_size.1;
    let preview_portrait = camera_resolution.0 < camera_resolution.1;
    let preview_size_on_screen = if screen_portrait == preview_portrait {
        camera_resolution
    } else {
        (camera_resolution.1, camera_resolution.0)
    };
    debug!(
        "Preview size on screen: {}x{}",
        preview_size_on_screen.0, preview_size_on_screen.1
    );

    Ok(PreviewGeometry {
        screen_size,
        display_rotation,
        sensor_orientation: descriptor.sensor_orientation,
        rotation_display_to_camera,
        rotation_to_apply,
        camera_resolution,
        preview_size_on_screen,
        mirrored,
    })
}

/// Pick the supported preview size closest to the screen.
///
/// Candidates are walked largest-first. Sizes outside the acceptable pixel
/// band are skipped. A candidate matching the screen exactly (allowing a
/// portrait/landscape swap) wins immediately; otherwise the smallest aspect
/// ratio difference wins, first encountered on ties. With no usable data the
/// device default is used.
fn find_best_preview_size(device: &dyn CameraDevice, screen_size: (u32, u32)) -> (u32, u32) {
    let mut sizes = match device.supported_preview_sizes() {
        Some(sizes) => sizes,
        None => {
            warn!("Device returned no supported preview sizes; using default");
            return device.default_preview_size();
        }
    };

    sizes.sort_by(|a, b| (b.0 * b.1).cmp(&(a.0 * a.1)));

    let screen_aspect = screen_size.0 as f32 / screen_size.1 as f32;
    let mut best: Option<(u32, u32)> = None;
    let mut best_diff = f32::INFINITY;

    for (real_width, real_height) in sizes {
        let pixels = real_width * real_height;
        if !(MIN_PREVIEW_PIXELS..=MAX_PREVIEW_PIXELS).contains(&pixels) {
            continue;
        }

        // Compare in the screen's orientation.
        let landscape_candidate = real_width > real_height;
        let screen_portrait = screen_size.0 < screen_size.1;
        let (flipped_width, flipped_height) = if landscape_candidate && screen_portrait {
            (real_height, real_width)
        } else {
            (real_width, real_height)
        };

        if (flipped_width, flipped_height) == screen_size {
            info!(
                "Found preview size exactly matching screen size: {}x{}",
                real_width, real_height
            );
            return (real_width, real_height);
        }

        let aspect = flipped_width as f32 / flipped_height as f32;
        let diff = (aspect - screen_aspect).abs();
        if diff < best_diff {
            best = Some((real_width, real_height));
            best_diff = diff;
        }
    }

    match best {
        Some(size) => {
            debug!("Best approximate preview size: {}x{}", size.0, size.1);
            size
        }
        None => {
            let default = device.default_preview_size();
            info!(
                "No suitable preview sizes, using default: {}x{}",
                default.0, default.1
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{MockCameraSpec, MockProvider};
    use crate::device::{CameraDevice, CameraFacing, CameraProvider};

    fn open_mock(spec: MockCameraSpec) -> Box<dyn CameraDevice> {
        MockProvider::new(vec![spec]).open(0).unwrap()
    }

    #[test]
    fn applied_rotation_is_always_cardinal() {
        for &facing in &[CameraFacing::Back, CameraFacing::Front] {
            for &sensor in &[0u32, 90, 180, 270] {
                for &display in &[0i32, 90, 180, 270] {
                    let device = open_mock(MockCameraSpec {
                        facing,
                        sensor_orientation: sensor,
                        ..MockCameraSpec::default()
                    });
                    let geometry =
                        select_configuration(device.as_ref(), (480, 800), display).unwrap();
                    assert!(
                        [0, 90, 180, 270].contains(&geometry.rotation_to_apply),
                        "facing {:?} sensor {} display {} gave {}",
                        facing,
                        sensor,
                        display,
                        geometry.rotation_to_apply
                    );
                }
            }
        }
    }

    #[test]
    fn front_camera_mirrors_applied_rotation() {
        let device = open_mock(MockCameraSpec {
            facing: CameraFacing::Front,
            sensor_orientation: 270,
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (480, 800), 0).unwrap();
        assert!(geometry.mirrored);
        assert_eq!(
            geometry.rotation_to_apply,
            (360 - geometry.rotation_display_to_camera) % 360
        );
    }

    #[test]
    fn back_camera_applies_rotation_unchanged() {
        let device = open_mock(MockCameraSpec {
            facing: CameraFacing::Back,
            sensor_orientation: 90,
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (480, 800), 90).unwrap();
        assert!(!geometry.mirrored);
        assert_eq!(
            geometry.rotation_to_apply,
            geometry.rotation_display_to_camera
        );
    }

    #[test]
    fn off_cardinal_multiple_is_normalized() {
        let device = open_mock(MockCameraSpec::default());
        let geometry = select_configuration(device.as_ref(), (480, 800), -90).unwrap();
        assert_eq!(geometry.display_rotation, 270);
    }

    #[test]
    fn bad_rotation_is_invalid_argument() {
        let device = open_mock(MockCameraSpec::default());
        let result = select_configuration(device.as_ref(), (480, 800), 45);
        assert!(matches!(result, Err(QrcamError::InvalidArgument { .. })));
    }

    #[test]
    fn exact_screen_match_wins_over_aspect_fit() {
        let device = open_mock(MockCameraSpec {
            supported_sizes: Some(vec![(1280, 720), (800, 480), (640, 480)]),
            ..MockCameraSpec::default()
        });
        // 800x480 swapped is exactly the portrait screen.
        let geometry = select_configuration(device.as_ref(), (480, 800), 0).unwrap();
        assert_eq!(geometry.camera_resolution, (800, 480));
        assert_eq!(geometry.preview_size_on_screen, (480, 800));
    }

    #[test]
    fn best_fit_minimizes_aspect_difference_within_band() {
        // Screen 9:16 portrait, no exact size match. 1280x720 has the right
        // aspect; the tiny and huge candidates must be filtered out before
        // comparison.
        let device = open_mock(MockCameraSpec {
            supported_sizes: Some(vec![(320, 240), (1920, 1080), (1280, 720), (640, 480)]),
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (540, 960), 0).unwrap();
        assert_eq!(geometry.camera_resolution, (1280, 720));
    }

    #[test]
    fn missing_size_data_falls_back_to_default() {
        let device = open_mock(MockCameraSpec {
            supported_sizes: None,
            default_size: (640, 480),
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (480, 800), 0).unwrap();
        assert_eq!(geometry.camera_resolution, (640, 480));
    }

    #[test]
    fn all_filtered_out_falls_back_to_default() {
        let device = open_mock(MockCameraSpec {
            supported_sizes: Some(vec![(320, 240), (160, 120)]),
            default_size: (320, 240),
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (480, 800), 0).unwrap();
        assert_eq!(geometry.camera_resolution, (320, 240));
    }

    #[test]
    fn landscape_preview_swapped_for_portrait_screen() {
        let device = open_mock(MockCameraSpec {
            supported_sizes: Some(vec![(1280, 720)]),
            ..MockCameraSpec::default()
        });
        let geometry = select_configuration(device.as_ref(), (480, 800), 0).unwrap();
        assert_eq!(geometry.camera_resolution, (1280, 720));
        assert_eq!(geometry.preview_size_on_screen, (720, 1280));
    }
}
