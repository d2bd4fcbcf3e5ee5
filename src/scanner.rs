//! The scan session: admits preview frames to the decoder one at a time and
//! glues the camera lifecycle, decode scheduling and event fan-out together.

use crate::config::ScanConfig;
use crate::decode::{DecodeHints, LuminanceGrid, QrDecoder};
use crate::device::CameraProvider;
use crate::error::Result;
use crate::events::{EventBus, ScanEvent};
use crate::geometry::transform_points;
use crate::manager::CameraManager;
use crate::selector::PreviewGeometry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Admits at most one preview frame to the decoder at a time.
///
/// The capture path must never wait: a frame arriving while a decode is in
/// flight is dropped, not queued. Decoding runs on the blocking pool; the
/// hot-path admission check is a single atomic.
pub struct FrameDecoder {
    decoder: Arc<Mutex<Box<dyn QrDecoder>>>,
    busy: Arc<AtomicBool>,
    enabled: AtomicBool,
    hints: Mutex<DecodeHints>,
    cancel: Mutex<CancellationToken>,
    events: Arc<EventBus>,
}

impl FrameDecoder {
    pub fn new(decoder: Box<dyn QrDecoder>, events: Arc<EventBus>) -> Self {
        Self {
            decoder: Arc::new(Mutex::new(decoder)),
            busy: Arc::new(AtomicBool::new(false)),
            enabled: AtomicBool::new(true),
            hints: Mutex::new(DecodeHints::new()),
            cancel: Mutex::new(CancellationToken::new()),
            events,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_hints(&self, hints: DecodeHints) {
        *self.hints.lock() = hints;
    }

    /// Cancel the session: further frames are dropped and an in-flight
    /// decode's result is discarded.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Arm a fresh session after a `cancel`.
    pub fn rearm(&self) {
        let mut cancel = self.cancel.lock();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
    }

    /// Offer one preview frame. Returns immediately in every case; the frame
    /// is either handed to the decoder on the blocking pool or dropped.
    pub fn on_frame(&self, data: &[u8], geometry: &PreviewGeometry) {
        if !self.enabled.load(Ordering::Acquire) {
            trace!("Decoding disabled; dropping frame");
            return;
        }
        let token = self.cancel.lock().clone();
        if token.is_cancelled() {
            trace!("Session cancelled; dropping frame");
            return;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Decoder busy; dropping frame");
            return;
        }

        let (width, height) = geometry.camera_resolution;
        let grid = match LuminanceGrid::from_preview_frame(data, width, height) {
            Some(grid) => grid,
            None => {
                warn!(
                    "Preview frame shorter than {}x{} luminance plane; dropping",
                    width, height
                );
                self.busy.store(false, Ordering::Release);
                return;
            }
        };

        let decoder = Arc::clone(&self.decoder);
        let busy = Arc::clone(&self.busy);
        let events = Arc::clone(&self.events);
        let hints = self.hints.lock().clone();
        let geometry = *geometry;

        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || {
                let mut decoder = decoder.lock();
                let outcome = decoder.decode(&grid, &hints);
                // Decoders may keep per-attempt scratch state.
                decoder.reset();
                outcome
            })
            .await;
            busy.store(false, Ordering::Release);

            if token.is_cancelled() {
                debug!("Session cancelled; discarding decode result");
                return;
            }
            match outcome {
                Ok(Ok(decoded)) => {
                    let points = transform_points(
                        &decoded.points,
                        geometry.mirrored,
                        geometry.orientation(),
                        geometry.screen_size,
                        geometry.camera_resolution,
                    );
                    debug!("Decoded symbol: {:?}", decoded.text);
                    events.publish(ScanEvent::Decoded {
                        text: decoded.text,
                        points,
                        timestamp: SystemTime::now(),
                    });
                }
                Ok(Err(failure)) => trace!("No symbol in frame: {}", failure),
                Err(e) => warn!("Decode task aborted: {}", e),
            }
        });
    }
}

/// A complete scan session over one camera: lifecycle, preview, decode and
/// events behind one handle.
pub struct QrScanner {
    manager: CameraManager,
    frame_decoder: FrameDecoder,
    events: Arc<EventBus>,
    config: ScanConfig,
}

impl QrScanner {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        decoder: Box<dyn QrDecoder>,
        config: ScanConfig,
    ) -> Result<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::new(config.event_capacity));
        let manager = CameraManager::new(provider);
        manager.set_camera_selection(config.camera);
        manager.set_autofocus_interval(config.autofocus_interval_ms)?;
        let frame_decoder = FrameDecoder::new(decoder, Arc::clone(&events));
        frame_decoder.set_enabled(config.decode_enabled);
        frame_decoder.set_hints(config.decode_hints.clone());
        Ok(Self {
            manager,
            frame_decoder,
            events,
            config,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Open and configure the camera for the given surface. Idempotent.
    pub async fn open(&self, width: u32, height: u32, display_rotation: i32) -> Result<()> {
        self.manager.open(width, height, display_rotation).await?;
        self.frame_decoder.rearm();
        if self.config.torch {
            self.set_torch(true).await;
        }
        Ok(())
    }

    /// Start preview frames and the autofocus cycle.
    pub async fn start(&self) -> Result<()> {
        if self.manager.is_previewing() {
            return Ok(());
        }
        self.manager.start_preview().await?;
        self.events.publish(ScanEvent::PreviewStarted);
        Ok(())
    }

    /// Stop preview frames and the autofocus cycle.
    pub async fn stop(&self) {
        if !self.manager.is_previewing() {
            return;
        }
        self.manager.stop_preview().await;
        self.events.publish(ScanEvent::PreviewStopped);
    }

    /// The drawing surface changed size or rotation; recompute geometry and
    /// restart the preview if it was running.
    pub async fn surface_changed(&self, width: u32, height: u32, display_rotation: i32) -> Result<()> {
        let was_previewing = self.manager.is_previewing();
        if was_previewing {
            self.stop().await;
        }
        self.manager.reconfigure(width, height, display_rotation).await?;
        if was_previewing {
            self.start().await?;
        }
        Ok(())
    }

    /// Tear the session down: autofocus stops, the decode session is
    /// cancelled (discarding any in-flight result), then the camera is
    /// released. Idempotent.
    pub async fn close(&self) {
        self.stop().await;
        self.frame_decoder.cancel();
        self.manager.close().await;
    }

    /// Offer one preview frame to the decode scheduler. Never blocks; frames
    /// arriving while the decoder is busy, decoding is disabled, or no
    /// session is configured are dropped.
    pub fn on_preview_frame(&self, data: &[u8]) {
        match self.manager.geometry() {
            Some(geometry) => self.frame_decoder.on_frame(data, &geometry),
            None => trace!("No preview session; dropping frame"),
        }
    }

    /// Which camera the next `open` uses. Has no effect on an open session.
    pub fn set_camera_selection(&self, selection: crate::device::CameraSelection) {
        self.manager.set_camera_selection(selection);
    }

    pub fn set_decode_enabled(&self, enabled: bool) {
        self.frame_decoder.set_enabled(enabled);
    }

    pub fn set_decode_hints(&self, hints: DecodeHints) {
        self.frame_decoder.set_hints(hints);
    }

    pub async fn set_torch(&self, enabled: bool) {
        let before = self.manager.torch_enabled();
        self.manager.set_torch(enabled).await;
        let after = self.manager.torch_enabled();
        if before != after {
            self.events.publish(ScanEvent::TorchChanged { enabled: after });
        }
    }

    pub fn torch_enabled(&self) -> bool {
        self.manager.torch_enabled()
    }

    pub fn set_autofocus_interval(&self, interval_ms: u64) -> Result<()> {
        self.manager.set_autofocus_interval(interval_ms)
    }

    pub fn force_auto_focus(&self) {
        self.manager.force_auto_focus();
    }

    pub fn is_previewing(&self) -> bool {
        self.manager.is_previewing()
    }

    pub fn preview_size(&self) -> Option<(u32, u32)> {
        self.manager.preview_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodeFailure, Decoded};
    use crate::geometry::Point;
    use std::sync::mpsc;
    use std::time::Duration;

    fn portrait_geometry() -> PreviewGeometry {
        PreviewGeometry {
            screen_size: (1080, 1920),
            display_rotation: 0,
            sensor_orientation: 90,
            rotation_display_to_camera: 90,
            rotation_to_apply: 90,
            camera_resolution: (640, 480),
            preview_size_on_screen: (480, 640),
            mirrored: false,
        }
    }

    struct CountingDecoder {
        calls: Arc<Mutex<u32>>,
        block_on: Option<mpsc::Receiver<()>>,
        result: Option<Decoded>,
    }

    impl QrDecoder for CountingDecoder {
        fn decode(
            &mut self,
            _grid: &LuminanceGrid,
            _hints: &DecodeHints,
        ) -> std::result::Result<Decoded, DecodeFailure> {
            *self.calls.lock() += 1;
            if let Some(gate) = &self.block_on {
                let _ = gate.recv();
            }
            self.result.clone().ok_or(DecodeFailure::NotFound)
        }

        fn reset(&mut self) {}
    }

    fn frame() -> Vec<u8> {
        vec![0u8; 640 * 480]
    }

    #[tokio::test]
    async fn frames_are_dropped_while_decoder_is_busy() {
        let calls = Arc::new(Mutex::new(0u32));
        let (gate_tx, gate_rx) = mpsc::channel();
        let decoder = FrameDecoder::new(
            Box::new(CountingDecoder {
                calls: Arc::clone(&calls),
                block_on: Some(gate_rx),
                result: None,
            }),
            Arc::new(EventBus::new(8)),
        );
        let geometry = portrait_geometry();

        decoder.on_frame(&frame(), &geometry);
        // Let the blocking task start before flooding.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for _ in 0..5 {
            decoder.on_frame(&frame(), &geometry);
        }
        assert_eq!(*calls.lock(), 1, "frames admitted past a busy decoder");

        gate_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Once the decoder is free the next frame is admitted again.
        decoder.on_frame(&frame(), &geometry);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*calls.lock(), 2);
        gate_tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn disabled_decoding_drops_every_frame() {
        let calls = Arc::new(Mutex::new(0u32));
        let decoder = FrameDecoder::new(
            Box::new(CountingDecoder {
                calls: Arc::clone(&calls),
                block_on: None,
                result: None,
            }),
            Arc::new(EventBus::new(8)),
        );
        decoder.set_enabled(false);
        decoder.on_frame(&frame(), &portrait_geometry());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn successful_decode_publishes_transformed_points() {
        let events = Arc::new(EventBus::new(8));
        let mut receiver = events.subscribe();
        let decoder = FrameDecoder::new(
            Box::new(CountingDecoder {
                calls: Arc::new(Mutex::new(0)),
                block_on: None,
                result: Some(Decoded {
                    text: "hello".to_string(),
                    points: vec![Point { x: 320.0, y: 240.0 }],
                }),
            }),
            Arc::clone(&events),
        );

        decoder.on_frame(&frame(), &portrait_geometry());
        match receiver.recv().await.unwrap() {
            ScanEvent::Decoded { text, points, .. } => {
                assert_eq!(text, "hello");
                // Portrait transform of the frame centre onto a 1080x1920
                // screen.
                assert_eq!(points.len(), 1);
                assert!((points[0].x - 540.0).abs() < 0.001);
                assert!((points[0].y - 960.0).abs() < 0.001);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_session_discards_in_flight_result() {
        let events = Arc::new(EventBus::new(8));
        let mut receiver = events.subscribe();
        let (gate_tx, gate_rx) = mpsc::channel();
        let decoder = FrameDecoder::new(
            Box::new(CountingDecoder {
                calls: Arc::new(Mutex::new(0)),
                block_on: Some(gate_rx),
                result: Some(Decoded {
                    text: "late".to_string(),
                    points: vec![],
                }),
            }),
            Arc::clone(&events),
        );

        decoder.on_frame(&frame(), &portrait_geometry());
        tokio::time::sleep(Duration::from_millis(20)).await;
        decoder.cancel();
        gate_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(receiver.try_recv().is_err(), "cancelled result was published");
        // Frames offered after cancellation are dropped outright.
        decoder.on_frame(&frame(), &portrait_geometry());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_event_capacity_is_rejected_at_construction() {
        use crate::device::mock::{MockCameraSpec, MockProvider};

        let provider = Arc::new(MockProvider::new(vec![MockCameraSpec::default()]));
        let result = QrScanner::new(
            provider,
            Box::new(CountingDecoder {
                calls: Arc::new(Mutex::new(0)),
                block_on: None,
                result: None,
            }),
            ScanConfig {
                event_capacity: 0,
                ..ScanConfig::default()
            },
        );
        assert!(matches!(
            result,
            Err(crate::error::QrcamError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn short_frame_is_dropped_and_decoder_freed() {
        let calls = Arc::new(Mutex::new(0u32));
        let decoder = FrameDecoder::new(
            Box::new(CountingDecoder {
                calls: Arc::clone(&calls),
                block_on: None,
                result: None,
            }),
            Arc::new(EventBus::new(8)),
        );
        let geometry = portrait_geometry();
        decoder.on_frame(&[0u8; 16], &geometry);
        assert_eq!(*calls.lock(), 0);

        // The busy flag was released; a full frame still goes through.
        decoder.on_frame(&frame(), &geometry);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*calls.lock(), 1);
    }
}
