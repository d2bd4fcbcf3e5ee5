//! Runs the scanning pipeline end to end against a simulated camera: frames
//! are generated in-process and a threshold decoder stands in for a real
//! symbol reader. Useful for exercising the lifecycle, frame-drop and event
//! plumbing without hardware.

use anyhow::Result;
use clap::Parser;
use qrcam::decode::{DecodeFailure, DecodeHints, Decoded, LuminanceGrid, QrDecoder};
use qrcam::device::mock::{MockCameraSpec, MockProvider};
use qrcam::geometry::Point;
use qrcam::scanner::QrScanner;
use qrcam::ScanConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scan_sim")]
#[command(about = "Run the QR scanning pipeline against a simulated camera")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, help = "Path to TOML configuration file")]
    config: Option<String>,

    /// Number of preview frames to feed through the pipeline
    #[arg(short, long, default_value_t = 100)]
    frames: u32,

    /// Simulated preview frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Every Nth frame carries a decodable symbol
    #[arg(long, default_value_t = 10)]
    symbol_every: u32,

    /// Light the torch for the whole run
    #[arg(long)]
    torch: bool,

    /// Print default configuration in TOML format and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug level logging
    #[arg(short, long)]
    debug: bool,

    /// Enable quiet mode - only log errors
    #[arg(short, long)]
    quiet: bool,
}

/// Stand-in decoder: a frame whose first luminance sample is bright enough
/// counts as a symbol, with the grid corners as its corner points.
struct ThresholdDecoder {
    attempts: u32,
}

impl QrDecoder for ThresholdDecoder {
    fn decode(
        &mut self,
        grid: &LuminanceGrid,
        _hints: &DecodeHints,
    ) -> std::result::Result<Decoded, DecodeFailure> {
        self.attempts += 1;
        if grid.luminance().first().copied().unwrap_or(0) < 128 {
            return Err(DecodeFailure::NotFound);
        }
        let (w, h) = (grid.width() as f32, grid.height() as f32);
        Ok(Decoded {
            text: format!("simulated-symbol-{}", self.attempts),
            points: vec![
                Point::new(0.0, 0.0),
                Point::new(w, 0.0),
                Point::new(w, h),
                Point::new(0.0, h),
            ],
        })
    }

    fn reset(&mut self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", toml::to_string_pretty(&ScanConfig::default())?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting scan simulation v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => ScanConfig::load(Some(Path::new(path)))?,
        None => ScanConfig::default(),
    };

    let provider = Arc::new(MockProvider::new(vec![MockCameraSpec::default()]));
    let scanner = QrScanner::new(
        provider,
        Box::new(ThresholdDecoder { attempts: 0 }),
        config,
    )?;

    let mut events = scanner.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                qrcam::ScanEvent::Decoded { text, points, .. } => {
                    println!("decoded {:?} at {:?}", text, points);
                }
                other => info!("Event: {}", other.event_type()),
            }
        }
    });

    // A portrait 480x800 surface in its natural rotation.
    scanner.open(480, 800, 0).await?;
    scanner.start().await?;
    if args.torch {
        scanner.set_torch(true).await;
    }

    let (width, height) = scanner
        .preview_size()
        .ok_or_else(|| anyhow::anyhow!("no preview size after open"))?;
    let frame_period = Duration::from_millis(1000 / args.fps.max(1) as u64);

    for n in 0..args.frames {
        let symbol_frame = args.symbol_every > 0 && n % args.symbol_every == 0;
        let level = if symbol_frame { 200u8 } else { 20u8 };
        let frame = vec![level; (width * height) as usize];
        scanner.on_preview_frame(&frame);
        tokio::time::sleep(frame_period).await;
    }

    // Let the last decode drain before tearing down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    scanner.close().await;
    info!("Simulation finished after {} frames", args.frames);
    Ok(())
}

fn init_logging(args: &Args) {
    use tracing_subscriber::EnvFilter;

    let log_level = if args.debug {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qrcam={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
