use clap::{Args as ClapArgs, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use game_qa::config;
use game_qa::detector::{DetectorConfig, HttpDetector};
use game_qa::flow::{FlowController, FlowError, FlowStatus, RunParams, StepUpdate};
use game_qa::runner::RunReport;
use game_qa::session::Session;
use game_qa::window::{Framebuffer, MockWindow, WindowHost};

/// game-qa - stepwise UI compliance testing for browser-hosted games
#[derive(Parser, Debug)]
#[command(
    name = "game-qa",
    about = "Drive a browser-hosted game through a detector-judged test flow",
    after_help = "ENVIRONMENT VARIABLES:\n\
        GAME_QA_DETECTOR_URL       Detector service base URL\n\
        GAME_QA_DETECTOR_TIMEOUT   Detector request timeout (s)\n\
        GAME_QA_CHROMIUM_PATH      Chromium executable\n\
        GAME_QA_HEADLESS           Run the browser headless\n\
        GAME_QA_VIEWPORT           Window size as WxH\n\
        GAME_QA_READINESS          selector:<css>, event:<name> or delay[:ms]\n\
        GAME_QA_SETTLE_DELAY       Wait after each click (ms)\n\
        GAME_QA_SESSION_DIR        Base directory for sessions\n\
        RUST_LOG                   Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Window options shared by `run` and `capture`
#[derive(ClapArgs, Debug, Clone)]
struct WindowArgs {
    /// Use the in-memory mock window instead of Chromium
    #[arg(long)]
    mock: bool,

    /// Run Chromium without a visible window
    #[arg(long)]
    headless: bool,

    /// Disable the Chromium sandbox (containers)
    #[arg(long)]
    no_sandbox: bool,

    /// Window size as WxH
    #[arg(long)]
    viewport: Option<String>,

    /// Readiness strategy: selector:<css>, event:<name>, delay or delay:<ms>
    #[arg(long)]
    readiness: Option<String>,

    /// Wait after each click in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a test flow against a game
    Run {
        /// Game URL to load
        #[arg(short, long)]
        url: String,

        /// Detector test type
        #[arg(short, long, default_value = "Regression")]
        test_type: String,

        /// Extra parameters forwarded to the detector, as JSON
        #[arg(long)]
        params: Option<String>,

        /// Manual click point for a class id, as CLASS:X:Y (repeatable)
        #[arg(long = "override", value_name = "CLASS:X:Y")]
        overrides: Vec<String>,

        /// Retry each class whose latest attempt failed, once, after the run
        #[arg(long)]
        retry_failed: bool,

        /// Output directory for screenshots and summary (kept)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the auto-generated session directory
        #[arg(long, short = 'k')]
        keep: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,

        /// Detector base URL
        #[arg(long, env = "GAME_QA_DETECTOR_URL", default_value = config::DEFAULT_DETECTOR_URL)]
        detector_url: String,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Check whether the detector is up
    Health {
        /// Detector base URL
        #[arg(long, env = "GAME_QA_DETECTOR_URL", default_value = config::DEFAULT_DETECTOR_URL)]
        detector_url: String,
    },

    /// List the test types the detector accepts
    TestTypes {
        /// Detector base URL
        #[arg(long, env = "GAME_QA_DETECTOR_URL", default_value = config::DEFAULT_DETECTOR_URL)]
        detector_url: String,
    },

    /// Open a game and save one screenshot
    Capture {
        /// Game URL to load
        #[arg(short, long)]
        url: String,

        /// Output file path
        #[arg(short, long, default_value = "./capture.png")]
        output: PathBuf,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Create a mock window frame for testing
    Mock {
        /// Width in pixels
        #[arg(short = 'W', long, default_value = "800")]
        width: u32,

        /// Height in pixels
        #[arg(short = 'H', long, default_value = "600")]
        height: u32,

        /// Output file path
        #[arg(short, long, default_value = "./mock_frame.png")]
        output: PathBuf,

        /// Fill color as hex (e.g., "ff0000" for red)
        #[arg(short, long, default_value = "181c24")]
        color: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            url,
            test_type,
            params,
            overrides,
            retry_failed,
            output,
            keep,
            json,
            detector_url,
            window,
        }) => {
            let mut run_params = RunParams::new(&url, &test_type);
            if let Some(raw) = params {
                let value: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| format!("Invalid --params JSON: {}", e))?;
                run_params = run_params.additional_params(value);
            }
            for raw in &overrides {
                let (class_id, x, y) = parse_override(raw)?;
                run_params = run_params.override_click(class_id, x, y);
            }

            let session = match output {
                Some(ref dir) => Session::in_dir(dir).keep(true),
                None => Session::with_name("run").keep(keep),
            }
            .game_url(&url);

            let detector = HttpDetector::new(&DetectorConfig::new(&detector_url))?;
            let host = build_window(&window)?;
            let mut controller =
                FlowController::new(Arc::new(detector), host).with_artifacts(session);

            // Ctrl-C asks the loop to stop before its next step
            let handle = controller.handle();
            let signal_task = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling after the current step");
                    if let Err(e) = handle.cancel() {
                        warn!(error = %e, "cancel request not delivered");
                    }
                }
            });

            let outcome = controller
                .run(run_params, |update| print_update(update, json))
                .await;
            signal_task.abort();

            match &outcome {
                Ok(summary) => info!(test_id = %summary.test_id, "run finished"),
                Err(FlowError::Cancelled) => info!("run cancelled"),
                Err(e) => warn!(error = %e, "run failed"),
            }

            let settled = matches!(
                controller.status(),
                FlowStatus::Complete | FlowStatus::Cancelled
            );
            if retry_failed && settled {
                for class_id in controller.history().failed_classes() {
                    if let Err(e) = controller
                        .retry_step(class_id, |update| print_update(update, json))
                        .await
                    {
                        warn!(class_id, error = %e, "retry failed");
                    }
                }
            }

            if let (Some(summary), Some(artifacts)) = (controller.summary(), controller.artifacts()) {
                if let Err(e) = artifacts.write_summary(&summary) {
                    warn!(error = %e, "failed to write summary");
                }
            }

            let report = RunReport::from_controller(&controller);
            if let Err(e) = controller.close().await {
                warn!(error = %e, "failed to close window");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, keep || output.is_some());
            }

            if let Err(e) = outcome {
                if !matches!(e, FlowError::Cancelled) {
                    return Err(e.into());
                }
            }
        }

        Some(Commands::Health { detector_url }) => {
            let detector = HttpDetector::new(&DetectorConfig::new(&detector_url).timeout(5))?;
            match detector.check_health().await {
                Ok(true) => println!("Detector healthy at {}", detector.base_url()),
                Ok(false) => {
                    return Err(format!("Detector at {} reported unhealthy", detector.base_url()).into());
                }
                Err(e) => {
                    return Err(format!("Detector not responding at {}: {}", detector.base_url(), e).into());
                }
            }
        }

        Some(Commands::TestTypes { detector_url }) => {
            let detector = HttpDetector::new(&DetectorConfig::new(&detector_url))?;
            let types = detector.test_types().await?;
            println!("{} test types:", types.len());
            for t in &types {
                println!("  {}", t);
            }
        }

        Some(Commands::Capture {
            url,
            output,
            window,
        }) => {
            let mut host = build_window(&window)?;
            let opened = host.open_or_reuse(&url).await?;
            let png = host.capture_screenshot().await?;
            std::fs::write(&output, &png)?;

            println!("Captured {}: {}", url, output.display());
            if let Ok(metrics) = host.window_metrics().await {
                println!(
                    "  Size: {}x{} (zoom {}, dpr {})",
                    metrics.width, metrics.height, metrics.zoom_factor, metrics.device_pixel_ratio
                );
            }
            println!("  Window: {} (reused: {})", host.source_type(), opened.reused);
            host.close().await?;
        }

        Some(Commands::Mock {
            width,
            height,
            output,
            color,
        }) => {
            let color_bytes = parse_hex_color(&color)?;
            let mut fb = Framebuffer::new(width, height, color_bytes);

            fb.draw_text(10, 10, "game-qa mock frame", [255, 255, 255], color_bytes);
            fb.draw_rect(10, 30, 100, 50, [128, 128, 128]);
            fb.draw_marker(60, 55, [255, 64, 64]);

            let png = fb.to_png()?;
            std::fs::write(&output, &png)?;

            println!("Created mock frame: {}", output.display());
            println!("  Size: {}x{}", fb.width(), fb.height());
        }

        None => {
            println!("game-qa - stepwise UI compliance testing for browser-hosted games");
            println!();
            println!("Usage: game-qa <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run         Run a test flow against a game");
            println!("  health      Check whether the detector is up");
            println!("  test-types  List the detector's test types");
            println!("  capture     Open a game and save one screenshot");
            println!("  mock        Create a mock window frame for testing");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}

fn build_window(args: &WindowArgs) -> Result<Box<dyn WindowHost>, Box<dyn Error>> {
    let cfg = &config::get().window;
    let (width, height) = match &args.viewport {
        Some(size) => config::parse_viewport(size)
            .ok_or_else(|| format!("Invalid viewport '{}'. Use WxH (e.g., 1280x800)", size))?,
        None => (cfg.width, cfg.height),
    };
    let settle_delay = args.settle_ms.map(Duration::from_millis);

    if args.mock {
        let mut window = MockWindow::new(width, height);
        if let Some(delay) = settle_delay {
            window = window.settle_delay(delay);
        }
        return Ok(Box::new(window));
    }

    #[cfg(feature = "browser")]
    {
        use game_qa::window::{CdpWindow, CdpWindowConfig};

        let mut window_config = CdpWindowConfig::from(cfg);
        window_config.width = width;
        window_config.height = height;
        window_config.headless |= args.headless;
        window_config.no_sandbox = args.no_sandbox;
        if let Some(delay) = settle_delay {
            window_config.settle_delay = delay;
        }
        if let Some(spec) = &args.readiness {
            let interval = Duration::from_millis(config::DEFAULT_READY_POLL);
            window_config.readiness = config::parse_readiness(spec, cfg.readiness.bound(), interval)
                .ok_or_else(|| format!("Invalid readiness '{}'", spec))?;
        }
        Ok(Box::new(CdpWindow::new(window_config)))
    }

    #[cfg(not(feature = "browser"))]
    {
        Err("built without the `browser` feature; use --mock".into())
    }
}

fn print_update(update: &StepUpdate, json: bool) {
    if json {
        return;
    }
    let result = &update.step_result;
    let confidence = result
        .detection
        .as_ref()
        .map(|d| format!(" (confidence {:.2})", d.confidence))
        .unwrap_or_default();
    let next = update
        .next_step
        .as_ref()
        .and_then(|n| n.class_id)
        .map(|c| format!(" -> next {}", c))
        .unwrap_or_default();
    println!(
        "  class {}: {}{}{}",
        result.class_id,
        if result.passed { "PASS" } else { "FAIL" },
        confidence,
        next
    );
}

fn print_report(report: &RunReport, kept: bool) {
    println!(
        "Run {:?}: {}/{} steps passed",
        report.status,
        report.passed_count(),
        report.steps.len()
    );
    if let Some(test_id) = &report.test_id {
        println!("  Test id: {}", test_id);
    }
    if let Some(result) = &report.final_result {
        println!("  Final result: {}", result);
    }
    if let Some(error) = &report.error {
        println!("  Error: {}", error);
    }
    if !report.failed_classes.is_empty() {
        println!("  Failed classes: {:?}", report.failed_classes);
    }
    if kept {
        if let Some(dir) = &report.session_dir {
            println!("\nSession: {}", dir.display());
        }
    }
}

fn parse_override(raw: &str) -> Result<(u32, f64, f64), Box<dyn Error>> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("Invalid override '{}'. Use CLASS:X:Y (e.g., 2:640:360)", raw).into());
    }
    let class_id = parts[0].trim().parse()?;
    let x: f64 = parts[1].trim().parse()?;
    let y: f64 = parts[2].trim().parse()?;
    if !x.is_finite() || !y.is_finite() {
        return Err(format!("Override coordinates must be finite: '{}'", raw).into());
    }
    Ok((class_id, x, y))
}

fn parse_hex_color(hex: &str) -> Result<[u8; 3], Box<dyn Error>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return Err("Color must be 6 hex digits (e.g., 'ff0000')".into());
    }
    let r = u8::from_str_radix(&hex[0..2], 16)?;
    let g = u8::from_str_radix(&hex[2..4], 16)?;
    let b = u8::from_str_radix(&hex[4..6], 16)?;
    Ok([r, g, b])
}
