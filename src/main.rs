use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, info, warn};

use multidigit::core::history::{DEFAULT_HISTORY_LIMIT, RecognitionLog};
use multidigit::core::{CaptureMetadata, RecognitionRecord};
use multidigit::{DebugConfig, ModelHandle, RecognitionError, Recognizer, RecognizerConfig};

/// Exit status for failures the deployment must fix (missing or bad model)
const EXIT_OPERATOR_ERROR: u8 = 2;
/// Exit status for failures a new photo can fix
const EXIT_USER_ERROR: u8 = 3;

#[derive(Parser)]
#[command(name = "multidigit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Recognize handwritten digit sequences in photos")]
struct Cli {
    /// Path to the model artifact [default: $MODEL_PATH, then models/digit_model.json]
    #[arg(long = "model", global = true, value_name = "FILE")]
    model_path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize the digits in one image
    Recognize {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Number of digits the image is known to contain
        #[arg(long)]
        expected: Option<usize>,

        /// Store the upload and append the result to this directory's log
        #[arg(long, value_name = "DIR")]
        upload_dir: Option<PathBuf>,

        #[arg(long)]
        device_id: Option<String>,

        #[arg(long)]
        capture_source: Option<String>,

        /// Client capture time (ISO-8601); defaults to now
        #[arg(long)]
        timestamp: Option<String>,

        #[arg(long)]
        crop_box: Option<String>,

        /// Save debug outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Try to load the model and report readiness as JSON
    Health,
    /// Print the most recent logged recognitions as JSON lines
    History {
        #[arg(long, value_name = "DIR")]
        upload_dir: PathBuf,

        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<RecognitionError>() {
                Some(re) if re.is_user_recoverable() => ExitCode::from(EXIT_USER_ERROR),
                Some(_) => ExitCode::from(EXIT_OPERATOR_ERROR),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn run(args: Cli) -> anyhow::Result<()> {
    let config = match args.model_path {
        Some(model_path) => RecognizerConfig {
            model_path,
            ..RecognizerConfig::default()
        },
        None => RecognizerConfig::from_env(),
    };
    let model = Arc::new(ModelHandle::new(config.model_path));

    match args.command {
        Commands::Recognize {
            image_path,
            expected,
            upload_dir,
            device_id,
            capture_source,
            timestamp,
            crop_box,
            debug_out,
            json,
        } => {
            info!(path = %image_path.display(), "loading image");
            let bytes = std::fs::read(&image_path)?;

            let mut recognizer = Recognizer::with_model(model);
            if let Some(debug_dir) = debug_out {
                recognizer = recognizer.with_debug(DebugConfig::new(debug_dir)?);
            }

            // Stored even when recognition fails
            let stored = match &upload_dir {
                Some(dir) => {
                    let log = RecognitionLog::open(dir)?;
                    let name = image_path.file_name().and_then(|n| n.to_str());
                    let path = log.store_upload(&bytes, name)?;
                    Some((log, path))
                }
                None => None,
            };

            let result = recognizer.predict(&bytes, expected)?;

            if let Some((log, path)) = stored {
                let metadata = CaptureMetadata::new(device_id, capture_source, timestamp, crop_box)?;
                log.append(RecognitionRecord::new(path, result.clone(), metadata))?;
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\n=== Recognition Result ===");
                println!("Prediction: {}", result.prediction);
                println!("Accuracy: {:.2}%", result.accuracy);
                println!("Processing time: {} ms", result.processing_time_ms);
                for digit in &result.digits {
                    let b = digit.bbox;
                    println!(
                        "  {} at ({}, {}) {}x{} - confidence: {:.2}",
                        digit.label, b.x, b.y, b.width, b.height, digit.confidence
                    );
                }
            }
        }
        Commands::Health => {
            if let Err(e) = model.ensure_ready() {
                warn!(error = %e, "model not ready");
            }
            let report = serde_json::json!({
                "model_path": model.path().display().to_string(),
                "ready": model.is_ready(),
                "last_loaded_at": model.last_loaded_at(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::History { upload_dir, limit } => {
            let log = RecognitionLog::open(upload_dir)?;
            for entry in log.latest(limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }

    Ok(())
}
