//! limen - Console Display Manager
//!
//! Entry point for the login manager binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use limen::auth::Validator;
use limen::config::{Config, LoggingConfig};
use limen::exit;
use limen::greet::ConsoleGreeter;
use limen::utils::{format_user_error, log_startup_diagnostics};
use limen::LoginManager;

/// Command-line arguments for limen
#[derive(Parser, Debug)]
#[command(name = "limen")]
#[command(version, about = "Console display manager", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "LIMEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Exercise the login flow inside the current session: attempts stop
    /// after authentication and no console or X server is touched
    #[arg(short, long, env = "LIMEN_PREVIEW")]
    pub preview: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact); defaults to the configured format
    #[arg(long)]
    pub log_format: Option<String>,

    /// Write logs to this file (in addition to stdout)
    #[arg(long, env = "LIMEN_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable the log file entirely
    #[arg(long)]
    pub no_log_file: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = run(args).await;
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    // Load configuration before logging so the logging section applies
    let config = match Config::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return exit::INIT;
        }
    };

    let _log_guard = match init_logging(&args, &config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", format_user_error(&e));
            return exit::INIT;
        }
    };

    info!("════════════════════════════════════════════════════════");
    info!("  limen v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Started: {}", chrono::Local::now().to_rfc3339());
    info!(
        "  Profile: {}",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );
    info!("════════════════════════════════════════════════════════");

    log_startup_diagnostics(&config);

    // Managing consoles, PAM sessions, and user ids all need root. Preview
    // mode stays inside the caller's session and runs unprivileged.
    if !args.preview && !nix::unistd::Uid::effective().is_root() {
        error!("Must run as root; use --preview to try it inside an existing session");
        return exit::INIT;
    }

    let validator = match build_validator(&config) {
        Some(validator) => validator,
        None => {
            error!("Built without the pam-auth feature; no credential validator available");
            return exit::INIT;
        }
    };
    let greeter = Box::new(ConsoleGreeter::new());

    info!("Initializing login manager");
    let mut manager = LoginManager::new(Arc::new(config), args.preview, validator, greeter);

    match manager.run().await {
        Ok(()) => {
            info!("Login manager shut down");
            exit::SUCCESS
        }
        Err(e) => {
            let code = e.exit_code();
            eprintln!("{}", format_user_error(&anyhow::Error::new(e)));
            code
        }
    }
}

#[cfg(feature = "pam-auth")]
fn build_validator(config: &Config) -> Option<Arc<dyn Validator>> {
    use limen::auth::pam::PamValidator;
    Some(Arc::new(PamValidator::new(config.auth.service.clone())))
}

#[cfg(not(feature = "pam-auth"))]
fn build_validator(_config: &Config) -> Option<Arc<dyn Validator>> {
    None
}

fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("limen={level},warn", level = log_level))
    });

    let format = args
        .log_format
        .as_deref()
        .unwrap_or(logging.format.as_str());

    let log_file = if args.no_log_file {
        None
    } else if let Some(path) = &args.log_file {
        Some(path.clone())
    } else if args.preview {
        // Preview runs unprivileged; the default directory under /var/log
        // is not writable then
        None
    } else {
        logging.log_dir.as_ref().map(|dir| dir.join("limen.log"))
    };

    // If a log file applies, write to both stdout and the file
    if let Some(path) = &log_file {
        let directory = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("limen.log"));
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory {:?}", directory))?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", path.display());
        Ok(Some(guard))
    } else {
        // Stdout only
        match format {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
        Ok(None)
    }
}
