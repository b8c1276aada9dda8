//!
//! sessionward CLI binary
//! ----------------------
//! Runs the session engine once against a remote authority: restores the cached
//! session, performs the requested command and prints the resulting state as JSON.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sessionward::storage::{FileBackend, MemoryBackend};
use sessionward::{AuthState, Clock, HttpAuthority, SessionConfig, SessionController, SystemClock, TieredSessionCache};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--data-dir <dir>] [--url <authority>] <command>\n\nCommands:\n  status                     restore the cached session and confirm it with the authority\n  sign-in <identifier> <secret>\n  sign-out\n  refresh                    re-read the session and privilege from the authority\n\nFlags:\n  --config <file>            JSON configuration (defaults apply to missing fields)\n  --data-dir <dir>           Where persistent tiers live (default: .sessionward)\n  --url <authority>          Base URL of the session authority\n  -h, --help                 Show this help\n\nEnvironment:\n  SESSIONWARD_* variables override the configuration file; RUST_LOG sets verbosity."
    );
}

enum Command {
    Status,
    SignIn { identifier: String, secret: String },
    SignOut,
    Refresh,
}

struct Args {
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    url: Option<String>,
    command: Command,
}

fn parse_args(program: &str, args: &[String]) -> Result<Args> {
    let mut config = None;
    let mut data_dir = None;
    let mut url = None;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--data-dir" | "--url" => {
                let flag = args[i].as_str();
                let value = args.get(i + 1).cloned().ok_or_else(|| anyhow!("{flag} requires a value"))?;
                match flag {
                    "--config" => config = Some(PathBuf::from(value)),
                    "--data-dir" => data_dir = Some(PathBuf::from(value)),
                    _ => url = Some(value),
                }
                i += 2;
            }
            "-h" | "--help" => {
                print_usage(program);
                std::process::exit(0);
            }
            other if other.starts_with("--") => return Err(anyhow!("unknown flag {other}")),
            other => {
                positional.push(other.to_string());
                i += 1;
            }
        }
    }
    let command = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["status"] | [] => Command::Status,
        ["sign-in", identifier, secret] => Command::SignIn { identifier: identifier.to_string(), secret: secret.to_string() },
        ["sign-out"] => Command::SignOut,
        ["refresh"] => Command::Refresh,
        other => return Err(anyhow!("unrecognised command: {}", other.join(" "))),
    };
    Ok(Args { config, data_dir, url, command })
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut cfg = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    cfg.apply_env(|k| env::var(k).ok())?;
    if let Some(dir) = &args.data_dir {
        cfg.data_dir = Some(dir.clone());
    }
    if let Some(url) = &args.url {
        cfg.authority_url = Some(url.clone());
    }
    Ok(cfg)
}

fn exit_code(state: &AuthState) -> i32 {
    match &state.last_error {
        Some(e) => e.exit_code(),
        None if state.is_authorized() => 0,
        None => 1,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut argv: Vec<String> = env::args().collect();
    let program = if argv.is_empty() { "sessionward".to_string() } else { argv.remove(0) };
    let args = match parse_args(&program, &argv) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{e}");
            print_usage(&program);
            std::process::exit(64);
        }
    };
    let cfg = load_config(&args)?;
    let url = cfg.authority_url.clone().context("no authority URL: pass --url or set SESSIONWARD_AUTHORITY_URL")?;
    let data_dir = cfg.data_dir.clone().unwrap_or_else(|| PathBuf::from(".sessionward"));
    info!(target: "sessionward", url = %url, data_dir = %data_dir.display(), "starting");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let persistent = FileBackend::new(data_dir.join("persistent")).context("opening persistent store")?;
    let small = FileBackend::new(data_dir.join("small")).context("opening small store")?;
    let cache = Arc::new(TieredSessionCache::new(
        &cfg,
        Arc::new(MemoryBackend::new()),
        Arc::new(persistent),
        Arc::new(small),
        clock.clone(),
    ));
    let authority = Arc::new(HttpAuthority::new(&url)?);
    let controller = SessionController::new(cfg, cache, authority, clock);

    let state = match args.command {
        Command::Status => {
            controller.start().await;
            controller.idle().await;
            controller.snapshot()
        }
        Command::SignIn { identifier, secret } => controller.sign_in(&identifier, &secret).await,
        Command::SignOut => {
            controller.start().await;
            controller.idle().await;
            controller.sign_out().await
        }
        Command::Refresh => {
            controller.start().await;
            controller.idle().await;
            controller.force_refresh().await
        }
    };

    // credentials never reach stdout
    let out = serde_json::json!({
        "phase": state.phase,
        "subject": state.subject,
        "privilege": state.privilege,
        "session_expires_at": state.session.as_ref().map(|s| s.expires_at),
        "last_error": state.last_error,
        "authorized": state.is_authorized(),
        "needs_reauthentication": state.needs_reauthentication(),
        "retryable": state.is_retryable(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    std::process::exit(exit_code(&state));
}
