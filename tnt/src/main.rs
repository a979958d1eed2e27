use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use time::{format_description, UtcOffset};
use tokio::signal::unix::SignalKind;
use tracing::*;
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use tnt_ssh::Config;

/// tnt -- an SSH-wrapped multi-user terminal chat room.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Port to listen on (overrides the PORT env var and the default).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Path to the SSH host key, generated on first run if absent.
    #[arg(long, default_value = "host_key")]
    host_key: PathBuf,

    /// Path to the append-only chat log.
    #[arg(long, default_value = "messages.log")]
    log: PathBuf,

    /// Swallows any unrecognized flag/value rather than rejecting it, per
    /// §6's "unknown flags are ignored" -- without disturbing clap's normal
    /// handling of recognized flags or the built-in `-h`/`--help`/`-V`.
    #[arg(hide = true, allow_hyphen_values = true, trailing_var_arg = true)]
    _unrecognized: Vec<String>,
}

/// Maps `TNT_SSH_LOG_LEVEL` (0..4) to a `tracing` level name, so a directive
/// scoped to the `tnt_ssh` target can be folded into the base `EnvFilter`
/// without requiring operators to touch `RUST_LOG` for SSH-layer verbosity.
fn ssh_level_name(level: u8) -> &'static str {
    match level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

fn init_logging(ssh_log_level: u8) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let ssh_directive: tracing_subscriber::filter::Directive =
        format!("tnt_ssh={}", ssh_level_name(ssh_log_level)).parse()?;
    let filter = EnvFilter::from_default_env().add_directive(ssh_directive);
    let env_filter = Arc::new(filter);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(OffsetTime::new(
            offset,
            format_description::parse("[day].[month].[year] [hour]:[minute]:[second]")
                .expect("static format description"),
        ))
        .with_filter(dynamic_filter_fn(move |m, c| env_filter.enabled(m, c.clone())));

    tracing_subscriber::registry().with(fmt_layer).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env(cli.port);
    init_logging(config.ssh_log_level)?;

    info!(port = config.port, bind = %config.bind_addr, "tnt starting");

    let server = tokio::spawn(tnt_ssh::run(config, cli.host_key, cli.log));

    #[cfg(target_os = "linux")]
    if let Ok(true) = sd_notify::booted() {
        let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);
    }

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received terminate, shutting down");
        }
        result = server => {
            match result {
                Ok(Err(error)) => {
                    error!(%error, "server exited with an error");
                    std::process::exit(1);
                }
                Err(join_error) => {
                    error!(%join_error, "server task panicked");
                    std::process::exit(1);
                }
                Ok(Ok(())) => {}
            }
        }
    }

    Ok(())
}
