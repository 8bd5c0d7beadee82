//! `ackermann_mux` – drive-command multiplexer process.
//!
//! 1. Installs tracing (stderr, optional JSON / OTLP; see [`telemetry`]).
//! 2. Loads the TOML configuration from the first argument, else
//!    `$ACKMUX_CONFIG`, else `./ackermann_mux.toml`.  An invalid
//!    configuration exits with status 1 before anything starts.
//! 3. Starts the mux node and bridges it to stdio: JSON lines on stdin are
//!    published on their topics, forwarded commands are printed on stdout.
//! 4. Runs until Ctrl-C / SIGTERM.

mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use ackmux_core::{LogReporter, MuxConfig};
use ackmux_middleware::{MuxNode, TopicBus, stdio};
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "ackermann_mux.toml";

/// Pick the configuration file: CLI argument, then `ACKMUX_CONFIG`, then the
/// default file name in the working directory.
fn resolve_config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    let given = |p: &String| !p.trim().is_empty();
    arg.filter(given)
        .or_else(|| env.filter(given))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn main() -> ExitCode {
    let _guard = telemetry::init_tracing("ackermann_mux");

    let path = resolve_config_path(
        std::env::args().nth(1),
        std::env::var("ACKMUX_CONFIG").ok(),
    );
    let config = match MuxConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %path.display(),
        topics = config.topics.len(),
        locks = config.locks.len(),
        policy = %config.lock_stale_policy,
        "configuration loaded"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(config));
    // stdin is read on a blocking thread that will not notice shutdown.
    runtime.shutdown_timeout(Duration::from_millis(500));
    code
}

async fn run(config: MuxConfig) -> ExitCode {
    let bus = TopicBus::default();
    let output = bus.subscribe(&config.output_topic);

    let node = match MuxNode::new(&config, bus.clone(), Box::new(LogReporter)) {
        Ok(node) => node.start(),
        Err(e) => {
            error!(error = %e, "failed to build mux node");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "could not install signal handler");
    }

    let input = tokio::spawn(stdio::pump_input(bus, BufReader::new(tokio::io::stdin())));
    let printer = tokio::spawn(stdio::pump_output(output, tokio::io::stdout()));

    node.run_until(shutdown_rx).await;
    input.abort();
    printer.abort();
    info!("shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn argument_wins_over_environment() {
        let path = resolve_config_path(Some("a.toml".into()), Some("b.toml".into()));
        assert_eq!(path, PathBuf::from("a.toml"));
    }

    #[test]
    fn environment_used_without_argument() {
        let path = resolve_config_path(None, Some("/etc/ackmux.toml".into()));
        assert_eq!(path, PathBuf::from("/etc/ackmux.toml"));
    }

    #[test]
    fn blank_argument_defers_to_environment() {
        let path = resolve_config_path(Some(" ".into()), Some("/etc/ackmux.toml".into()));
        assert_eq!(path, PathBuf::from("/etc/ackmux.toml"));
    }

    #[test]
    fn falls_back_to_default_file() {
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            resolve_config_path(Some("  ".into()), None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn resolved_file_is_loadable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[topics]]\nname = \"nav\"\ntopic = \"nav_vel\"\ntimeout = 0.5\npriority = 10"
        )
        .unwrap();

        let path = resolve_config_path(Some(file.path().display().to_string()), None);
        let config = MuxConfig::load(&path).unwrap();
        assert_eq!(config.topics.len(), 1);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let path = resolve_config_path(Some("/nonexistent/ackermann_mux.toml".into()), None);
        assert!(MuxConfig::load(&path).is_err());
    }
}
