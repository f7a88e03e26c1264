use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::PathBuf;
use std::time::Duration;

use nirbhay_config::{ConfigLoader, NirbhayConfig, WarningSeverity};
use nirbhay_core::NirbhayError;
use nirbhay_runtime::BackendClient;

mod serve;
mod simulate;

/// Nirbhay: autonomous travel-safety pipeline
#[derive(Parser, Debug)]
#[command(name = "nirbhay", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to nirbhay.toml config file
    #[arg(short, long, global = true, env = "NIRBHAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP backend
    Serve {
        /// Listen address override (e.g. 0.0.0.0:8001)
        #[arg(short = 'L', long)]
        listen: Option<String>,
    },
    /// Run one simulated trip end-to-end and print what happens
    Simulate(simulate::SimulateArgs),
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration and report gateway readiness
    Doctor,
    /// Show version and build info
    Version,
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> nirbhay_core::Result<()> {
        // Config first: it carries the log format.
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Serve { listen } => serve::cmd_serve(config_loader, listen).await,
            Commands::Simulate(args) => simulate::cmd_simulate(config, args).await,
            Commands::Config { json } => Self::cmd_config(&config, json),
            Commands::Doctor => Self::cmd_doctor(&config).await,
            Commands::Version => Self::cmd_version(),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: &NirbhayConfig, json: bool) -> nirbhay_core::Result<()> {
        let rendered = if json {
            serde_json::to_string_pretty(config)?
        } else {
            toml::to_string_pretty(config).map_err(|e| NirbhayError::Config(e.to_string()))?
        };
        println!("{rendered}");
        Ok(())
    }

    async fn cmd_doctor(config: &NirbhayConfig) -> nirbhay_core::Result<()> {
        println!("Nirbhay Doctor: configuration audit");
        println!();

        let warnings = config.validate().map_err(|reason| NirbhayError::ConfigValidation {
            field: "nirbhay.toml".into(),
            reason,
        })?;

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        println!();
        let services = &config.services;
        let readiness = |key: &Option<String>, missing: &'static str| if key.is_some() { "configured" } else { missing };
        println!("  sms:         {}", readiness(&services.fast2sms_api_key, "demo mode (simulated)"));
        println!("  push:        {}", readiness(&services.fcm_server_key, "demo mode (simulated)"));
        println!("  geolocation: {}", readiness(&services.unwired_labs_api_key, "not configured"));
        match services.backend_url.as_deref() {
            Some(url) => {
                let timeout = Duration::from_secs(services.telemetry_timeout_secs.max(1));
                println!("  backend:     {url} ({})", backend_status(url, timeout).await);
            }
            None => println!("  backend:     none (alerts go straight to gateways)"),
        }
        if config.escalation.safety_code.is_none() {
            println!("  \x1b[33mno safety code set: every code entry will alert\x1b[0m");
        }

        println!();
        println!("  {warn_count} warnings, {info_count} suggestions");
        Ok(())
    }

    fn cmd_version() -> nirbhay_core::Result<()> {
        println!("Nirbhay v{}", env!("CARGO_PKG_VERSION"));
        println!("   Rust edition: 2024");
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> nirbhay_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "nirbhay", &mut std::io::stdout());
        Ok(())
    }
}

/// One-line reachability summary for the configured backend.
async fn backend_status(url: &str, timeout: Duration) -> String {
    match BackendClient::new(url, timeout).health().await {
        Ok(health) => format!(
            "reachable, status {}, sms {}, push {}",
            health.status, health.services.sms, health.services.push
        ),
        Err(e) => format!("unreachable: {e}"),
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
fn init_tracing(level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .pretty()
            .with_target(false)
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate_flags() {
        let cli = Cli::try_parse_from([
            "nirbhay",
            "--verbose",
            "simulate",
            "--scenario",
            "gps-loss",
            "--answer",
            "yes",
            "--code",
            "1234",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.scenario, "gps-loss");
                assert_eq!(args.answer, Some(simulate::Answer::Yes));
                assert_eq!(args.code.as_deref(), Some("1234"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["nirbhay", "-v", "-q", "version"]).is_err());
    }

    #[tokio::test]
    async fn test_backend_status_reports_unreachable() {
        let status = backend_status("http://127.0.0.1:9", Duration::from_secs(2)).await;
        assert!(status.starts_with("unreachable"), "{status}");
    }

    #[tokio::test]
    async fn test_backend_status_reports_health() {
        let config = Arc::new(RwLock::new(NirbhayConfig::default()));
        let router = nirbhay_server::build_router(Arc::new(nirbhay_server::AppState::from_config(config)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let status = backend_status(&format!("http://{addr}"), Duration::from_secs(5)).await;
        assert!(status.starts_with("reachable, status healthy"), "{status}");
    }

    #[test]
    fn test_serve_listen_override() {
        let cli = Cli::try_parse_from(["nirbhay", "serve", "-L", "127.0.0.1:9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { listen: Some(ref l) } if l == "127.0.0.1:9000"));
    }
}
