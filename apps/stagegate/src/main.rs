//! # Stagegate - Stage Transition Gate
//!
//! The binary for the Stagegate prerequisite validation engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │              apps/stagegate (THE BINARY)          │
//! │                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌───────┐  │
//! │  │   CLI       │    │   HTTP API  │    │ TOML  │  │
//! │  │  (clap)     │    │   (axum)    │    │policy │  │
//! │  └──────┬──────┘    └──────┬──────┘    └───┬───┘  │
//! │         └──────────────────┼───────────────┘      │
//! │                            ▼                      │
//! │                  ┌──────────────────┐             │
//! │                  │  stagegate-core  │             │
//! │                  │   (THE LOGIC)    │             │
//! │                  └──────────────────┘             │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! stagegate server --host 0.0.0.0 --port 8080 --config stagegate.toml
//! stagegate validate --project 1 --stage technical_review
//! stagegate advance --project 1 --stage technical_review --user 7 \
//!     --bypass-reason "Drawings arrive Monday"
//! ```

use clap::Parser;
use stagegate::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // STAGEGATE_LOG_FORMAT=json enables machine-parseable output. Logs go to
    // stderr so --json-mode output on stdout stays parseable.
    let log_format = std::env::var("STAGEGATE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stagegate=info,stagegate_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!(code = e.code(), "Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┌┬┐┌─┐┌─┐┌─┐┌─┐┌─┐┌┬┐┌─┐
  └─┐ │ ├─┤│ ┬├┤ │ ┬├─┤ │ ├┤
  └─┘ ┴ ┴ ┴└─┘└─┘└─┘┴ ┴ ┴ └─┘

  Stage Transition Gate v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
