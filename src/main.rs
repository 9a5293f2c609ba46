//! resilience-core host process.
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │                     resilience-core                          │
//!   │                                                              │
//!   │   config.toml ──▶ loader ──▶ ResilienceContext               │
//!   │        │                      ├─ CircuitBreakerRegistry      │
//!   │        ▼                      └─ TaskManager ◀── reaper      │
//!   │    watcher ──▶ breaker defaults                              │
//!   │                                                              │
//!   │   admin listener: /health/*, /admin/*   metrics: /metrics    │
//!   └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "resilience-core", version, about = "Circuit breakers and bounded background tasks")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    resilience_core::lifecycle::startup::run(&args.config).await?;
    Ok(())
}
