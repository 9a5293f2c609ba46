use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Management CLI for resilience-core", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "RESILIENCE_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status
    Status,
    /// Breaker health report (no key needed)
    Health,
    /// Task manager health report (no key needed)
    TaskHealth,
    /// List breakers, or show one
    Breakers { name: Option<String> },
    /// Reset one breaker, or all of them
    Reset { name: Option<String> },
    /// Force a breaker open
    ForceOpen { name: String },
    /// List tracked tasks
    Tasks {
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Cancel every task in a group
    CancelGroup { group: String },
}

impl Commands {
    fn request(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "/admin/status".to_string()),
            Commands::Health => (Method::GET, "/health/circuit-breakers".to_string()),
            Commands::TaskHealth => (Method::GET, "/health/tasks".to_string()),
            Commands::Breakers { name: None } => (Method::GET, "/admin/breakers".to_string()),
            Commands::Breakers { name: Some(name) } => (Method::GET, format!("/admin/breakers/{}", name)),
            Commands::Reset { name: None } => (Method::POST, "/admin/breakers/reset".to_string()),
            Commands::Reset { name: Some(name) } => (Method::POST, format!("/admin/breakers/{}/reset", name)),
            Commands::ForceOpen { name } => (Method::POST, format!("/admin/breakers/{}/force-open", name)),
            Commands::Tasks { group: None } => (Method::GET, "/admin/tasks".to_string()),
            Commands::Tasks { group: Some(group) } => (Method::GET, format!("/admin/tasks?group={}", group)),
            Commands::CancelGroup { group } => (Method::POST, format!("/admin/tasks/groups/{}/cancel", group)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.request();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let body = res.text().await?;

    // Health endpoints answer 503 with a full report; show it either way.
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !body.is_empty() => println!("{}", body),
        Err(_) => {}
    }
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        std::process::exit(1);
    }
    Ok(())
}
