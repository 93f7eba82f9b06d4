use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the execution guard", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check guard status
    Status,
    /// Show cache, breaker, queue and retry statistics
    Stats,
    /// Show the health summary
    Health,
    /// Show the live configuration, or patch it with a JSON document
    Config {
        /// Partial update, e.g. '{"deduplication":{"ttl_seconds":60}}'
        #[arg(long)]
        set: Option<String>,
    },
    /// Reset a component
    Reset {
        #[arg(value_enum)]
        component: Component,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Component {
    Cache,
    CircuitBreaker,
    Queue,
    All,
}

impl Component {
    fn as_str(self) -> &'static str {
        match self {
            Component::Cache => "cache",
            Component::CircuitBreaker => "circuit-breaker",
            Component::Queue => "queue",
            Component::All => "all",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")).send().await?,
        Commands::Stats => client.get(format!("{base}/admin/stats")).send().await?,
        Commands::Health => client.get(format!("{base}/admin/health")).send().await?,
        Commands::Config { set: None } => client.get(format!("{base}/admin/config")).send().await?,
        Commands::Config { set: Some(patch) } => {
            let body: Value = serde_json::from_str(&patch)?;
            client
                .patch(format!("{base}/admin/config"))
                .json(&body)
                .send()
                .await?
        }
        Commands::Reset { component } => {
            client
                .post(format!("{base}/admin/reset"))
                .json(&json!({ "component": component.as_str() }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
