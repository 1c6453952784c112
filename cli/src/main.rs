use clap::{Parser, Subcommand};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "mcp-registry",
    version,
    about = "MCP Registry CLI: look up registered tools and test them against the execution backend"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "MCP_REGISTRY_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API and data store health
    Health,
    /// Check whether the MCP execution backend is reachable
    Status,
    /// Tool lookup and testing
    Tool {
        #[command(subcommand)]
        command: commands::tool::ToolCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Status => commands::status::run(&cli.api_url).await,
        Commands::Tool { command } => commands::tool::run(&cli.api_url, command).await,
    };

    std::process::exit(code);
}
