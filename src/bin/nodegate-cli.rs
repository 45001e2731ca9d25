use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use nodegate::config::load_config;
use nodegate::panel::endpoint::{channel_url, PanelIdentity};
use nodegate::panel::user::USER_PATH;
use nodegate::panel::{Fetched, NodeApi, TransportClient};

#[derive(Parser)]
#[command(name = "nodegate-cli")]
#[command(about = "Panel diagnostics for nodegate nodes", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "nodegate.toml")]
    config: PathBuf,

    /// Index of the node in the config file
    #[arg(short, long, default_value_t = 0)]
    node: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the user list
    Users,
    /// Fetch online device counts
    Alive,
    /// Show the resolved channel endpoint
    Endpoint,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let node = config
        .nodes
        .get(cli.node)
        .ok_or_else(|| format!("no node at index {} ({} configured)", cli.node, config.nodes.len()))?;

    let client = TransportClient::new(&node.api)?;

    let output = match cli.command {
        Commands::Users => {
            let api = NodeApi::new(client);
            let users = match api.get_user_list().await? {
                Fetched::Updated(users) => json!({ "users": users }),
                Fetched::Unchanged => json!({ "unchanged": true }),
            };
            json!({
                "transport_state": api.client().channel_state().as_str(),
                "etag": api.user_etag(),
                "result": users,
            })
        }
        Commands::Alive => {
            let api = NodeApi::new(client);
            json!({ "alive": api.get_user_alive().await })
        }
        Commands::Endpoint => {
            let (mode, endpoint) = client.endpoint();
            let identity = PanelIdentity {
                node_type: client.node_type().to_string(),
                node_id: client.node_id(),
                token: "<redacted>".to_string(),
            };
            let sample = channel_url(&node.api, &identity, USER_PATH)?;
            json!({
                "mode": mode.as_str(),
                "endpoint": endpoint,
                "sample": sample.as_str(),
                "fallback": client.assemble_url(USER_PATH),
                "timeout_secs": client.timeout().as_secs(),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
