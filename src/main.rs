use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "nodegate")]
#[command(about = "Panel-synced node agent with a shared-port HTTP mux", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "nodegate.toml")]
    config: PathBuf,

    /// Reload nodes when the configuration file changes
    #[arg(short, long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    nodegate::lifecycle::startup::run(&args.config, args.watch).await?;
    Ok(())
}
