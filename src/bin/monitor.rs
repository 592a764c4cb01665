use std::time::Duration;

use clap::Parser;

use zoe::config::Config;
use zoe::supervisor::{Supervisor, DEFAULT_POLL_SECS};

#[derive(Parser)]
#[command(
    name = "zoe-monitor",
    about = "Supervisor loop: polls PR/CI state and drives retries"
)]
struct Cli {
    /// Polling interval in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_SECS)]
    poll_secs: u64,

    /// Run a single supervision pass and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut supervisor = Supervisor::new(Config::from_env());

    if cli.once {
        if let Err(e) = supervisor.tick().await {
            eprintln!("supervision pass failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    supervisor.run(Duration::from_secs(cli.poll_secs)).await;
}
