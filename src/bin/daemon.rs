use std::time::Duration;

use clap::Parser;

use zoe::config::Config;
use zoe::spawner::{Spawner, DEFAULT_POLL_MS};

#[derive(Parser)]
#[command(
    name = "zoe-daemon",
    about = "Queue watcher: spawns one agent per pending execution task"
)]
struct Cli {
    /// Polling interval for the queue directory, in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_MS)]
    poll_ms: u64,

    /// Process the queue once and exit (for cron-style operation)
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let spawner = Spawner::new(Config::from_env()).await;

    if cli.once {
        let spawned = spawner.process_queue_once().await;
        for id in spawned {
            println!("{id}");
        }
        return;
    }

    spawner.run(Duration::from_millis(cli.poll_ms)).await;
}
