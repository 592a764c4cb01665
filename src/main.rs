//! zoe: tool façade CLI for the orchestrator.
//!
//! Usage:
//!   zoe plan --task-file task.json            → generate + archive a plan
//!   zoe plan-and-dispatch --task-file t.json  → plan, archive, queue frontier
//!   zoe dispatch --plan-file plan.json        → queue ready subtasks
//!   zoe status [--task-id X | --plan-id Y]    → registry view
//!   zoe list-plans [--limit N]                → recent archived plans
//!   zoe invoke [--request-file r.json]        → JSON {tool, args} over stdio
//!   zoe schema [--pretty]                     → machine-readable tool contracts

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zoe::api;
use zoe::archive::save_plan;
use zoe::contract;
use zoe::errors::{PlannerError, Result};
use zoe::openclaw::OpenClawAdapter;
use zoe::paths;
use zoe::tools;

#[derive(Parser)]
#[command(
    name = "zoe",
    about = "Planning and dispatch façade for the single-host agent orchestrator",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a validated plan and archive it
    Plan {
        #[arg(long)]
        task_file: PathBuf,
        /// Use the legacy external OpenClaw planner instead of the internal engine
        #[arg(long, default_value_t = false)]
        external: bool,
    },
    /// Dispatch ready subtasks from an archived plan to the queue
    Dispatch {
        #[arg(long)]
        plan_file: PathBuf,
        #[arg(long, default_value_t = false)]
        watch: bool,
        #[arg(long, default_value_t = 5.0)]
        poll_interval_sec: f64,
    },
    /// Generate a plan and dispatch the first runnable subtasks
    PlanAndDispatch {
        #[arg(long)]
        task_file: PathBuf,
        #[arg(long, default_value_t = false)]
        watch: bool,
        #[arg(long, default_value_t = 5.0)]
        poll_interval_sec: f64,
    },
    /// Read task or plan status from the registry
    Status {
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        plan_id: Option<String>,
    },
    /// List recent archived plans
    ListPlans {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Invoke a tool with a JSON request ({tool, args}) from stdin or a file
    Invoke {
        #[arg(long)]
        request_file: Option<PathBuf>,
    },
    /// Print the machine-readable tool contracts
    Schema {
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zoe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn emit_json(payload: &Value) {
    match serde_json::to_string_pretty(payload) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}

fn load_request(request_file: Option<&PathBuf>) -> Result<Value> {
    let raw = match request_file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let payload: Value = serde_json::from_str(&raw)
        .map_err(|_| PlannerError::internal("Request payload is not valid JSON"))?;
    if !payload.is_object() {
        return Err(PlannerError::internal("Request payload must be a JSON object"));
    }
    Ok(payload)
}

async fn run(cli: Cli) -> Result<i32> {
    let base_dir = paths::default_base_dir();
    tracing::debug!(base_dir = %base_dir.display(), "resolved orchestrator base dir");

    match cli.command {
        Commands::Plan {
            task_file,
            external,
        } => {
            let task_input = tools::read_json_file(&task_file)?;
            if external {
                let request = tools::build_plan_request(&task_input)?;
                let plan = OpenClawAdapter::from_env().plan(&request).await?;
                let plan_file = save_plan(&plan, &base_dir)?;
                emit_json(&serde_json::json!({
                    "plan": plan.to_value(),
                    "planFile": plan_file.display().to_string(),
                }));
            } else {
                emit_json(&tools::plan_task(&task_input, &base_dir)?.to_value());
            }
            Ok(0)
        }
        Commands::Dispatch {
            plan_file,
            watch,
            poll_interval_sec,
        } => {
            let result = tools::dispatch_plan(&plan_file, &base_dir, watch, poll_interval_sec)?;
            emit_json(&result.to_value());
            Ok(0)
        }
        Commands::PlanAndDispatch {
            task_file,
            watch,
            poll_interval_sec,
        } => {
            let task_input = tools::read_json_file(&task_file)?;
            let result =
                tools::plan_and_dispatch_task(&task_input, &base_dir, watch, poll_interval_sec)?;
            emit_json(&result.to_value());
            Ok(0)
        }
        Commands::Status { task_id, plan_id } => {
            let result = tools::task_status(task_id.as_deref(), plan_id.as_deref(), &base_dir)?;
            emit_json(&result);
            Ok(0)
        }
        Commands::ListPlans { limit } => {
            emit_json(&tools::list_plans(&base_dir, limit)?);
            Ok(0)
        }
        Commands::Invoke { request_file } => {
            let mut tool_name: Option<String> = None;
            let outcome = load_request(request_file.as_ref()).and_then(|payload| {
                tool_name = payload
                    .get("tool")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                api::dispatch_tool_call(&payload, &base_dir)
            });
            match outcome {
                Ok(result) => {
                    emit_json(&api::success_payload(
                        tool_name.as_deref().unwrap_or("unknown"),
                        result,
                    ));
                    Ok(0)
                }
                Err(error) => {
                    emit_json(&api::failure_payload(tool_name.as_deref(), &error));
                    Ok(error.exit_code())
                }
            }
        }
        Commands::Schema { pretty } => {
            let payload = contract::tool_contracts_payload();
            if pretty {
                emit_json(&payload);
            } else {
                println!("{}", serde_json::to_string(&payload).unwrap_or_default());
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("{}: {error}", error.code());
            std::process::exit(error.exit_code());
        }
    }
}
