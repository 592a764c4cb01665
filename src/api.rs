//! JSON-over-stdio request/response layer: `{tool, args}` in, `{ok, ...}`
//! out. This is the surface the chat adapter binds to.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::contract;
use crate::errors::{PlannerError, Result};
use crate::tools;

fn args_f64(args: &Value, key: &str, default: f64) -> f64 {
    args.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn args_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn args_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Route one request payload to the matching tool.
pub fn dispatch_tool_call(payload: &Value, base_dir: &Path) -> Result<Value> {
    let tool = payload
        .get("tool")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !contract::is_known_tool(tool) {
        return Err(PlannerError::internal(format!("Unsupported tool: {tool}")));
    }
    let args = payload.get("args").cloned().unwrap_or_else(|| json!({}));
    if !args.is_object() {
        return Err(PlannerError::internal("Tool args must be a JSON object"));
    }

    match tool {
        "plan_task" => Ok(tools::plan_task(&args, base_dir)?.to_value()),
        "plan_and_dispatch_task" => Ok(tools::plan_and_dispatch_task(
            &args,
            base_dir,
            args_bool(&args, "watch"),
            args_f64(&args, "poll_interval_sec", 5.0),
        )?
        .to_value()),
        "dispatch_plan" => {
            let plan_file = args_str(&args, "planFile").ok_or_else(|| {
                PlannerError::internal("dispatch_plan requires args.planFile")
            })?;
            Ok(tools::dispatch_plan(
                &PathBuf::from(plan_file),
                base_dir,
                args_bool(&args, "watch"),
                args_f64(&args, "poll_interval_sec", 5.0),
            )?
            .to_value())
        }
        "task_status" => tools::task_status(
            args_str(&args, "task_id"),
            args_str(&args, "plan_id"),
            base_dir,
        ),
        "list_plans" => {
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
            tools::list_plans(base_dir, limit)
        }
        _ => Err(PlannerError::internal(format!(
            "Tool handler not implemented: {tool}"
        ))),
    }
}

pub fn success_payload(tool: &str, result: Value) -> Value {
    json!({
        "ok": true,
        "tool": tool,
        "result": result,
    })
}

pub fn failure_payload(tool: Option<&str>, error: &PlannerError) -> Value {
    json!({
        "ok": false,
        "tool": tool,
        "error": {
            "code": error.code(),
            "type": error.kind(),
            "message": error.to_string(),
        },
    })
}
