//! `orchestratorctl`: thin Operator CLI (§6.5) over the same JSON-RPC
//! surface `orchestratord` serves at `POST /rpc`. Every subcommand maps to
//! exactly one JSON-RPC method; this binary adds no privileged path of its
//! own, mirroring the source codebase's `symbiont-mcp` CLI-over-provider
//! idiom.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

/// Exit codes per §6.5.
const EXIT_OK: u8 = 0;
const EXIT_GENERIC: u8 = 1;
const EXIT_VALIDATION: u8 = 2;
const EXIT_AUTHORIZATION: u8 = 3;
const EXIT_BACKEND_UNAVAILABLE: u8 = 4;

#[derive(Parser)]
#[command(name = "orchestratorctl")]
#[command(about = "Operator CLI for the MCP Orchestrator control plane")]
struct Cli {
    /// Base URL of the orchestrator's JSON-RPC endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    endpoint: String,

    /// Print raw JSON responses instead of a formatted summary.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue depths, pool sizes, and DLQ depth.
    Status,
    /// Show aggregated analytics over a trailing window.
    Analytics {
        #[arg(long, default_value_t = 3600)]
        window_seconds: u64,
    },
    /// Scale a capability pool to an absolute worker count.
    Scale {
        pool: String,
        absolute: u32,
        #[arg(long, default_value_t = 1)]
        min: u32,
        #[arg(long, default_value_t = 64)]
        max: u32,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Pause a capability pool: workers finish in-flight claims, no new claims.
    Pause { pool: String },
    /// Resume a paused capability pool.
    Resume { pool: String },
    /// Reclaim idle pending entries for a stream/group back into circulation.
    Reclaim {
        stream: String,
        group: String,
        #[arg(long, default_value_t = 30_000)]
        min_idle_ms: u64,
    },
    /// List dead-lettered entries.
    DlqList,
    /// Replay a dead-lettered entry back onto its original stream.
    DlqReplay { entry_id: u64 },
    /// Submit an operator task directly (bypasses normal submitter quota checks).
    InjectTask {
        method: String,
        /// JSON-encoded params object.
        params: String,
        #[arg(long, default_value = "operator")]
        tenant_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_GENERIC)
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<u8> {
    let (method, params) = build_request(&cli.command)?;
    let response = call_rpc(&cli.endpoint, &method, params).await?;
    render(cli.json, &response)
}

fn build_request(command: &Commands) -> anyhow::Result<(String, Value)> {
    let request = match command {
        Commands::Status => ("status".to_string(), json!({})),
        Commands::Analytics { window_seconds } => ("analytics".to_string(), json!({ "window_seconds": window_seconds })),
        Commands::Scale { pool, absolute, min, max, reason } => (
            "control.scale".to_string(),
            json!({ "pool": capability_value(pool)?, "absolute": absolute, "min": min, "max": max, "reason": reason }),
        ),
        Commands::Pause { pool } => ("control.pause".to_string(), json!({ "pool": capability_value(pool)? })),
        Commands::Resume { pool } => ("control.resume".to_string(), json!({ "pool": capability_value(pool)? })),
        Commands::Reclaim { stream, group, min_idle_ms } => (
            "control.reclaim".to_string(),
            json!({ "stream": stream, "group": group, "min_idle_ms": min_idle_ms }),
        ),
        Commands::DlqList => ("control.dlq_list".to_string(), json!({})),
        Commands::DlqReplay { entry_id } => ("control.dlq_replay".to_string(), json!({ "entry_id": entry_id })),
        Commands::InjectTask { method, params, tenant_id } => {
            let parsed_params: Value = serde_json::from_str(params).map_err(|e| anyhow::anyhow!("invalid --params JSON: {e}"))?;
            (
                "inject.task".to_string(),
                json!({
                    "method": method,
                    "params": parsed_params,
                    "tenant_id": tenant_id,
                    "submitter_id": "operator",
                    "priority": "critical",
                }),
            )
        }
    };
    Ok(request)
}

/// `Capability` deserializes from its unit-variant names (`"reasoning"`,
/// `"codegen"`, `"ml"`, `"sandbox"`) or `{"custom": "..."}` for anything
/// else — accept either spelling from the operator.
fn capability_value(pool: &str) -> anyhow::Result<Value> {
    Ok(match pool {
        "reasoning" | "codegen" | "ml" | "sandbox" => json!(pool),
        other => json!({ "custom": other }),
    })
}

async fn call_rpc(endpoint: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let client = reqwest::Client::new();
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let response = client
        .post(format!("{endpoint}/rpc"))
        .json(&body)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("request to {endpoint} failed: {e}"))?;
    response
        .json::<Value>()
        .await
        .map_err(|e| anyhow::anyhow!("decoding JSON-RPC response: {e}"))
}

fn render(as_json: bool, response: &Value) -> anyhow::Result<u8> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(response)?);
    }

    if let Some(error) = response.get("error") {
        if !as_json {
            eprintln!("error: {}", error.get("message").and_then(Value::as_str).unwrap_or("unknown error"));
        }
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        return Ok(exit_code_for_rpc_error(code));
    }

    if !as_json {
        if let Some(result) = response.get("result") {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(EXIT_OK)
}

fn exit_code_for_rpc_error(code: i64) -> u8 {
    match code {
        -32602 | -32600 => EXIT_VALIDATION,
        -32001 | -32002 => EXIT_AUTHORIZATION,
        -32003 | -32004 => EXIT_BACKEND_UNAVAILABLE,
        _ => EXIT_GENERIC,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_capability_names_pass_through_as_strings() {
        assert_eq!(capability_value("reasoning").unwrap(), json!("reasoning"));
    }

    #[test]
    fn unknown_pool_name_becomes_a_custom_capability() {
        assert_eq!(capability_value("gpu-render").unwrap(), json!({ "custom": "gpu-render" }));
    }

    #[test]
    fn exit_codes_map_per_taxonomy() {
        assert_eq!(exit_code_for_rpc_error(-32602), EXIT_VALIDATION);
        assert_eq!(exit_code_for_rpc_error(-32001), EXIT_AUTHORIZATION);
        assert_eq!(exit_code_for_rpc_error(-32003), EXIT_BACKEND_UNAVAILABLE);
        assert_eq!(exit_code_for_rpc_error(-32060), EXIT_GENERIC);
    }
}
