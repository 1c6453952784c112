use clap::Subcommand;
use mcp_registry_core::tools::ToolReference;
use serde_json::{Map, Value, json};

use crate::util::{ApiCall, api_request, exit_code_for, exit_error, parse_json_arg, print_response, send};

#[derive(Subcommand)]
pub enum ToolCommands {
    /// List all registered tools
    List,
    /// Resolve a tool reference (toolNum or primary key) to a valid tool
    Show {
        /// toolNum or primary key
        reference: String,
    },
    /// Invoke a tool through the MCP execution backend
    Test {
        /// toolNum or primary key
        reference: String,
        /// Tool arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
        /// Wind session id (falls back to WIND_SESSION_ID)
        #[arg(long, env = "WIND_SESSION_ID")]
        session: Option<String>,
    },
    /// Store a successful test run
    Save {
        /// toolNum or primary key
        reference: String,
        /// Arguments the test ran with, as JSON
        #[arg(long)]
        parameters: Option<String>,
        /// Outcome JSON returned by `tool test`
        #[arg(long)]
        result: String,
        /// Wind session id (falls back to WIND_SESSION_ID)
        #[arg(long, env = "WIND_SESSION_ID")]
        session: Option<String>,
    },
}

pub async fn run(api_url: &str, command: ToolCommands) -> i32 {
    match command {
        ToolCommands::List => api_request(api_url, ApiCall::get("/v1/tools")).await,
        ToolCommands::Show { reference } => {
            let path = format!("/v1/tools/{}", reference_arg(&reference));
            api_request(api_url, ApiCall::get(&path)).await
        }
        ToolCommands::Test {
            reference,
            args,
            session,
        } => test(api_url, &reference, args.as_deref(), session.as_deref()).await,
        ToolCommands::Save {
            reference,
            parameters,
            result,
            session,
        } => {
            let path = format!("/v1/tools/{}/test/save", reference_arg(&reference));
            let body = save_body(
                parameters.as_deref().map(|p| parse_json_arg("--parameters", p)),
                parse_json_arg("--result", &result),
            );
            api_request(api_url, ApiCall::post(&path, body).session(session.as_deref())).await
        }
    }
}

fn reference_arg(raw: &str) -> ToolReference {
    ToolReference::parse(raw).unwrap_or_else(|e| {
        exit_error(
            &e.to_string(),
            Some("Pass a positive toolNum or tool id, e.g. `mcp-registry tool show 100`"),
        )
    })
}

fn arguments_object(args: Option<Value>) -> Result<Map<String, Value>, String> {
    match args {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(format!("--args must be a JSON object, got {other}")),
    }
}

fn save_body(parameters: Option<Value>, result: Value) -> Value {
    let mut body = json!({ "testResult": result });
    if let Some(parameters) = parameters {
        body["testParameters"] = parameters;
    }
    body
}

/// A test that reached the backend but failed still answers 200; it exits
/// with 1 so scripts can tell.
fn outcome_exit_code(status: u16, body: &Value) -> i32 {
    match exit_code_for(status) {
        0 if body.get("isError").and_then(Value::as_bool) == Some(true) => 1,
        code => code,
    }
}

async fn test(api_url: &str, reference: &str, args: Option<&str>, session: Option<&str>) -> i32 {
    let path = format!("/v1/tools/{}/test", reference_arg(reference));
    let arguments = arguments_object(args.map(|a| parse_json_arg("--args", a)))
        .unwrap_or_else(|e| exit_error(&e, None));

    match send(api_url, ApiCall::post(&path, Value::Object(arguments)).session(session)).await {
        Ok((status, body)) => {
            let code = outcome_exit_code(status, &body);
            print_response(&body, code);
            code
        }
        Err(code) => code,
    }
}
