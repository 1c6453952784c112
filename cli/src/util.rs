use mcp_registry_core::session::SESSION_ID_KEY;
use serde_json::{Value, json};

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
    std::process::exit(1);
}

/// Parse a JSON command-line argument, exiting with a structured error when it
/// is malformed.
pub fn parse_json_arg(flag: &str, raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        exit_error(
            &format!("Invalid JSON in {flag}: {e}"),
            Some("Provide a valid JSON string, e.g. '{\"city\":\"Shanghai\"}'"),
        )
    })
}

/// Exit code for an HTTP status: 0=success (2xx), 1=client error (4xx),
/// 2=server error (everything else).
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// A request against the registry API.
pub struct ApiCall<'a> {
    pub method: reqwest::Method,
    pub path: &'a str,
    pub session_id: Option<&'a str>,
    pub body: Option<Value>,
}

impl<'a> ApiCall<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: reqwest::Method::GET,
            path,
            session_id: None,
            body: None,
        }
    }

    pub fn post(path: &'a str, body: Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            path,
            session_id: None,
            body: Some(body),
        }
    }

    pub fn session(mut self, session_id: Option<&'a str>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Send `call`, returning the HTTP status and JSON body. On a connection or
/// URL failure the structured error is printed and the exit code returned.
pub async fn send(api_url: &str, call: ApiCall<'_>) -> Result<(u16, Value), i32> {
    let url = match reqwest::Url::parse(&format!("{}{}", api_url.trim_end_matches('/'), call.path)) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {api_url}{}: {e}", call.path)
            });
            eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            return Err(1);
        }
    };

    let mut req = client().request(call.method, url);
    if let Some(session_id) = call.session_id {
        req = req.header(SESSION_ID_KEY, session_id);
    }
    if let Some(b) = call.body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check MCP_REGISTRY_API_URL."
            });
            eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            return Err(3);
        }
    };

    let status = resp.status().as_u16();
    let body = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    Ok((status, body))
}

/// Print a response body to stdout (exit code 0) or stderr (anything else).
pub fn print_response(body: &Value, exit_code: i32) {
    let formatted = serde_json::to_string_pretty(body).unwrap_or_default();
    if exit_code == 0 {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }
}

/// Execute an API request, print the response, return the structured exit code.
pub async fn api_request(api_url: &str, call: ApiCall<'_>) -> i32 {
    match send(api_url, call).await {
        Ok((status, body)) => {
            let code = exit_code_for(status);
            print_response(&body, code);
            code
        }
        Err(code) => code,
    }
}
