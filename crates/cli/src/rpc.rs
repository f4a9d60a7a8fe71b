// Minimal JSON-RPC 2.0 client over HTTP

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to connect to daemon at {}", self.url))?
            .json()
            .await
            .context("Failed to parse response")?;

        if let Some(error) = response.error {
            anyhow::bail!("{} ({}): {}", describe(error.code), error.code, error.message);
        }

        response
            .result
            .ok_or_else(|| anyhow::anyhow!("No result in response"))
    }
}

fn describe(code: i32) -> &'static str {
    match code {
        4000 => "Invalid request",
        4001 => "Not found",
        4002 => "Conflict",
        5000 => "Engine error",
        _ => "RPC error",
    }
}
