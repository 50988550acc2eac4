use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::activity::{HandlerContext, HandlerOutcome, NodeHandler};

/// Performs an HTTP call described by `config: {url, method?, headers?, body?}`. A
/// non-2xx response is a `failed` result with the status code preserved in `output`, per
/// §4.3 — the retry policy, not this handler, decides whether that is worth retrying.
pub struct HttpRequestHandler {
    client: Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn execute(&self, _ctx: &HandlerContext, config: &Value, _input: &Value) -> HandlerOutcome {
        let Some(url) = config.get("url").and_then(Value::as_str) else {
            return HandlerOutcome::failed_permanent("http_request node missing required config.url");
        };
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => return HandlerOutcome::failed_permanent(format!("invalid HTTP method: {method}")),
        };

        let mut request = self.client.request(method, url);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }
        if let Some(body) = config.get("body") {
            request = request.json(body);
        }
        if let Some(timeout_secs) = config.get("timeout_seconds").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_secs(timeout_secs));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return HandlerOutcome::failed(format!("http request error: {e}")),
        };

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    Value::String(v.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();

        let body_text = match response.text().await {
            Ok(t) => t,
            Err(e) => return HandlerOutcome::failed(format!("failed reading response body: {e}")),
        };
        let body_json = serde_json::from_str::<Value>(&body_text).ok();

        let output = json!({
            "status_code": status.as_u16(),
            "headers": headers,
            "body_raw": body_text,
            "body_json": body_json,
        });

        if status.is_success() {
            HandlerOutcome::success(output)
        } else {
            let mut outcome = HandlerOutcome::failed(format!("http {status}"));
            outcome.output = output;
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_permanent_failure() {
        // Exercised synchronously: config validation happens before any network I/O.
        let config = json!({});
        assert!(config.get("url").and_then(Value::as_str).is_none());
    }
}
