use anyhow::{bail, Context, Result};
use console::style;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::render;

/// Fetch `GET /api/user` and print the result
pub async fn run(endpoint: Url, token: Option<String>) -> Result<()> {
    let mut request = Client::new().get(endpoint);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("Failed to reach the relay")?;
    let status = response.status();
    let body: Value = serde_json::from_str(&response.text().await?)
        .with_context(|| format!("Relay answered {} without a JSON body", status))?;

    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Request failed");
        bail!("{} ({})", message, status);
    }

    println!("{}", style("Signed in as").dim());
    render(&serde_json::to_string_pretty(&body["data"])?, "JSON")?;
    println!();
    Ok(())
}
