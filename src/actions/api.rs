use std::{
    collections::BTreeMap,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use reqwest::{Method, blocking::Client};
use serde_json::json;

use super::{ActionContext, ActionOutcome, cooldown::CooldownTracker};

const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);
const USER_AGENT: &str = concat!("gesture-intent/", env!("CARGO_PKG_VERSION"));

fn default_endpoints() -> BTreeMap<String, String> {
    [
        ("gesture_webhook", "/api/gesture"),
        ("action_webhook", "/api/action"),
        ("system_control", "/api/system"),
        ("custom_endpoint", "/api/custom"),
    ]
    .iter()
    .map(|(name, path)| (name.to_string(), path.to_string()))
    .collect()
}

/// A parsed API command: optional HTTP method prefix, then a full URL or a
/// named endpoint under the base URL (`"PUT system_control"`).
#[derive(Clone, Debug, PartialEq, Eq)]
struct ApiRequest {
    method: Method,
    url: String,
}

/// Sends gesture events to an HTTP endpoint as JSON.
#[derive(Debug)]
pub struct ApiPlugin {
    client: Client,
    base_url: String,
    timeout: Duration,
    endpoints: BTreeMap<String, String>,
    cooldowns: CooldownTracker,
}

impl ApiPlugin {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.to_string(),
            timeout,
            endpoints: default_endpoints(),
            cooldowns: CooldownTracker::new(DEFAULT_COOLDOWN),
        })
    }

    /// Applies a new base URL and timeout, rebuilding the client when the
    /// timeout changes.
    pub fn configure(&mut self, base_url: &str, timeout: Duration) -> Result<()> {
        if timeout != self.timeout {
            self.client = build_client(timeout)?;
            self.timeout = timeout;
        }
        self.base_url = base_url.to_string();
        Ok(())
    }

    pub fn add_endpoint(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.endpoints.insert(name.into(), path.into());
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldowns.set_cooldown(cooldown);
        log::debug!("api cooldown set to {:?}", self.cooldowns.cooldown());
    }

    pub fn execute(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        let request = self.resolve(ctx.action);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let payload = json!({
            "gesture": ctx.gesture,
            "timestamp": timestamp,
            "confidence": ctx.confidence,
            "action_type": ctx.press.label(),
        });

        let builder = self.client.request(request.method.clone(), &request.url);
        let builder = if request.method == Method::GET {
            builder.query(&[
                ("gesture", ctx.gesture.to_string()),
                ("timestamp", timestamp.to_string()),
                ("confidence", ctx.confidence.to_string()),
                ("action_type", ctx.press.label().to_string()),
            ])
        } else if request.method == Method::DELETE {
            builder
        } else {
            builder.json(&payload)
        };

        match builder.send() {
            Ok(response) if response.status().as_u16() < 400 => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                log::info!(
                    "api action {} {} -> {}",
                    request.method,
                    request.url,
                    response.status()
                );
                ActionOutcome::executed("api", request.url)
            }
            Ok(response) => ActionOutcome::skipped("api_error")
                .with_action_type("api")
                .with_command(request.url)
                .with_error(format!("status {}", response.status())),
            Err(err) => {
                log::warn!("api request to {} failed: {err}", request.url);
                ActionOutcome::skipped("api_error")
                    .with_action_type("api")
                    .with_command(request.url)
                    .with_error(err.to_string())
            }
        }
    }

    pub fn execute_long_press(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        self.execute(ctx)
    }

    pub fn available_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.endpoints.keys().cloned().collect();
        actions.push("<http(s) url>".to_string());
        actions
    }

    fn resolve(&self, command: &str) -> ApiRequest {
        let command = command.trim();
        let (method, target) = match command.split_once(char::is_whitespace) {
            Some((prefix, rest)) => match parse_method(prefix) {
                Some(method) => (method, rest.trim()),
                None => (Method::POST, command),
            },
            None => (Method::POST, command),
        };

        let url = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            let path = self
                .endpoints
                .get(target)
                .map(String::as_str)
                .unwrap_or(target);
            join_url(&self.base_url, path)
        };
        ApiRequest { method, url }
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")
}

fn parse_method(token: &str) -> Option<Method> {
    match token.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actions::{ActionRequest, PressKind};

    fn plugin() -> ApiPlugin {
        ApiPlugin::new("http://localhost:8080/", Duration::from_millis(200)).unwrap()
    }

    #[test]
    fn resolves_named_endpoints_under_base_url() {
        let plugin = plugin();
        let request = plugin.resolve("gesture_webhook");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "http://localhost:8080/api/gesture");

        let request = plugin.resolve("hooks/palm");
        assert_eq!(request.url, "http://localhost:8080/hooks/palm");
    }

    #[test]
    fn full_urls_and_method_prefixes_pass_through() {
        let mut plugin = plugin();
        plugin.add_endpoint("lights", "/api/lights");

        let request = plugin.resolve("https://example.com/hook");
        assert_eq!(request.url, "https://example.com/hook");

        let request = plugin.resolve("put lights");
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.url, "http://localhost:8080/api/lights");

        let request = plugin.resolve("GET https://example.com/status");
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "https://example.com/status");
    }

    #[test]
    fn unreachable_server_is_an_api_error() {
        // Port 9 (discard) is closed on test machines; the connect fails fast.
        let mut plugin = ApiPlugin::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let request = ActionRequest::new("palm", PressKind::Short, 0.9);
        let outcome = plugin.execute(&ActionContext::new("gesture_webhook", &request));
        assert!(!outcome.executed);
        assert_eq!(outcome.reason.as_deref(), Some("api_error"));
        assert!(outcome.error.is_some());
    }
}
