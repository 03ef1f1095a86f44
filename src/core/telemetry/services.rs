use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::extract;
use super::types::ServiceStatus;
use crate::core::command::CommandRunner;

const CONNECTED_STATES: &[&str] = &["connected", "linked", "ready", "open", "online"];

fn is_connected_state(state: &str) -> bool {
    let state = state.trim().to_lowercase();
    CONNECTED_STATES.contains(&state.as_str())
}

fn names_whatsapp(map: &serde_json::Map<String, Value>) -> bool {
    ["id", "name", "channel", "type", "provider"].iter().any(|k| {
        map.get(*k)
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("whatsapp"))
    })
}

fn channel_connected(channel: &Value) -> bool {
    match channel {
        Value::Bool(b) => *b,
        Value::String(s) => is_connected_state(s),
        Value::Object(map) => {
            let flag = ["connected", "linked"]
                .iter()
                .any(|k| map.get(*k).and_then(Value::as_bool).unwrap_or(false));
            let state = ["status", "state"]
                .iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .any(is_connected_state);
            flag || state
        }
        _ => false,
    }
}

/// Finds the whatsapp channel anywhere in a status document, keyed
/// (`{"whatsapp": {...}}`) or listed (`[{"id": "whatsapp", ...}]`).
pub fn whatsapp_connected(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            if names_whatsapp(map) && channel_connected(value) {
                return true;
            }
            map.iter().any(|(key, child)| {
                (key.eq_ignore_ascii_case("whatsapp") && channel_connected(child))
                    || whatsapp_connected(child)
            })
        }
        Value::Array(items) => items.iter().any(whatsapp_connected),
        _ => false,
    }
}

/// Plain-text status output, one channel per line.
fn whatsapp_connected_text(stdout: &str) -> bool {
    stdout.lines().any(|line| {
        let line = line.to_lowercase();
        line.contains("whatsapp")
            && (line.contains("connected") || line.contains("linked"))
            && !line.contains("disconnected")
            && !line.contains("not connected")
            && !line.contains("not linked")
            && !line.contains("unlinked")
    })
}

#[derive(Debug, Clone)]
pub struct ServiceProbes {
    pub gateway_url: String,
    pub ollama_url: String,
    pub timeout: Duration,
    pub channels_command: String,
    pub command_timeout: Duration,
}

impl ServiceProbes {
    fn client(&self) -> Option<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .inspect_err(|e| debug!("Probe client unavailable: {}", e))
            .ok()
    }

    /// `require_success` false means any HTTP response proves liveness.
    async fn http_probe(
        client: Option<&reqwest::Client>,
        url: &str,
        require_success: bool,
        cancel: &CancellationToken,
    ) -> bool {
        let Some(client) = client else {
            return false;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            result = client.get(url).send() => match result {
                Ok(resp) => !require_success || resp.status().is_success(),
                Err(e) => {
                    debug!("Probe {} failed: {}", url, e);
                    false
                }
            },
        }
    }

    async fn whatsapp(&self, runner: &dyn CommandRunner, cancel: &CancellationToken) -> bool {
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            output = runner.run(&self.channels_command, self.command_timeout) => output,
        };
        let Some(stdout) = output.usable_stdout() else {
            return false;
        };
        match extract::json_from_cli(stdout) {
            Some(value) => whatsapp_connected(&value),
            None => whatsapp_connected_text(stdout),
        }
    }

    pub async fn fetch(&self, runner: &dyn CommandRunner, cancel: &CancellationToken) -> ServiceStatus {
        let client = self.client();
        let (gateway, ollama, whatsapp) = tokio::join!(
            Self::http_probe(client.as_ref(), &self.gateway_url, false, cancel),
            Self::http_probe(client.as_ref(), &self.ollama_url, true, cancel),
            self.whatsapp(runner, cancel)
        );
        debug!(gateway, ollama, whatsapp, "Probed companion services");
        ServiceStatus {
            gateway,
            whatsapp,
            ollama,
            checked_at: Utc::now(),
        }
    }
}
