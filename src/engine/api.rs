// RinChat Core — HTTP catch-up API.
// Incremental history and the saved-configuration record are also exposed
// over plain HTTP; the client uses this path to resync outside the socket
// (e.g. when the page regains visibility). Errors here never mutate the
// store.

use crate::atoms::error::ClientResult;
use crate::engine::types::Message;
use serde::Deserialize;
use serde_json::Value;

pub struct HttpApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigResponse {
    #[serde(default)]
    config: Value,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Self {
        HttpApi {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self, session_id: &str, after: f64) -> String {
        format!("{}/api/sessions/{}/messages?after={}", self.base_url, session_id, after)
    }

    /// Incremental sync: messages with a timestamp strictly greater than
    /// `after`, filtered server-side.
    pub async fn fetch_messages(&self, session_id: &str, after: f64) -> ClientResult<Vec<Message>> {
        let url = self.messages_url(session_id, after);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: MessagesResponse = response.json().await?;
        Ok(body.messages)
    }

    /// Server-side copy of the saved configuration record.
    pub async fn fetch_config(&self) -> ClientResult<Value> {
        let url = format!("{}/api/config", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: ConfigResponse = response.json().await?;
        Ok(body.config)
    }

    pub async fn update_config(&self, config: &Value) -> ClientResult<()> {
        let url = format!("{}/api/config", self.base_url);
        self.client
            .post(&url)
            .json(&serde_json::json!({ "config": config }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url_shape() {
        let api = HttpApi::new("http://127.0.0.1:8000/");
        assert_eq!(
            api.messages_url("s1", 42.5),
            "http://127.0.0.1:8000/api/sessions/s1/messages?after=42.5"
        );
        assert_eq!(
            api.messages_url("s1", 0.0),
            "http://127.0.0.1:8000/api/sessions/s1/messages?after=0"
        );
    }
}
