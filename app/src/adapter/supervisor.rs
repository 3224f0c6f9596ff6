use anyhow::Context;
use infrastructure::HttpClientConfig;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_url")]
    pub url: String,
    pub token: String,
}

fn default_url() -> String {
    "http://supervisor/core/api/services/notify/persistent_notification".to_string()
}

impl NotificationSettings {
    pub fn new_notifier(&self) -> anyhow::Result<SupervisorNotifier> {
        SupervisorNotifier::new(&self.url, &self.token)
    }
}

/// Persistent notifications in the home-automation frontend.
#[derive(Debug, Clone)]
pub struct SupervisorNotifier {
    client: ClientWithMiddleware,
    url: String,
}

impl SupervisorNotifier {
    pub fn new(url: &str, token: &str) -> anyhow::Result<Self> {
        let client = HttpClientConfig::new(Some(token.to_owned())).new_tracing_client()?;

        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    #[tracing::instrument(skip(self, message))]
    pub async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "title": title,
            "message": message,
        });

        tracing::info!("Sending notification {:?}", title);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Error sending notification")?;

        response
            .error_for_status()
            .context("Notification rejected")?;

        Ok(())
    }
}
