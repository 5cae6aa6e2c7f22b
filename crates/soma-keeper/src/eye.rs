use std::time::Duration;

use serde_json::json;
use soma_domain::CheckInstanceId;
use tracing::{debug, warn};

use crate::error::KeeperError;

/// Notifies the downstream lookup service that a deployment changed.
///
/// The receiving side fetches the deployment back from
/// `<path>/<uuid>`; a non-2xx reply or a timeout is reported as a
/// failure against that deployment only.
#[derive(Debug, Clone)]
pub struct EyeNotifier {
    client: reqwest::Client,
    url: String,
    deployment_path: String,
}

impl EyeNotifier {
    /// `url` is the Eye notification endpoint; `soma_address` is this
    /// instance's public address, from which the deployment fetch path
    /// is derived.
    pub fn new(url: String, soma_address: &str, timeout_ms: u64) -> Result<Self, KeeperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| KeeperError::Internal(e.to_string()))?;
        Ok(EyeNotifier {
            client,
            url,
            deployment_path: format!("{}/deployments", soma_address.trim_end_matches('/')),
        })
    }

    pub async fn notify(&self, deployment: CheckInstanceId) -> Result<(), KeeperError> {
        let body = json!({
            "uuid": deployment,
            "path": self.deployment_path,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(%deployment, error = %e, "eye notification failed");
                KeeperError::Notification(e.to_string())
            })?;
        if !response.status().is_success() {
            warn!(%deployment, status = %response.status(), "eye rejected notification");
            return Err(KeeperError::Notification(format!(
                "eye returned {}",
                response.status()
            )));
        }
        debug!(%deployment, "eye notified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_uuid_and_path() {
        let server = MockServer::start().await;
        let deployment = CheckInstanceId::generate();
        Mock::given(method("POST"))
            .and(path("/api/v1/notify"))
            .and(body_partial_json(serde_json::json!({
                "uuid": deployment,
                "path": "http://soma.example.com:8888/deployments",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = EyeNotifier::new(
            format!("{}/api/v1/notify", server.uri()),
            "http://soma.example.com:8888",
            500,
        )
        .unwrap();
        notifier.notify(deployment).await.unwrap();
    }

    #[tokio::test]
    async fn non_2xx_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = EyeNotifier::new(server.uri(), "http://soma", 500).unwrap();
        let err = notifier.notify(CheckInstanceId::generate()).await.unwrap_err();
        assert!(matches!(err, KeeperError::Notification(_)));
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        // 50 ms budget against a 300 ms upstream
        let notifier = EyeNotifier::new(server.uri(), "http://soma", 50).unwrap();
        let err = notifier.notify(CheckInstanceId::generate()).await.unwrap_err();
        assert!(matches!(err, KeeperError::Notification(_)));
    }
}
