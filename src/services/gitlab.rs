//! Source-host branch comparison (GitLab-compatible compare API).

use serde::Deserialize;
use std::time::Duration;

use crate::domain::models::SourceUpdateSpec;

#[derive(Debug, Deserialize)]
struct CompareResponse {
    #[serde(default)]
    commits: Vec<serde_json::Value>,
}

/// Client for the repository compare endpoint, used to detect source
/// updates that have not been deployed yet.
pub struct SourceCompareClient {
    http: reqwest::Client,
}

impl Default for SourceCompareClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCompareClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Whether the dev branch carries commits the deploy branch lacks.
    ///
    /// `None` when the compare endpoint did not answer with success; the
    /// caller treats that as an execution failure, not as "no update".
    pub async fn updates_available(&self, spec: &SourceUpdateSpec) -> Option<bool> {
        let url = format!(
            "{}/api/v4/projects/{}/repository/compare?from={}&to={}&straight=true",
            spec.url, spec.project_id, spec.deploy_branch, spec.dev_branch
        );

        let response = match self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &spec.token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(project_id = spec.project_id, error = %err,
                    "source compare request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(project_id = spec.project_id, status = %response.status(),
                "source compare endpoint returned an error");
            return None;
        }

        match response.json::<CompareResponse>().await {
            Ok(diff) => Some(!diff.commits.is_empty()),
            Err(err) => {
                tracing::error!(project_id = spec.project_id, error = %err,
                    "source compare response unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(base: &str) -> SourceUpdateSpec {
        SourceUpdateSpec {
            url: base.to_string(),
            token: "secret".to_string(),
            project_id: 42,
            dev_branch: "develop".to_string(),
            deploy_branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commits_ahead_means_update_available() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock(
                "GET",
                "/api/v4/projects/42/repository/compare?from=main&to=develop&straight=true",
            )
            .match_header("PRIVATE-TOKEN", "secret")
            .with_status(200)
            .with_body(r#"{"commits": [{"id": "abc"}, {"id": "def"}]}"#)
            .create_async()
            .await;

        let client = SourceCompareClient::new();
        assert_eq!(client.updates_available(&spec(&server.url())).await, Some(true));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_commits_means_no_update() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/api/v4/projects/42/repository/compare?from=main&to=develop&straight=true",
            )
            .with_status(200)
            .with_body(r#"{"commits": []}"#)
            .create_async()
            .await;

        let client = SourceCompareClient::new();
        assert_eq!(client.updates_available(&spec(&server.url())).await, Some(false));
    }

    #[tokio::test]
    async fn test_error_status_yields_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/api/v4/projects/42/repository/compare?from=main&to=develop&straight=true",
            )
            .with_status(401)
            .create_async()
            .await;

        let client = SourceCompareClient::new();
        assert_eq!(client.updates_available(&spec(&server.url())).await, None);
    }
}
