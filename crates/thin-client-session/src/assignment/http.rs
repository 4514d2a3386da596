//! Assigner client over HTTP.

use serde::Serialize;
use thin_client_core::RelaySender;
use tokio::runtime::Handle;

use super::{AssignerClient, AssignmentOutcome, AssignmentResult, parse_assigner_response};

#[derive(Debug, Serialize)]
struct AssignmentRequest {
    protocol_version: u32,
}

/// Posts assignment requests to the assigner and relays the outcome back.
///
/// Requests run as tasks on the given runtime, off the main context.
#[derive(Debug, Clone)]
pub struct HttpAssignerClient {
    http: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl HttpAssignerClient {
    #[must_use]
    pub fn new(url: impl Into<String>, runtime: Handle) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            runtime,
        }
    }
}

impl AssignerClient for HttpAssignerClient {
    fn request_assignment(
        &self,
        access_token: &str,
        protocol_version: u32,
        reply: RelaySender<AssignmentOutcome>,
    ) {
        let request = self
            .http
            .post(&self.url)
            .bearer_auth(access_token)
            .json(&AssignmentRequest { protocol_version });

        self.runtime.spawn(async move {
            let outcome = match request.send().await {
                Ok(response) => read_response(response).await,
                Err(e) => {
                    tracing::warn!("Assigner request failed: {e}");
                    AssignmentOutcome::failed(AssignmentResult::NetworkFailure)
                }
            };
            if !reply.post(outcome) {
                tracing::debug!("Session is gone, dropping assignment outcome");
            }
        });
    }
}

async fn read_response(response: reqwest::Response) -> AssignmentOutcome {
    let status = response.status();
    let result = AssignmentResult::from_http_status(status.as_u16());
    if !result.is_ok() {
        tracing::warn!(%status, "Assigner refused the request: {result}");
        return AssignmentOutcome::failed(result);
    }

    match response.bytes().await {
        Ok(body) => parse_assigner_response(&body),
        Err(e) => {
            tracing::warn!("Failed to read assigner response: {e}");
            AssignmentOutcome::failed(AssignmentResult::NetworkFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use thin_client_core::relay;

    use super::*;

    #[tokio::test]
    async fn test_unreachable_assigner_is_network_failure() {
        // Port 9 on localhost has nothing listening.
        let client = HttpAssignerClient::new("http://127.0.0.1:9/assignment", Handle::current());
        let (reply_tx, mut reply_rx) = relay();

        client.request_assignment("token", 1, reply_tx);
        let outcome = reply_rx.next().await.unwrap();

        assert_eq!(
            outcome,
            AssignmentOutcome::failed(AssignmentResult::NetworkFailure)
        );
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(AssignmentRequest {
            protocol_version: 3,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "protocol_version": 3 }));
    }
}
