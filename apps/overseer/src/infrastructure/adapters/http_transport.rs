use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::domain::agent::AgentAddress;
use crate::domain::ports::{TaskEnvelope, Transport, TransportError};

/// Path agents serve task intake on, relative to their address
const TASK_INTAKE_PATH: &str = "/tasks";

/// Transport that POSTs each envelope as JSON to the agent's HTTP address
///
/// A 2xx answer counts as accepted. Agents report back through the
/// overseer's `/api/tasks/:id/ack` and `/api/tasks/:id/complete` routes.
///
/// The overseer stays locked while a send is in flight, so an agent must
/// answer the intake POST first and call back afterwards. A callback made
/// from inside the intake handler waits on that lock until `send_timeout`
/// expires and the send counts as failed.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Arguments
    /// * `send_timeout` - Upper bound for one send, connect included
    pub fn new(send_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(send_timeout)
            .build()
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        Ok(Self { client })
    }

    fn intake_url(address: &AgentAddress) -> String {
        format!("{}{}", address.as_str().trim_end_matches('/'), TASK_INTAKE_PATH)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        address: &AgentAddress,
        envelope: &TaskEnvelope,
    ) -> Result<(), TransportError> {
        let url = Self::intake_url(address);

        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                address: address.to_string(),
                reason: format!("{} {}", status, reason).trim().to_string(),
            });
        }

        tracing::debug!(%url, task = %envelope.task_id, attempt = envelope.attempt, "Envelope accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Task, TaskId};
    use chrono::Utc;

    #[test]
    fn intake_url_joins_without_double_slash() {
        let address = AgentAddress::new("http://agent-1:7000/").unwrap();
        assert_eq!(HttpTransport::intake_url(&address), "http://agent-1:7000/tasks");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let task = Task::new(TaskId::new("t1").unwrap(), b"x".to_vec());
        let envelope = TaskEnvelope::new(&task, 1, Utc::now());

        let err = transport
            .send(&AgentAddress::new("http://127.0.0.1:1").unwrap(), &envelope)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }
}
