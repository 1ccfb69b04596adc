use async_trait::async_trait;
use llm_resilience_core::traits::HealthProbe;
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Probes a dependency with an HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
    expected_status: Option<StatusCode>,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>, expected_status: Option<u16>) -> anyhow::Result<Self> {
        let expected_status = expected_status
            .map(StatusCode::from_u16)
            .transpose()?;

        Ok(Self {
            client,
            url: url.into(),
            expected_status,
        })
    }

    fn accepts(&self, status: StatusCode) -> bool {
        match self.expected_status {
            Some(expected) => status == expected,
            None => status.is_success(),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> anyhow::Result<bool> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        debug!("Probe {} answered {}", self.url, status);
        Ok(self.accepts(status))
    }
}
