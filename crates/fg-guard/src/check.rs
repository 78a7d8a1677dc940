//! One-shot status check.

use async_trait::async_trait;
use reqwest::Client;

use crate::error::GuardError;
use crate::state::{GuardReason, GuardSettings, GuardState, StatusPayload};

/// Anything that can answer "is an agent active right now?".
///
/// The watcher maps an `Err` (and a panicking check) to `offline`.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, settings: &GuardSettings) -> Result<GuardState, GuardError>;
}

/// HTTP check of the `/status` endpoint.
#[derive(Clone)]
pub struct GuardCheck {
    client: Client,
}

impl GuardCheck {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("focusgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self { client }
    }

    /// Never fails: every failure mode is folded into an inactive state.
    /// A malformed server URL is answered without any network I/O.
    pub async fn check(&self, settings: &GuardSettings) -> GuardState {
        let Some(url) = settings.status_url() else {
            log::debug!("Rejecting guard server URL {:?}", settings.server_url);
            return GuardState::inactive(GuardReason::InvalidUrl);
        };

        let response = match self
            .client
            .get(url.clone())
            .timeout(settings.timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Status check against {} failed: {}", url, e);
                return GuardState::offline();
            }
        };

        let status = response.status();
        if !status.is_success() {
            log::debug!("Status server {} answered {}", url, status);
            return GuardState::inactive(GuardReason::ServerError)
                .with_message(format!("HTTP {}", status.as_u16()));
        }

        match response.json::<StatusPayload>().await {
            Ok(payload) => GuardState::from_status(&payload, settings.unlock_on_waiting),
            Err(e) => {
                log::debug!("Unreadable status body from {}: {}", url, e);
                GuardState::offline()
            }
        }
    }
}

impl Default for GuardCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSource for GuardCheck {
    async fn fetch(&self, settings: &GuardSettings) -> Result<GuardState, GuardError> {
        Ok(self.check(settings).await)
    }
}
