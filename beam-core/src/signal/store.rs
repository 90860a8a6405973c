//! Rendezvous store — opaque keyed storage for offer/answer blobs.
//!
//! The store only ever sees base64 blobs keyed by code; it learns
//! nothing about the transfer. Every operation is cancellable because
//! signalling can stall for the whole polling budget.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::BeamError;
use crate::signal::code::generate_code;

/// Delay before the first answer poll.
pub const POLL_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Delay between answer polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll attempts after the initial delay (total budget ≈55 s).
pub const POLL_ATTEMPTS: u32 = 10;

/// Keyed storage for session descriptions, addressed by code.
#[async_trait]
pub trait RendezvousStore: Send + Sync {
    /// Store `offer` under a fresh code and return the code.
    async fn create_session(
        &self,
        offer: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BeamError>;

    /// Fetch the offer stored under `code`.
    async fn get_offer(&self, code: &str, cancel: &CancellationToken)
    -> Result<String, BeamError>;

    /// Store the answer for `code`.
    async fn put_answer(
        &self,
        code: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BeamError>;

    /// Poll until the answer for `code` appears or the budget runs out.
    async fn wait_for_answer(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BeamError>;

    /// Remove the session; called on success and failure alike.
    async fn delete_session(&self, code: &str, cancel: &CancellationToken)
    -> Result<(), BeamError>;
}

// ── HTTP implementation ──────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct BlobBody {
    blob: String,
}

/// Authenticated JSON client for an HTTP rendezvous store.
///
/// Layout: `PUT/GET {base}/sessions/{code}/offer`, the same for
/// `answer`, and `DELETE {base}/sessions/{code}`. A missing answer is a
/// plain 404, which the poll loop treats as "not yet".
pub struct HttpRendezvousStore {
    client: reqwest::Client,
    base_url: String,
    creds: String,
}

impl HttpRendezvousStore {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.rendezvous_url.trim_end_matches('/').to_string(),
            creds: config.rendezvous_creds.clone(),
        }
    }

    fn url(&self, code: &str, leaf: &str) -> String {
        if leaf.is_empty() {
            format!("{}/sessions/{}", self.base_url, code)
        } else {
            format!("{}/sessions/{}/{}", self.base_url, code, leaf)
        }
    }

    async fn put_blob(
        &self,
        code: &str,
        leaf: &str,
        blob: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BeamError> {
        let request = self
            .client
            .put(self.url(code, leaf))
            .bearer_auth(&self.creds)
            .json(&BlobBody {
                blob: blob.to_string(),
            })
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BeamError::Cancelled),
            res = request => res.map_err(|e| BeamError::Signalling(e.to_string()))?,
        };
        if !response.status().is_success() {
            return Err(BeamError::Signalling(format!(
                "store rejected {leaf} upload: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// `Ok(None)` means the blob does not exist yet (404).
    async fn get_blob(
        &self,
        code: &str,
        leaf: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, BeamError> {
        let request = self
            .client
            .get(self.url(code, leaf))
            .bearer_auth(&self.creds)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BeamError::Cancelled),
            res = request => res.map_err(|e| BeamError::Signalling(e.to_string()))?,
        };
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BeamError::Signalling(format!(
                "store rejected {leaf} fetch: {}",
                response.status()
            )));
        }
        let body: BlobBody = response
            .json()
            .await
            .map_err(|e| BeamError::Signalling(e.to_string()))?;
        Ok(Some(body.blob))
    }
}

#[async_trait]
impl RendezvousStore for HttpRendezvousStore {
    async fn create_session(
        &self,
        offer: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BeamError> {
        let code = generate_code();
        self.put_blob(&code, "offer", offer, cancel).await?;
        Ok(code)
    }

    async fn get_offer(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BeamError> {
        self.get_blob(code, "offer", cancel)
            .await?
            .ok_or_else(|| BeamError::Signalling(format!("no session for code {code}")))
    }

    async fn put_answer(
        &self,
        code: &str,
        answer: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BeamError> {
        self.put_blob(code, "answer", answer, cancel).await
    }

    async fn wait_for_answer(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<String, BeamError> {
        sleep_cancellable(POLL_INITIAL_DELAY, cancel).await?;

        for attempt in 0..POLL_ATTEMPTS {
            if attempt > 0 {
                sleep_cancellable(POLL_INTERVAL, cancel).await?;
            }
            if let Some(answer) = self.get_blob(code, "answer", cancel).await? {
                return Ok(answer);
            }
            tracing::debug!(code, attempt, "answer not posted yet");
        }
        Err(BeamError::AnswerTimeout)
    }

    async fn delete_session(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BeamError> {
        let request = self
            .client
            .delete(self.url(code, ""))
            .bearer_auth(&self.creds)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BeamError::Cancelled),
            res = request => res.map_err(|e| BeamError::Signalling(e.to_string()))?,
        };
        // A session that is already gone is fine.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(BeamError::Signalling(format!(
                "store rejected delete: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

async fn sleep_cancellable(dur: Duration, cancel: &CancellationToken) -> Result<(), BeamError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BeamError::Cancelled),
        _ = tokio::time::sleep(dur) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let cfg = TransferConfig::new("https://store.example/", "secret");
        let store = HttpRendezvousStore::new(&cfg);
        assert_eq!(
            store.url("AbCd1234", "offer"),
            "https://store.example/sessions/AbCd1234/offer"
        );
        assert_eq!(
            store.url("AbCd1234", ""),
            "https://store.example/sessions/AbCd1234"
        );
    }

    #[tokio::test]
    async fn cancelled_sleep_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            sleep_cancellable(Duration::from_secs(60), &cancel).await,
            Err(BeamError::Cancelled)
        ));
    }
}
