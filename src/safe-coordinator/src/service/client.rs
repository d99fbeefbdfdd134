use std::time::Duration;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use safe_tx_encoder::SafeSignature;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::schema::{
    ConfirmationRequest, Page, PageRequest, ProposalEcho, ProposalRequest, ServiceTransaction,
};
use crate::errors::{CoordinatorError, TransportError, ValidationError};
use crate::ports::CoordinationService;

const MAX_ERROR_BODY: usize = 2_000;

/// HTTP client for the Safe Transaction Service (`/api/v1`).
#[derive(Clone, Debug)]
pub struct SafeServiceClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl SafeServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CoordinatorError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn transport(&self, endpoint: &'static str, err: reqwest::Error) -> CoordinatorError {
        if err.is_timeout() {
            TransportError::TimedOut {
                endpoint,
                after: self.timeout,
            }
            .into()
        } else {
            TransportError::Connection(err.to_string()).into()
        }
    }

    /// Map non-success statuses; 5xx, 408 and 429 stay retryable.
    async fn check(&self, endpoint: &'static str, resp: Response) -> Result<String, CoordinatorError> {
        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await.map_err(|e| self.transport(endpoint, e))?;
        if status.is_success() {
            return Ok(body);
        }
        let body = truncate(body);
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(TransportError::Http {
                status: status.as_u16(),
                url,
                body,
            }
            .into());
        }
        Err(ValidationError::ServiceRejected {
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, CoordinatorError> {
    serde_json::from_str(body)
        .map_err(|e| ValidationError::MalformedResponse(e.to_string()).into())
}

fn checksummed(address: Address) -> String {
    address.to_checksum(None)
}

#[async_trait]
impl CoordinationService for SafeServiceClient {
    async fn propose(
        &self,
        safe: Address,
        proposal: &ProposalRequest,
    ) -> Result<Option<B256>, CoordinatorError> {
        let url = self.url(&format!("safes/{}/multisig-transactions/", checksummed(safe)));
        debug!(%url, safe_tx_hash = %proposal.contract_transaction_hash, "posting proposal");
        let resp = self
            .http
            .post(&url)
            .json(proposal)
            .send()
            .await
            .map_err(|e| self.transport("propose", e))?;
        let body = self.check("propose", resp).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        let echo: ProposalEcho = decode(&body)?;
        Ok(echo.identifier())
    }

    async fn transaction(
        &self,
        safe_tx_hash: B256,
    ) -> Result<Option<ServiceTransaction>, CoordinatorError> {
        let url = self.url(&format!("multisig-transactions/{safe_tx_hash}/"));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport("transaction", e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = self.check("transaction", resp).await?;
        decode(&body).map(Some)
    }

    async fn pending(
        &self,
        safe: Address,
        page: PageRequest,
    ) -> Result<Page<ServiceTransaction>, CoordinatorError> {
        let url = self.url(&format!(
            "safes/{}/multisig-transactions/?executed=false&limit={}&offset={}",
            checksummed(safe),
            page.limit,
            page.offset
        ));
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport("pending", e))?;
        let body = self.check("pending", resp).await?;
        decode(&body)
    }

    async fn confirm(
        &self,
        safe_tx_hash: B256,
        signature: &SafeSignature,
    ) -> Result<(), CoordinatorError> {
        let url = self.url(&format!("multisig-transactions/{safe_tx_hash}/confirmations/"));
        let resp = self
            .http
            .post(&url)
            .json(&ConfirmationRequest {
                signature: signature.to_hex(),
            })
            .send()
            .await
            .map_err(|e| self.transport("confirm", e))?;
        self.check("confirm", resp).await?;
        Ok(())
    }
}
