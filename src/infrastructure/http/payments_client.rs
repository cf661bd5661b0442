use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error};
use url::Url;

use crate::domain::{
    entities::subscriptions::SubscriptionSnapshot,
    repositories::payments::PaymentsGateway,
    value_objects::{
        payments::{
            UpgradeRequest, UpgradeResponse, VerifyPendingResponse, VerifyRequest, VerifyResponse,
        },
        pricing::PricingCatalog,
    },
};

const PRICING_PATH: &str = "payments/pricing/";
const UPGRADE_PATH: &str = "payments/subscription/upgrade/";
const VERIFY_PATH: &str = "payments/verify/";
const VERIFY_PENDING_PATH: &str = "payments/verify-pending/";
const CURRENT_SUBSCRIPTION_PATH: &str = "payments/subscription/current/";

/// Backend payments API over reqwest.
pub struct PaymentsHttpClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl PaymentsHttpClient {
    /// `base_url` points at the API root, e.g. `https://api.example.com/api/`.
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("invalid API base URL: {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path: {path}"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, context: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "payments_client: GET");

        let resp = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .with_context(|| format!("{context}: request failed"))?;
        let resp = Self::ensure_success(resp, context).await?;

        resp.json()
            .await
            .with_context(|| format!("{context}: invalid response body"))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        context: &str,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "payments_client: POST");

        let resp = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .json(body)
            .send()
            .await
            .with_context(|| format!("{context}: request failed"))?;
        let resp = Self::ensure_success(resp, context).await?;

        resp.json()
            .await
            .with_context(|| format!("{context}: invalid response body"))
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };
        let preview = body.chars().take(512).collect::<String>();

        error!(
            status = %status,
            response_body = %preview,
            context = %context,
            "payments_client: api request failed"
        );

        anyhow::bail!("payments API request failed: {} (status {})", context, status);
    }
}

#[async_trait]
impl PaymentsGateway for PaymentsHttpClient {
    async fn fetch_pricing(&self) -> Result<PricingCatalog> {
        self.get_json(PRICING_PATH, "fetch pricing").await
    }

    async fn create_upgrade(&self, request: UpgradeRequest) -> Result<UpgradeResponse> {
        self.post_json(UPGRADE_PATH, &request, "create subscription upgrade")
            .await
    }

    async fn verify_payment(&self, reference: &str) -> Result<VerifyResponse> {
        let body = VerifyRequest {
            reference: reference.to_string(),
        };
        self.post_json(VERIFY_PATH, &body, "verify payment").await
    }

    async fn verify_pending_payments(&self) -> Result<VerifyPendingResponse> {
        self.post_json(
            VERIFY_PENDING_PATH,
            &serde_json::json!({}),
            "verify pending payments",
        )
        .await
    }

    async fn current_subscription(&self) -> Result<SubscriptionSnapshot> {
        self.get_json(CURRENT_SUBSCRIPTION_PATH, "fetch current subscription")
            .await
    }
}
