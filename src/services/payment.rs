use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::PlanTier;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("the {0} plan cannot be purchased")]
    NotPurchasable(PlanTier),

    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment gateway unavailable: {0}")]
    Gateway(String),
}

/// Confirmation returned by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: PlanTier,
    pub status: String,
    pub reference: String,
}

/// Payment provider seam. `payment_token` doubles as the idempotency key, so
/// confirming the same token twice must never bill twice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn confirm(&self, plan: PlanTier, payment_token: &str) -> Result<Subscription, PaymentError>;
}

pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest<'a> {
    payment_intent_id: &'a str,
    plan: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConfirmResponse {
    subscription: Subscription,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn confirm(&self, plan: PlanTier, payment_token: &str) -> Result<Subscription, PaymentError> {
        let mut request = self
            .client
            .post(format!("{}/confirm-payment", self.base_url))
            .header("Idempotency-Key", payment_token)
            .json(&ConfirmRequest {
                payment_intent_id: payment_token,
                plan: plan.as_str(),
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::Gateway(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(PaymentError::Gateway(format!("gateway returned {}", status)));
        }
        if !status.is_success() {
            let reason = response
                .json::<GatewayErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| format!("gateway returned {}", status));
            return Err(PaymentError::Declined(reason));
        }

        let body: ConfirmResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Gateway(format!("malformed confirmation: {}", e)))?;

        if body.subscription.plan != plan {
            return Err(PaymentError::Gateway(format!(
                "confirmation is for plan {}, expected {}",
                body.subscription.plan, plan
            )));
        }
        if body.subscription.status != "active" {
            return Err(PaymentError::Declined(format!(
                "subscription status is '{}'",
                body.subscription.status
            )));
        }

        Ok(body.subscription)
    }
}

/// In-process gateway used when no payment provider is configured.
///
/// Every token is accepted once per plan; tokens starting with
/// `tok_declined` are refused.
#[derive(Default)]
pub struct SimulatedPaymentGateway {
    confirmed: Mutex<HashMap<String, Subscription>>,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn confirm(&self, plan: PlanTier, payment_token: &str) -> Result<Subscription, PaymentError> {
        if payment_token.starts_with("tok_declined") {
            return Err(PaymentError::Declined("card was declined".to_string()));
        }

        let mut confirmed = self.confirmed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = confirmed.get(payment_token) {
            if existing.plan != plan {
                return Err(PaymentError::Declined(
                    "payment token was already used for another plan".to_string(),
                ));
            }
            return Ok(existing.clone());
        }

        let subscription = Subscription {
            plan,
            status: "active".to_string(),
            reference: format!("sub_{}", Uuid::new_v4().simple()),
        };
        confirmed.insert(payment_token.to_string(), subscription.clone());
        Ok(subscription)
    }
}
