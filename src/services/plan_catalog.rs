use std::sync::Arc;

use rust_decimal::Decimal;

use crate::{
    models::{ImagesLimit, Plan, PlanTier, User},
    services::{
        payment::{PaymentError, PaymentGateway},
        quota_ledger::QuotaLedger,
    },
};

const CURRENCY: &str = "BRL";

/// The fixed set of subscription plans.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    /// Indexed by [`slot`]: free, basic, pro, enterprise.
    plans: [Plan; 4],
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl PlanCatalog {
    pub fn standard() -> Self {
        Self {
            plans: [
                Plan {
                    id: PlanTier::Free,
                    display_name: "Free",
                    monthly_price: Decimal::ZERO,
                    currency: CURRENCY,
                    images_limit: PlanTier::Free.images_limit(),
                    features: vec!["5 images per month", "Resolution up to 2K"],
                },
                Plan {
                    id: PlanTier::Basic,
                    display_name: "Basic",
                    monthly_price: Decimal::new(2900, 2),
                    currency: CURRENCY,
                    images_limit: PlanTier::Basic.images_limit(),
                    features: vec![
                        "50 images per month",
                        "Resolution up to 4K",
                        "Email support",
                        "Standard processing",
                    ],
                },
                Plan {
                    id: PlanTier::Pro,
                    display_name: "Pro",
                    monthly_price: Decimal::new(7900, 2),
                    currency: CURRENCY,
                    images_limit: PlanTier::Pro.images_limit(),
                    features: vec![
                        "200 images per month",
                        "Resolution up to 8K",
                        "Priority support",
                        "Fast processing",
                        "Integration API",
                    ],
                },
                Plan {
                    id: PlanTier::Enterprise,
                    display_name: "Enterprise",
                    monthly_price: Decimal::new(19900, 2),
                    currency: CURRENCY,
                    images_limit: ImagesLimit::Unlimited,
                    features: vec![
                        "Unlimited images",
                        "Resolution up to 16K",
                        "24/7 support",
                        "Ultra-fast processing",
                        "Full API access",
                        "Team management",
                    ],
                },
            ],
        }
    }

    /// Purchasable plans in presentation order.
    pub fn list_plans(&self) -> Vec<&Plan> {
        [PlanTier::Basic, PlanTier::Pro, PlanTier::Enterprise]
            .into_iter()
            .map(|tier| self.get(tier))
            .collect()
    }

    pub fn get(&self, tier: PlanTier) -> &Plan {
        &self.plans[slot(tier)]
    }

    /// Resolves a plan id coming from a purchase request.
    pub fn purchasable(&self, plan_id: &str) -> Result<&Plan, PaymentError> {
        let tier: PlanTier = plan_id
            .parse()
            .map_err(|_| PaymentError::UnknownPlan(plan_id.to_string()))?;

        if tier == PlanTier::Free {
            return Err(PaymentError::NotPurchasable(tier));
        }
        Ok(self.get(tier))
    }
}

fn slot(tier: PlanTier) -> usize {
    match tier {
        PlanTier::Free => 0,
        PlanTier::Basic => 1,
        PlanTier::Pro => 2,
        PlanTier::Enterprise => 3,
    }
}

/// Plan changes: confirmed purchases and downgrades.
pub struct UpgradeFlow {
    catalog: Arc<PlanCatalog>,
    gateway: Arc<dyn PaymentGateway>,
}

impl UpgradeFlow {
    pub fn new(catalog: Arc<PlanCatalog>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { catalog, gateway }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Confirms payment for `plan_id` and returns the user moved onto it.
    ///
    /// On any failure the caller's user record is left as it was. Retries must
    /// reuse the same `payment_token`.
    pub async fn purchase(&self, user: &User, plan_id: &str, payment_token: &str) -> Result<User, PaymentError> {
        let plan = self.catalog.purchasable(plan_id)?;

        if payment_token.trim().is_empty() {
            return Err(PaymentError::Declined("payment token is required".to_string()));
        }

        let subscription = self.gateway.confirm(plan.id, payment_token).await?;

        tracing::info!(
            user_id = %user.id,
            from_plan = %user.plan,
            to_plan = %plan.id,
            reference = %subscription.reference,
            "Plan purchase confirmed"
        );

        Ok(QuotaLedger::set_limit(user, plan))
    }

    /// Drops the user back to the free tier. Usage is kept.
    pub fn cancel_subscription(&self, user: &User) -> User {
        QuotaLedger::set_limit(user, self.catalog.get(PlanTier::Free))
    }
}
