use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    models::{ImagesLimit, Plan, PlanTier, User},
};

/// Quota view over a [`User`] plus the set of job ids that already debited it.
///
/// The account itself is the source of truth for usage; the ledger only
/// remembers which jobs were charged so a retried completion cannot charge
/// twice.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    consumed: HashSet<Uuid>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The quota gate: unlimited plans always pass, otherwise usage must be
    /// below the limit.
    pub fn can_admit(user: &User) -> bool {
        user.images_limit.allows(user.images_processed)
    }

    /// Debits one image for `job_id`.
    ///
    /// A job id that was already charged returns `user` unchanged.
    pub fn consume(&mut self, user: &User, job_id: Uuid) -> Result<User> {
        if self.consumed.contains(&job_id) {
            tracing::debug!(job_id = %job_id, user_id = %user.id, "Quota already consumed for job");
            return Ok(user.clone());
        }

        if !Self::can_admit(user) {
            return Err(AppError::QuotaExceeded(exhausted_message(user)));
        }

        let mut updated = user.clone();
        updated.images_processed = updated.images_processed.saturating_add(1);
        self.consumed.insert(job_id);

        tracing::info!(
            job_id = %job_id,
            user_id = %user.id,
            images_processed = updated.images_processed,
            images_limit = %updated.images_limit,
            "Quota consumed"
        );

        Ok(updated)
    }

    #[cfg(test)]
    fn has_consumed(&self, job_id: Uuid) -> bool {
        self.consumed.contains(&job_id)
    }

    /// Forgets a debit that could not be persisted.
    pub fn release(&mut self, job_id: Uuid) -> bool {
        self.consumed.remove(&job_id)
    }

    /// Moves `user` onto `plan`. Usage is carried over unchanged.
    pub fn set_limit(user: &User, plan: &Plan) -> User {
        let mut updated = user.clone();
        updated.plan = plan.id;
        updated.images_limit = plan.images_limit;
        updated
    }

    pub fn usage(user: &User) -> UsageSummary {
        let usage_percentage = match user.images_limit {
            ImagesLimit::Unlimited => 0.0,
            ImagesLimit::Limited(limit) => {
                let pct = f64::from(user.images_processed) / f64::from(limit) * 100.0;
                (pct * 100.0).round() / 100.0
            }
        };

        UsageSummary {
            plan: user.plan,
            images_processed: user.images_processed,
            images_limit: user.images_limit,
            remaining_images: user.images_limit.remaining(user.images_processed),
            usage_percentage,
            can_process_more: Self::can_admit(user),
        }
    }
}

pub fn exhausted_message(user: &User) -> String {
    format!(
        "{} of {} images used on the {} plan; upgrade to continue",
        user.images_processed, user.images_limit, user.plan
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    pub plan: PlanTier,
    pub images_processed: u32,
    pub images_limit: ImagesLimit,
    /// `None` when the plan is unlimited.
    pub remaining_images: Option<u32>,
    pub usage_percentage: f64,
    pub can_process_more: bool,
}
