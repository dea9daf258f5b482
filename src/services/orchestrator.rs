use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    auth::SessionContext,
    config::Config,
    database::AccountStore,
    errors::{AppError, Result},
    models::{FailureReason, JobProgress, JobStatus, PlanTier, ResultRef, SourceFile, UploadJob, User},
    services::{
        metrics::MetricsService,
        plan_catalog::UpgradeFlow,
        quota_ledger::{self, QuotaLedger, UsageSummary},
        upscaler::{self, UpscaleStatus, Upscaler, UpscalerError},
    },
    utils::file::FileRules,
};

/// Terminal jobs kept per session so their results stay downloadable.
pub const MAX_RETAINED_JOBS: usize = 16;

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub file_rules: FileRules,
    pub poll_interval: Duration,
    /// Upper bound on status polls before a job is failed.
    pub max_polls: u32,
    /// Factor used when a start request names none.
    pub default_scale: u8,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            file_rules: FileRules::default(),
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
            default_scale: 2,
        }
    }
}

impl ProcessingSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            file_rules: FileRules {
                max_file_size: config.max_file_size,
                allowed_mime_types: config.allowed_mime_types.clone(),
            },
            poll_interval: Duration::from_millis(config.upscaler_poll_interval_ms),
            max_polls: config.upscaler_max_polls,
            default_scale: config.upscale_factor,
        }
    }
}

/// Collaborators shared by every session's orchestrator.
#[derive(Clone)]
pub struct JobServices {
    pub store: Arc<dyn AccountStore>,
    pub upscaler: Arc<dyn Upscaler>,
    pub metrics: Arc<MetricsService>,
    pub settings: ProcessingSettings,
}

/// A completed job's deliverable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub result: ResultRef,
    pub file_name: String,
}

#[derive(Default)]
struct SessionJobs {
    active: Option<Uuid>,
    jobs: HashMap<Uuid, UploadJob>,
    order: VecDeque<Uuid>,
    cancel: Option<CancellationToken>,
}

impl SessionJobs {
    fn active_job(&self) -> Option<&UploadJob> {
        self.active.and_then(|id| self.jobs.get(&id))
    }

    fn get_mut(&mut self, job_id: Uuid) -> Result<&mut UploadJob> {
        self.jobs.get_mut(&job_id).ok_or(AppError::JobNotFound)
    }

    fn settle(&mut self, job_id: Uuid) -> Option<CancellationToken> {
        if self.active == Some(job_id) {
            self.active = None;
            return self.cancel.take();
        }
        None
    }

    fn insert(&mut self, job: UploadJob) {
        let id = job.id;
        self.jobs.insert(id, job);
        self.order.push_back(id);
        self.active = Some(id);

        while self.order.len() > MAX_RETAINED_JOBS {
            match self.order.pop_front() {
                Some(oldest) if Some(oldest) != self.active => {
                    self.jobs.remove(&oldest);
                }
                Some(oldest) => self.order.push_back(oldest),
                None => break,
            }
        }
    }

    fn discard(&mut self, job_id: Uuid) {
        self.jobs.remove(&job_id);
        self.order.retain(|id| *id != job_id);
        if self.active == Some(job_id) {
            self.active = None;
        }
    }
}

/// Owns the single active upload job of one session.
///
/// Admission, completion and plan changes each run under their own async lock:
/// `admission` rejects reentrant starts, `commit` orders completion against
/// cancellation, and `ledger` serializes every write to the account's quota.
pub struct JobOrchestrator {
    session: Arc<SessionContext>,
    services: JobServices,
    ledger: AsyncMutex<QuotaLedger>,
    jobs: Mutex<SessionJobs>,
    admission: AsyncMutex<()>,
    commit: AsyncMutex<()>,
    updates: watch::Sender<JobProgress>,
}

impl JobOrchestrator {
    pub fn new(session: Arc<SessionContext>, services: JobServices) -> Arc<Self> {
        let (updates, _) = watch::channel(JobProgress::idle());

        Arc::new(Self {
            session,
            services,
            ledger: AsyncMutex::new(QuotaLedger::new()),
            jobs: Mutex::new(SessionJobs::default()),
            admission: AsyncMutex::new(()),
            commit: AsyncMutex::new(()),
            updates,
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Validates `source` and makes it the session's selected job, replacing a
    /// previously selected one.
    pub fn select_file(&self, source: SourceFile) -> Result<UploadJob> {
        let _admission = self.admission.try_lock().map_err(|_| AppError::JobInProgress)?;

        let mut state = self.lock_jobs();
        if state.active_job().map(|job| job.status) == Some(JobStatus::Processing) {
            return Err(AppError::JobInProgress);
        }

        let job = match UploadJob::select(source, &self.services.settings.file_rules) {
            Ok(job) => job,
            Err(err) => {
                self.services.metrics.record_job_failed(FailureReason::InvalidFile.code());
                tracing::info!(session_id = %self.session.session_id(), error = %err, "File rejected");
                return Err(err);
            }
        };

        if let Some(replaced) = state.active {
            state.discard(replaced);
            tracing::debug!(job_id = %replaced, "Selected job replaced");
        }
        state.insert(job.clone());
        self.publish(job.progress_view());
        drop(state);

        self.services.metrics.record_job_selected();
        tracing::info!(
            session_id = %self.session.session_id(),
            job_id = %job.id,
            file_name = %job.source.file_name,
            media_type = %job.source.media_type,
            size_bytes = job.source.size_bytes,
            "File selected"
        );

        Ok(job)
    }

    /// Admits the selected job under the quota gate and starts driving it
    /// against the upscaler in the background. `scale` falls back to the
    /// configured default.
    pub async fn start_processing(self: &Arc<Self>, job_id: Uuid, scale: Option<u8>) -> Result<UploadJob> {
        let scale = scale.unwrap_or(self.services.settings.default_scale);
        if !upscaler::is_supported_scale(scale) {
            return Err(AppError::Validation(format!(
                "scale must be one of {:?}, got {}",
                upscaler::SUPPORTED_SCALES,
                scale
            )));
        }

        let _admission = self.admission.try_lock().map_err(|_| AppError::JobInProgress)?;

        {
            let state = self.lock_jobs();
            if state.active_job().map(|job| job.status) == Some(JobStatus::Processing) {
                return Err(AppError::JobInProgress);
            }
            if !state.jobs.contains_key(&job_id) {
                return Err(AppError::JobNotFound);
            }
        }

        let user = self.refresh_user().await?;
        if !QuotaLedger::can_admit(&user) {
            self.services.metrics.record_quota_denial();
            tracing::info!(
                user_id = %user.id,
                job_id = %job_id,
                images_processed = user.images_processed,
                images_limit = %user.images_limit,
                "Admission denied"
            );
            return Err(AppError::QuotaExceeded(quota_ledger::exhausted_message(&user)));
        }

        let token = CancellationToken::new();
        let (job, source) = {
            let mut state = self.lock_jobs();
            let job = state.get_mut(job_id)?;
            job.begin_processing(scale)?;
            let snapshot = job.clone();
            let source = job.source.clone();
            state.cancel = Some(token.clone());
            self.publish(snapshot.progress_view());
            (snapshot, source)
        };

        self.services.metrics.record_job_started();
        tracing::info!(user_id = %user.id, job_id = %job_id, scale, "Processing started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(job_id, source, scale, token).await;
        });

        Ok(job)
    }

    async fn drive(self: Arc<Self>, job_id: Uuid, source: SourceFile, scale: u8, token: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(job_id = %job_id, "Upscale abandoned after cancellation");
                return;
            }
            outcome = self.run_upscale(job_id, &source, scale) => outcome,
        };

        match outcome {
            Ok(result) => self.finish(job_id, result).await,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Upscaler failed");
                self.abort(job_id, FailureReason::ProcessingFailed, err.to_string());
            }
        }
    }

    async fn run_upscale(
        &self,
        job_id: Uuid,
        source: &SourceFile,
        scale: u8,
    ) -> std::result::Result<ResultRef, UpscalerError> {
        let upscaler = &self.services.upscaler;
        let settings = &self.services.settings;

        let handle = upscaler.submit(source, scale).await?;
        tracing::debug!(job_id = %job_id, handle = %handle, "Image submitted");

        for _ in 0..settings.max_polls {
            match upscaler.status(&handle).await? {
                UpscaleStatus::Running { progress } => {
                    self.record_progress(job_id, progress);
                }
                UpscaleStatus::Succeeded { result } => return Ok(result),
                UpscaleStatus::Failed { reason } => return Err(UpscalerError::Rejected(reason)),
            }
            tokio::time::sleep(settings.poll_interval).await;
        }

        Err(UpscalerError::Protocol(format!(
            "no result after {} status polls",
            settings.max_polls
        )))
    }

    /// Applies a progress report to a processing job. Stale reports are
    /// discarded and return false.
    pub fn record_progress(&self, job_id: Uuid, reported: u8) -> bool {
        let mut state = self.lock_jobs();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return false;
        };
        if !job.advance(reported) {
            return false;
        }
        self.publish(job.progress_view());
        true
    }

    async fn finish(&self, job_id: Uuid, result: ResultRef) {
        let _commit = self.commit.lock().await;

        let still_processing = self
            .lock_jobs()
            .jobs
            .get(&job_id)
            .is_some_and(|job| job.status == JobStatus::Processing);
        if !still_processing {
            return;
        }

        match self.commit_completion(job_id).await {
            Ok(user) => {
                self.session.replace_user(user);

                let mut state = self.lock_jobs();
                let completed = state.get_mut(job_id).and_then(|job| {
                    job.complete(result)?;
                    Ok(job.progress_view())
                });
                match completed {
                    Ok(view) => {
                        state.settle(job_id);
                        self.publish(view);
                        drop(state);
                        self.services.metrics.record_job_completed();
                        tracing::info!(job_id = %job_id, "Job completed");
                    }
                    Err(err) => tracing::error!(job_id = %job_id, error = %err, "Could not complete job"),
                }
            }
            Err(AppError::QuotaExceeded(message)) => {
                self.services.metrics.record_quota_denial();
                self.abort(job_id, FailureReason::QuotaExceeded, message);
            }
            Err(err) => {
                tracing::error!(job_id = %job_id, error = %err, "Could not record quota usage");
                self.abort(job_id, FailureReason::ProcessingFailed, err.to_string());
            }
        }
    }

    /// Debits the job against the freshest account record and persists it.
    async fn commit_completion(&self, job_id: Uuid) -> Result<User> {
        let mut ledger = self.ledger.lock().await;
        let current = self.refresh_user().await?;
        let charged = ledger.consume(&current, job_id)?;

        match self.services.store.update_subscription(&charged).await {
            Ok(persisted) => Ok(persisted),
            Err(err) => {
                ledger.release(job_id);
                Err(err)
            }
        }
    }

    fn abort(&self, job_id: Uuid, reason: FailureReason, message: String) {
        if let Err(err) = self.fail_job(job_id, reason, message) {
            tracing::debug!(job_id = %job_id, error = %err, "Job already settled");
        }
    }

    fn fail_job(&self, job_id: Uuid, reason: FailureReason, message: String) -> Result<UploadJob> {
        let mut state = self.lock_jobs();
        let job = state.get_mut(job_id)?;
        job.fail(reason, message)?;
        let snapshot = job.clone();

        if let Some(token) = state.settle(job_id) {
            token.cancel();
        }
        self.publish(snapshot.progress_view());
        drop(state);

        self.services.metrics.record_job_failed(reason.code());
        tracing::info!(job_id = %job_id, reason = reason.code(), "Job failed");
        Ok(snapshot)
    }

    /// Cancels a selected or processing job. Quota is never debited for it.
    pub async fn cancel(&self, job_id: Uuid) -> Result<UploadJob> {
        let _commit = self.commit.lock().await;
        self.fail_job(job_id, FailureReason::Cancelled, "Cancelled by user".to_string())
    }

    pub fn is_processing(&self) -> bool {
        self.lock_jobs().active_job().map(|job| job.status) == Some(JobStatus::Processing)
    }

    pub fn poll_progress(&self, job_id: Uuid) -> Result<JobProgress> {
        self.lock_jobs()
            .jobs
            .get(&job_id)
            .map(UploadJob::progress_view)
            .ok_or(AppError::JobNotFound)
    }

    /// Progress of the active job, else of the most recent one.
    pub fn current(&self) -> JobProgress {
        let state = self.lock_jobs();
        state
            .active_job()
            .or_else(|| state.order.back().and_then(|id| state.jobs.get(id)))
            .map(UploadJob::progress_view)
            .unwrap_or_else(JobProgress::idle)
    }

    pub fn job(&self, job_id: Uuid) -> Result<UploadJob> {
        self.lock_jobs().jobs.get(&job_id).cloned().ok_or(AppError::JobNotFound)
    }

    /// Reads the deliverable of a completed job. Repeatable.
    pub fn result(&self, job_id: Uuid) -> Result<JobResult> {
        let job = self.job(job_id)?;
        match (&job.status, &job.result, &job.failure) {
            (JobStatus::Completed, Some(result), _) => Ok(JobResult {
                job_id,
                file_name: job.download_name(),
                result: result.clone(),
            }),
            (JobStatus::Failed, _, Some(failure)) => Err(match failure.reason {
                FailureReason::Cancelled => AppError::Cancelled,
                FailureReason::QuotaExceeded => AppError::QuotaExceeded(failure.message.clone()),
                FailureReason::InvalidFile => AppError::InvalidFile(failure.message.clone()),
                FailureReason::ProcessingFailed => AppError::ProcessingFailed(failure.message.clone()),
            }),
            _ => Err(AppError::InvalidTransition(format!(
                "job {} has no result while it is {}",
                job_id, job.status
            ))),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.updates.subscribe()
    }

    /// Waits until `job_id` reaches a terminal state.
    pub async fn wait_until_settled(&self, job_id: Uuid) -> Result<UploadJob> {
        let mut updates = self.subscribe();
        loop {
            updates.borrow_and_update();
            let job = self.job(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if updates.changed().await.is_err() {
                return Err(AppError::Internal(anyhow::anyhow!("progress channel closed")));
            }
        }
    }

    pub fn usage(&self) -> UsageSummary {
        QuotaLedger::usage(&self.session.user())
    }

    /// Purchases `plan_id` for the session's account and persists the new limit.
    pub async fn upgrade(&self, flow: &UpgradeFlow, plan_id: &str, payment_token: &str) -> Result<User> {
        let _ledger = self.ledger.lock().await;
        let current = self.refresh_user().await?;
        let plan_label = plan_id.parse::<PlanTier>().map(|tier| tier.as_str()).unwrap_or("unknown");

        let upgraded = match flow.purchase(&current, plan_id, payment_token).await {
            Ok(user) => user,
            Err(err) => {
                self.services.metrics.record_purchase(plan_label, "failed");
                tracing::warn!(user_id = %current.id, plan = plan_label, error = %err, "Plan purchase failed");
                return Err(err.into());
            }
        };

        let persisted = self.services.store.update_subscription(&upgraded).await?;
        self.session.replace_user(persisted.clone());
        self.services.metrics.record_purchase(plan_label, "succeeded");
        Ok(persisted)
    }

    pub async fn cancel_subscription(&self, flow: &UpgradeFlow) -> Result<User> {
        let _ledger = self.ledger.lock().await;
        let current = self.refresh_user().await?;
        let downgraded = flow.cancel_subscription(&current);

        let persisted = self.services.store.update_subscription(&downgraded).await?;
        self.session.replace_user(persisted.clone());
        tracing::info!(user_id = %persisted.id, from_plan = %current.plan, "Subscription cancelled");
        Ok(persisted)
    }

    /// Cancels whatever is still active. Called when the session ends.
    pub async fn shutdown(&self) {
        let active = self.lock_jobs().active;
        if let Some(job_id) = active {
            if let Err(err) = self.cancel(job_id).await {
                tracing::debug!(job_id = %job_id, error = %err, "Nothing to cancel on shutdown");
            }
        }
    }

    async fn refresh_user(&self) -> Result<User> {
        let user = self
            .services
            .store
            .find_by_id(self.session.user_id())
            .await?
            .ok_or_else(|| AppError::Auth("Account no longer exists".to_string()))?;
        self.session.replace_user(user.clone());
        Ok(user)
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, SessionJobs> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, view: JobProgress) {
        self.updates.send_replace(view);
    }
}
