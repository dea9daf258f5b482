use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_test::assert_err;
use uuid::Uuid;

use image_upscale_server::{
    auth::SessionContext,
    database::{AccountStore, MemoryStore},
    errors::AppError,
    models::{FailureReason, ImagesLimit, JobStatus, PlanTier, ResultRef, SourceFile, User},
    services::{
        metrics::MetricsService,
        orchestrator::{JobOrchestrator, JobServices, ProcessingSettings},
        payment::SimulatedPaymentGateway,
        plan_catalog::{PlanCatalog, UpgradeFlow},
        quota_ledger::QuotaLedger,
        upscaler::{SimulatedUpscaler, UpscaleHandle, UpscaleStatus, Upscaler, UpscalerError},
    },
};

const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
const WAIT: Duration = Duration::from_secs(5);

/// Plays back a fixed list of statuses, then never answers again.
struct ScriptedUpscaler {
    script: Mutex<VecDeque<UpscaleStatus>>,
    scales: Mutex<Vec<u8>>,
}

impl ScriptedUpscaler {
    fn new(script: Vec<UpscaleStatus>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            scales: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Upscaler for ScriptedUpscaler {
    async fn submit(&self, _image: &SourceFile, scale: u8) -> Result<UpscaleHandle, UpscalerError> {
        self.scales.lock().unwrap().push(scale);
        Ok(UpscaleHandle("scripted".to_string()))
    }

    async fn status(&self, _handle: &UpscaleHandle) -> Result<UpscaleStatus, UpscalerError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(status) => Ok(status),
            None => std::future::pending().await,
        }
    }
}

/// Succeeds once a permit is released by the test.
struct GatedUpscaler {
    gate: Semaphore,
}

#[async_trait]
impl Upscaler for GatedUpscaler {
    async fn submit(&self, _image: &SourceFile, _scale: u8) -> Result<UpscaleHandle, UpscalerError> {
        Ok(UpscaleHandle("gated".to_string()))
    }

    async fn status(&self, _handle: &UpscaleHandle) -> Result<UpscaleStatus, UpscalerError> {
        let _permit = self.gate.acquire().await.unwrap();
        Ok(UpscaleStatus::Succeeded {
            result: ResultRef::new("https://cdn.example.com/out.png"),
        })
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    metrics: Arc<MetricsService>,
    orchestrator: Arc<JobOrchestrator>,
}

async fn harness(plan: PlanTier, processed: u32, upscaler: Arc<dyn Upscaler>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let mut user = User::new("Bia", "bia@example.com", "hash".to_string());
    user.plan = plan;
    user.images_limit = plan.images_limit();
    user.images_processed = processed;
    let user = store.create_user(&user).await.unwrap();

    let metrics = Arc::new(MetricsService::new().unwrap());
    let services = JobServices {
        store: store.clone(),
        upscaler,
        metrics: metrics.clone(),
        settings: ProcessingSettings {
            poll_interval: Duration::ZERO,
            ..ProcessingSettings::default()
        },
    };
    let session = Arc::new(SessionContext::new(Uuid::new_v4(), user));

    Harness {
        store,
        metrics,
        orchestrator: JobOrchestrator::new(session, services),
    }
}

fn png(name: &str) -> SourceFile {
    SourceFile::new(name, "image/png", PNG_HEADER.to_vec())
}

impl Harness {
    async fn stored_user(&self) -> User {
        let id = self.orchestrator.session().user_id();
        self.store.find_by_id(id).await.unwrap().unwrap()
    }

    async fn process(&self, name: &str) -> Result<image_upscale_server::models::UploadJob, AppError> {
        let job = self.orchestrator.select_file(png(name))?;
        self.orchestrator.start_processing(job.id, None).await?;
        tokio::time::timeout(WAIT, self.orchestrator.wait_until_settled(job.id))
            .await
            .expect("job did not settle")
    }
}

#[tokio::test]
async fn test_last_image_of_basic_plan_exhausts_quota() {
    let h = harness(PlanTier::Basic, 49, Arc::new(SimulatedUpscaler::default())).await;

    let job = h.process("photo.png").await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.result.is_some());

    let user = h.stored_user().await;
    assert_eq!(user.images_processed, 50);
    assert!(!QuotaLedger::can_admit(&user));
    assert_eq!(h.orchestrator.session().user().images_processed, 50);
    assert_eq!(h.metrics.jobs_completed(), 1);

    let second = h.orchestrator.select_file(png("second.png")).unwrap();
    let denied = h.orchestrator.start_processing(second.id, None).await;
    assert!(matches!(denied, Err(AppError::QuotaExceeded(_))));
    assert_eq!(h.orchestrator.job(second.id).unwrap().status, JobStatus::Selected);
    assert_eq!(h.stored_user().await.images_processed, 50);
}

#[tokio::test]
async fn test_upgrade_after_exhaustion_restores_admission() {
    let h = harness(PlanTier::Basic, 50, Arc::new(SimulatedUpscaler::default())).await;
    let flow = UpgradeFlow::new(
        Arc::new(PlanCatalog::standard()),
        Arc::new(SimulatedPaymentGateway::new()),
    );

    let job = h.orchestrator.select_file(png("a.png")).unwrap();
    assert_err!(h.orchestrator.start_processing(job.id, None).await);

    let upgraded = h.orchestrator.upgrade(&flow, "pro", "pi_upgrade_1").await.unwrap();
    assert_eq!(upgraded.plan, PlanTier::Pro);
    assert_eq!(upgraded.images_limit, ImagesLimit::Limited(200));
    assert_eq!(upgraded.images_processed, 50);

    let stored = h.stored_user().await;
    assert_eq!(stored, upgraded);
    assert!(QuotaLedger::can_admit(&stored));

    h.orchestrator.start_processing(job.id, None).await.unwrap();
    let done = tokio::time::timeout(WAIT, h.orchestrator.wait_until_settled(job.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(h.stored_user().await.images_processed, 51);
}

#[tokio::test]
async fn test_declined_payment_keeps_plan() {
    let h = harness(PlanTier::Basic, 50, Arc::new(SimulatedUpscaler::default())).await;
    let flow = UpgradeFlow::new(
        Arc::new(PlanCatalog::standard()),
        Arc::new(SimulatedPaymentGateway::new()),
    );

    let result = h.orchestrator.upgrade(&flow, "pro", "tok_declined_card").await;
    assert!(matches!(result, Err(AppError::Payment(_))));

    let stored = h.stored_user().await;
    assert_eq!(stored.plan, PlanTier::Basic);
    assert_eq!(stored.images_limit, ImagesLimit::Limited(50));
}

#[tokio::test]
async fn test_non_image_file_is_rejected_and_session_stays_idle() {
    let h = harness(PlanTier::Free, 0, Arc::new(SimulatedUpscaler::default())).await;

    let pdf = SourceFile::new("report.pdf", "application/pdf", b"%PDF-1.7".to_vec());
    assert!(matches!(h.orchestrator.select_file(pdf), Err(AppError::InvalidFile(_))));

    let disguised = SourceFile::new("fake.png", "image/png", b"not really a png".to_vec());
    assert!(matches!(h.orchestrator.select_file(disguised), Err(AppError::InvalidFile(_))));

    let current = h.orchestrator.current();
    assert_eq!(current.status, JobStatus::Idle);
    assert_eq!(current.job_id, None);
}

#[tokio::test]
async fn test_cancel_while_processing_leaves_quota_untouched() {
    let upscaler = ScriptedUpscaler::new(vec![UpscaleStatus::Running { progress: 40 }]);
    let h = harness(PlanTier::Basic, 10, Arc::new(upscaler)).await;

    let job = h.orchestrator.select_file(png("a.png")).unwrap();
    let mut updates = h.orchestrator.subscribe();
    h.orchestrator.start_processing(job.id, None).await.unwrap();

    tokio::time::timeout(WAIT, updates.wait_for(|p| p.progress == 40))
        .await
        .unwrap()
        .unwrap();

    let cancelled = h.orchestrator.cancel(job.id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.failure.unwrap().reason, FailureReason::Cancelled);
    assert_eq!(cancelled.progress, 40);

    assert_eq!(h.stored_user().await.images_processed, 10);
    assert!(matches!(h.orchestrator.result(job.id), Err(AppError::Cancelled)));

    // The session is usable again.
    let next = h.orchestrator.select_file(png("b.png")).unwrap();
    assert_eq!(next.status, JobStatus::Selected);
}

#[tokio::test]
async fn test_second_start_while_processing_is_rejected() {
    let upscaler = ScriptedUpscaler::new(vec![UpscaleStatus::Running { progress: 5 }]);
    let h = harness(PlanTier::Pro, 0, Arc::new(upscaler)).await;

    let job = h.orchestrator.select_file(png("a.png")).unwrap();
    let started = h.orchestrator.start_processing(job.id, None).await.unwrap();
    assert_eq!(started.status, JobStatus::Processing);

    assert!(matches!(
        h.orchestrator.start_processing(job.id, None).await,
        Err(AppError::JobInProgress)
    ));
    assert!(matches!(
        h.orchestrator.select_file(png("b.png")),
        Err(AppError::JobInProgress)
    ));

    h.orchestrator.cancel(job.id).await.unwrap();
    assert_eq!(h.stored_user().await.images_processed, 0);
}

#[tokio::test]
async fn test_upscaler_failure_fails_job_without_debit() {
    let upscaler = ScriptedUpscaler::new(vec![
        UpscaleStatus::Running { progress: 10 },
        UpscaleStatus::Failed {
            reason: "model crashed".to_string(),
        },
    ]);
    let h = harness(PlanTier::Free, 2, Arc::new(upscaler)).await;

    let job = h.process("a.png").await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure.as_ref().unwrap().reason, FailureReason::ProcessingFailed);
    assert!(job.result.is_none());
    assert!(job.progress < 100);

    assert_eq!(h.stored_user().await.images_processed, 2);
    assert!(matches!(h.orchestrator.result(job.id), Err(AppError::ProcessingFailed(_))));
}

#[tokio::test]
async fn test_out_of_order_progress_is_discarded() {
    let upscaler = ScriptedUpscaler::new(vec![
        UpscaleStatus::Running { progress: 30 },
        UpscaleStatus::Running { progress: 20 },
        UpscaleStatus::Running { progress: 60 },
        UpscaleStatus::Running { progress: 100 },
        UpscaleStatus::Succeeded {
            result: ResultRef::new("https://cdn.example.com/a.png"),
        },
    ]);
    let h = harness(PlanTier::Free, 0, Arc::new(upscaler)).await;

    let job = h.orchestrator.select_file(png("a.png")).unwrap();
    let mut updates = h.orchestrator.subscribe();
    h.orchestrator.start_processing(job.id, None).await.unwrap();

    let mut seen = Vec::new();
    let collect = async {
        loop {
            updates.changed().await.unwrap();
            let view = updates.borrow_and_update().clone();
            seen.push((view.status, view.progress));
            if view.status.is_terminal() {
                break;
            }
        }
    };
    tokio::time::timeout(WAIT, collect).await.unwrap();

    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(seen
        .iter()
        .all(|(status, progress)| (*progress == 100) == (*status == JobStatus::Completed)));
    assert_eq!(seen.last(), Some(&(JobStatus::Completed, 100)));
}

#[tokio::test]
async fn test_quota_spent_elsewhere_fails_completion() {
    let upscaler = Arc::new(GatedUpscaler {
        gate: Semaphore::new(0),
    });
    let h = harness(PlanTier::Free, 4, upscaler.clone()).await;

    let job = h.orchestrator.select_file(png("a.png")).unwrap();
    h.orchestrator.start_processing(job.id, None).await.unwrap();

    // Another device uses the last free image meanwhile.
    let mut elsewhere = h.stored_user().await;
    elsewhere.images_processed = 5;
    h.store.update_subscription(&elsewhere).await.unwrap();

    upscaler.gate.add_permits(1);
    let settled = tokio::time::timeout(WAIT, h.orchestrator.wait_until_settled(job.id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(settled.status, JobStatus::Failed);
    assert_eq!(settled.failure.unwrap().reason, FailureReason::QuotaExceeded);
    assert!(settled.result.is_none());
    assert_eq!(h.stored_user().await.images_processed, 5);
}

#[tokio::test]
async fn test_unlimited_plan_always_admits() {
    let h = harness(PlanTier::Enterprise, 10_000, Arc::new(SimulatedUpscaler::new(50))).await;

    let job = h.process("big.png").await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.stored_user().await.images_processed, 10_001);

    let usage = h.orchestrator.usage();
    assert!(usage.can_process_more);
    assert_eq!(usage.remaining_images, None);
}

#[tokio::test]
async fn test_cancel_after_completion_is_rejected() {
    let h = harness(PlanTier::Basic, 0, Arc::new(SimulatedUpscaler::new(50))).await;

    let job = h.process("a.png").await.unwrap();
    assert!(matches!(
        h.orchestrator.cancel(job.id).await,
        Err(AppError::InvalidTransition(_))
    ));
    assert_eq!(h.orchestrator.job(job.id).unwrap().status, JobStatus::Completed);
    assert_eq!(h.stored_user().await.images_processed, 1);
}

#[tokio::test]
async fn test_jobs_are_scoped_to_their_session() {
    let a = harness(PlanTier::Free, 0, Arc::new(SimulatedUpscaler::default())).await;
    let b = harness(PlanTier::Free, 0, Arc::new(SimulatedUpscaler::default())).await;

    let job = a.orchestrator.select_file(png("a.png")).unwrap();
    assert!(matches!(b.orchestrator.poll_progress(job.id), Err(AppError::JobNotFound)));
    assert!(matches!(b.orchestrator.cancel(job.id).await, Err(AppError::JobNotFound)));
    assert_eq!(a.orchestrator.poll_progress(job.id).unwrap().status, JobStatus::Selected);
}

#[tokio::test]
async fn test_requested_scale_reaches_the_upscaler() {
    let succeeded = || UpscaleStatus::Succeeded {
        result: ResultRef::new("https://cdn.example.com/out.png"),
    };
    let upscaler = Arc::new(ScriptedUpscaler::new(vec![succeeded(), succeeded()]));
    let h = harness(PlanTier::Pro, 0, upscaler.clone()).await;

    let first = h.orchestrator.select_file(png("a.png")).unwrap();
    h.orchestrator.start_processing(first.id, Some(4)).await.unwrap();
    tokio::time::timeout(WAIT, h.orchestrator.wait_until_settled(first.id))
        .await
        .unwrap()
        .unwrap();

    let second = h.process("b.png").await.unwrap();
    assert_eq!(second.scale, Some(2));
    assert_eq!(*upscaler.scales.lock().unwrap(), vec![4, 2]);
}

#[tokio::test]
async fn test_finished_jobs_leave_no_simulated_predictions() {
    let upscaler = Arc::new(SimulatedUpscaler::new(25));
    let h = harness(PlanTier::Pro, 0, upscaler.clone()).await;

    for name in ["a.png", "b.png", "c.png"] {
        let job = h.process(name).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.source.data.is_empty());
    }
    assert_eq!(upscaler.pending(), 0);
}
