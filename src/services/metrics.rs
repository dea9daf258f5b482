use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus counters for the job workflow, kept on a private registry.
pub struct MetricsService {
    registry: Registry,
    jobs_selected: IntCounter,
    jobs_started: IntCounter,
    jobs_completed: IntCounter,
    jobs_failed: IntCounterVec,
    quota_denials: IntCounter,
    purchases: IntCounterVec,
    active_sessions: IntGauge,
}

impl MetricsService {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let jobs_selected = IntCounter::new("upscale_jobs_selected_total", "Files accepted for upscaling")?;
        let jobs_started = IntCounter::new("upscale_jobs_started_total", "Jobs admitted to processing")?;
        let jobs_completed = IntCounter::new("upscale_jobs_completed_total", "Jobs that produced a result")?;
        let jobs_failed = IntCounterVec::new(
            Opts::new("upscale_jobs_failed_total", "Jobs that ended in failure"),
            &["reason"],
        )?;
        let quota_denials = IntCounter::new("upscale_quota_denials_total", "Admissions refused by the quota gate")?;
        let purchases = IntCounterVec::new(
            Opts::new("plan_purchases_total", "Plan purchase attempts"),
            &["plan", "outcome"],
        )?;
        let active_sessions = IntGauge::new("upscale_active_sessions", "Sessions holding a job orchestrator")?;

        registry.register(Box::new(jobs_selected.clone()))?;
        registry.register(Box::new(jobs_started.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(jobs_failed.clone()))?;
        registry.register(Box::new(quota_denials.clone()))?;
        registry.register(Box::new(purchases.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            jobs_selected,
            jobs_started,
            jobs_completed,
            jobs_failed,
            quota_denials,
            purchases,
            active_sessions,
        })
    }

    pub fn record_job_selected(&self) {
        self.jobs_selected.inc();
    }

    pub fn record_job_started(&self) {
        self.jobs_started.inc();
    }

    pub fn record_job_completed(&self) {
        self.jobs_completed.inc();
    }

    pub fn record_job_failed(&self, reason: &str) {
        self.jobs_failed.with_label_values(&[reason]).inc();
    }

    pub fn record_quota_denial(&self) {
        self.quota_denials.inc();
    }

    pub fn record_purchase(&self, plan: &str, outcome: &str) {
        self.purchases.with_label_values(&[plan, outcome]).inc();
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.get()
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_values() {
        let metrics = MetricsService::new().unwrap();
        metrics.record_job_completed();
        metrics.record_job_failed("cancelled");
        metrics.record_purchase("pro", "succeeded");

        let text = metrics.render().unwrap();
        assert!(text.contains("upscale_jobs_completed_total 1"));
        assert!(text.contains("upscale_jobs_failed_total{reason=\"cancelled\"} 1"));
        assert!(text.contains("plan_purchases_total{outcome=\"succeeded\",plan=\"pro\"} 1"));
    }
}
