use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::{sync::RwLock, task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    auth::{SessionContext, SessionIdentity, TOKEN_LEEWAY_SECS},
    errors::{AppError, Result},
    services::orchestrator::{JobOrchestrator, JobServices},
};

struct SessionEntry {
    orchestrator: Arc<JobOrchestrator>,
    expires_at: i64,
    /// Unix seconds of the last authenticated request.
    last_seen: AtomicI64,
}

impl SessionEntry {
    fn is_stale(&self, now: i64, idle_secs: i64) -> bool {
        if self.expires_at <= now {
            return true;
        }
        now - self.last_seen.load(Ordering::Relaxed) >= idle_secs && !self.orchestrator.is_processing()
    }
}

#[derive(Default)]
struct Sessions {
    live: HashMap<Uuid, SessionEntry>,
    /// Ended session ids and their token expiry. Refused by `attach`.
    ended: HashMap<Uuid, i64>,
}

/// Live orchestrators keyed by session id. Nothing is shared between entries.
///
/// A session leaves the registry on logout, when its token expires, or after
/// `idle_timeout` without requests while no job is processing.
pub struct SessionRegistry {
    services: JobServices,
    idle_timeout: Duration,
    sessions: RwLock<Sessions>,
}

impl SessionRegistry {
    pub fn new(services: JobServices, idle_timeout: Duration) -> Self {
        Self {
            services,
            idle_timeout,
            sessions: RwLock::new(Sessions::default()),
        }
    }

    /// Returns the orchestrator for an authenticated session, creating it on
    /// first use. An existing session takes the freshly checked user record.
    /// Ended or expired sessions are refused.
    pub async fn attach(&self, identity: SessionIdentity) -> Result<Arc<JobOrchestrator>> {
        let now = Utc::now().timestamp();
        if identity.expires_at <= now {
            return Err(AppError::Auth("Session has expired".to_string()));
        }

        {
            let sessions = self.sessions.read().await;
            if sessions.ended.contains_key(&identity.session_id) {
                return Err(AppError::Auth("Session has ended".to_string()));
            }
            if let Some(existing) = sessions.live.get(&identity.session_id) {
                existing.last_seen.store(now, Ordering::Relaxed);
                existing.orchestrator.session().replace_user(identity.user);
                return Ok(Arc::clone(&existing.orchestrator));
            }
        }

        let mut sessions = self.sessions.write().await;
        if sessions.ended.contains_key(&identity.session_id) {
            return Err(AppError::Auth("Session has ended".to_string()));
        }
        let entry = sessions.live.entry(identity.session_id).or_insert_with(|| {
            tracing::debug!(session_id = %identity.session_id, user_id = %identity.user.id, "Session attached");
            SessionEntry {
                orchestrator: JobOrchestrator::new(
                    Arc::new(SessionContext::new(identity.session_id, identity.user.clone())),
                    self.services.clone(),
                ),
                expires_at: identity.expires_at,
                last_seen: AtomicI64::new(now),
            }
        });
        entry.last_seen.store(now, Ordering::Relaxed);
        let orchestrator = Arc::clone(&entry.orchestrator);
        self.services.metrics.set_active_sessions(sessions.live.len());
        Ok(orchestrator)
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<JobOrchestrator>> {
        self.sessions
            .read()
            .await
            .live
            .get(&session_id)
            .map(|entry| Arc::clone(&entry.orchestrator))
    }

    /// Drops a session and cancels its active job. Its jobs are discarded and
    /// the id is refused until `expires_at`.
    pub async fn end(&self, session_id: Uuid, expires_at: i64) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.ended.insert(session_id, expires_at);
            let removed = sessions.live.remove(&session_id);
            self.services.metrics.set_active_sessions(sessions.live.len());
            removed
        };

        match removed {
            Some(entry) => {
                entry.orchestrator.shutdown().await;
                tracing::info!(session_id = %session_id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Evicts expired and idle sessions. Returns how many were closed.
    pub async fn evict_stale(&self) -> usize {
        self.evict_stale_at(Utc::now().timestamp()).await
    }

    async fn evict_stale_at(&self, now: i64) -> usize {
        let idle_secs = i64::try_from(self.idle_timeout.as_secs()).unwrap_or(i64::MAX);
        let leeway = TOKEN_LEEWAY_SECS as i64;

        let stale: Vec<(Uuid, SessionEntry)> = {
            let mut sessions = self.sessions.write().await;
            sessions.ended.retain(|_, exp| *exp + leeway >= now);

            let ids: Vec<Uuid> = sessions
                .live
                .iter()
                .filter(|(_, entry)| entry.is_stale(now, idle_secs))
                .map(|(id, _)| *id)
                .collect();
            let stale = ids
                .into_iter()
                .filter_map(|id| sessions.live.remove(&id).map(|entry| (id, entry)))
                .collect();
            self.services.metrics.set_active_sessions(sessions.live.len());
            stale
        };

        for (session_id, entry) in &stale {
            entry.orchestrator.shutdown().await;
            tracing::info!(
                session_id = %session_id,
                expired = entry.expires_at <= now,
                "Stale session evicted"
            );
        }
        stale.len()
    }

    /// Runs `evict_stale` every `period` until the runtime shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = self.evict_stale().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "Session sweep finished");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.live.is_empty()
    }
}
