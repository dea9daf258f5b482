use std::sync::RwLock;

use uuid::Uuid;

use crate::models::{PlanTier, User};

/// Identity and plan of one signed-in session.
///
/// The user record is only replaced by server-confirmed events: a fresh read
/// from the account store, a persisted quota debit or a confirmed plan change.
#[derive(Debug)]
pub struct SessionContext {
    session_id: Uuid,
    user: RwLock<User>,
}

impl SessionContext {
    pub fn new(session_id: Uuid, user: User) -> Self {
        Self {
            session_id,
            user: RwLock::new(user),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Snapshot of the current user record.
    pub fn user(&self) -> User {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn user_id(&self) -> Uuid {
        self.user.read().unwrap_or_else(|e| e.into_inner()).id
    }

    pub fn plan(&self) -> PlanTier {
        self.user.read().unwrap_or_else(|e| e.into_inner()).plan
    }

    /// Replaces the user record. Records for another account are ignored.
    pub fn replace_user(&self, user: User) -> bool {
        let mut current = self.user.write().unwrap_or_else(|e| e.into_inner());
        if current.id != user.id {
            tracing::warn!(
                session_id = %self.session_id,
                expected = %current.id,
                got = %user.id,
                "Ignoring user record for a different account"
            );
            return false;
        }
        *current = user;
        true
    }
}
