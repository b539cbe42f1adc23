//! Shared session context.
//!
//! The session lifecycle owner writes user, session and device here; the
//! batch builder reads it when stamping events and building batches, and the
//! sender reads the user id to scope its storage key.

use std::sync::Arc;

use beacon_core::{DeviceType, SessionId, UserId};
use parking_lot::RwLock;

/// Identity and location of the current tracking session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    /// Current (possibly anonymous) user.
    pub user_id: UserId,
    /// Current session.
    pub session_id: SessionId,
    /// Device class.
    pub device: DeviceType,
    /// Location events are captured on.
    pub page_url: String,
    /// Referrer of the landing page.
    pub referrer: Option<String>,
}

/// Cloneable handle to a [`SessionContext`] behind a read-write lock.
#[derive(Clone, Debug, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<SessionContext>>,
}

impl SharedContext {
    /// Wrap an initial context.
    #[must_use]
    pub fn new(context: SessionContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    /// Copy of the current context.
    #[must_use]
    pub fn snapshot(&self) -> SessionContext {
        self.inner.read().clone()
    }

    /// Current user id.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.inner.read().user_id.clone()
    }

    /// Current page URL.
    #[must_use]
    pub fn page_url(&self) -> String {
        self.inner.read().page_url.clone()
    }

    /// Mutate the context in place.
    pub fn update(&self, f: impl FnOnce(&mut SessionContext)) {
        f(&mut self.inner.write());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_updates() {
        let ctx = SharedContext::new(SessionContext {
            user_id: UserId::from("u1"),
            page_url: "https://a.test/".into(),
            ..Default::default()
        });
        let other = ctx.clone();
        other.update(|c| {
            c.user_id = UserId::from("u2");
            c.device = DeviceType::Tablet;
        });
        assert_eq!(ctx.user_id().as_str(), "u2");
        assert_eq!(ctx.snapshot().device, DeviceType::Tablet);
        assert_eq!(ctx.page_url(), "https://a.test/");
    }
}
