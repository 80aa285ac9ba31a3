//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;
use std::time::Duration;

use rp_core::{
    AuthenticationCeremony, CeremonyConfig, CeremonyContext, CredentialStore, MemoryStore,
    RegistrationCeremony, SessionManager, VerificationAdapter, VerificationEngine,
};

use crate::config::Config;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    /// Pending ceremony sessions, swept periodically
    pub sessions: Arc<SessionManager>,
    pub registration: RegistrationCeremony,
    pub authentication: AuthenticationCeremony,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        engine: Arc<dyn VerificationEngine>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.session_scope,
            config.session_ttl(),
        ));
        let ctx = CeremonyContext::new(
            store.clone(),
            sessions.clone(),
            VerificationAdapter::new(engine),
            CeremonyConfig {
                purge_consumed_challenges: config.purge_consumed_challenges,
            },
        );

        Self {
            store,
            sessions,
            registration: RegistrationCeremony::new(ctx.clone()),
            authentication: AuthenticationCeremony::new(ctx),
        }
    }

    /// State over the in-memory store (for testing and local development)
    pub fn in_memory(config: &Config, engine: Arc<dyn VerificationEngine>) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()), engine)
    }

    /// Periodically drop expired ceremony sessions.
    pub fn spawn_session_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = sessions.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired ceremony sessions");
                }
            }
        })
    }
}
