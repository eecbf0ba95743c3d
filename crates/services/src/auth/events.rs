use super::password::without_password_hash;
use super::ports::{LoginEvent, LoginEventKind, LoginEventListener, UserProfile};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Fans login/logout notifications out to registered listeners.
///
/// A failing listener never aborts the login or logout that raised the event.
#[derive(Clone, Default)]
pub struct EventNotifier {
    listeners: Vec<Arc<dyn LoginEventListener>>,
    debug_mode: bool,
}

impl EventNotifier {
    pub fn new(debug_mode: bool) -> Self {
        Self {
            listeners: Vec::new(),
            debug_mode,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn LoginEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn subscribe(&mut self, listener: Arc<dyn LoginEventListener>) {
        self.listeners.push(listener);
    }

    pub async fn notify(&self, kind: LoginEventKind, profile: &UserProfile) {
        let event = LoginEvent {
            kind,
            profile: without_password_hash(profile),
        };

        for listener in &self.listeners {
            if let Err(e) = listener.handle(&event).await {
                if self.debug_mode {
                    warn!(
                        event = %event.kind,
                        profile_id = %profile.id,
                        "Login event listener failed: {:?}",
                        e
                    );
                } else {
                    warn!(event = %event.kind, "Login event listener failed: {}", e);
                }
            }
        }
    }
}

/// Writes every login event to the audit log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditListener;

#[async_trait]
impl LoginEventListener for TracingAuditListener {
    async fn handle(&self, event: &LoginEvent) -> anyhow::Result<()> {
        info!(
            event = %event.kind,
            profile_id = %event.profile.id,
            provider = %event.profile.provider,
            "Client login event"
        );
        Ok(())
    }
}
