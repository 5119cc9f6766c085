//! Routes alarms and change reports to the configured channel

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::log::LogNotifier;
use super::{AlarmRequest, AppIdentity, ConfigChangeEvent, Notifier};
use crate::alarm::AlarmRateLimiter;
use crate::health::{components, HealthRegistry};

/// What happened to one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No channel is configured for the current platform
    NoChannel,
    /// The alarm is inside its cooldown window
    Suppressed,
    Sent,
    /// Building or sending the payload failed; the error was logged
    Failed,
}

/// Picks the channel for the configured platform and delivers to it
pub struct NotifierDispatcher {
    /// Map of upper-cased platform -> channel
    channels: DashMap<String, Arc<dyn Notifier>>,
    platform: RwLock<Option<String>>,
    rate_limiter: Arc<AlarmRateLimiter>,
    identity: AppIdentity,
    health: Option<HealthRegistry>,
}

impl NotifierDispatcher {
    /// Create a dispatcher with the built-in log channel and no platform selected
    pub fn new(identity: AppIdentity) -> Self {
        let dispatcher = Self {
            channels: DashMap::new(),
            platform: RwLock::new(None),
            rate_limiter: Arc::new(AlarmRateLimiter::new()),
            identity,
            health: None,
        };
        dispatcher.register_notifier(Arc::new(LogNotifier::new()));
        dispatcher
    }

    pub fn with_platform(self, platform: impl Into<String>) -> Self {
        self.set_platform(Some(platform.into()));
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<AlarmRateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Make a channel available under its platform identifier
    pub fn register_notifier(&self, notifier: Arc<dyn Notifier>) {
        let platform = notifier.platform().to_ascii_uppercase();
        debug!(platform = %platform, "Registering notifier");
        self.channels.insert(platform, notifier);
    }

    /// Select the platform alarms and changes go to; `None` disables delivery
    pub fn set_platform(&self, platform: Option<String>) {
        *self.platform.write() = platform.map(|p| p.to_ascii_uppercase());
    }

    pub fn platform(&self) -> Option<String> {
        self.platform.read().clone()
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn rate_limiter(&self) -> &Arc<AlarmRateLimiter> {
        &self.rate_limiter
    }

    fn channel(&self) -> Option<Arc<dyn Notifier>> {
        let platform = self.platform.read().clone()?;
        let channel = self.channels.get(&platform).map(|r| Arc::clone(r.value()));
        if channel.is_none() {
            debug!(platform = %platform, "No notifier registered for platform");
        }
        channel
    }

    /// Deliver an alarm: rate limit first, then build the payload, then send
    pub async fn dispatch_alarm(&self, request: &AlarmRequest) -> Delivery {
        let Some(channel) = self.channel() else {
            return Delivery::NoChannel;
        };

        if !self
            .rate_limiter
            .allow(&request.pool_id, request.kind, request.interval_minutes)
        {
            debug!(pool_id = %request.pool_id, kind = %request.kind, "Alarm suppressed by cooldown");
            return Delivery::Suppressed;
        }

        let alarm = match request.capture(&self.identity) {
            Ok(alarm) => alarm,
            Err(e) => {
                warn!(pool_id = %request.pool_id, kind = %request.kind, error = %e, "Failed to build alarm payload");
                return Delivery::Failed;
            }
        };

        let result = channel.send_alarm(&alarm).await;
        self.finish(result, &request.pool_id, "alarm").await
    }

    /// Deliver a change report; change reports are never rate limited
    pub async fn dispatch_change(&self, event: &ConfigChangeEvent) -> Delivery {
        let Some(channel) = self.channel() else {
            return Delivery::NoChannel;
        };

        let result = channel.send_change(event).await;
        self.finish(result, &event.pool_id, "change").await
    }

    async fn finish(&self, result: anyhow::Result<()>, pool_id: &str, what: &str) -> Delivery {
        match result {
            Ok(()) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::NOTIFIER).await;
                }
                Delivery::Sent
            }
            Err(e) => {
                warn!(pool_id = %pool_id, notification = what, error = %e, "Failed to send notification");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::NOTIFIER, format!("last {} delivery failed: {}", what, e))
                        .await;
                }
                Delivery::Failed
            }
        }
    }
}
