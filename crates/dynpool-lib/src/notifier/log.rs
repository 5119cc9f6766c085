//! Channel that writes notifications to the structured log

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::{AlarmEvent, ConfigChangeEvent, Notifier};

pub const LOG_PLATFORM: &str = "LOG";

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn platform(&self) -> &str {
        LOG_PLATFORM
    }

    async fn send_alarm(&self, alarm: &AlarmEvent) -> Result<()> {
        warn!(
            event = "pool_alarm_notification",
            pool_id = %alarm.pool_id,
            kind = %alarm.kind,
            application = %alarm.application_name,
            profile = %alarm.active_profile,
            host = %alarm.host,
            core_pool_size = alarm.core_pool_size,
            maximum_pool_size = alarm.maximum_pool_size,
            active_pool_size = alarm.active_pool_size,
            current_pool_size = alarm.current_pool_size,
            queue = %alarm.queue_name,
            queue_size = alarm.queue_size,
            queue_capacity = ?alarm.queue_capacity,
            overflow_policy = %alarm.overflow_policy,
            overflow_count = alarm.overflow_count,
            receives = ?alarm.receives,
            "Pool alarm"
        );
        Ok(())
    }

    async fn send_change(&self, change: &ConfigChangeEvent) -> Result<()> {
        let changes: Vec<String> = change
            .changes
            .iter()
            .map(|c| format!("{}: {} => {}", c.field, c.old, c.new))
            .collect();

        info!(
            event = "pool_config_change_notification",
            pool_id = %change.pool_id,
            application = %change.application_name,
            profile = %change.active_profile,
            host = %change.host,
            queue = %change.queue_name,
            changes = %changes.join(", "),
            receives = ?change.receives,
            "Pool configuration changed"
        );
        Ok(())
    }
}
