//! Notification channels
//!
//! A [`Notifier`] delivers fully built payloads to one platform. The
//! [`NotifierDispatcher`] picks the configured platform, applies the alarm
//! rate limit and swallows delivery failures.

pub mod dispatcher;
pub mod events;
pub mod log;

use anyhow::Result;
use async_trait::async_trait;

pub use dispatcher::{Delivery, NotifierDispatcher};
pub use events::{AlarmEvent, AlarmRequest, AppIdentity, ConfigChangeEvent, FieldChange};
pub use log::LogNotifier;

/// A delivery channel such as a chat webhook or the log
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Platform identifier this channel is registered under
    fn platform(&self) -> &str;

    async fn send_alarm(&self, alarm: &AlarmEvent) -> Result<()>;

    async fn send_change(&self, change: &ConfigChangeEvent) -> Result<()>;
}
