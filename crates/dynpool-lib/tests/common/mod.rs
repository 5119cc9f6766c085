//! Shared fixtures for the pool integration tests

#![allow(dead_code)]

use std::sync::{mpsc, Arc};
use std::time::Duration;

use async_trait::async_trait;
use dynpool_lib::notifier::{AlarmEvent, AppIdentity, ConfigChangeEvent, Notifier};
use dynpool_lib::{ManagedPool, NotifierDispatcher};
use parking_lot::Mutex;

pub const RECORDING_PLATFORM: &str = "RECORD";

/// Channel that keeps everything it is asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    pub alarms: Mutex<Vec<AlarmEvent>>,
    pub changes: Mutex<Vec<ConfigChangeEvent>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn platform(&self) -> &str {
        RECORDING_PLATFORM
    }

    async fn send_alarm(&self, alarm: &AlarmEvent) -> anyhow::Result<()> {
        self.alarms.lock().push(alarm.clone());
        Ok(())
    }

    async fn send_change(&self, change: &ConfigChangeEvent) -> anyhow::Result<()> {
        self.changes.lock().push(change.clone());
        Ok(())
    }
}

/// Dispatcher routed to a fresh recording channel
pub fn recording_dispatcher() -> (Arc<NotifierDispatcher>, Arc<RecordingNotifier>) {
    let recorder = Arc::new(RecordingNotifier::default());
    let dispatcher = NotifierDispatcher::new(AppIdentity::new("it-app", "test").with_host("10.1.2.3"))
        .with_platform(RECORDING_PLATFORM);
    dispatcher.register_notifier(recorder.clone());
    (Arc::new(dispatcher), recorder)
}

/// Keeps `count` workers of a pool busy until dropped
pub struct Blocker {
    release: Option<mpsc::Sender<()>>,
}

impl Blocker {
    pub fn occupy(pool: &ManagedPool, count: usize) -> Self {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (started_tx, started_rx) = mpsc::channel();

        for _ in 0..count {
            let release = Arc::clone(&release_rx);
            let started = started_tx.clone();
            pool.execute(move || {
                started.send(()).unwrap();
                let _ = release.lock().recv();
            })
            .unwrap();
        }
        for _ in 0..count {
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        Self {
            release: Some(release_tx),
        }
    }

    pub fn release(mut self) {
        self.release.take();
    }
}
