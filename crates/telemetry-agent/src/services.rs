//! Collaborators backed by the log
//!
//! The agent has no desktop or dashboard connection of its own, so
//! notifications and job spawns end up as structured log events.

use std::collections::HashSet;

use anyhow::bail;
use parking_lot::Mutex;
use telemetry_core::evaluator::{JobSpawner, Map, Notification, NotificationProvider};
use tracing::info;

/// Logs every notification and reports it as delivered
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationProvider for LogNotifier {
    fn send_notification(
        &self,
        notification: &Notification,
        channel: Option<&str>,
        flow: Option<&str>,
    ) -> bool {
        info!(
            title = %notification.title,
            message = %notification.message,
            sound = %notification.sound,
            duration = ?notification.duration,
            channel = channel.unwrap_or("-"),
            flow = flow.unwrap_or("-"),
            "notification"
        );
        true
    }
}

/// Records spawn requests. A flow tag can only be spawned once per process.
#[derive(Debug, Default)]
pub struct LogSpawner {
    tags: Mutex<HashSet<String>>,
}

impl LogSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flow tags spawned so far, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.tags.lock().iter().cloned().collect();
        tags.sort();
        tags
    }
}

impl JobSpawner for LogSpawner {
    fn spawn_job(&self, flow_tag: &str, plugin_kind: &str, config: Map) -> anyhow::Result<()> {
        if !self.tags.lock().insert(flow_tag.to_string()) {
            bail!("a job with flow tag `{flow_tag}` already exists");
        }

        let config = serde_json::to_string(&config)?;
        info!(flow_tag, plugin_kind, %config, "job spawned");
        Ok(())
    }
}
