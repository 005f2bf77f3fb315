//! Audit logging for resource lifecycle events
//!
//! Every mutation of the record store (create, sync-update, delete, task
//! outcome) is reported to an [`AuditSink`]. The built-in [`AuditLog`]
//! writes JSON lines to `~/.local/share/stratus/audit.log`. Audit delivery
//! is best-effort: failures are logged and dropped, never propagated into
//! the primary operation.

use crate::config::{schema::Config, ConfigManager};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Well-known audit action names
pub mod actions {
    pub const CREATE: &str = "create";
    pub const SYNC_UPDATE: &str = "sync-update";
    pub const DELETE: &str = "delete";
    pub const SOFT_DELETE: &str = "soft-delete";
    pub const CACHE_REQUEST: &str = "cache-request";
    pub const CACHE_RELEASE: &str = "cache-release";
    pub const CACHE_EVICT: &str = "cache-evict";
    pub const TASK_FAILED: &str = "task-failed";
    pub const TASK_COMPLETE: &str = "task-complete";
}

/// Sink accepting (entity, action, detail, actor) records
///
/// Implementations must be fire-and-forget: a failing sink may warn but
/// must not surface errors to the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one audit event
    async fn record(&self, entity: &str, action: &str, detail: serde_json::Value, actor: &str);
}

/// File-based audit sink that appends JSON lines
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_log_path(),
        }
    }

    /// Create an audit logger writing to an explicit path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            enabled: true,
            path,
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, entity: &str, action: &str, detail: serde_json::Value, actor: &str) {
        if !self.enabled {
            return;
        }

        let entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "entity": entity,
            "action": action,
            "detail": detail,
            "actor": actor,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Sink that discards every event, for hosts that wire their own pipeline
pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn record(&self, _entity: &str, _action: &str, _detail: serde_json::Value, _actor: &str) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_audit_log(dir: &TempDir, enabled: bool) -> AuditLog {
        AuditLog {
            enabled,
            path: dir.path().join("audit.log"),
        }
    }

    #[tokio::test]
    async fn writes_json_line() {
        let dir = TempDir::new().unwrap();
        let audit = test_audit_log(&dir, true);

        audit
            .record(
                "resource/res-1",
                actions::CREATE,
                serde_json::json!({"external_id": "ext-42"}),
                "system",
            )
            .await;

        let content = tokio::fs::read_to_string(&audit.path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();

        assert_eq!(parsed["entity"], "resource/res-1");
        assert_eq!(parsed["action"], "create");
        assert_eq!(parsed["actor"], "system");
        assert_eq!(parsed["detail"]["external_id"], "ext-42");
        assert!(parsed["timestamp"].is_string());
    }

    #[tokio::test]
    async fn appends_multiple_lines() {
        let dir = TempDir::new().unwrap();
        let audit = test_audit_log(&dir, true);

        audit
            .record("a", actions::CREATE, serde_json::json!({}), "system")
            .await;
        audit
            .record("b", actions::DELETE, serde_json::json!({}), "system")
            .await;

        let content = tokio::fs::read_to_string(&audit.path).await.unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn skips_when_disabled() {
        let dir = TempDir::new().unwrap();
        let audit = test_audit_log(&dir, false);

        audit
            .record("x", actions::CREATE, serde_json::json!({}), "system")
            .await;

        assert!(!audit.path.exists());
    }
}
