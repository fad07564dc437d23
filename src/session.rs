use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    session_id: String,
    code: String,
    started_at: u64,
}

#[derive(Debug, Clone)]
pub struct SessionStats {
    pub session_id: Option<String>,
    pub code: Option<String>,
    pub started_at: Option<u64>,
    pub events_queued: usize,
}

/// Derives and persists the session identifier for a gallery visit.
///
/// The id has the shape `{code}-{timestamp}-{random}` and is written to a
/// session file so a restart of the app reuses the same visit. It is only
/// removed by an explicit `cleanup`.
pub struct SessionManager {
    path: PathBuf,
    current: Option<StoredSession>,
}

impl SessionManager {
    pub fn new() -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("snapview");
        Self::with_path(dir.join("session.json"))
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path, current: None }
    }

    /// Starts (or resumes) the session for `code`. Idempotent per code: a
    /// second call with the same code returns the existing id, and a session
    /// persisted by a previous run of the same gallery is reused.
    pub fn initialize(&mut self, code: &str) -> String {
        if let Some(ref s) = self.current {
            if s.code == code {
                return s.session_id.clone();
            }
        }
        if let Some(s) = self.restore() {
            if s.code == code {
                let id = s.session_id.clone();
                self.current = Some(s);
                return id;
            }
        }

        let started_at = now_ms();
        let session = StoredSession {
            session_id: generate_id(code, started_at),
            code: code.to_string(),
            started_at,
        };
        self.persist(&session);
        let id = session.session_id.clone();
        self.current = Some(session);
        id
    }

    /// Current session id, restoring from disk if this instance has none.
    /// Fails when no session was ever initialized; tracking callers must
    /// initialize before recording events.
    pub fn session_id(&mut self) -> anyhow::Result<String> {
        if self.current.is_none() {
            self.current = self.restore();
        }
        self.current
            .as_ref()
            .map(|s| s.session_id.clone())
            .ok_or_else(|| anyhow::anyhow!("gallery session not initialized; call initialize first"))
    }

    pub fn code(&mut self) -> Option<String> {
        if self.current.is_none() {
            self.current = self.restore();
        }
        self.current.as_ref().map(|s| s.code.clone())
    }

    /// Read-only snapshot for diagnostics; the queue depth is supplied by
    /// the tracker since the session does not own the queue.
    pub fn stats(&self, events_queued: usize) -> SessionStats {
        SessionStats {
            session_id: self.current.as_ref().map(|s| s.session_id.clone()),
            code: self.current.as_ref().map(|s| s.code.clone()),
            started_at: self.current.as_ref().map(|s| s.started_at),
            events_queued,
        }
    }

    /// Forgets the session in memory and on disk.
    pub fn cleanup(&mut self) {
        self.current = None;
        let _ = std::fs::remove_file(&self.path);
    }

    /// Directory holding the session file; the tracker keeps its durable
    /// files alongside it.
    pub fn store_dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    fn restore(&self) -> Option<StoredSession> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&json).ok()
    }

    fn persist(&self, session: &StoredSession) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(session) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&self.path, json) {
                    tracing::warn!(?err, "failed to persist session");
                }
            }
            Err(err) => tracing::warn!(?err, "failed to serialize session"),
        }
    }
}

fn generate_id(code: &str, timestamp: u64) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let suffix: String = (0..6)
        .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
        .collect();
    format!("{code}-{timestamp}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_session_path() -> PathBuf {
        std::env::temp_dir()
            .join("snapview-test")
            .join(format!("session-{}.json", fastrand::u64(..)))
    }

    #[test]
    fn generated_id_has_code_timestamp_random_shape() {
        let id = generate_id("ev42", 1700000000000);
        let mut parts = id.splitn(3, '-');
        assert_eq!(parts.next(), Some("ev42"));
        assert_eq!(parts.next(), Some("1700000000000"));
        let suffix = parts.next().expect("random suffix present");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn initialize_is_idempotent_per_code() {
        let mut mgr = SessionManager::with_path(temp_session_path());
        let first = mgr.initialize("ev42");
        let second = mgr.initialize("ev42");
        assert_eq!(first, second);
        mgr.cleanup();
    }

    #[test]
    fn session_is_restored_from_disk_by_a_new_instance() {
        let path = temp_session_path();
        let mut mgr = SessionManager::with_path(path.clone());
        let id = mgr.initialize("ev42");

        let mut fresh = SessionManager::with_path(path);
        assert_eq!(fresh.session_id().expect("restored"), id);
        assert_eq!(fresh.code().as_deref(), Some("ev42"));
        fresh.cleanup();
    }

    #[test]
    fn session_id_fails_before_initialization() {
        let mut mgr = SessionManager::with_path(temp_session_path());
        assert!(mgr.session_id().is_err());
    }

    #[test]
    fn cleanup_removes_the_persisted_session() {
        let path = temp_session_path();
        let mut mgr = SessionManager::with_path(path.clone());
        mgr.initialize("ev42");
        mgr.cleanup();

        let mut fresh = SessionManager::with_path(path);
        assert!(fresh.session_id().is_err());
    }

    #[test]
    fn stats_snapshot_carries_session_fields() {
        let mut mgr = SessionManager::with_path(temp_session_path());
        mgr.initialize("ev42");
        let stats = mgr.stats(3);
        assert_eq!(stats.code.as_deref(), Some("ev42"));
        assert!(stats.session_id.is_some());
        assert!(stats.started_at.is_some());
        assert_eq!(stats.events_queued, 3);
        mgr.cleanup();
    }
}
