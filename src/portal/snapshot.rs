//! Diagnostic page captures written to disk

use crate::browser::BrowserSession;
use crate::clock::Clock;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SnapshotSink {
    /// `None` disables captures
    dir: Option<PathBuf>,
    clock: Arc<dyn Clock>,
}

impl SnapshotSink {
    pub fn new(dir: Option<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { dir, clock }
    }

    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, clock)
    }

    /// Capture the current page as `<timestamp>-<label>.png`. Failures are
    /// logged and otherwise ignored.
    pub async fn capture(&self, session: &dyn BrowserSession, label: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!("Cannot create snapshot dir {}: {}", dir.display(), e);
            return None;
        }

        let stamp = self.clock.wall().format("%Y%m%dT%H%M%S%.3fZ");
        let path = dir.join(format!("{}-{}.png", stamp, label));
        match session.snapshot(&path).await {
            Ok(()) => {
                tracing::debug!("Saved {} snapshot to {}", label, path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Could not save {} snapshot: {}", label, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FailAt, FakeLauncher, FakePage};
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_capture_names_file_after_label() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("shots");
        let sink = SnapshotSink::new(Some(target.clone()), Arc::new(ManualClock::new()));
        let launcher = FakeLauncher::new(FakePage::new());
        let session = launcher.session();

        let path = sink.capture(&session, "before-fill").await.unwrap();

        assert!(target.is_dir());
        assert!(path.starts_with(&target));
        assert!(path.to_string_lossy().ends_with("-before-fill.png"));
        assert_eq!(launcher.log().lock().unwrap().snapshots, vec![path]);
    }

    #[tokio::test]
    async fn test_disabled_sink_captures_nothing() {
        let sink = SnapshotSink::disabled(Arc::new(ManualClock::new()));
        let launcher = FakeLauncher::new(FakePage::new());
        let session = launcher.session();

        assert!(sink.capture(&session, "error").await.is_none());
        assert!(launcher.log().lock().unwrap().snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_capture_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(Some(dir.path().to_path_buf()), Arc::new(ManualClock::new()));
        let launcher = FakeLauncher::new(FakePage::new()).fail_at(FailAt::Snapshot);
        let session = launcher.session();

        assert!(sink.capture(&session, "after-submit").await.is_none());
    }
}
