//! Conversion lock artifacts and process liveness.
//!
//! A lock is a small JSON document at `<state>/locks/<dataset>.lock`. It is
//! claimed with an exclusive create and rewritten atomically once the worker's
//! pid is known.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockArtifact {
    pub pid: i32,
    pub dataset: String,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl LockArtifact {
    pub fn new(pid: i32, dataset: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            dataset: dataset.into(),
            log_path: log_path.into(),
            started_at: Utc::now(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, SupervisorError> {
        let body = fs::read(path)?;
        serde_json::from_slice(&body).map_err(|e| SupervisorError::CorruptLock {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Creates the lock file only if none exists.
    ///
    /// Fails with [`std::io::ErrorKind::AlreadyExists`] when another claim is present.
    pub fn claim(&self, path: &Path) -> Result<(), SupervisorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(&serde_json::to_vec(self)?)?;
        file.sync_all()?;
        Ok(())
    }

    /// Replaces the lock content through a temporary file and rename.
    pub fn write_atomic(&self, path: &Path) -> Result<(), SupervisorError> {
        let tmp = path.with_extension("lock.tmp");
        fs::write(&tmp, serde_json::to_vec(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// Interprets the result of a signal-0 probe.
///
/// Success or `EPERM` (exists, owned by someone else) mean alive; `ESRCH` and
/// every other error mean dead.
pub fn classify_probe(result: nix::Result<()>) -> Liveness {
    match result {
        Ok(()) | Err(Errno::EPERM) => Liveness::Alive,
        Err(_) => Liveness::Dead,
    }
}

/// Probes `pid` with signal 0. Non-positive pids are dead, and so are zombies
/// (exited but never reaped, as orphans of a service running as PID 1 are).
pub fn probe_liveness(pid: i32) -> Liveness {
    if pid <= 0 {
        return Liveness::Dead;
    }
    match classify_probe(kill(Pid::from_raw(pid), None)) {
        Liveness::Alive if is_zombie(pid) => Liveness::Dead,
        other => other,
    }
}

/// Whether procfs reports `pid` in state `Z`. False where `/proc` is unavailable.
pub fn is_zombie(pid: i32) -> bool {
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| proc_state(&stat))
        == Some('Z')
}

/// State field of a `/proc/<pid>/stat` line; it follows the last `)` since the
/// command name may itself contain parentheses.
fn proc_state(stat: &str) -> Option<char> {
    stat.rsplit_once(')')?.1.trim_start().chars().next()
}

pub fn is_alive(pid: i32) -> bool {
    probe_liveness(pid) == Liveness::Alive
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_classification() {
        assert_eq!(classify_probe(Ok(())), Liveness::Alive);
        assert_eq!(classify_probe(Err(Errno::EPERM)), Liveness::Alive);
        assert_eq!(classify_probe(Err(Errno::ESRCH)), Liveness::Dead);
        assert_eq!(classify_probe(Err(Errno::EINVAL)), Liveness::Dead);
    }

    #[test]
    fn test_proc_state_parsing() {
        assert_eq!(proc_state("4242 (convert) S 1 4242 4242 0"), Some('S'));
        assert_eq!(proc_state("4242 (we(ird) name)) Z 1 0"), Some('Z'));
        assert_eq!(proc_state("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;

        let mut dead = false;
        for _ in 0..300 {
            if !is_alive(pid) {
                dead = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(dead, "exited child {} still reported alive", pid);
        assert!(is_zombie(pid));
        child.wait().unwrap();
    }

    #[test]
    fn test_non_positive_pid_is_dead() {
        assert_eq!(probe_liveness(0), Liveness::Dead);
        assert_eq!(probe_liveness(-1), Liveness::Dead);
        assert!(is_alive(std::process::id() as i32));
    }

    #[test]
    fn test_claim_is_exclusive_and_rewrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locks/demo.lock");

        LockArtifact::new(1, "demo", "/tmp/a.log").claim(&path).unwrap();
        let err = LockArtifact::new(2, "demo", "/tmp/b.log").claim(&path).unwrap_err();
        assert!(matches!(err, SupervisorError::Io(e) if e.kind() == std::io::ErrorKind::AlreadyExists));

        LockArtifact::new(3, "demo", "/tmp/c.log").write_atomic(&path).unwrap();
        let read = LockArtifact::read(&path).unwrap();
        assert_eq!(read.pid, 3);
        assert_eq!(read.log_path, PathBuf::from("/tmp/c.log"));
    }

    #[test]
    fn test_corrupt_lock_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            LockArtifact::read(&path),
            Err(SupervisorError::CorruptLock { .. })
        ));
    }
}
