use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::token::now_ms;

const LOCK_STALE_AFTER: Duration = Duration::from_secs(15);

/// Contents of the cross-process interactive lock file. The callback port
/// lets a newer instance ask the holder to cancel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: i64,
    pub token_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,
}

/// Exclusive cross-process lock serializing interactive OAuth flows.
/// Released on drop, including unwinds.
#[derive(Debug)]
pub struct InteractiveLock {
    path: PathBuf,
    released: bool,
}

impl InteractiveLock {
    /// Create with `O_EXCL`; a lock held by a dead PID or older than 15 s
    /// is reclaimed.
    pub fn acquire(path: &Path, token_file: &str, callback_port: Option<u16>) -> AuthResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        for attempt in 0..2 {
            match try_create_excl(path, token_file, callback_port) {
                Ok(()) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt > 0 || !reclaim_if_stale(path)? {
                        let holder = read_lock(path)
                            .map(|info| format!("pid {}", info.pid))
                            .unwrap_or_else(|| "unknown holder".to_string());
                        return Err(AuthError::InteractiveLocked(format!(
                            "{} held by {holder}",
                            path.display()
                        )));
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(AuthError::InteractiveLocked(path.display().to_string()))
    }

    pub fn info(path: &Path) -> Option<LockInfo> {
        read_lock(path)
    }

    pub fn release(mut self) -> AuthResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> AuthResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for InteractiveLock {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}

fn try_create_excl(
    path: &Path,
    token_file: &str,
    callback_port: Option<u16>,
) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    let info = LockInfo {
        pid: std::process::id(),
        acquired_at: now_ms(),
        token_file: token_file.to_string(),
        callback_port,
    };
    let body = serde_json::to_vec(&info).unwrap_or_default();
    file.write_all(&body)?;
    Ok(())
}

fn read_lock(path: &Path) -> Option<LockInfo> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn reclaim_if_stale(path: &Path) -> AuthResult<bool> {
    let Some(info) = read_lock(path) else {
        // Unreadable lock: treat as stale.
        let _ = std::fs::remove_file(path);
        return Ok(true);
    };

    let age_ms = now_ms() - info.acquired_at;
    let stale = age_ms > LOCK_STALE_AFTER.as_millis() as i64 || !pid_alive(info.pid);
    if stale {
        let _ = std::fs::remove_file(path);
    }
    Ok(stale)
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}
