//! Advisory cross-process locking over a single resource path.
//!
//! A lock on `<resource>` is the sentinel file `<resource>.lock`. Its first
//! line is the creation time in milliseconds since the epoch, its second a
//! token naming the holder. Creation uses `create_new`, so at most one
//! caller holds a given sentinel at a time.
//!
//! Sentinels older than [`LockOptions::stale_after`] are treated as
//! abandoned. Reclaiming one happens under a short-lived guard file
//! (`<resource>.lock.reclaim`) and re-checks staleness while holding it, so
//! concurrent waiters never remove a sentinel somebody else just created.
//! Release only removes a sentinel that still carries the holder's token.
//!
//! Prefer [`with_lock`]: the sentinel is removed when the unit of work
//! finishes, fails, panics or is cancelled.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::json;
use thiserror::Error;

use crate::ui::prelude::*;

pub const LOCK_SUFFIX: &str = ".lock";
const RECLAIM_SUFFIX: &str = ".reclaim";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("lock file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Age after which an existing sentinel is considered abandoned
    pub stale_after: Duration,
    /// Overall budget for acquisition
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(10),
            timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(250),
        }
    }
}

/// Sentinel path guarding `resource`
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut raw: OsString = resource.as_os_str().to_owned();
    raw.push(LOCK_SUFFIX);
    PathBuf::from(raw)
}

fn reclaim_path_for(lock_path: &Path) -> PathBuf {
    let mut raw: OsString = lock_path.as_os_str().to_owned();
    raw.push(RECLAIM_SUFFIX);
    PathBuf::from(raw)
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Unique per acquisition within the process, and across processes via the pid
fn holder_token() -> String {
    format!(
        "{}-{}-{}",
        std::process::id(),
        now_millis(),
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    )
}

enum SentinelState {
    Missing,
    Held,
    Stale(Duration),
}

fn inspect(lock_path: &Path, stale_after: Duration) -> SentinelState {
    let stamp = match fs::read_to_string(lock_path) {
        Ok(content) => content
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<u128>().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => return SentinelState::Missing,
        Err(_) => return SentinelState::Held,
    };
    let age = match stamp {
        Some(stamp) => Duration::from_millis(now_millis().saturating_sub(stamp) as u64),
        // Half-written or foreign content: fall back to the file's mtime
        None => match fs::metadata(lock_path).and_then(|m| m.modified()) {
            Ok(modified) => SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
            Err(e) if e.kind() == ErrorKind::NotFound => return SentinelState::Missing,
            Err(_) => Duration::ZERO,
        },
    };

    if age > stale_after {
        SentinelState::Stale(age)
    } else {
        SentinelState::Held
    }
}

fn try_create(path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = write!(file, "{}\n{}", now_millis(), token).and_then(|_| file.flush()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

/// Remove `path` only if it still names `token` as its holder.
/// Returns whether a file was removed.
fn remove_if_owned(path: &Path, token: &str) -> std::io::Result<bool> {
    match fs::read_to_string(path) {
        Ok(content) if content.lines().nth(1).map(str::trim) == Some(token) => {
            match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a stale sentinel while holding the reclaim guard.
///
/// `Ok(false)` means another waiter holds the guard or the sentinel is no
/// longer stale; the caller simply retries.
fn reclaim_stale(lock_path: &Path, stale_after: Duration) -> Result<bool, LockError> {
    let io = |source| LockError::Io {
        path: lock_path.to_path_buf(),
        source,
    };
    let guard_path = reclaim_path_for(lock_path);
    let guard_token = holder_token();

    if let Err(e) = try_create(&guard_path, &guard_token) {
        if e.kind() != ErrorKind::AlreadyExists {
            return Err(io(e));
        }
        // A crashed reclaimer must not block everyone forever
        if let SentinelState::Stale(_) = inspect(&guard_path, stale_after) {
            let _ = fs::remove_file(&guard_path);
        }
        return Ok(false);
    }

    let reclaimed = match inspect(lock_path, stale_after) {
        SentinelState::Stale(age) => {
            emit(
                Level::Warn,
                "lock.reclaimed",
                &format!(
                    "{} Reclaiming abandoned lock {} ({}s old)",
                    char::from(NerdFont::Warning),
                    lock_path.display(),
                    age.as_secs()
                ),
                Some(json!({
                    "path": lock_path.display().to_string(),
                    "age_ms": age.as_millis() as u64,
                })),
            );
            match fs::remove_file(lock_path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(io(e)),
            }
        }
        SentinelState::Missing | SentinelState::Held => Ok(false),
    };

    remove_if_owned(&guard_path, &guard_token).map_err(io)?;
    reclaimed
}

/// A held lock. Dropping it removes the sentinel.
#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
    token: String,
    released: bool,
}

impl FileLock {
    pub async fn acquire(resource: &Path) -> Result<Self, LockError> {
        Self::acquire_with(resource, LockOptions::default()).await
    }

    pub async fn acquire_with(resource: &Path, options: LockOptions) -> Result<Self, LockError> {
        let lock_path = lock_path_for(resource);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: lock_path.clone(),
                source,
            })?;
        }

        let token = holder_token();
        let started = Instant::now();
        let mut backoff = options.initial_backoff;

        loop {
            match try_create(&lock_path, &token) {
                Ok(()) => {
                    emit(
                        Level::Debug,
                        "lock.acquired",
                        &format!("{} Acquired {}", char::from(NerdFont::Lock), lock_path.display()),
                        None,
                    );
                    return Ok(Self {
                        lock_path,
                        token,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match inspect(&lock_path, options.stale_after) {
                        SentinelState::Missing => continue,
                        SentinelState::Stale(_) => {
                            if reclaim_stale(&lock_path, options.stale_after)? {
                                continue;
                            }
                        }
                        SentinelState::Held => {}
                    }
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path,
                        source,
                    });
                }
            }

            let waited = started.elapsed();
            if waited >= options.timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    waited,
                });
            }
            let remaining = options.timeout - waited;
            tokio::time::sleep(backoff.min(remaining)).await;
            backoff = (backoff * 2).min(options.max_backoff);
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Release explicitly, surfacing removal errors that `Drop` would swallow.
    /// A sentinel that no longer carries this holder's token is left alone.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove_if_owned(&self.lock_path, &self.token)
            .map(|_| ())
            .map_err(|source| LockError::Io {
                path: self.lock_path.clone(),
                source,
            })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = remove_if_owned(&self.lock_path, &self.token);
        }
    }
}

/// Run `work` while holding the lock on `resource`.
pub async fn with_lock<T, F, Fut>(resource: &Path, work: F) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    with_lock_opts(resource, LockOptions::default(), work).await
}

pub async fn with_lock_opts<T, F, Fut>(
    resource: &Path,
    options: LockOptions,
    work: F,
) -> anyhow::Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let guard = FileLock::acquire_with(resource, options).await?;
    let result = work().await;
    if let Err(e) = guard.release() {
        emit(
            Level::Warn,
            "lock.release_failed",
            &format!("{} {}", char::from(NerdFont::Warning), e),
            None,
        );
    }
    result
}
