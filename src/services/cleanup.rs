//! Best-effort deletion of job files, either right away or after a delay.
//!
//! Delayed deletions go through one background task per process that keeps a
//! deadline-ordered heap, instead of a sleeping thread per request.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct CleanupTask {
    deadline: Instant,
    seq: u64,
    paths: Vec<PathBuf>,
}

impl PartialEq for CleanupTask {
    fn eq(&self, other: &Self) -> bool {
        (self.deadline, self.seq) == (other.deadline, other.seq)
    }
}

impl Eq for CleanupTask {}

impl PartialOrd for CleanupTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CleanupTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

/// Cheap, cloneable handle to the cleanup task.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    sender: mpsc::UnboundedSender<(Duration, Vec<PathBuf>)>,
}

impl CleanupScheduler {
    /// Spawn the background task on the current tokio runtime.
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(receiver));
        info!("Cleanup scheduler started");
        Self { sender }
    }

    /// Delete `paths` now when `delay` is zero, otherwise after `delay`
    /// without blocking the caller. Never fails.
    pub fn schedule(&self, paths: Vec<PathBuf>, delay: Duration) {
        if paths.is_empty() {
            return;
        }
        if delay.is_zero() {
            remove_all(&paths);
            return;
        }
        debug!(count = paths.len(), delay_ms = delay.as_millis() as u64, "Cleanup scheduled");
        if let Err(mpsc::error::SendError((_, paths))) = self.sender.send((delay, paths)) {
            // The task is gone (runtime shutting down); do not leave files behind.
            warn!("Cleanup scheduler stopped, deleting immediately");
            remove_all(&paths);
        }
    }
}

async fn run(mut receiver: mpsc::UnboundedReceiver<(Duration, Vec<PathBuf>)>) {
    let mut queue: BinaryHeap<Reverse<CleanupTask>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next_deadline = queue.peek().map(|Reverse(task)| task.deadline);

        tokio::select! {
            message = receiver.recv() => match message {
                Some((delay, paths)) => {
                    seq += 1;
                    queue.push(Reverse(CleanupTask {
                        deadline: Instant::now() + delay,
                        seq,
                        paths,
                    }));
                }
                None => break,
            },
            _ = async {
                match next_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                let now = Instant::now();
                while queue.peek().is_some_and(|Reverse(task)| task.deadline <= now) {
                    if let Some(Reverse(task)) = queue.pop() {
                        let paths = task.paths;
                        // Directory trees can be large; keep the timer loop responsive.
                        let _ = tokio::task::spawn_blocking(move || remove_all(&paths)).await;
                    }
                }
            }
        }
    }

    if !queue.is_empty() {
        info!(pending = queue.len(), "Flushing pending cleanups");
    }
    for Reverse(task) in queue.into_sorted_vec() {
        remove_all(&task.paths);
    }
}

/// Remove every path, ignoring anything that is already gone or cannot be
/// deleted.
pub fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        match remove_path(path) {
            Ok(()) => debug!(path = %path.display(), "Removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Cleanup failed, ignoring"),
        }
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn remove_all_swallows_missing_paths() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("a.pdf");
        let dir = root.path().join("job");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        remove_all(&[file.clone(), dir.clone(), root.path().join("missing")]);
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn zero_delay_deletes_synchronously() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("a.pdf");
        std::fs::write(&file, b"x").unwrap();

        CleanupScheduler::start().schedule(vec![file.clone()], Duration::ZERO);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn delayed_cleanup_runs_in_deadline_order() {
        let root = TempDir::new().unwrap();
        let early = root.path().join("early");
        let late = root.path().join("late");
        std::fs::create_dir(&early).unwrap();
        std::fs::create_dir(&late).unwrap();

        let scheduler = CleanupScheduler::start();
        scheduler.schedule(vec![late.clone()], Duration::from_millis(900));
        scheduler.schedule(vec![early.clone()], Duration::from_millis(100));

        assert!(early.exists() && late.exists());
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!early.exists());
        assert!(late.exists());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!late.exists());
    }
}
