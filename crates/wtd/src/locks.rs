//! Per-worktree-name locks.
//!
//! Filesystem mutations for one worktree name are serialized; operations on
//! distinct names proceed independently. Lock entries are created on first
//! use and live for the daemon's lifetime (the set of names is small).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wt_core::types::WorktreeName;

#[derive(Default)]
pub struct NameLocks {
    inner: Mutex<HashMap<WorktreeName, Arc<tokio::sync::Mutex<()>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, name: &WorktreeName) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("name locks poisoned");
        Arc::clone(
            map.entry(name.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_serializes_operations() {
        let locks = Arc::new(NameLocks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let name = WorktreeName::new("shared");

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            let name = name.clone();
            tasks.push(tokio::spawn(async move {
                let lock = locks.lock_for(&name);
                let _guard = lock.lock().await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_names_run_concurrently() {
        let locks = Arc::new(NameLocks::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for idx in 0..4 {
            let locks = Arc::clone(&locks);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let name = WorktreeName::new(format!("wt-{idx}"));
                let lock = locks.lock_for(&name);
                let _guard = lock.lock().await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }
        assert!(peak.load(Ordering::SeqCst) > 1);
    }
}
