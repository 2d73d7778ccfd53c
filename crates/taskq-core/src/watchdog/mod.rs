//! Background reconciliation for tentative and undeliverable tasks.
//!
//! Both watchdogs run their sweep as a tokio task that is started lazily
//! when work arrives and stops itself once there is nothing left to watch.
//! The start/stop decision is serialized by [`SweepTimer`]'s mutex so two
//! callers never start the same sweep twice.

mod pending;
mod stalled;

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

pub use pending::PendingRetries;
pub use stalled::{StalledAssignments, TentativeAssignment};

/// Enable/disable switch for one periodic sweep task.
pub struct SweepTimer {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.guard().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start the sweep unless one is already running. `spawn` returns
    /// `None` when no runtime is available to host it.
    pub fn ensure_running<F>(&self, spawn: F)
    where
        F: FnOnce() -> Option<JoinHandle<()>>,
    {
        let mut handle = self.guard();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *handle = spawn();
        if handle.is_some() {
            tracing::debug!(sweep = self.name, "Sweep started");
        }
    }

    /// Abort the sweep from outside if `idle` holds.
    pub fn stop_if<F>(&self, idle: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut handle = self.guard();
        if !idle() {
            return false;
        }
        if let Some(running) = handle.take() {
            running.abort();
            tracing::debug!(sweep = self.name, "Sweep stopped");
        }
        true
    }

    /// Called by the sweep task itself at the end of a pass: if `idle`
    /// holds, forget the handle and tell the task to exit.
    pub fn finish_if<F>(&self, idle: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut handle = self.guard();
        if !idle() {
            return false;
        }
        handle.take();
        tracing::debug!(sweep = self.name, "Sweep idle, exiting");
        true
    }
}

impl Drop for SweepTimer {
    fn drop(&mut self) {
        if let Some(running) = self.guard().take() {
            running.abort();
        }
    }
}

/// Spawn `future` on the ambient runtime, if there is one.
pub(crate) fn spawn_sweep<F>(name: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => Some(runtime.spawn(future)),
        Err(e) => {
            tracing::warn!(sweep = name, error = %e, "No runtime to host sweep");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_running_starts_once() {
        let timer = SweepTimer::new("test");
        let mut spawned = 0;
        for _ in 0..3 {
            timer.ensure_running(|| {
                spawned += 1;
                spawn_sweep("test", std::future::pending())
            });
        }
        assert_eq!(spawned, 1);
        assert!(timer.is_running());
    }

    #[tokio::test]
    async fn stop_if_only_when_idle() {
        let timer = SweepTimer::new("test");
        timer.ensure_running(|| spawn_sweep("test", std::future::pending()));

        assert!(!timer.stop_if(|| false));
        assert!(timer.is_running());
        assert!(timer.stop_if(|| true));
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn finished_sweep_is_restarted() {
        let timer = SweepTimer::new("test");
        timer.ensure_running(|| spawn_sweep("test", async {}));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let mut restarted = false;
        timer.ensure_running(|| {
            restarted = true;
            spawn_sweep("test", std::future::pending())
        });
        assert!(restarted);
    }

    #[test]
    fn no_runtime_means_no_sweep() {
        let timer = SweepTimer::new("test");
        timer.ensure_running(|| spawn_sweep("test", async {}));
        assert!(!timer.is_running());
    }
}
