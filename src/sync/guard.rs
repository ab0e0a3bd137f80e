use crate::error::{Result, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// In-flight marker for one sync service. Calls on the same service are
/// serialised; a second caller is turned away instead of waiting.
#[derive(Debug, Default)]
pub(crate) struct BusyFlag {
    in_progress: AtomicBool,
}

impl BusyFlag {
    pub(crate) fn acquire(&self, service: &'static str) -> Result<BusyGuard<'_>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("[{}Sync] Another sync is already in progress, skipping", service);
            return Err(SyncError::Busy(service));
        }
        Ok(BusyGuard {
            flag: &self.in_progress,
            service,
        })
    }
}

/// Releases the flag when dropped, including on early returns.
pub(crate) struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    service: &'static str,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        debug!("[{}Sync] Sync lock released", self.service);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let flag = BusyFlag::default();
        let guard = flag.acquire("Remote").unwrap();
        assert!(matches!(flag.acquire("Remote"), Err(SyncError::Busy("Remote"))));
        drop(guard);
        assert!(flag.acquire("Remote").is_ok());
    }
}
