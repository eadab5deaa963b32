//! One-shot guards for asynchronous operations with several terminal paths.
//!
//! A scan can end because the target appeared, the deadline passed or the
//! stack reported an error; a bonding attempt ends on `Bonded`, `None` or a
//! timeout. Whichever path gets there first claims the guard; every later
//! path sees it already claimed and does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use bluelink_types::BondState;

use crate::adapter::{AdapterResult, BleAdapter, EventStream};

/// Flag that can be claimed exactly once.
#[derive(Debug, Default)]
pub struct TerminalGuard {
    finished: AtomicBool,
}

impl TerminalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the terminal transition. Returns `true` only for the first caller.
    pub fn try_finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Stops an active scan exactly once.
///
/// The scan is stopped by [`stop`](Self::stop) or, if the owning future is
/// dropped mid-scan, from `Drop` on the current tokio runtime.
pub struct ScanGuard<A: BleAdapter + ?Sized + 'static> {
    adapter: Arc<A>,
    stopped: TerminalGuard,
}

impl<A: BleAdapter + ?Sized + 'static> ScanGuard<A> {
    pub fn new(adapter: Arc<A>) -> Self {
        Self {
            adapter,
            stopped: TerminalGuard::new(),
        }
    }

    /// Issue the stop-scan call. Returns `None` if it was already issued.
    pub async fn stop(&self) -> Option<AdapterResult<()>> {
        if !self.stopped.try_finish() {
            return None;
        }
        Some(self.adapter.stop_scan().await)
    }
}

impl<A: BleAdapter + ?Sized + 'static> Drop for ScanGuard<A> {
    fn drop(&mut self) {
        if !self.stopped.try_finish() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let adapter = Arc::clone(&self.adapter);
            handle.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop scan in guard drop: {}", e);
                }
            });
        } else {
            warn!("No tokio runtime available to stop scan in guard drop");
        }
    }
}

/// Listener for bond state changes of one device.
///
/// The listener detaches itself on the first terminal state (`Bonded` or
/// `None`) by dropping its event stream; anything the adapter emits after
/// that is never observed.
#[derive(Debug)]
pub struct BondListener {
    address: String,
    events: Option<EventStream<BondState>>,
    guard: TerminalGuard,
}

impl BondListener {
    pub fn new(address: impl Into<String>, events: EventStream<BondState>) -> Self {
        Self {
            address: address.into(),
            events: Some(events),
            guard: TerminalGuard::new(),
        }
    }

    /// Address of the device being bonded.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Wait for the next bond state.
    ///
    /// Terminal states detach the listener before they are returned. Returns
    /// `None` once detached or when the adapter closes the stream.
    pub async fn next(&mut self) -> Option<BondState> {
        let state = self.events.as_mut()?.recv().await;
        match state {
            Some(BondState::Bonded) | Some(BondState::None) | None => {
                self.detach();
            }
            Some(BondState::Bonding) => {}
        }
        state
    }

    /// Stop listening. Only the first call has an effect.
    pub fn detach(&mut self) -> bool {
        if !self.guard.try_finish() {
            return false;
        }
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        debug!(address = %self.address, "Bond listener detached");
        true
    }

    pub fn is_detached(&self) -> bool {
        self.guard.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAdapter;
    use tokio::sync::mpsc;

    fn bond_channel(address: &str, capacity: usize) -> (mpsc::Sender<BondState>, BondListener) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, BondListener::new(address, rx))
    }

    #[test]
    fn test_terminal_guard_claims_once() {
        let guard = TerminalGuard::new();
        assert!(!guard.is_finished());
        assert!(guard.try_finish());
        assert!(!guard.try_finish());
        assert!(guard.is_finished());
    }

    #[tokio::test]
    async fn test_scan_guard_stops_once() {
        let adapter = Arc::new(MockAdapter::new());
        let guard = ScanGuard::new(Arc::clone(&adapter));
        assert!(matches!(guard.stop().await, Some(Ok(()))));
        assert!(guard.stop().await.is_none());
        drop(guard);
        tokio::task::yield_now().await;
        assert_eq!(adapter.stop_scan_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_guard_stops_on_drop() {
        let adapter = Arc::new(MockAdapter::new());
        drop(ScanGuard::new(Arc::clone(&adapter)));
        for _ in 0..10 {
            if adapter.stop_scan_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(adapter.stop_scan_count(), 1);
    }

    #[tokio::test]
    async fn test_bond_listener_detaches_on_bonded() {
        let (tx, mut listener) = bond_channel("AA:BB", 8);
        tx.send(BondState::Bonding).await.unwrap();
        tx.send(BondState::Bonded).await.unwrap();

        assert_eq!(listener.next().await, Some(BondState::Bonding));
        assert!(!listener.is_detached());
        assert_eq!(listener.next().await, Some(BondState::Bonded));
        assert!(listener.is_detached());

        // Spurious event after detaching is refused.
        assert!(tx.send(BondState::None).await.is_err());
        assert_eq!(listener.next().await, None);
        assert!(!listener.detach());
    }

    #[tokio::test]
    async fn test_bond_listener_detaches_on_none() {
        let (tx, mut listener) = bond_channel("AA:BB", 8);
        tx.send(BondState::None).await.unwrap();
        assert_eq!(listener.next().await, Some(BondState::None));
        assert!(listener.is_detached());
    }

    #[tokio::test]
    async fn test_bond_listener_closed_stream() {
        let (tx, mut listener) = bond_channel("AA:BB", 8);
        drop(tx);
        assert_eq!(listener.next().await, None);
        assert!(listener.is_detached());
        assert_eq!(listener.address(), "AA:BB");
    }
}
