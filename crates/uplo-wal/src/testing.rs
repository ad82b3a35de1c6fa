//! Fault-injection test double for [`WalEngine`] (§4.1's "faulty-disk" hook).
//!
//! `FaultyWalEngine` wraps a real [`SegmentedWal`] and can be told to fail
//! at a specific point in the create-and-apply sequence, so tests can
//! exercise the one code path that is otherwise only reachable via an
//! actual disk fault.

use crate::engine::{SegmentedWal, Transaction, WalEngine};
use crate::error::{Result, WalError};
use crate::update::Update;
use parking_lot::Mutex;
use std::io;

/// Which step of the create-and-apply sequence to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Fail inside `begin` (before anything is durable).
    Begin,
    /// Fail inside `wait_setup_complete` (the fsync itself fails).
    WaitSetupComplete,
    /// Fail inside `signal_applied` (updates already applied to disk).
    SignalApplied,
}

/// A [`WalEngine`] that injects a failure at a configured [`FaultPoint`]
/// after `trigger_after` successful calls to `begin`, then behaves normally.
pub struct FaultyWalEngine {
    inner: SegmentedWal,
    fault: Option<FaultPoint>,
    trigger_after: usize,
    calls: Mutex<usize>,
}

impl FaultyWalEngine {
    /// Wrap `inner` with no fault configured (behaves identically to it).
    pub fn new(inner: SegmentedWal) -> Self {
        FaultyWalEngine {
            inner,
            fault: None,
            trigger_after: 0,
            calls: Mutex::new(0),
        }
    }

    /// Inject a failure at `point` starting with the `trigger_after`-th call
    /// (0 = fail immediately).
    pub fn with_fault(mut self, point: FaultPoint, trigger_after: usize) -> Self {
        self.fault = Some(point);
        self.trigger_after = trigger_after;
        self
    }

    fn should_fail_at(&self, point: FaultPoint) -> bool {
        if self.fault != Some(point) {
            return false;
        }
        let mut calls = self.calls.lock();
        let fire = *calls >= self.trigger_after;
        *calls += 1;
        fire
    }

    fn disk_fault() -> WalError {
        WalError::Io(io::Error::new(io::ErrorKind::Other, "injected disk fault"))
    }
}

impl WalEngine for FaultyWalEngine {
    fn begin(&self, updates: &[Update]) -> Result<Transaction> {
        if self.should_fail_at(FaultPoint::Begin) {
            return Err(Self::disk_fault());
        }
        self.inner.begin(updates)
    }

    fn wait_setup_complete(&self, txn: &Transaction) -> Result<()> {
        if self.should_fail_at(FaultPoint::WaitSetupComplete) {
            return Err(Self::disk_fault());
        }
        self.inner.wait_setup_complete(txn)
    }

    fn signal_applied(&self, txn: &Transaction) -> Result<()> {
        if self.should_fail_at(FaultPoint::SignalApplied) {
            return Err(Self::disk_fault());
        }
        self.inner.signal_applied(txn)
    }

    fn unapplied_transactions(&self) -> Result<Vec<(u64, Vec<Update>)>> {
        self.inner.unapplied_transactions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::WalAdapter;
    use crate::engine::WalConfig;
    use tempfile::TempDir;

    #[test]
    fn fault_at_wait_setup_complete_surfaces_as_error() {
        let tmp = TempDir::new().unwrap();
        let inner = SegmentedWal::open(WalConfig::new(tmp.path().to_path_buf())).unwrap();
        let faulty = FaultyWalEngine::new(inner).with_fault(FaultPoint::WaitSetupComplete, 0);
        let adapter = WalAdapter::new_for_fault_injection(faulty);

        let result = adapter.create_and_apply(&[Update::DirDelete { path: "x".into() }]);
        assert!(result.is_err());
    }

    #[test]
    fn no_fault_configured_behaves_like_inner() {
        let tmp = TempDir::new().unwrap();
        let inner = SegmentedWal::open(WalConfig::new(tmp.path().to_path_buf())).unwrap();
        let faulty = FaultyWalEngine::new(inner);
        let adapter = WalAdapter::new(faulty);
        adapter.create_and_apply(&[]).unwrap();
    }
}
