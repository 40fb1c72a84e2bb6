//! Scripted fault injection for the in-memory ports.
//!
//! Queued faults are consumed one per call; a sticky fault applies to every
//! call until cleared. Queued faults take precedence.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;

use crate::{BackendError, BackendResult};

/// Port operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortOp {
    Schedule,
    Cancel,
    List,
    Export,
}

#[derive(Debug, Clone)]
pub enum Fault {
    Fail(BackendError),
    /// Stall before completing normally. Used to trip call deadlines.
    Delay(Duration),
    DelayThenFail(Duration, BackendError),
}

#[derive(Debug, Default)]
pub struct FaultScript {
    queued: Mutex<HashMap<PortOp, VecDeque<Fault>>>,
    sticky: Mutex<HashMap<PortOp, Fault>>,
}

impl FaultScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `fault` to the next call of `op` only.
    pub fn queue(&self, op: PortOp, fault: Fault) {
        self.queued.lock().entry(op).or_default().push_back(fault);
    }

    /// Applies `fault` to every call of `op` until cleared.
    pub fn set_sticky(&self, op: PortOp, fault: Fault) {
        self.sticky.lock().insert(op, fault);
    }

    pub fn clear_sticky(&self, op: PortOp) {
        self.sticky.lock().remove(&op);
    }

    pub fn clear(&self) {
        self.queued.lock().clear();
        self.sticky.lock().clear();
    }

    fn next(&self, op: PortOp) -> Option<Fault> {
        let queued = self
            .queued
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        queued.or_else(|| self.sticky.lock().get(&op).cloned())
    }

    /// Resolves the fault for one call of `op`.
    pub async fn apply(&self, op: PortOp) -> BackendResult<()> {
        match self.next(op) {
            None => Ok(()),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(Fault::DelayThenFail(delay, err)) => {
                tokio::time::sleep(delay).await;
                Err(err)
            }
        }
    }
}
