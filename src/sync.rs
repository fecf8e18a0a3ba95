/// Reader admission control.
///
/// Query executors pass through a counting gate that limits how many may
/// run at the same time. The limit can only be changed while no reader is
/// active, so a raised or lowered cap never strands a waiting thread.
use parking_lot::{Condvar, Mutex};

pub struct ReaderGate {
    state: Mutex<GateState>,
    available: Condvar,
}

struct GateState {
    active: usize,
    limit: usize,
}

impl ReaderGate {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0);
        ReaderGate {
            state: Mutex::new(GateState { active: 0, limit }),
            available: Condvar::new(),
        }
    }

    /// Block until a reader slot is free, then occupy it. The returned
    /// guard releases the slot on drop.
    pub fn enter(&self) -> ReaderPass<'_> {
        let mut state = self.state.lock();
        while state.active >= state.limit {
            self.available.wait(&mut state);
        }
        state.active += 1;
        ReaderPass { gate: self }
    }

    /// Change the reader cap. Waits until no reader holds a slot.
    pub fn set_limit(&self, limit: usize) {
        assert!(limit > 0);
        let mut state = self.state.lock();
        while state.active > 0 {
            self.available.wait(&mut state);
        }
        state.limit = limit;
        self.available.notify_all();
    }

    pub fn active_readers(&self) -> usize {
        self.state.lock().active
    }
}

pub struct ReaderPass<'a> {
    gate: &'a ReaderGate,
}

impl Drop for ReaderPass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.active -= 1;
        self.gate.available.notify_all();
    }
}
