//! Integration with the host's idle/periodic work scheduling.
//!
//! An asynchronous session registers one piece of work when it starts and
//! removes it when it is flushed. The host runs [`crate::AudioEngine::pump`]
//! whenever that work is due.

use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::engine::{AudioEngine, PumpStatus, StopKind};

/// Opaque handle for one registered work callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkId(pub u64);

/// The host's idle or timer facility.
pub trait Scheduler {
    fn add_work(&mut self) -> WorkId;
    fn remove_work(&mut self, id: WorkId);
}

/// Scheduler for hosts that poll the engine themselves, e.g. with [`drive`].
#[derive(Debug, Default)]
pub struct IdleScheduler {
    next_id: u64,
    active: Option<WorkId>,
}

impl IdleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<WorkId> {
        self.active
    }
}

impl Scheduler for IdleScheduler {
    fn add_work(&mut self) -> WorkId {
        self.next_id += 1;
        let id = WorkId(self.next_id);
        self.active = Some(id);
        id
    }

    fn remove_work(&mut self, id: WorkId) {
        if self.active == Some(id) {
            self.active = None;
        }
    }
}

/// Pump `engine` every `interval` until its asynchronous session is flushed.
///
/// A message on `stop_rx` stops playback explicitly. Returns immediately when
/// nothing is scheduled.
pub fn drive(engine: &mut AudioEngine, interval: Duration, stop_rx: &Receiver<()>) {
    let ticker = crossbeam_channel::tick(interval);
    while engine.has_pending_work() {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                if engine.pump() == PumpStatus::Done {
                    break;
                }
            }
            recv(stop_rx) -> _ => {
                tracing::info!("stop requested");
                engine.stop_playing(StopKind::Explicit);
            }
        }
    }
}
