//! Detector event stream: zero-latency feedback channel for the host UI.
//! Bounded crossbeam channel with drop-oldest overflow so the detection
//! thread never blocks and a host that never subscribes (or walks away)
//! costs at most one queue of memory. The host drains the receiver to render
//! visual/audio acknowledgments; dropping it is harmless.

use crossbeam_channel as cb;
use tracing::debug;

/// Retained-event cap when nobody is draining. Oldest events are dropped
/// first; a live consumer at any sane pace never sees a drop.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Everything observable about a running session, beyond the wake callback.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    /// Baseline finalized; detection is now live.
    CalibrationComplete { baseline: f32 },
    /// A clap was registered (fires even when the wake predicate does not).
    ClapDetected { volume: f32, hf_ratio: f32 },
    /// The wake predicate fired; `on_wake` was invoked.
    WakeFired,
    /// The capture stream ended mid-session; the session is over.
    DeviceLost,
    /// The detection loop exited.
    Stopped,
}

#[derive(Clone)]
pub struct EventBus {
    tx: cb::Sender<DetectorEvent>,
    rx: cb::Receiver<DetectorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = cb::bounded(EVENT_QUEUE_DEPTH);
        Self { tx, rx }
    }

    /// Emitted from the detection thread only; never blocks. When the queue
    /// is full the oldest event is evicted to make room.
    pub fn emit(&self, event: DetectorEvent) {
        debug!(event = ?event, "detector_event");
        if let Err(cb::TrySendError::Full(event)) = self.tx.try_send(event) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(event);
        }
    }

    /// A receiver the host can drain at its own pace.
    pub fn subscribe(&self) -> cb::Receiver<DetectorEvent> {
        self.rx.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitted_events_arrive_in_order() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(DetectorEvent::CalibrationComplete { baseline: 9.5 });
        bus.emit(DetectorEvent::WakeFired);
        assert_eq!(
            rx.try_recv().unwrap(),
            DetectorEvent::CalibrationComplete { baseline: 9.5 }
        );
        assert_eq!(rx.try_recv().unwrap(), DetectorEvent::WakeFired);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn overflow_drops_oldest_and_stays_bounded() {
        let bus = EventBus::new();
        for i in 0..1000 {
            bus.emit(DetectorEvent::ClapDetected {
                volume: i as f32,
                hf_ratio: 0.4,
            });
        }
        let rx = bus.subscribe();
        assert!(rx.len() <= EVENT_QUEUE_DEPTH);
        // The survivors are the newest events, oldest first.
        match rx.try_recv().unwrap() {
            DetectorEvent::ClapDetected { volume, .. } => {
                assert_eq!(volume, (1000 - EVENT_QUEUE_DEPTH) as f32)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let mut last = 0.0;
        for event in rx.try_iter() {
            if let DetectorEvent::ClapDetected { volume, .. } = event {
                last = volume;
            }
        }
        assert_eq!(last, 999.0);
    }
}
