//! Per-job event fan-out with bounded replay for late subscribers.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::broadcast;

use recon_model::{ProgressEvent, ScanStats};

/// One published event plus its position on the job's stream.
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub sequence: u64,
    pub event: ProgressEvent,
}

/// Fan-out channel for one scan job's progress events.
///
/// Exactly one producer (the pipeline executor) publishes; any number of
/// subscribers consume. Publishing never blocks: each subscriber rides a
/// bounded broadcast queue and a slow consumer lags, losing the oldest
/// log frames only. `done` closes the broker; nothing is published after
/// it, so it is always the last frame a subscriber can observe.
#[derive(Debug)]
pub struct EventBroker {
    tx: broadcast::Sender<EventFrame>,
    history: Mutex<History>,
    sequence: AtomicU64,
}

#[derive(Debug)]
struct History {
    ring: VecDeque<EventFrame>,
    capacity: usize,
    last_status: Option<EventFrame>,
    last_stats: Option<EventFrame>,
    done: Option<EventFrame>,
}

impl EventBroker {
    pub fn new(history_capacity: usize, broadcast_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        let broadcast_capacity = broadcast_capacity.max(1);
        let (tx, _rx) = broadcast::channel(broadcast_capacity);
        Self {
            tx,
            history: Mutex::new(History {
                ring: VecDeque::with_capacity(history_capacity),
                capacity: history_capacity,
                last_status: None,
                last_stats: None,
                done: None,
            }),
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers and the replay ring.
    ///
    /// Returns `None` once the broker is closed; a closed broker accepts
    /// nothing further so `done` stays the last frame on the stream.
    pub fn publish(&self, event: ProgressEvent) -> Option<EventFrame> {
        let frame = {
            let mut guard = self.history.lock().expect("event history mutex poisoned");
            if guard.done.is_some() {
                return None;
            }
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let frame = EventFrame { sequence, event };
            if guard.ring.len() == guard.capacity {
                guard.ring.pop_front();
            }
            guard.ring.push_back(frame.clone());
            match &frame.event {
                ProgressEvent::Status { .. } => guard.last_status = Some(frame.clone()),
                ProgressEvent::Stats { .. } => guard.last_stats = Some(frame.clone()),
                ProgressEvent::Done => guard.done = Some(frame.clone()),
                ProgressEvent::Log { .. } => {}
            }
            frame
        };

        let _ = self.tx.send(frame.clone());
        Some(frame)
    }

    /// Publish the terminal `done` marker. Idempotent.
    pub fn close(&self) -> Option<EventFrame> {
        self.publish(ProgressEvent::Done)
    }

    pub fn is_closed(&self) -> bool {
        self.history
            .lock()
            .expect("event history mutex poisoned")
            .done
            .is_some()
    }

    /// Attach a subscriber.
    ///
    /// The returned replay carries the last known status and stats frames
    /// (and `done`, when the job already finished); subsequent events
    /// arrive on the receiver. An event racing the subscription may show
    /// up in both replay and live stream — consumers treat frames as
    /// at-least-once and stop at the first `done`.
    pub fn subscribe(&self) -> (Vec<EventFrame>, broadcast::Receiver<EventFrame>) {
        let guard = self.history.lock().expect("event history mutex poisoned");
        let rx = self.tx.subscribe();
        let mut replay = Vec::with_capacity(3);
        if let Some(frame) = &guard.last_status {
            replay.push(frame.clone());
        }
        if let Some(frame) = &guard.last_stats {
            replay.push(frame.clone());
        }
        if let Some(frame) = &guard.done {
            replay.push(frame.clone());
        }
        (replay, rx)
    }

    /// Recent frames, oldest first.
    pub fn history(&self) -> Vec<EventFrame> {
        let guard = self.history.lock().expect("event history mutex poisoned");
        guard.ring.iter().cloned().collect()
    }

    /// The most recently published stats snapshot, if any.
    pub fn latest_stats(&self) -> Option<ScanStats> {
        let guard = self.history.lock().expect("event history mutex poisoned");
        guard.last_stats.as_ref().and_then(|frame| match &frame.event {
            ProgressEvent::Stats { data } => Some(data.clone()),
            _ => None,
        })
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
