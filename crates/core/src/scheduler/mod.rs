//! Starting-soon scheduler
//!
//! Consumes a stream of event snapshots (creates, updates, cancellations)
//! and emits each event exactly once when it is about to start: at
//! `start - lead_time`, or immediately when that instant has already
//! passed and `skip_in_progress` is off.
//!
//! Admission is single-writer: one task drains the input stream and applies
//! the decision table below, so cancel-before-recreate for the same event
//! id is atomic. Firings run as their own tasks and honor cancellation; a
//! firing already in flight completes.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meetings_domain::EventSnapshot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long before an event's start the firing is emitted.
    pub lead_time: Duration,
    /// When set, events whose firing instant has already passed are
    /// dropped instead of fired immediately.
    pub skip_in_progress: bool,
    /// Bound of the output stream.
    pub output_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(30),
            skip_in_progress: false,
            output_capacity: 16,
        }
    }
}

/// Starting-soon scheduler. Construct, then [`run`](Self::run) it over an
/// event stream.
pub struct StartingSoonScheduler {
    config: SchedulerConfig,
}

impl StartingSoonScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Spawn the admission task and return the firing stream.
    ///
    /// The output closes once the input has closed and every pending
    /// firing has resolved. Cancelling `shutdown` revokes all pending
    /// alarms and stops admission.
    pub fn run(
        self,
        mut input: mpsc::Receiver<EventSnapshot>,
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<EventSnapshot> {
        let (tx, rx) = mpsc::channel(self.config.output_capacity);
        let mut alarms = AlarmSet::new(self.config, tx);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        alarms.cancel_all();
                        break;
                    }
                    next = input.recv() => match next {
                        Some(event) => alarms.admit(event, Utc::now()),
                        None => break,
                    },
                }
            }
            debug!("starting-soon admission loop finished");
        });

        rx
    }
}

/// A pending firing for one event id.
struct Alarm {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Instance-owned alarm state, mutated only by the admission task.
struct AlarmSet {
    alarms: HashMap<String, Alarm>,
    output: mpsc::Sender<EventSnapshot>,
    lead_time: chrono::Duration,
    skip_in_progress: bool,
    root: CancellationToken,
}

impl AlarmSet {
    fn new(config: SchedulerConfig, output: mpsc::Sender<EventSnapshot>) -> Self {
        let lead_time = chrono::Duration::from_std(config.lead_time)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            alarms: HashMap::new(),
            output,
            lead_time,
            skip_in_progress: config.skip_in_progress,
            root: CancellationToken::new(),
        }
    }

    /// Apply one snapshot to the alarm set.
    fn admit(&mut self, event: EventSnapshot, now: DateTime<Utc>) {
        if event.is_cancelled() {
            if let Some(alarm) = self.alarms.remove(&event.id) {
                alarm.cancel.cancel();
                info!(event_id = %event.id, "event cancelled, alarm removed");
            }
            return;
        }

        let (Some(start), Some(end)) = (event.start, event.end) else {
            warn!(event_id = %event.id, "event missing timestamps, dropping");
            return;
        };

        if event.has_ended(now) {
            // Already over; also drop any stale alarm left for this id.
            if let Some(alarm) = self.alarms.remove(&event.id) {
                alarm.cancel.cancel();
            }
            debug!(event_id = %event.id, "event already ended, skipping alarm");
            self.sweep(now);
            return;
        }

        if let Some(existing) = self.alarms.get(&event.id) {
            if existing.start == start {
                // Resync or duplicate delivery; keep the pending alarm.
                self.sweep(now);
                return;
            }
        }
        if let Some(superseded) = self.alarms.remove(&event.id) {
            superseded.cancel.cancel();
            info!(event_id = %event.id, "event rescheduled, resetting alarm");
        }

        let fire_at = start - self.lead_time;
        if fire_at <= now && self.skip_in_progress {
            info!(event_id = %event.id, start = %start, "event already in progress, skipping alarm");
            self.sweep(now);
            return;
        }

        let cancel = self.root.child_token();
        spawn_firing(event.clone(), fire_at, now, cancel.clone(), self.output.clone());
        info!(event_id = %event.id, fire_at = %fire_at, "alarm set");
        self.alarms.insert(event.id.clone(), Alarm { start, end, cancel });
        self.sweep(now);
    }

    /// Drop alarms whose event has ended; bounds the map under long runs.
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.alarms.retain(|_, alarm| {
            if alarm.end <= now {
                alarm.cancel.cancel();
                false
            } else {
                true
            }
        });
    }

    fn cancel_all(&mut self) {
        self.root.cancel();
        self.alarms.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.alarms.len()
    }

    #[cfg(test)]
    fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.alarms.get(id).map(|a| a.cancel.clone())
    }
}

fn spawn_firing(
    event: EventSnapshot,
    fire_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cancel: CancellationToken,
    output: mpsc::Sender<EventSnapshot>,
) {
    let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                info!(event_id = %event.id, summary = event.summary.as_deref().unwrap_or(""), "event starting");
                if output.send(event).await.is_err() {
                    debug!("firing dropped, output stream closed");
                }
            }
        }
    });
}
