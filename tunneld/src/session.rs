//! Per-subscriber session state (spec component C3).
//!
//! A [`Session`] is created when a connection transitions into the
//! streaming state and is shared between exactly two parties: the
//! [`crate::logger::Logger`], which only ever calls [`Session::insert`],
//! and the owning connection's streamer task, which only ever calls
//! [`Session::consume`]. `insert` must never block — it runs on
//! whatever thread is emitting a log record — so the queue is guarded
//! by a short-held `parking_lot` mutex rather than an async lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::Notify;

use crate::claims::Actor;
use crate::event::{LogEvent, StreamingFilters};

pub struct Session {
    actor: Actor,
    capacity: usize,
    queue: Mutex<VecDeque<LogEvent>>,
    filters: RwLock<StreamingFilters>,
    active: AtomicBool,
    item_ready: Notify,
    /// Set by [`Session::pre_empt`] before the streamer task is woken, so
    /// the owning connection's controller loop can tell "the streamer
    /// exited because this session was reclaimed" apart from "the
    /// streamer exited because of a real write failure" — the two race
    /// to resolve the same `select!` and otherwise can't be told apart.
    preempted: AtomicBool,
    /// Woken by [`crate::logger::Logger`] when this session is pre-empted
    /// by a newer connection for the same actor; the owning connection's
    /// controller loop selects on this to tear itself down.
    cancel: Arc<Notify>,
}

impl Session {
    pub fn new(capacity: usize, actor: Actor, cancel: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            actor,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            filters: RwLock::new(StreamingFilters::default()),
            active: AtomicBool::new(true),
            item_ready: Notify::new(),
            preempted: AtomicBool::new(false),
            cancel,
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_filters(&self, filters: StreamingFilters) {
        *self.filters.write() = filters.clamped();
    }

    /// Non-blocking insert. Silently drops the event if it fails the
    /// session's filters, loses the sampling coin flip, or the queue is
    /// already at capacity.
    pub fn insert(&self, event: &LogEvent) {
        if !self.is_active() {
            return;
        }
        if !self.passes_filters(event) {
            return;
        }

        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return;
        }
        queue.push_back(event.clone());
        drop(queue);
        self.item_ready.notify_one();
    }

    fn passes_filters(&self, event: &LogEvent) -> bool {
        let filters = self.filters.read();
        if let Some(min) = filters.level {
            if event.level < min {
                return false;
            }
        }
        if let Some(kinds) = &filters.events {
            if !kinds.is_empty() && !kinds.contains(&event.event) {
                return false;
            }
        }
        if let Some(p) = filters.sampling {
            // 0 or 1 mean "no sampler": every event passes this stage.
            // Only a probability strictly between the two runs the trial.
            if p > 0.0 && p < 1.0 && !rand::thread_rng().gen_bool(p) {
                return false;
            }
        }
        true
    }

    /// Blocking, cancellable dequeue. Returns `None` once the session has
    /// been stopped and the queue has drained — the caller's streamer
    /// task treats that as "nothing more will ever arrive".
    pub async fn consume(&self) -> Option<LogEvent> {
        loop {
            if let Some(event) = self.queue.lock().pop_front() {
                return Some(event);
            }
            if !self.is_active() {
                return None;
            }
            self.item_ready.notified().await;
        }
    }

    /// Marks the session inactive and wakes any pending `consume` call.
    /// Called either on an explicit `stop_streaming` or when the owning
    /// connection is tearing down.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.item_ready.notify_waiters();
    }

    /// Wakes the owning connection's controller loop so it tears itself
    /// down; used when this session is pre-empted.
    pub fn fire_cancel(&self) {
        self.cancel.notify_one();
    }

    /// True once [`Session::pre_empt`] has run on this session. The
    /// controller loop checks this to resolve the streamer-exit race: a
    /// pre-empted session's streamer always closes normally, never with
    /// an internal-error code, no matter which of the two wakeups the
    /// `select!` happens to observe first.
    pub fn was_preempted(&self) -> bool {
        self.preempted.load(Ordering::Acquire)
    }

    /// Reclaims this session on behalf of a newer connection for the
    /// same actor: marks it pre-empted, stops it (waking the streamer's
    /// `consume` with `None`), and fires the owning connection's cancel
    /// notify. Order matters — the flag is set before either wakeup goes
    /// out, so whichever the controller observes first already sees it.
    pub fn pre_empt(&self) {
        self.preempted.store(true, Ordering::Release);
        self.stop();
        self.fire_cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogEventKind, Severity};
    use serde_json::Map;

    fn actor(id: &str) -> Actor {
        Actor {
            id: id.to_owned(),
            is_support: false,
        }
    }

    fn event(level: Severity, kind: LogEventKind) -> LogEvent {
        LogEvent {
            time: "2020-01-01T00:00:00Z".to_owned(),
            level,
            event: kind,
            message: "msg".to_owned(),
            fields: Map::new(),
        }
    }

    #[tokio::test]
    async fn insert_then_consume_round_trips() {
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        session.insert(&event(Severity::Info, LogEventKind::Http));
        let got = session.consume().await.unwrap();
        assert_eq!(got.event, LogEventKind::Http);
    }

    #[tokio::test]
    async fn overflow_drops_events_past_capacity() {
        let session = Session::new(2, actor("a"), Arc::new(Notify::new()));
        for _ in 0..5 {
            session.insert(&event(Severity::Info, LogEventKind::Http));
        }
        let mut drained = 0;
        while session.queue.lock().pop_front().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 2);
    }

    #[tokio::test]
    async fn stop_wakes_pending_consume_with_none() {
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        let session2 = Arc::clone(&session);
        let handle = tokio::spawn(async move { session2.consume().await });
        tokio::task::yield_now().await;
        session.stop();
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn filters_reject_below_minimum_severity() {
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        session.set_filters(StreamingFilters {
            level: Some(Severity::Warn),
            events: None,
            sampling: None,
        });
        session.insert(&event(Severity::Info, LogEventKind::Http));
        session.insert(&event(Severity::Error, LogEventKind::Http));
        let first = session.consume().await.unwrap();
        assert_eq!(first.level, Severity::Error);
    }

    #[tokio::test]
    async fn filters_reject_excluded_kind() {
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        session.set_filters(StreamingFilters {
            level: None,
            events: Some(vec![LogEventKind::Tcp]),
            sampling: None,
        });
        session.insert(&event(Severity::Info, LogEventKind::Http));
        session.insert(&event(Severity::Info, LogEventKind::Tcp));
        let first = session.consume().await.unwrap();
        assert_eq!(first.event, LogEventKind::Tcp);
    }

    #[tokio::test]
    async fn sampling_zero_or_one_means_no_sampler() {
        // Per spec: a sampling value of exactly 0 or 1 installs no
        // sampler at all, so every event still passes this stage.
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        session.set_filters(StreamingFilters {
            level: None,
            events: None,
            sampling: Some(0.0),
        });
        session.insert(&event(Severity::Info, LogEventKind::Http));
        let got = session.consume().await.unwrap();
        assert_eq!(got.event, LogEventKind::Http);
    }

    #[test]
    fn fire_cancel_wakes_connection_side_notify() {
        let cancel = Arc::new(Notify::new());
        let session = Session::new(4, actor("a"), Arc::clone(&cancel));
        // Should not panic even with no waiter registered yet.
        session.fire_cancel();
    }

    #[tokio::test]
    async fn pre_empt_marks_the_session_and_unblocks_consume() {
        let session = Session::new(4, actor("a"), Arc::new(Notify::new()));
        assert!(!session.was_preempted());
        session.pre_empt();
        assert!(session.was_preempted());
        assert_eq!(session.consume().await, None);
    }
}
