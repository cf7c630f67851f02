//! Fan-out log sink (spec component C4).
//!
//! A [`Logger`] is the single point where parsed log records fan out to
//! every currently-streaming [`Session`]. It doubles as an
//! [`std::io::Write`] target and a [`tracing_subscriber`] writer, so it
//! can sit directly in the host's logging pipeline the same way a file
//! or stdout would.

use std::io;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::fmt::MakeWriter;

use crate::claims::Actor;
use crate::event::LogEvent;
use crate::session::Session;

pub struct Logger {
    sessions: RwLock<Vec<Arc<Session>>>,
}

impl Logger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(Vec::new()),
        })
    }

    pub fn listen(&self, session: Arc<Session>) {
        self.sessions.write().push(session);
    }

    pub fn remove(&self, session: &Arc<Session>) {
        self.sessions.write().retain(|s| !Arc::ptr_eq(s, session));
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn active_session(&self, actor: &Actor) -> Option<Arc<Session>> {
        self.sessions.read().iter().find(|s| s.actor() == actor).cloned()
    }

    /// Parses one emitted record and fans it out to every session whose
    /// filters admit it. Never blocks and never fails outwardly: a
    /// record that fails to parse is logged to the side channel and
    /// dropped.
    fn ingest(&self, raw: &[u8]) {
        let event = match LogEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!(error = %err, "dropping unparsable log record");
                return;
            }
        };
        for session in self.sessions.read().iter() {
            session.insert(&event);
        }
    }
}

/// Thin [`io::Write`] handle over a [`Logger`], the shape tracing's fmt
/// layer expects from a `MakeWriter`.
pub struct LoggerWriter(Arc<Logger>);

impl io::Write for LoggerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.ingest(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// Only `Arc<Logger>` implements `MakeWriter`: tracing clones its writer
// per event, and `Logger` itself is never meant to live anywhere but
// behind a shared handle (see `main.rs`).

impl<'a> MakeWriter<'a> for Arc<Logger> {
    type Writer = LoggerWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LoggerWriter(Arc::clone(self))
    }
}
