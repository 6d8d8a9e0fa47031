use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{QbError, Result};
use crate::processor::{ConnectionSettings, ProcessorFactory, RequestProcessor};

/// A live QuickBooks session: an opaque ticket paired with the connection it
/// was created on. The ticket is never interpreted, only compared and passed
/// back verbatim. Identity (equality, hashing) is the ticket alone.
#[derive(Clone)]
pub struct Session {
    ticket: String,
    processor: Arc<dyn RequestProcessor>,
}

impl Session {
    pub(crate) fn new(processor: Arc<dyn RequestProcessor>, ticket: String) -> Self {
        Self { ticket, processor }
    }

    pub fn ticket(&self) -> &str {
        &self.ticket
    }

    pub(crate) fn processor(&self) -> &Arc<dyn RequestProcessor> {
        &self.processor
    }

    /// Submit one request document over this session.
    pub fn process_request(&self, request_xml: &str) -> Result<String> {
        self.processor.process_request(&self.ticket, request_xml)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.ticket == other.ticket
    }
}

impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ticket.hash(state);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("ticket", &self.ticket).finish()
    }
}

/// How connections and sessions are scoped, selected once at startup.
/// QuickBooks documents no concurrency contract for shared connections, so
/// the operator picks the trade-off: reuse (fast, must serialize) through
/// full isolation (slow, safe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One connection and one session for the strategy's whole lifetime.
    SingleSession,
    /// One connection, a fresh session per acquisition.
    MultiSession,
    /// A fresh connection and session per acquisition.
    PerRequest,
}

impl SessionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "single-session" => Some(SessionMode::SingleSession),
            "multi-session" => Some(SessionMode::MultiSession),
            "per-request" => Some(SessionMode::PerRequest),
            _ => None,
        }
    }
}

/// Acquire/release policy for sessions. All variants share the contract:
/// `acquire_session` auto-connects when no live connection exists, and none
/// of them retry internally — failures surface immediately to the caller.
///
/// No internal locking is provided. Callers running the single- or
/// multi-session variants under concurrent load must serialize
/// acquire/execute/release themselves, or pick `PerRequest`.
pub trait ConnectionStrategy: Send {
    /// Idempotently ensure a live connection exists.
    fn connect(&mut self) -> Result<()>;

    /// Tear down any sessions and the connection. Safe to call when already
    /// disconnected; errors are logged and swallowed since the desktop
    /// application may already be gone at shutdown.
    fn disconnect(&mut self);

    /// Return a usable session, connecting first if necessary.
    fn acquire_session(&mut self) -> Result<Session>;

    /// Return a session after use. What actually happens is the variant's
    /// core trade-off: no-op, end-session, or full teardown.
    fn release_session(&mut self, session: Session) -> Result<()>;
}

pub fn create_strategy(
    mode: SessionMode,
    settings: ConnectionSettings,
    factory: Arc<dyn ProcessorFactory>,
) -> Box<dyn ConnectionStrategy> {
    match mode {
        SessionMode::SingleSession => Box::new(SingleSessionStrategy::new(settings, factory)),
        SessionMode::MultiSession => Box::new(MultiSessionStrategy::new(settings, factory)),
        SessionMode::PerRequest => Box::new(PerRequestStrategy::new(settings, factory)),
    }
}

fn begin_session_checked(
    processor: &Arc<dyn RequestProcessor>,
    settings: &ConnectionSettings,
) -> Result<String> {
    let ticket = processor.begin_session(&settings.company_file, settings.file_mode)?;
    if ticket.is_empty() {
        return Err(QbError::Session("a session ticket was not created".to_string()));
    }
    log::debug!("session ticket '{}' created", ticket);
    Ok(ticket)
}

fn end_session_best_effort(processor: &Arc<dyn RequestProcessor>, ticket: &str) {
    if let Err(e) = processor.end_session(ticket) {
        log::warn!("failed to end session '{}': {}", ticket, e);
    }
}

fn close_connection_best_effort(processor: &Arc<dyn RequestProcessor>) {
    if let Err(e) = processor.close_connection() {
        log::warn!("failed to close connection: {}", e);
    }
}

/// One connection and one session, opened once and reused until disconnect.
/// Lowest latency, but the shared session makes concurrent batches unsafe.
pub struct SingleSessionStrategy {
    settings: ConnectionSettings,
    factory: Arc<dyn ProcessorFactory>,
    processor: Option<Arc<dyn RequestProcessor>>,
    session: Option<Session>,
}

impl SingleSessionStrategy {
    pub fn new(settings: ConnectionSettings, factory: Arc<dyn ProcessorFactory>) -> Self {
        Self {
            settings,
            factory,
            processor: None,
            session: None,
        }
    }
}

impl ConnectionStrategy for SingleSessionStrategy {
    fn connect(&mut self) -> Result<()> {
        if self.processor.is_some() && self.session.is_some() {
            return Ok(());
        }
        let processor = self.factory.open(&self.settings)?;
        let ticket = match begin_session_checked(&processor, &self.settings) {
            Ok(ticket) => ticket,
            Err(e) => {
                // the freshly opened connection is not kept around
                close_connection_best_effort(&processor);
                return Err(e);
            }
        };
        self.session = Some(Session::new(processor.clone(), ticket));
        self.processor = Some(processor);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let (Some(processor), Some(session)) = (&self.processor, self.session.take()) {
            end_session_best_effort(processor, session.ticket());
        }
        if let Some(processor) = self.processor.take() {
            close_connection_best_effort(&processor);
        }
    }

    fn acquire_session(&mut self) -> Result<Session> {
        self.connect()?;
        match &self.session {
            Some(session) => Ok(session.clone()),
            // connect() either populates the session or fails
            None => Err(QbError::Session("no session after connect".to_string())),
        }
    }

    fn release_session(&mut self, _session: Session) -> Result<()> {
        // The session stays alive for reuse by the next acquisition.
        Ok(())
    }
}

/// One long-lived connection; each acquisition begins a fresh session and
/// release ends it. Sessions are independent but still share the connection,
/// which may impose an external single-writer constraint.
pub struct MultiSessionStrategy {
    settings: ConnectionSettings,
    factory: Arc<dyn ProcessorFactory>,
    processor: Option<Arc<dyn RequestProcessor>>,
}

impl MultiSessionStrategy {
    pub fn new(settings: ConnectionSettings, factory: Arc<dyn ProcessorFactory>) -> Self {
        Self {
            settings,
            factory,
            processor: None,
        }
    }
}

impl ConnectionStrategy for MultiSessionStrategy {
    fn connect(&mut self) -> Result<()> {
        if self.processor.is_none() {
            self.processor = Some(self.factory.open(&self.settings)?);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        // TODO: track outstanding tickets so disconnect can end sessions
        // that were acquired but never released.
        if let Some(processor) = self.processor.take() {
            close_connection_best_effort(&processor);
        }
    }

    fn acquire_session(&mut self) -> Result<Session> {
        self.connect()?;
        let processor = match &self.processor {
            Some(processor) => processor.clone(),
            None => return Err(QbError::Connection("no connection after connect".to_string())),
        };
        let ticket = begin_session_checked(&processor, &self.settings)?;
        Ok(Session::new(processor, ticket))
    }

    fn release_session(&mut self, session: Session) -> Result<()> {
        session.processor().end_session(session.ticket())
    }
}

/// Full isolation: every acquisition opens its own connection and session,
/// and release tears both down. Slowest, but the only variant that is safe
/// under concurrent batches without external serialization.
pub struct PerRequestStrategy {
    settings: ConnectionSettings,
    factory: Arc<dyn ProcessorFactory>,
}

impl PerRequestStrategy {
    pub fn new(settings: ConnectionSettings, factory: Arc<dyn ProcessorFactory>) -> Self {
        Self { settings, factory }
    }
}

impl ConnectionStrategy for PerRequestStrategy {
    fn connect(&mut self) -> Result<()> {
        // Connections are owned by sessions; nothing to do up front.
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn acquire_session(&mut self) -> Result<Session> {
        let processor = self.factory.open(&self.settings)?;
        let ticket = match begin_session_checked(&processor, &self.settings) {
            Ok(ticket) => ticket,
            Err(e) => {
                // nothing else holds this connection, so close it here
                close_connection_best_effort(&processor);
                return Err(e);
            }
        };
        Ok(Session::new(processor, ticket))
    }

    fn release_session(&mut self, session: Session) -> Result<()> {
        // Close the connection even when ending the session fails, so a bad
        // session never strands an open connection on the QuickBooks side.
        let ended = session.processor().end_session(session.ticket());
        let closed = session.processor().close_connection();
        ended.and(closed)
    }
}

/// Scoped session acquisition. `release` surfaces errors; dropping the guard
/// without releasing falls back to a best-effort release so no exit path
/// leaks an open session.
pub struct SessionGuard<'a> {
    strategy: &'a mut dyn ConnectionStrategy,
    session: Option<Session>,
}

impl<'a> SessionGuard<'a> {
    pub fn acquire(strategy: &'a mut dyn ConnectionStrategy) -> Result<Self> {
        let session = strategy.acquire_session()?;
        Ok(Self {
            strategy,
            session: Some(session),
        })
    }

    pub fn session(&self) -> &Session {
        // Only None after release(), which consumes the guard.
        self.session.as_ref().expect("session guard already released")
    }

    pub fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => self.strategy.release_session(session),
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.strategy.release_session(session) {
                log::warn!("failed to release session: {}", e);
            }
        }
    }
}
