// Scripted in-memory stand-in for the QuickBooks request processor, shared
// by the unit tests. Records every call so tests can assert on connection
// and session lifecycles, and replays queued response documents.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{QbError, Result};
use crate::processor::{ConnectionSettings, ProcessorFactory, RequestProcessor};
use crate::FileMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    BeginSession,
    EndSession,
    ProcessRequest,
    CloseConnection,
}

/// Shared state across every processor a `MockFactory` hands out, so tests
/// see one combined call log even under the per-request strategy.
pub struct MockState {
    calls: Mutex<Vec<Call>>,
    tickets_issued: Mutex<u32>,
    ticket_override: Mutex<Option<String>>,
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<String>>,
    open_failure: Mutex<Option<String>>,
    end_session_failure: Mutex<Option<String>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            tickets_issued: Mutex::new(0),
            ticket_override: Mutex::new(None),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            open_failure: Mutex::new(None),
            end_session_failure: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Queue a response document for the next `process_request`.
    pub fn push_response(&self, xml: &str) {
        self.responses.lock().unwrap().push_back(xml.to_string());
    }

    /// The request documents submitted so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Force every subsequent `begin_session` to return this ticket.
    pub fn set_next_ticket(&self, ticket: &str) {
        *self.ticket_override.lock().unwrap() = Some(ticket.to_string());
    }

    pub fn fail_open(&self, message: &str) {
        *self.open_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_end_session(&self, message: &str) {
        *self.end_session_failure.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct MockProcessor {
    state: Arc<MockState>,
}

impl RequestProcessor for MockProcessor {
    fn begin_session(&self, _company_file: &str, _file_mode: FileMode) -> Result<String> {
        self.state.record(Call::BeginSession);
        if let Some(ticket) = self.state.ticket_override.lock().unwrap().clone() {
            return Ok(ticket);
        }
        let mut issued = self.state.tickets_issued.lock().unwrap();
        *issued += 1;
        Ok(format!("ticket-{}", issued))
    }

    fn end_session(&self, _ticket: &str) -> Result<()> {
        self.state.record(Call::EndSession);
        if let Some(message) = self.state.end_session_failure.lock().unwrap().clone() {
            return Err(QbError::Session(message));
        }
        Ok(())
    }

    fn process_request(&self, _ticket: &str, request_xml: &str) -> Result<String> {
        self.state.record(Call::ProcessRequest);
        self.state.requests.lock().unwrap().push(request_xml.to_string());
        self.state
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| QbError::Connection("no scripted response".to_string()))
    }

    fn close_connection(&self) -> Result<()> {
        self.state.record(Call::CloseConnection);
        Ok(())
    }
}

pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new(state: Arc<MockState>) -> Self {
        Self { state }
    }
}

impl ProcessorFactory for MockFactory {
    fn open(&self, _settings: &ConnectionSettings) -> Result<Arc<dyn RequestProcessor>> {
        if let Some(message) = self.state.open_failure.lock().unwrap().clone() {
            return Err(QbError::Connection(message));
        }
        self.state.record(Call::Open);
        Ok(Arc::new(MockProcessor {
            state: self.state.clone(),
        }))
    }
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings {
        app_id: String::new(),
        app_name: "test".to_string(),
        company_file: String::new(),
        file_mode: FileMode::DoNotCare,
    }
}
