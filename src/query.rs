// The batched query executor and the capability contract each typed query
// implements: contribute a fragment to the outbound batch, consume the
// matching response fragment, hold the mapped result (or the error).

use crate::error::{QbError, Result};
use crate::qbxml::{parse_response_set, QbXmlVersion, RequestBatch, XmlElement};
use crate::session::Session;

/// Capability set for one typed query in a batch.
pub trait QueryRequest {
    /// Identifying string for logging and diagnostics.
    fn label(&self) -> &str;

    /// Append this request's query element to the outbound batch.
    fn append_to_batch(&self, batch: &mut RequestBatch);

    /// Consume the per-request response payload. A shape mismatch must be
    /// recorded on the request's error field and returned as
    /// `QbError::Mapping`.
    fn process_response(&mut self, detail: &XmlElement) -> Result<()>;
}

/// Result storage shared by the concrete query types. Holds at most one
/// result or one error after execution; the result is only readable once it
/// has actually been assigned.
#[derive(Debug, Default)]
pub struct ResultSlot<T> {
    result: Option<T>,
    error: Option<String>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            result: None,
            error: None,
        }
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn result(&self) -> Result<&T> {
        self.result
            .as_ref()
            .ok_or_else(|| QbError::InvalidOperation("the result has not been set yet".to_string()))
    }

    pub fn into_result(self) -> Result<T> {
        self.result
            .ok_or_else(|| QbError::InvalidOperation("the result has not been set yet".to_string()))
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Store a mapping outcome: a success becomes the result, a failure is
    /// recorded as the error message and handed back to the caller.
    pub fn fill(&mut self, outcome: Result<T>) -> Result<()> {
        match outcome {
            Ok(value) => {
                self.result = Some(value);
                Ok(())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Merges typed requests into one batch, submits it over a session, and
/// demultiplexes the responses back to their requests by position.
pub struct QueryExecutor {
    version: QbXmlVersion,
}

impl QueryExecutor {
    pub fn new(version: QbXmlVersion) -> Self {
        Self { version }
    }

    /// Execute `requests` as one batch over `session`.
    ///
    /// Responses with a negative status code are skipped: the request keeps
    /// neither a result nor an error, only a warning is logged. A mapping
    /// failure at position i aborts processing of positions i+1.. even
    /// though earlier requests keep their already-stored results.
    pub fn execute(&self, session: &Session, requests: &mut [&mut dyn QueryRequest]) -> Result<()> {
        if requests.is_empty() {
            return Err(QbError::InvalidOperation("no requests to execute".to_string()));
        }

        let mut batch = RequestBatch::new(self.version);
        for request in requests.iter() {
            request.append_to_batch(&mut batch);
        }

        log::debug!(
            "submitting batch of {} request(s) on session '{}'",
            batch.len(),
            session.ticket()
        );
        let response_xml = session.process_request(&batch.to_xml())?;
        let responses = parse_response_set(&response_xml)?;

        if responses.len() != requests.len() {
            return Err(QbError::Protocol(format!(
                "expected {} responses but received {}",
                requests.len(),
                responses.len()
            )));
        }

        for (request, response) in requests.iter_mut().zip(responses.iter()) {
            if response.status_code >= 0 {
                request.process_response(&response.detail)?;
            } else {
                log::warn!(
                    "{}: skipping response with statusCode={} ({})",
                    request.label(),
                    response.status_code,
                    response.status_message
                );
            }
        }
        Ok(())
    }
}
