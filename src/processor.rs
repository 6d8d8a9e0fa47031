use std::sync::Arc;

use crate::config::QuickBooksConfig;
use crate::error::Result;
use crate::FileMode;

/// Seam over the QBXMLRP2 request processor. One instance represents one
/// open connection to QuickBooks; sessions are created and torn down against
/// it by ticket. Implemented by the COM wrapper on Windows and by scripted
/// mocks in tests.
pub trait RequestProcessor: Send + Sync {
    /// Begin a session against the open connection, returning the opaque
    /// session ticket issued by QuickBooks.
    fn begin_session(&self, company_file: &str, file_mode: FileMode) -> Result<String>;

    fn end_session(&self, ticket: &str) -> Result<()>;

    /// Submit one request document over the session identified by `ticket`
    /// and return the raw response document.
    fn process_request(&self, ticket: &str, request_xml: &str) -> Result<String>;

    fn close_connection(&self) -> Result<()>;
}

/// Parameters needed to open a connection and begin sessions.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub app_id: String,
    pub app_name: String,
    pub company_file: String,
    pub file_mode: FileMode,
}

impl ConnectionSettings {
    pub fn from_config(config: &QuickBooksConfig) -> Result<Self> {
        let file_mode = match config.file_mode.as_deref() {
            None => FileMode::DoNotCare,
            Some(value) => FileMode::parse(value).ok_or_else(|| {
                crate::error::QbError::InvalidOperation(format!("unknown file mode '{}'", value))
            })?,
        };
        // AUTO means "whatever company file is currently open"
        let company_file = match config.company_file.as_str() {
            "AUTO" => String::new(),
            path => path.to_string(),
        };
        Ok(Self {
            app_id: config.application_id.clone().unwrap_or_default(),
            app_name: config
                .application_name
                .clone()
                .unwrap_or_else(|| "QuickBooks Query Service".to_string()),
            company_file,
            file_mode,
        })
    }
}

/// Creates connected processors. Each call to `open` creates a fresh COM
/// instance and opens its connection, so the per-request strategy can hold
/// several independent connections over its lifetime.
pub trait ProcessorFactory: Send + Sync {
    fn open(&self, settings: &ConnectionSettings) -> Result<Arc<dyn RequestProcessor>>;
}
