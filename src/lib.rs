// QuickBooks Desktop query service library
// Session lifecycle management and batched qbXML query execution

pub mod client;
pub mod config;
pub mod error;
pub mod processor;
pub mod qbxml;
pub mod queries;
pub mod query;
pub mod session;

// COM-backed request processor, only meaningful on Windows
#[cfg(windows)]
pub mod request_processor;

#[cfg(test)]
pub(crate) mod testing;

// Common types used across modules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    DoNotCare = 0,
    SingleUser = 1,
    MultiUser = 2,
    Online = 3,
}

impl FileMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "do-not-care" => Some(FileMode::DoNotCare),
            "single-user" => Some(FileMode::SingleUser),
            "multi-user" => Some(FileMode::MultiUser),
            "online" => Some(FileMode::Online),
            _ => None,
        }
    }
}

// Re-export commonly used types
pub use error::QbError;
pub use session::{ConnectionStrategy, Session, SessionGuard, SessionMode};
