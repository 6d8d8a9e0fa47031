// High-level client: owns a connection strategy and guarantees
// acquire -> execute -> release on every exit path.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{QbError, Result};
use crate::processor::{ConnectionSettings, ProcessorFactory};
use crate::qbxml::QbXmlVersion;
use crate::queries::{Customer, CustomerQuery, Invoice, InvoiceQuery};
use crate::query::{QueryExecutor, QueryRequest};
use crate::session::{create_strategy, ConnectionStrategy, SessionGuard, SessionMode};

pub struct QuickBooksClient {
    strategy: Box<dyn ConnectionStrategy>,
    executor: QueryExecutor,
}

impl QuickBooksClient {
    pub fn new(strategy: Box<dyn ConnectionStrategy>, version: QbXmlVersion) -> Self {
        Self {
            strategy,
            executor: QueryExecutor::new(version),
        }
    }

    /// Build a client from configuration: session mode, connection settings
    /// and qbXML version all come from the `[quickbooks]` table.
    pub fn from_config(config: &Config, factory: Arc<dyn ProcessorFactory>) -> Result<Self> {
        let mode = SessionMode::parse(&config.quickbooks.session_mode).ok_or_else(|| {
            QbError::InvalidOperation(format!(
                "unknown session mode '{}'",
                config.quickbooks.session_mode
            ))
        })?;
        let settings = ConnectionSettings::from_config(&config.quickbooks)?;
        let version = QbXmlVersion::new(
            config.quickbooks.qbxml_version_major,
            config.quickbooks.qbxml_version_minor,
        );
        log::info!("using {:?} session mode, qbXML {}", mode, version);
        Ok(Self::new(create_strategy(mode, settings, factory), version))
    }

    /// Execute a batch of typed requests over a scoped session. The session
    /// is released on success, on execution failure, and on release failure
    /// (best-effort via the guard's drop).
    pub fn execute(&mut self, requests: &mut [&mut dyn QueryRequest]) -> Result<()> {
        let guard = SessionGuard::acquire(self.strategy.as_mut())?;
        match self.executor.execute(guard.session(), requests) {
            Ok(()) => guard.release(),
            Err(e) => {
                // guard drop releases best-effort; the execution error wins
                drop(guard);
                Err(e)
            }
        }
    }

    pub fn get_customers(&mut self, query: CustomerQuery) -> Result<Vec<Customer>> {
        let mut query = query;
        self.execute(&mut [&mut query])?;
        query.into_result()
    }

    pub fn get_invoices(&mut self, query: InvoiceQuery) -> Result<Vec<Invoice>> {
        let mut query = query;
        self.execute(&mut [&mut query])?;
        query.into_result()
    }

    /// Best-effort teardown; safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.strategy.disconnect();
    }
}
