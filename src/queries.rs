// Concrete typed queries: customers and invoices. Each contributes its
// query element (with optional filters) to the outbound batch and maps its
// response payload into plain record snapshots. Records are copied out of
// the parsed response and never keep references into it.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{QbError, Result};
use crate::qbxml::{text_element, RequestBatch, XmlElement};
use crate::query::{QueryRequest, ResultSlot};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub name: String,
    pub full_name: String,
    pub billing_address: String,
    pub shipping_address: String,
    pub notes: String,
    pub modified: Option<DateTime<FixedOffset>>,
}

/// Monetary value snapshot: the parsed number plus the exact text QuickBooks
/// sent, kept for display and round-tripping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Amount {
    pub value: f64,
    pub raw: String,
}

impl Amount {
    fn from_element(label: &str, element: &XmlElement) -> Result<Self> {
        let raw = element.text.clone();
        let value = raw.parse::<f64>().map_err(|_| {
            QbError::mapping(label, format!("<{}> is not a numeric amount: '{}'", element.name, raw))
        })?;
        Ok(Self { value, raw })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub txn_id: String,
    pub ref_number: String,
    pub customer_name: String,
    pub txn_date: Option<NaiveDate>,
    pub other: String,
    pub applied_amount: Option<Amount>,
    pub balance_remaining: Option<Amount>,
    pub modified: Option<DateTime<FixedOffset>>,
}

const CUSTOMER_LABEL: &str = "customer query";
const INVOICE_LABEL: &str = "invoice query";

/// List customers, optionally filtered.
#[derive(Debug, Default)]
pub struct CustomerQuery {
    max_results: u32,
    modified_since: Option<NaiveDateTime>,
    active: Option<bool>,
    full_names: Vec<String>,
    slot: ResultSlot<Vec<Customer>>,
}

impl CustomerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of customers to return, or 0 for no limit.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_modified_since(mut self, since: NaiveDateTime) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn with_full_names(mut self, full_names: Vec<String>) -> Self {
        self.full_names = full_names;
        self
    }

    pub fn has_result(&self) -> bool {
        self.slot.has_result()
    }

    pub fn result(&self) -> Result<&Vec<Customer>> {
        self.slot.result()
    }

    pub fn into_result(self) -> Result<Vec<Customer>> {
        self.slot.into_result()
    }

    pub fn error(&self) -> Option<&str> {
        self.slot.error()
    }
}

impl QueryRequest for CustomerQuery {
    fn label(&self) -> &str {
        CUSTOMER_LABEL
    }

    fn append_to_batch(&self, batch: &mut RequestBatch) {
        let mut fragment = String::from("<CustomerQueryRq>");
        for full_name in &self.full_names {
            fragment.push_str(&text_element("FullName", full_name));
        }
        if let Some(active) = self.active {
            let status = if active { "ActiveOnly" } else { "InactiveOnly" };
            fragment.push_str(&text_element("ActiveStatus", status));
        }
        if let Some(since) = self.modified_since {
            fragment.push_str(&text_element(
                "FromModifiedDate",
                &since.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ));
        }
        if self.max_results > 0 {
            fragment.push_str(&text_element("MaxReturned", &self.max_results.to_string()));
        }
        fragment.push_str("</CustomerQueryRq>");
        batch.push_fragment(fragment);
    }

    fn process_response(&mut self, detail: &XmlElement) -> Result<()> {
        self.slot.fill(map_customers(detail))
    }
}

fn map_customers(detail: &XmlElement) -> Result<Vec<Customer>> {
    if detail.name != "CustomerQueryRs" {
        return Err(QbError::mapping(
            CUSTOMER_LABEL,
            format!("expected <CustomerQueryRs> but found <{}>", detail.name),
        ));
    }
    detail
        .children_named("CustomerRet")
        .map(|ret| {
            Ok(Customer {
                name: ret.child_text("Name").unwrap_or_default().to_string(),
                full_name: ret.child_text("FullName").unwrap_or_default().to_string(),
                billing_address: address_block(ret.child("BillAddressBlock")),
                shipping_address: address_block(ret.child("ShipAddressBlock")),
                notes: ret.child_text("Notes").unwrap_or_default().to_string(),
                modified: parse_timestamp(CUSTOMER_LABEL, ret.child_text("TimeModified"))?,
            })
        })
        .collect()
}

/// List invoices, optionally filtered.
#[derive(Debug, Default)]
pub struct InvoiceQuery {
    max_results: u32,
    modified_since: Option<NaiveDateTime>,
    slot: ResultSlot<Vec<Invoice>>,
}

impl InvoiceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of invoices to return, or 0 for no limit.
    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_modified_since(mut self, since: NaiveDateTime) -> Self {
        self.modified_since = Some(since);
        self
    }

    pub fn has_result(&self) -> bool {
        self.slot.has_result()
    }

    pub fn result(&self) -> Result<&Vec<Invoice>> {
        self.slot.result()
    }

    pub fn into_result(self) -> Result<Vec<Invoice>> {
        self.slot.into_result()
    }

    pub fn error(&self) -> Option<&str> {
        self.slot.error()
    }
}

impl QueryRequest for InvoiceQuery {
    fn label(&self) -> &str {
        INVOICE_LABEL
    }

    fn append_to_batch(&self, batch: &mut RequestBatch) {
        let mut fragment = String::from("<InvoiceQueryRq>");
        if let Some(since) = self.modified_since {
            fragment.push_str(&text_element(
                "FromModifiedDate",
                &since.format("%Y-%m-%dT%H:%M:%S").to_string(),
            ));
        }
        if self.max_results > 0 {
            fragment.push_str(&text_element("MaxReturned", &self.max_results.to_string()));
        }
        fragment.push_str("</InvoiceQueryRq>");
        batch.push_fragment(fragment);
    }

    fn process_response(&mut self, detail: &XmlElement) -> Result<()> {
        self.slot.fill(map_invoices(detail))
    }
}

fn map_invoices(detail: &XmlElement) -> Result<Vec<Invoice>> {
    if detail.name != "InvoiceQueryRs" {
        return Err(QbError::mapping(
            INVOICE_LABEL,
            format!("expected <InvoiceQueryRs> but found <{}>", detail.name),
        ));
    }
    detail
        .children_named("InvoiceRet")
        .map(|ret| {
            let applied_amount = ret
                .child("AppliedAmount")
                .map(|el| Amount::from_element(INVOICE_LABEL, el))
                .transpose()?;
            let balance_remaining = ret
                .child("BalanceRemaining")
                .map(|el| Amount::from_element(INVOICE_LABEL, el))
                .transpose()?;
            Ok(Invoice {
                txn_id: ret.child_text("TxnID").unwrap_or_default().to_string(),
                ref_number: ret.child_text("RefNumber").unwrap_or_default().to_string(),
                customer_name: ret
                    .child("CustomerRef")
                    .and_then(|r| r.child_text("FullName"))
                    .unwrap_or_default()
                    .to_string(),
                txn_date: parse_date(INVOICE_LABEL, ret.child_text("TxnDate"))?,
                other: ret.child_text("Other").unwrap_or_default().to_string(),
                applied_amount,
                balance_remaining,
                modified: parse_timestamp(INVOICE_LABEL, ret.child_text("TimeModified"))?,
            })
        })
        .collect()
}

/// Join up to five address lines with CRLF, skipping empty ones.
fn address_block(block: Option<&XmlElement>) -> String {
    let Some(block) = block else {
        return String::new();
    };
    ["Addr1", "Addr2", "Addr3", "Addr4", "Addr5"]
        .iter()
        .filter_map(|name| block.child_text(name))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn parse_timestamp(label: &str, value: Option<&str>) -> Result<Option<DateTime<FixedOffset>>> {
    match value {
        None | Some("") => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text).map(Some).map_err(|_| {
            QbError::mapping(label, format!("unparseable timestamp '{}'", text))
        }),
    }
}

fn parse_date(label: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value {
        None | Some("") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d").map(Some).map_err(|_| {
            QbError::mapping(label, format!("unparseable date '{}'", text))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qbxml::{parse_response_set, QbXmlVersion};
    use chrono::NaiveDateTime;

    fn fragment_of(request: &impl QueryRequest) -> String {
        let mut batch = RequestBatch::new(QbXmlVersion::default());
        request.append_to_batch(&mut batch);
        batch.to_xml()
    }

    fn detail_of(xml: &str) -> XmlElement {
        parse_response_set(xml).unwrap().remove(0).detail
    }

    const THREE_CUSTOMERS: &str = r#"<QBXML><QBXMLMsgsRs>
        <CustomerQueryRs statusCode="0" statusSeverity="Info" statusMessage="Status OK">
          <CustomerRet>
            <Name>Acme Supplies</Name>
            <FullName>Acme Supplies</FullName>
            <BillAddressBlock>
              <Addr1>1 Main St</Addr1>
              <Addr2></Addr2>
              <Addr3>Suite 4</Addr3>
            </BillAddressBlock>
            <ShipAddressBlock>
              <Addr1>Dock 9</Addr1>
            </ShipAddressBlock>
            <Notes>net 30</Notes>
            <TimeModified>2024-01-15T10:30:00-08:00</TimeModified>
          </CustomerRet>
          <CustomerRet>
            <Name>Bravo Labs</Name>
            <FullName>Bravo Labs</FullName>
          </CustomerRet>
          <CustomerRet>
            <Name>Cobalt Inc</Name>
            <FullName>Cobalt Inc:West</FullName>
          </CustomerRet>
        </CustomerQueryRs>
    </QBXMLMsgsRs></QBXML>"#;

    #[test]
    fn unlimited_customer_query_maps_all_records_in_order() {
        let mut query = CustomerQuery::new().with_max_results(0);
        query.process_response(&detail_of(THREE_CUSTOMERS)).unwrap();

        let customers = query.result().unwrap();
        assert_eq!(customers.len(), 3);
        assert_eq!(customers[0].name, "Acme Supplies");
        assert_eq!(customers[1].name, "Bravo Labs");
        assert_eq!(customers[2].full_name, "Cobalt Inc:West");

        // empty lines are dropped, remaining ones joined by CRLF
        assert_eq!(customers[0].billing_address, "1 Main St\r\nSuite 4");
        assert_eq!(customers[0].shipping_address, "Dock 9");
        assert_eq!(customers[1].billing_address, "");
        assert_eq!(
            customers[0].modified.unwrap().to_rfc3339(),
            "2024-01-15T10:30:00-08:00"
        );
        assert_eq!(customers[1].modified, None);
    }

    #[test]
    fn max_results_filter_is_emitted_only_when_limited() {
        let unlimited = fragment_of(&CustomerQuery::new());
        assert!(!unlimited.contains("MaxReturned"));

        let limited = fragment_of(&CustomerQuery::new().with_max_results(2));
        assert!(limited.contains("<MaxReturned>2</MaxReturned>"));
    }

    #[test]
    fn customer_filters_are_emitted() {
        let since = NaiveDateTime::parse_from_str("2024-02-01T00:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let query = CustomerQuery::new()
            .with_active(true)
            .with_modified_since(since)
            .with_full_names(vec!["Acme Supplies".to_string(), "Bravo Labs".to_string()]);
        let xml = fragment_of(&query);

        assert!(xml.contains("<FullName>Acme Supplies</FullName>"));
        assert!(xml.contains("<FullName>Bravo Labs</FullName>"));
        assert!(xml.contains("<ActiveStatus>ActiveOnly</ActiveStatus>"));
        assert!(xml.contains("<FromModifiedDate>2024-02-01T00:00:00</FromModifiedDate>"));

        let inactive = fragment_of(&CustomerQuery::new().with_active(false));
        assert!(inactive.contains("<ActiveStatus>InactiveOnly</ActiveStatus>"));
    }

    #[test]
    fn wrong_payload_shape_is_a_mapping_error_and_is_recorded() {
        let detail = detail_of(
            r#"<QBXML><QBXMLMsgsRs><VendorQueryRs statusCode="0"/></QBXMLMsgsRs></QBXML>"#,
        );
        let mut query = CustomerQuery::new();
        let err = query.process_response(&detail).unwrap_err();
        assert!(matches!(err, QbError::Mapping { .. }));
        assert!(query.error().unwrap().contains("VendorQueryRs"));
        assert!(!query.has_result());
    }

    #[test]
    fn reading_the_result_before_execution_fails() {
        let query = CustomerQuery::new();
        assert!(!query.has_result());
        assert!(matches!(query.result(), Err(QbError::InvalidOperation(_))));
    }

    #[test]
    fn empty_result_set_still_counts_as_a_result() {
        let detail = detail_of(
            r#"<QBXML><QBXMLMsgsRs><CustomerQueryRs statusCode="0"/></QBXMLMsgsRs></QBXML>"#,
        );
        let mut query = CustomerQuery::new();
        query.process_response(&detail).unwrap();
        assert!(query.has_result());
        assert!(query.result().unwrap().is_empty());
    }

    #[test]
    fn invoice_records_are_plain_snapshots() {
        let detail = detail_of(
            r#"<QBXML><QBXMLMsgsRs>
            <InvoiceQueryRs statusCode="0">
              <InvoiceRet>
                <TxnID>1A2B-3C</TxnID>
                <RefNumber>1042</RefNumber>
                <TxnDate>2024-03-02</TxnDate>
                <CustomerRef>
                  <ListID>80000001</ListID>
                  <FullName>Acme Supplies</FullName>
                </CustomerRef>
                <Other>po-778</Other>
                <AppliedAmount>125.50</AppliedAmount>
                <BalanceRemaining>0.00</BalanceRemaining>
                <TimeModified>2024-03-02T09:00:00-08:00</TimeModified>
              </InvoiceRet>
            </InvoiceQueryRs>
        </QBXMLMsgsRs></QBXML>"#,
        );
        let mut query = InvoiceQuery::new();
        query.process_response(&detail).unwrap();

        let invoices = query.into_result().unwrap();
        assert_eq!(invoices.len(), 1);
        let invoice = &invoices[0];
        assert_eq!(invoice.txn_id, "1A2B-3C");
        assert_eq!(invoice.ref_number, "1042");
        assert_eq!(invoice.customer_name, "Acme Supplies");
        assert_eq!(invoice.txn_date.unwrap().to_string(), "2024-03-02");
        assert_eq!(invoice.other, "po-778");
        assert_eq!(invoice.applied_amount.as_ref().unwrap().value, 125.5);
        assert_eq!(invoice.applied_amount.as_ref().unwrap().raw, "125.50");
        assert_eq!(invoice.balance_remaining.as_ref().unwrap().value, 0.0);
    }

    #[test]
    fn non_numeric_amount_is_a_mapping_error() {
        let detail = detail_of(
            r#"<QBXML><QBXMLMsgsRs>
            <InvoiceQueryRs statusCode="0">
              <InvoiceRet>
                <TxnID>1</TxnID>
                <AppliedAmount>n/a</AppliedAmount>
              </InvoiceRet>
            </InvoiceQueryRs>
        </QBXMLMsgsRs></QBXML>"#,
        );
        let mut query = InvoiceQuery::new();
        let err = query.process_response(&detail).unwrap_err();
        assert!(matches!(err, QbError::Mapping { .. }));
        assert!(query.error().unwrap().contains("AppliedAmount"));
    }

    #[test]
    fn invoice_filters_are_emitted() {
        let since = NaiveDateTime::parse_from_str("2024-02-15T08:00:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        let xml = fragment_of(&InvoiceQuery::new().with_max_results(50).with_modified_since(since));
        assert!(xml.contains("<InvoiceQueryRq>"));
        assert!(xml.contains("<FromModifiedDate>2024-02-15T08:00:00</FromModifiedDate>"));
        assert!(xml.contains("<MaxReturned>50</MaxReturned>"));
    }
}
