// Outbound qbXML batch envelope building and inbound response parsing.
// The schema itself is owned by QuickBooks; this module only builds the
// envelope and reads back the pieces the queries need.

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;

use crate::error::{QbError, Result};

/// qbXML schema version carried in the processing instruction, e.g. "16.0".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QbXmlVersion {
    pub major: u16,
    pub minor: u16,
}

impl QbXmlVersion {
    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl Default for QbXmlVersion {
    fn default() -> Self {
        Self { major: 16, minor: 0 }
    }
}

impl fmt::Display for QbXmlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The outbound batch: one query element per request, in submission order,
/// wrapped in the QBXMLMsgsRq envelope.
pub struct RequestBatch {
    version: QbXmlVersion,
    fragments: Vec<String>,
}

impl RequestBatch {
    pub fn new(version: QbXmlVersion) -> Self {
        Self {
            version,
            fragments: Vec::new(),
        }
    }

    pub fn push_fragment(&mut self, fragment: String) {
        self.fragments.push(fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        xml.push_str(&format!("<?qbxml version=\"{}\"?>\n", self.version));
        xml.push_str("<QBXML>\n<QBXMLMsgsRq onError=\"stopOnError\">\n");
        for fragment in &self.fragments {
            xml.push_str(fragment);
            xml.push('\n');
        }
        xml.push_str("</QBXMLMsgsRq>\n</QBXML>\n");
        xml
    }
}

/// Write `<Name>value</Name>` with the value escaped.
pub fn text_element(name: &str, value: &str) -> String {
    format!("<{}>{}</{}>", name, escape(value), name)
}

/// A parsed response element. Generic tree rather than typed schema structs:
/// each query pulls out and validates the children it expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|child| child.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.as_str())
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute
            .map_err(|e| QbError::Protocol(format!("malformed attribute on <{}>: {}", name, e)))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| QbError::Protocol(format!("malformed attribute on <{}>: {}", name, e)))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

/// Resolve a character or predefined entity reference into the character it
/// stands for. qbXML documents only ever carry the predefined five.
fn resolve_reference(reference: &BytesRef<'_>) -> Result<char> {
    let resolved = reference
        .resolve_char_ref()
        .map_err(|e| QbError::Protocol(format!("malformed character reference: {}", e)))?;
    if let Some(ch) = resolved {
        return Ok(ch);
    }
    let bytes: &[u8] = reference;
    match bytes {
        b"amp" => Ok('&'),
        b"lt" => Ok('<'),
        b"gt" => Ok('>'),
        b"apos" => Ok('\''),
        b"quot" => Ok('"'),
        other => Err(QbError::Protocol(format!(
            "unresolvable entity reference '&{};'",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Parse a whole document into its root element.
///
/// Text arrives as interleaved chunks and entity references; both are
/// appended to the enclosing element and the accumulated text is trimmed
/// once, when the element closes, so references never split the trim.
pub fn parse_document(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(element_from_start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(element) = stack.last_mut() {
                    let value = text
                        .xml_content()
                        .map_err(|e| QbError::Protocol(format!("malformed text content: {}", e)))?;
                    element.text.push_str(&value);
                }
            }
            Ok(Event::GeneralRef(reference)) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push(resolve_reference(&reference)?);
                }
            }
            Ok(Event::End(_)) => {
                let mut element = match stack.pop() {
                    Some(element) => element,
                    None => return Err(QbError::Protocol("unbalanced response XML".to_string())),
                };
                element.text = element.text.trim().to_string();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Ok(Event::Eof) => break,
            // declarations, processing instructions, comments, CDATA
            Ok(_) => {}
            Err(e) => return Err(QbError::Protocol(format!("malformed response XML: {}", e))),
        }
    }
    root.ok_or_else(|| QbError::Protocol("empty response document".to_string()))
}

/// One per-request response from the batch, order-correlated to the request
/// list. Non-negative status codes signal success.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub status_code: i32,
    pub status_message: String,
    pub detail: XmlElement,
}

/// Split a QBXMLMsgsRs document into its per-request responses.
pub fn parse_response_set(xml: &str) -> Result<Vec<QueryResponse>> {
    let document = parse_document(xml)?;
    if document.name != "QBXML" {
        return Err(QbError::Protocol(format!(
            "unexpected response root <{}>",
            document.name
        )));
    }
    let messages = document
        .child("QBXMLMsgsRs")
        .ok_or_else(|| QbError::Protocol("response is missing <QBXMLMsgsRs>".to_string()))?;

    messages
        .children
        .iter()
        .map(|response| {
            let status_code = response
                .attribute("statusCode")
                .ok_or_else(|| {
                    QbError::Protocol(format!("missing statusCode on <{}>", response.name))
                })?
                .parse::<i32>()
                .map_err(|_| {
                    QbError::Protocol(format!("non-numeric statusCode on <{}>", response.name))
                })?;
            Ok(QueryResponse {
                status_code,
                status_message: response.attribute("statusMessage").unwrap_or("").to_string(),
                detail: response.clone(),
            })
        })
        .collect()
}
