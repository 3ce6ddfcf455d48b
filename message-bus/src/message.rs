//! Message envelope exchanged with the module processor

use crate::types::{DeliverySemantics, FaultInterface, Header, MessageClass};
use crate::MAIN_DOCUMENT;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::HashMap;
use uuid::Uuid;

/// Content type of XML documents
pub const CONTENT_TYPE_XML: &str = "application/xml";

/// Content type of binary documents
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// Document attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Document name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// MIME content type
    pub content_type: String,
    /// Raw content
    pub content: Bytes,
}

impl Payload {
    /// XML main document
    pub fn xml(content: impl Into<Bytes>, description: impl Into<String>) -> Self {
        Self {
            name: MAIN_DOCUMENT.to_string(),
            description: description.into(),
            content_type: CONTENT_TYPE_XML.to_string(),
            content: content.into(),
        }
    }

    /// Binary main document
    pub fn binary(content: impl Into<Bytes>, description: impl Into<String>) -> Self {
        Self {
            name: MAIN_DOCUMENT.to_string(),
            description: description.into(),
            content_type: CONTENT_TYPE_BINARY.to_string(),
            content: content.into(),
        }
    }

    /// Content decoded as UTF-8 (lossy)
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Whether the document is XML
    pub fn is_xml(&self) -> bool {
        self.content_type == CONTENT_TYPE_XML
    }
}

/// Message envelope
#[derive(Debug, Clone)]
pub struct Message {
    /// Message ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// ID of the request this message answers
    pub ref_to_message_id: Option<Uuid>,

    /// Addressing header
    pub header: Header,

    /// Quality of service
    pub delivery: DeliverySemantics,

    /// Message class
    pub class: MessageClass,

    /// Main document
    pub document: Option<Payload>,

    /// Fault interface (application errors only)
    pub fault: Option<FaultInterface>,

    /// Adapter-specific properties, keyed by `namespace/name`
    pub properties: HashMap<String, String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create new application message
    pub fn new(header: Header, delivery: DeliverySemantics) -> Self {
        Self {
            id: Uuid::now_v7(),
            ref_to_message_id: None,
            header,
            delivery,
            class: MessageClass::ApplicationMessage,
            document: None,
            fault: None,
            properties: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Positive response to `request`: mirrored addressing, correlated by ID
    pub fn response_to(request: &Message) -> Self {
        let mut response = Self::new(request.header.mirrored(), request.delivery);
        response.class = MessageClass::ApplicationResponse;
        response.ref_to_message_id = Some(request.id);
        response
    }

    /// Application error answering `request`
    pub fn application_error_to(request: &Message, fault: FaultInterface) -> Self {
        let mut response = Self::response_to(request);
        response.class = MessageClass::ApplicationError;
        response.fault = Some(fault);
        response
    }

    /// Set main document
    pub fn with_document(mut self, document: Payload) -> Self {
        self.document = Some(document);
        self
    }

    /// Set an adapter-specific property
    pub fn with_property(
        mut self,
        namespace: &str,
        name: &str,
        value: impl Into<String>,
    ) -> Self {
        self.set_property(namespace, name, value);
        self
    }

    /// Set an adapter-specific property in place
    pub fn set_property(&mut self, namespace: &str, name: &str, value: impl Into<String>) {
        self.properties
            .insert(property_key(namespace, name), value.into());
    }

    /// Read an adapter-specific property
    pub fn property(&self, namespace: &str, name: &str) -> Option<&str> {
        self.properties
            .get(&property_key(namespace, name))
            .map(String::as_str)
    }

    /// Main document text, empty when there is no document
    pub fn document_text(&self) -> Cow<'_, str> {
        match &self.document {
            Some(doc) => doc.text(),
            None => Cow::Borrowed(""),
        }
    }
}

fn property_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;

    fn header() -> Header {
        Header::new("P1", "S1", "P2", "S2", Action::new("Order", "urn:orders"))
    }

    #[test]
    fn test_response_correlation() {
        let request = Message::new(header(), DeliverySemantics::BestEffort)
            .with_document(Payload::xml("<?xml version=\"1.0\"?><a/>", "request"));
        let response = Message::response_to(&request);

        assert_eq!(response.ref_to_message_id, Some(request.id));
        assert_eq!(response.header, request.header.mirrored());
        assert_eq!(response.class, MessageClass::ApplicationResponse);
        assert_ne!(response.id, request.id);
    }

    #[test]
    fn test_application_error_carries_fault() {
        let request = Message::new(header(), DeliverySemantics::BestEffort);
        let fault = FaultInterface {
            name: "OrderFault".to_string(),
            namespace: "urn:faults".to_string(),
        };
        let error = Message::application_error_to(&request, fault.clone());

        assert_eq!(error.class, MessageClass::ApplicationError);
        assert_eq!(error.fault, Some(fault));
        assert_eq!(error.ref_to_message_id, Some(request.id));
    }

    #[test]
    fn test_properties_are_namespaced() {
        let msg = Message::new(header(), DeliverySemantics::ExactlyOnce)
            .with_property("urn:adapter/File", "ChannelId", "ch-1");

        assert_eq!(msg.property("urn:adapter/File", "ChannelId"), Some("ch-1"));
        assert_eq!(msg.property("urn:other", "ChannelId"), None);
    }

    #[test]
    fn test_payload_kinds() {
        let xml = Payload::xml("<a/>", "x");
        let bin = Payload::binary(vec![0u8, 1, 2], "b");

        assert!(xml.is_xml());
        assert!(!bin.is_xml());
        assert_eq!(bin.name, MAIN_DOCUMENT);
        assert_eq!(xml.text(), "<a/>");
    }
}
