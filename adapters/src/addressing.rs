//! Address determination, header mapping and normalization

use crate::ports::{AddressNormalizer, ChannelLookup};
use message_bus::{Action, Header};
use tracing::{debug, warn};

/// Identifier scheme of external party and service identifiers
pub const GLN_SCHEME: &str = "GLN";

/// Address wildcard, stored as the empty address
pub const WILDCARD: &str = "*";

/// Keys recognised in item content when addresses come from the message
pub mod content_keys {
    /// Sender party
    pub const FROM_PARTY: &str = "FromParty:";
    /// Receiver party
    pub const TO_PARTY: &str = "ToParty:";
    /// Sender service
    pub const FROM_SERVICE: &str = "FromService:";
    /// Receiver service
    pub const TO_SERVICE: &str = "ToService:";
    /// Action name
    pub const ACTION: &str = "Action:";
    /// Action namespace
    pub const ACTION_NS: &str = "ActionNS:";
    /// Whether parties and services are GLN identifiers
    pub const GLN_MODE: &str = "GLNMode:";
}

/// Value following `key` in `text`, up to the next `;` or the end of text.
/// Empty when the key is absent.
pub fn find_value(key: &str, text: &str) -> String {
    let Some(start) = text.find(key).map(|i| i + key.len()) else {
        return String::new();
    };
    let rest = &text[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

/// Address parsed from item content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAddress {
    /// Parsed header
    pub header: Header,
    /// Identifiers are GLNs and need normalization
    pub gln_mode: bool,
}

/// Parse the addressing keys out of item content
pub fn parse_content_address(text: &str) -> ContentAddress {
    use content_keys::*;

    ContentAddress {
        header: Header::new(
            find_value(FROM_PARTY, text),
            find_value(FROM_SERVICE, text),
            find_value(TO_PARTY, text),
            find_value(TO_SERVICE, text),
            Action::new(find_value(ACTION, text), find_value(ACTION_NS, text)),
        ),
        gln_mode: find_value(GLN_MODE, text).eq_ignore_ascii_case("true"),
    }
}

fn clear_wildcard(value: &mut String) {
    if value == WILDCARD {
        value.clear();
    }
}

/// Replace wildcard addresses with the unspecified (empty) address
pub fn clear_wildcards(mut header: Header) -> Header {
    clear_wildcard(&mut header.from_party);
    clear_wildcard(&mut header.from_service);
    clear_wildcard(&mut header.to_party);
    clear_wildcard(&mut header.to_service);
    clear_wildcard(&mut header.action.name);
    clear_wildcard(&mut header.action.namespace);
    header
}

fn replace_if_found(
    target: &mut String,
    what: &str,
    result: crate::Result<Option<String>>,
) {
    match result {
        Ok(Some(value)) if !value.is_empty() => *target = value,
        Ok(_) => debug!("No {} found for '{}', keeping it", what, target),
        Err(e) => warn!("{} normalization of '{}' failed: {}", what, target, e),
    }
}

/// Translate external (GLN) identifiers into internal ones.
///
/// Identifiers without a translation are kept.
pub fn normalize_inbound(normalizer: &dyn AddressNormalizer, mut header: Header) -> Header {
    // Services first, they are looked up by the external party
    let from_service = normalizer.internal_service(&header.from_party, GLN_SCHEME, &header.from_service);
    replace_if_found(&mut header.from_service, "sender service", from_service);
    let from_party = normalizer.internal_party(GLN_SCHEME, &header.from_party);
    replace_if_found(&mut header.from_party, "sender party", from_party);

    let to_service = normalizer.internal_service(&header.to_party, GLN_SCHEME, &header.to_service);
    replace_if_found(&mut header.to_service, "receiver service", to_service);
    let to_party = normalizer.internal_party(GLN_SCHEME, &header.to_party);
    replace_if_found(&mut header.to_party, "receiver party", to_party);

    header
}

/// Translate internal identifiers into their external (GLN) alternatives.
///
/// Identifiers without an alternative are kept.
pub fn normalize_outbound(normalizer: &dyn AddressNormalizer, mut header: Header) -> Header {
    let from_service = normalizer.external_service(&header.from_party, GLN_SCHEME, &header.from_service);
    replace_if_found(&mut header.from_service, "sender service", from_service);
    let from_party = normalizer.external_party(GLN_SCHEME, &header.from_party);
    replace_if_found(&mut header.from_party, "sender party", from_party);

    let to_service = normalizer.external_service(&header.to_party, GLN_SCHEME, &header.to_service);
    replace_if_found(&mut header.to_service, "receiver service", to_service);
    let to_party = normalizer.external_party(GLN_SCHEME, &header.to_party);
    replace_if_found(&mut header.to_party, "receiver party", to_party);

    header
}

/// Address an outbound message is written with.
///
/// Applies the header mapping of the channel's binding, then normalizes.
/// A failed binding lookup falls back to the message's own addresses.
pub async fn outbound_address(
    lookup: &dyn ChannelLookup,
    normalizer: &dyn AddressNormalizer,
    channel_id: &str,
    header: &Header,
) -> Header {
    let mapped = match lookup.binding_for_channel(channel_id).await {
        Ok(binding) => match binding.header_mapping {
            Some(mapping) if !mapping.is_empty() => mapping.apply(header),
            _ => {
                debug!(channel_id = %channel_id, "No header mapping configured");
                header.clone()
            }
        },
        Err(e) => {
            warn!(
                channel_id = %channel_id,
                "Binding lookup failed, using message addresses: {}", e
            );
            header.clone()
        }
    };

    normalize_outbound(normalizer, mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryChannelLookup, StaticNormalizer};
    use crate::types::{Binding, HeaderMapping};
    use crate::Error;

    #[test]
    fn test_find_value() {
        let text = "FromParty:ACME; ToParty: BETA ;Action:Order";

        assert_eq!(find_value("FromParty:", text), "ACME");
        assert_eq!(find_value("ToParty:", text), "BETA");
        assert_eq!(find_value("Action:", text), "Order");
        assert_eq!(find_value("FromService:", text), "");
    }

    #[test]
    fn test_parse_content_address() {
        let text = "<?xml version=\"1.0\"?>\n<!-- FromParty:4000001000002;FromService:4000001000019;\
                    ToParty:*;ToService:ERP;Action:Order;ActionNS:urn:o;GLNMode:true; -->";
        let parsed = parse_content_address(text);

        assert!(parsed.gln_mode);
        assert_eq!(parsed.header.from_party, "4000001000002");
        assert_eq!(parsed.header.action, Action::new("Order", "urn:o"));

        let cleared = clear_wildcards(parsed.header);
        assert_eq!(cleared.to_party, "");
        assert_eq!(cleared.to_service, "ERP");
    }

    #[test]
    fn test_normalize_inbound_keeps_unknown() {
        let normalizer = StaticNormalizer::new()
            .with_party("4000001000002", "ACME")
            .with_service("4000001000002", "4000001000019", "ACME_ERP");
        let header = Header::new(
            "4000001000002",
            "4000001000019",
            "UNKNOWN",
            "SVC",
            Action::default(),
        );

        let normalized = normalize_inbound(&normalizer, header);
        assert_eq!(normalized.from_party, "ACME");
        assert_eq!(normalized.from_service, "ACME_ERP");
        assert_eq!(normalized.to_party, "UNKNOWN");
        assert_eq!(normalized.to_service, "SVC");
    }

    struct FailingNormalizer;

    impl AddressNormalizer for FailingNormalizer {
        fn internal_party(&self, _: &str, _: &str) -> crate::Result<Option<String>> {
            Err(Error::Config("down".to_string()))
        }
        fn internal_service(&self, _: &str, _: &str, _: &str) -> crate::Result<Option<String>> {
            Err(Error::Config("down".to_string()))
        }
        fn external_party(&self, _: &str, _: &str) -> crate::Result<Option<String>> {
            Err(Error::Config("down".to_string()))
        }
        fn external_service(&self, _: &str, _: &str, _: &str) -> crate::Result<Option<String>> {
            Err(Error::Config("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_outbound_address_falls_back() {
        let lookup = InMemoryChannelLookup::new();
        let header = Header::new("P1", "S1", "P2", "S2", Action::new("Order", "urn:o"));

        // No binding, failing normalizer: message addresses survive
        let address = outbound_address(&lookup, &FailingNormalizer, "out-1", &header).await;
        assert_eq!(address, header);
    }

    #[tokio::test]
    async fn test_outbound_address_applies_mapping() {
        let lookup = InMemoryChannelLookup::new();
        lookup.add_binding(
            Binding::new("out-1", Header::default()).with_header_mapping(HeaderMapping {
                to_party: Some("MAPPED".to_string()),
                ..Default::default()
            }),
        );
        let normalizer = StaticNormalizer::new().with_party("4000001000099", "MAPPED");
        let header = Header::new("P1", "S1", "P2", "S2", Action::new("Order", "urn:o"));

        let address = outbound_address(&lookup, &normalizer, "out-1", &header).await;
        assert_eq!(address.to_party, "4000001000099");
        assert_eq!(address.from_party, "P1");
    }
}
