//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality of service requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliverySemantics {
    /// Exactly once (EO)
    ExactlyOnce,
    /// Exactly once in order (EOIO)
    ExactlyOnceInOrder,
    /// Best effort (BE), synchronous
    BestEffort,
}

impl DeliverySemantics {
    /// Short code used in channel configuration
    pub fn code(&self) -> &'static str {
        match self {
            DeliverySemantics::ExactlyOnce => "EO",
            DeliverySemantics::ExactlyOnceInOrder => "EOIO",
            DeliverySemantics::BestEffort => "BE",
        }
    }

    /// Synchronous delivery: no transaction, response handled in place
    pub fn is_synchronous(&self) -> bool {
        matches!(self, DeliverySemantics::BestEffort)
    }

    /// Whether duplicates of the same external item must be suppressed
    pub fn requires_duplicate_check(&self) -> bool {
        !self.is_synchronous()
    }
}

impl Default for DeliverySemantics {
    fn default() -> Self {
        DeliverySemantics::ExactlyOnce
    }
}

impl FromStr for DeliverySemantics {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EO" => Ok(DeliverySemantics::ExactlyOnce),
            "EOIO" => Ok(DeliverySemantics::ExactlyOnceInOrder),
            "BE" => Ok(DeliverySemantics::BestEffort),
            other => Err(crate::Error::InvalidMessage(format!(
                "unknown delivery semantics '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DeliverySemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageClass {
    /// Request or one-way message
    ApplicationMessage,
    /// Positive synchronous response
    ApplicationResponse,
    /// Business-level rejection
    ApplicationError,
}

/// Action (interface) addressed by a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Interface name
    pub name: String,
    /// Interface namespace
    pub namespace: String,
}

impl Action {
    /// Create new action
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Addressing header of a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    /// Sender party
    pub from_party: String,
    /// Sender service
    pub from_service: String,
    /// Receiver party
    pub to_party: String,
    /// Receiver service
    pub to_service: String,
    /// Action
    pub action: Action,
}

impl Header {
    /// Create new header
    pub fn new(
        from_party: impl Into<String>,
        from_service: impl Into<String>,
        to_party: impl Into<String>,
        to_service: impl Into<String>,
        action: Action,
    ) -> Self {
        Self {
            from_party: from_party.into(),
            from_service: from_service.into(),
            to_party: to_party.into(),
            to_service: to_service.into(),
            action,
        }
    }

    /// Header of a reply: sender and receiver swapped, same action
    pub fn mirrored(&self) -> Self {
        Self {
            from_party: self.to_party.clone(),
            from_service: self.to_service.clone(),
            to_party: self.from_party.clone(),
            to_service: self.from_service.clone(),
            action: self.action.clone(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} -> {}/{} ({} {})",
            self.from_party,
            self.from_service,
            self.to_party,
            self.to_service,
            self.action.namespace,
            self.action.name
        )
    }
}

/// Fault interface carried by an application error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInterface {
    /// Fault interface name
    pub name: String,
    /// Fault interface namespace
    pub namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_semantics_parse() {
        assert_eq!(
            "eo".parse::<DeliverySemantics>().unwrap(),
            DeliverySemantics::ExactlyOnce
        );
        assert_eq!(
            "EOIO".parse::<DeliverySemantics>().unwrap(),
            DeliverySemantics::ExactlyOnceInOrder
        );
        assert_eq!(
            " Be ".parse::<DeliverySemantics>().unwrap(),
            DeliverySemantics::BestEffort
        );
        assert!("XX".parse::<DeliverySemantics>().is_err());
    }

    #[test]
    fn test_duplicate_check_only_for_async() {
        assert!(DeliverySemantics::ExactlyOnce.requires_duplicate_check());
        assert!(DeliverySemantics::ExactlyOnceInOrder.requires_duplicate_check());
        assert!(!DeliverySemantics::BestEffort.requires_duplicate_check());
    }

    #[test]
    fn test_header_mirrored() {
        let header = Header::new("P1", "S1", "P2", "S2", Action::new("Order", "urn:a"));
        let mirrored = header.mirrored();

        assert_eq!(mirrored.from_party, "P2");
        assert_eq!(mirrored.to_service, "S1");
        assert_eq!(mirrored.action, header.action);
        assert_eq!(mirrored.mirrored(), header);
    }
}
