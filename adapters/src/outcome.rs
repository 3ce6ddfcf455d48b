//! Outcome taxonomy and the test-injection policy
//!
//! Every interaction, outbound or inbound, ends in exactly one
//! [`InteractionOutcome`]. Before any real work is done, the channel's
//! [`OutcomePolicy`] may decide the outcome up front. This is the only
//! place where payload markers are interpreted.

use crate::{Error, Result};
use message_bus::{FaultInterface, Message};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker yielding a permanent failure
pub const DELIVERY_EXCEPTION_MARKER: &str = "<DeliveryException>";

/// Marker yielding a recoverable failure
pub const RECOVERABLE_EXCEPTION_MARKER: &str = "<RecoverableException>";

/// Marker yielding an application error (request/response only)
pub const APPLICATION_ERROR_MARKER: &str = "<ApplicationError>";

/// Result of one interaction
#[derive(Debug, Clone)]
pub enum InteractionOutcome {
    /// Work done; carries the response for request/response interactions
    Delivered(Option<Message>),
    /// Transient failure, a retry may succeed
    RecoverableFailure(String),
    /// The work can never succeed
    PermanentFailure(String),
    /// Business-level rejection delivered as a valid response
    ApplicationError {
        /// Fault response message
        response: Message,
        /// Fault interface of the response
        fault: FaultInterface,
    },
}

impl InteractionOutcome {
    /// Whether the work was delivered
    pub fn is_delivered(&self) -> bool {
        matches!(self, InteractionOutcome::Delivered(_))
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            InteractionOutcome::Delivered(_) => "delivered",
            InteractionOutcome::RecoverableFailure(_) => "recoverable_failure",
            InteractionOutcome::PermanentFailure(_) => "permanent_failure",
            InteractionOutcome::ApplicationError { .. } => "application_error",
        }
    }

    /// Response message, if any
    pub fn response(&self) -> Option<&Message> {
        match self {
            InteractionOutcome::Delivered(r) => r.as_ref(),
            InteractionOutcome::ApplicationError { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Outcome forced regardless of payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedOutcome {
    /// Always fail recoverably
    RecoverableFailure,
    /// Always fail permanently
    PermanentFailure,
    /// Always answer with an application error
    ApplicationError,
}

/// Decision taken by the policy before the work is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Do the work
    Proceed,
    /// Fail recoverably
    Recoverable,
    /// Fail permanently
    Permanent,
    /// Answer with an application error
    ApplicationError,
}

/// How an interaction's outcome may be forced for testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomePolicy {
    /// Never force an outcome
    Disabled,
    /// Inspect the payload for exception markers
    PayloadMarkers,
    /// Force the given outcome
    Force(ForcedOutcome),
}

impl Default for OutcomePolicy {
    fn default() -> Self {
        OutcomePolicy::PayloadMarkers
    }
}

impl OutcomePolicy {
    /// Decide on `payload`. Application errors only apply when the
    /// interaction expects a response.
    pub fn verdict(&self, payload: &str, expects_response: bool) -> Verdict {
        match self {
            OutcomePolicy::Disabled => Verdict::Proceed,
            OutcomePolicy::Force(ForcedOutcome::RecoverableFailure) => Verdict::Recoverable,
            OutcomePolicy::Force(ForcedOutcome::PermanentFailure) => Verdict::Permanent,
            OutcomePolicy::Force(ForcedOutcome::ApplicationError) => {
                if expects_response {
                    Verdict::ApplicationError
                } else {
                    Verdict::Proceed
                }
            }
            OutcomePolicy::PayloadMarkers => {
                if payload.contains(DELIVERY_EXCEPTION_MARKER) {
                    Verdict::Permanent
                } else if payload.contains(RECOVERABLE_EXCEPTION_MARKER) {
                    Verdict::Recoverable
                } else if expects_response && payload.contains(APPLICATION_ERROR_MARKER) {
                    Verdict::ApplicationError
                } else {
                    Verdict::Proceed
                }
            }
        }
    }
}

impl FromStr for OutcomePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(OutcomePolicy::Disabled),
            "markers" | "payload_markers" => Ok(OutcomePolicy::PayloadMarkers),
            "recoverable_failure" => Ok(OutcomePolicy::Force(ForcedOutcome::RecoverableFailure)),
            "permanent_failure" => Ok(OutcomePolicy::Force(ForcedOutcome::PermanentFailure)),
            "application_error" => Ok(OutcomePolicy::Force(ForcedOutcome::ApplicationError)),
            other => Err(Error::Config(format!("unknown outcome policy '{}'", other))),
        }
    }
}

impl fmt::Display for OutcomePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomePolicy::Disabled => write!(f, "disabled"),
            OutcomePolicy::PayloadMarkers => write!(f, "markers"),
            OutcomePolicy::Force(ForcedOutcome::RecoverableFailure) => {
                write!(f, "recoverable_failure")
            }
            OutcomePolicy::Force(ForcedOutcome::PermanentFailure) => write!(f, "permanent_failure"),
            OutcomePolicy::Force(ForcedOutcome::ApplicationError) => write!(f, "application_error"),
        }
    }
}
