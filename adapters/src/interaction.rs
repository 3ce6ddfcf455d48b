//! Interaction engine
//!
//! `send` is fire-and-forget: the message document is written to the
//! connection's sink. `call` is request/response: after the write a
//! response is synthesized from the request, or read from a file named in
//! the request. Every execution ends in one [`InteractionOutcome`].

use crate::addressing::outbound_address;
use crate::connection::{ConnectionEventKind, ConnectionHandle, ManagedConnection};
use crate::metrics::{INTERACTIONS_TOTAL, INTERACTION_DURATION};
use crate::outcome::{InteractionOutcome, OutcomePolicy, Verdict};
use crate::ports::{AuditSink, AuditStatus, TransactionTicket};
use crate::{Error, Result, CHANNEL_ID_PROPERTY};
use async_trait::async_trait;
use bytes::Bytes;
use message_bus::{FaultInterface, Message, MessageProcessor, Payload};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interaction function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Fire-and-forget
    Send,
    /// Request/response
    Call,
}

impl Function {
    /// Function name
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::Send => "send",
            Function::Call => "call",
        }
    }
}

impl FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "send" => Ok(Function::Send),
            "call" => Ok(Function::Call),
            other => Err(Error::InvalidArgument(format!(
                "unknown function name '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes one interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionSpec {
    /// Function name, `send` or `call`
    pub function_name: String,
    /// Upper bound for `call`; the configured call timeout when unset
    pub execution_timeout: Option<Duration>,
}

impl InteractionSpec {
    /// Spec of a fire-and-forget interaction
    pub fn send() -> Self {
        Self::named(Function::Send.as_str())
    }

    /// Spec of a request/response interaction
    pub fn call() -> Self {
        Self::named(Function::Call.as_str())
    }

    /// Spec with an arbitrary function name, validated on execution
    pub fn named(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            execution_timeout: None,
        }
    }

    /// Set the execution timeout in milliseconds; negative values are rejected
    pub fn with_timeout_millis(mut self, millis: i64) -> Result<Self> {
        let millis = u64::try_from(millis).map_err(|_| {
            Error::InvalidArgument(format!("negative execution timeout {}", millis))
        })?;
        self.execution_timeout = Some(Duration::from_millis(millis));
        Ok(self)
    }

    /// Validated function
    pub fn function(&self) -> Result<Function> {
        self.function_name.parse()
    }
}

/// Input record of an interaction
#[derive(Debug, Clone)]
pub enum Record {
    /// Message-carrying record
    Message(Message),
    /// Raw bytes; not accepted by this adapter
    Raw(Bytes),
}

impl Record {
    fn into_message(self) -> Result<Message> {
        match self {
            Record::Message(message) => Ok(message),
            Record::Raw(_) => Err(Error::InvalidArgument(
                "input record carries no message".to_string(),
            )),
        }
    }
}

/// Executes work against a resource
#[async_trait]
pub trait Interaction: Send + Sync {
    /// Execute `spec` with `record`.
    ///
    /// `Err` means the request itself was unusable; everything else is an
    /// outcome.
    async fn execute(&self, spec: &InteractionSpec, record: Record) -> Result<InteractionOutcome>;
}

/// Fault document of an application error
fn fault_document(fault: &FaultInterface, reason: &str) -> Payload {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ns:{name} xmlns:ns=\"{ns}\"><reason>{reason}</reason></ns:{name}>",
        name = fault.name,
        ns = fault.namespace,
        reason = reason
    );
    Payload::xml(xml, "Application error")
}

fn application_error(request: &Message, fault: &FaultInterface, reason: &str) -> InteractionOutcome {
    let response = Message::application_error_to(request, fault.clone())
        .with_document(fault_document(fault, reason));
    InteractionOutcome::ApplicationError {
        response,
        fault: fault.clone(),
    }
}

/// Text of the element at `path` (`/`-separated local names from the root)
pub fn element_text(xml: &str, path: &str) -> Result<Option<String>> {
    let target: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if target.is_empty() {
        return Err(Error::InvalidArgument(format!("empty element path '{}'", path)));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) if stack == target => {
                let text = t.unescape().map_err(|e| Error::Xml(e.to_string()))?;
                return Ok(Some(text.into_owned()));
            }
            Ok(Event::CData(c)) if stack == target => {
                return Ok(Some(String::from_utf8_lossy(&c.into_inner()).into_owned()));
            }
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }
}

fn record_outcome(function: Function, outcome: &InteractionOutcome) {
    INTERACTIONS_TOTAL
        .with_label_values(&[function.as_str(), outcome.label()])
        .inc();
}

/// Interaction bound to a connection handle
#[derive(Debug, Clone)]
pub struct OutboundInteraction {
    handle: ConnectionHandle,
}

impl OutboundInteraction {
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        Self { handle }
    }

    /// Handle the interaction operates on
    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    fn check_channel_property(&self, mc: &ManagedConnection, message: &Message) -> Result<()> {
        let settings = mc.settings();
        if !settings.read_channel_id_property {
            return Ok(());
        }
        let namespace = &mc.factory_key().adapter_namespace;
        match message.property(namespace, CHANNEL_ID_PROPERTY) {
            Some(value) if value == mc.channel_id() => Ok(()),
            Some(value) => {
                warn!(
                    channel_id = %mc.channel_id(),
                    "Message {} carries channel property '{}'", message.id, value
                );
                Ok(())
            }
            None if settings.fail_on_missing_property => Err(Error::InvalidArgument(format!(
                "message {} lacks the {} property",
                message.id, CHANNEL_ID_PROPERTY
            ))),
            None => {
                debug!(channel_id = %mc.channel_id(), "Message {} has no channel property", message.id);
                Ok(())
            }
        }
    }

    fn write(&self, mc: &ManagedConnection, audit: &dyn AuditSink, message: &Message) -> Option<String> {
        let content = message
            .document
            .as_ref()
            .map(|d| d.content.clone())
            .unwrap_or_default();
        match mc.write(&content) {
            Ok(path) => {
                audit.append(
                    message.id,
                    AuditStatus::Success,
                    &format!("Message written to {}", path.display()),
                );
                None
            }
            Err(e) => {
                let reason = format!("write to sink failed: {}", e);
                audit.append(message.id, AuditStatus::Error, &reason);
                mc.send_event(ConnectionEventKind::Error, Some(self.handle.id()), Some(reason.clone()));
                Some(reason)
            }
        }
    }

    async fn send(&self, mc: &ManagedConnection, audit: &dyn AuditSink, message: Message) -> InteractionOutcome {
        let verdict = mc.settings().outcome_policy.verdict(&message.document_text(), false);
        let outcome = match verdict {
            Verdict::Permanent => InteractionOutcome::PermanentFailure(format!(
                "message {} cannot be delivered",
                message.id
            )),
            Verdict::Recoverable => InteractionOutcome::RecoverableFailure(format!(
                "message {} could not be delivered, retry later",
                message.id
            )),
            Verdict::Proceed | Verdict::ApplicationError => match self.write(mc, audit, &message) {
                None => InteractionOutcome::Delivered(None),
                Some(reason) => InteractionOutcome::RecoverableFailure(reason),
            },
        };

        audit.append(
            message.id,
            if outcome.is_delivered() { AuditStatus::Success } else { AuditStatus::Error },
            &format!("Send finished: {}", outcome.label()),
        );
        if let Err(e) = audit.flush(message.id) {
            warn!(message_id = %message.id, "Audit flush failed: {}", e);
        }
        outcome
    }

    async fn call(&self, mc: &ManagedConnection, audit: &dyn AuditSink, message: Message) -> Result<InteractionOutcome> {
        let settings = mc.settings();
        let verdict = settings.outcome_policy.verdict(&message.document_text(), true);
        let outcome = match verdict {
            Verdict::Permanent => InteractionOutcome::PermanentFailure(format!(
                "request {} cannot be processed",
                message.id
            )),
            Verdict::Recoverable => InteractionOutcome::RecoverableFailure(format!(
                "request {} could not be processed, retry later",
                message.id
            )),
            Verdict::ApplicationError => {
                application_error(&message, &settings.fault, "request rejected by receiver")
            }
            Verdict::Proceed => {
                if let Some(reason) = self.write(mc, audit, &message) {
                    return Ok(InteractionOutcome::RecoverableFailure(reason));
                }
                let document = match &settings.response_file_element {
                    Some(path) => self.response_file(audit, &message, path).await?,
                    None => message.document.clone(),
                };
                let mut response = Message::response_to(&message);
                response.document = document;
                audit.append(message.id, AuditStatus::Success, "Response message constructed");
                InteractionOutcome::Delivered(Some(response))
            }
        };
        Ok(outcome)
    }

    async fn response_file(
        &self,
        audit: &dyn AuditSink,
        request: &Message,
        path: &str,
    ) -> Result<Option<Payload>> {
        let text = request.document_text();
        let file = element_text(&text, path)?.ok_or_else(|| {
            Error::InvalidArgument(format!("request {} has no element {}", request.id, path))
        })?;
        audit.append(
            request.id,
            AuditStatus::Success,
            &format!("Element {} names response file {}", path, file),
        );
        let content = tokio::fs::read(&file).await?;
        Ok(Some(Payload::xml(content, "Synchronous response")))
    }
}

#[async_trait]
impl Interaction for OutboundInteraction {
    async fn execute(&self, spec: &InteractionSpec, record: Record) -> Result<InteractionOutcome> {
        let function = spec.function()?;
        let mut message = record.into_message()?;
        let mc = self.handle.managed_connection()?;
        self.check_channel_property(&mc, &message)?;

        let factory = mc.factory()?;
        let timer = INTERACTION_DURATION
            .with_label_values(&[function.as_str()])
            .start_timer();

        message.header = outbound_address(
            factory.lookup().as_ref(),
            factory.normalizer().as_ref(),
            mc.channel_id(),
            &message.header,
        )
        .await;
        debug!(
            channel_id = %mc.channel_id(),
            message_id = %message.id,
            "Executing {} to {}", function, message.header
        );

        let audit = factory.audit().as_ref();
        let outcome = match function {
            Function::Send => self.send(&mc, audit, message).await,
            Function::Call => {
                let limit = spec
                    .execution_timeout
                    .unwrap_or_else(|| factory.config().call_timeout());
                let message_id = message.id;
                match tokio::time::timeout(limit, self.call(&mc, audit, message)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        audit.append(message_id, AuditStatus::Error, "Call timed out");
                        return Err(Error::Timeout {
                            seconds: limit.as_secs(),
                            operation: format!("call of message {}", message_id),
                        });
                    }
                }
            }
        };

        timer.observe_duration();
        record_outcome(function, &outcome);
        info!(
            channel_id = %mc.channel_id(),
            "Interaction {} finished: {}", function, outcome.label()
        );
        Ok(outcome)
    }
}

/// Submits messages to the bus on behalf of the delivery loop
pub struct ProcessorInteraction {
    processor: Arc<dyn MessageProcessor>,
    channel_id: String,
    policy: OutcomePolicy,
    fault: FaultInterface,
    transaction: Option<Uuid>,
}

impl ProcessorInteraction {
    /// Interaction submitting to `processor` for `channel_id`
    pub fn new(
        processor: Arc<dyn MessageProcessor>,
        channel_id: impl Into<String>,
        policy: OutcomePolicy,
        fault: FaultInterface,
    ) -> Self {
        Self {
            processor,
            channel_id: channel_id.into(),
            policy,
            fault,
            transaction: None,
        }
    }

    /// Submit within `ticket`; the bus publishes only when it commits
    pub fn within(mut self, ticket: &TransactionTicket) -> Self {
        self.transaction = Some(ticket.id);
        self
    }
}

#[async_trait]
impl Interaction for ProcessorInteraction {
    async fn execute(&self, spec: &InteractionSpec, record: Record) -> Result<InteractionOutcome> {
        let function = spec.function()?;
        let message = record.into_message()?;

        let verdict = self
            .policy
            .verdict(&message.document_text(), function == Function::Call);
        let outcome = match verdict {
            Verdict::Permanent => {
                InteractionOutcome::PermanentFailure(format!("message {} rejected", message.id))
            }
            Verdict::Recoverable => InteractionOutcome::RecoverableFailure(format!(
                "message {} not accepted, retry later",
                message.id
            )),
            Verdict::ApplicationError => {
                application_error(&message, &self.fault, "request rejected by bus")
            }
            Verdict::Proceed => match self
                .processor
                .process(&self.channel_id, message, self.transaction)
                .await
            {
                Ok(response) => InteractionOutcome::Delivered(response),
                Err(e) if e.is_retryable() => InteractionOutcome::RecoverableFailure(e.to_string()),
                Err(e) => InteractionOutcome::PermanentFailure(e.to_string()),
            },
        };

        record_outcome(function, &outcome);
        Ok(outcome)
    }
}
