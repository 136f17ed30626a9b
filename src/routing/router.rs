//! Command Router
//!
//! Routing is split in two: [`CommandRouter::route`] is a pure function from
//! `(topic, payload)` to per-descriptor outcomes, and
//! [`CommandRouter::handle`] executes those outcomes against the dispatch
//! target. Every matching descriptor is evaluated on its own; a rejected
//! payload or failed capability for one never stops the others.
//!
//! # Example
//!
//! ```rust
//! use mdm_agent::routing::{Command, CommandRouter, RouteOutcome};
//!
//! let router = CommandRouter::new();
//! let routed = router.route("/agents/42/Command/Lock", br#"{"lock":"now"}"#);
//! assert_eq!(routed.len(), 1);
//! assert_eq!(
//!     routed[0].outcome,
//!     RouteOutcome::Dispatch(Command::Lock { immediate: true })
//! );
//! ```

use super::command::{Command, SubscriptionSink};
use super::descriptors::{CommandDescriptor, DESCRIPTORS};
use super::extract::{parse_payload, ExtractError};
use crate::capability::DeviceCapabilities;
use crate::command_span;
use crate::status::{StatusReporter, CATEGORY_MESSAGE};
use tracing::{debug, info, warn, Instrument};

/// What happened to one matching descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Trigger condition met; invoke this command
    Dispatch(Command),
    /// Keyword matched but the trigger condition was not met
    NotTriggered,
    /// Payload unusable for this descriptor
    Rejected(ExtractError),
}

/// Outcome of one descriptor whose keyword occurs in the topic
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedDescriptor {
    pub keyword: &'static str,
    pub outcome: RouteOutcome,
}

/// Collaborators a routed message is dispatched to
pub struct DispatchTarget<'a> {
    pub capabilities: &'a dyn DeviceCapabilities,
    pub subscriptions: &'a dyn SubscriptionSink,
    pub reporter: &'a dyn StatusReporter,
}

/// Summary of one handled message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Commands whose capability call succeeded
    pub dispatched: Vec<Command>,
    /// Descriptors whose payload extraction failed
    pub rejected: Vec<(&'static str, ExtractError)>,
    /// Commands whose capability call returned an error
    pub failed: Vec<(Command, String)>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty() && self.rejected.is_empty() && self.failed.is_empty()
    }
}

/// Stateless router over the static descriptor table
#[derive(Debug, Clone, Copy)]
pub struct CommandRouter {
    descriptors: &'static [CommandDescriptor],
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    pub fn new() -> Self {
        Self {
            descriptors: DESCRIPTORS.as_slice(),
        }
    }

    pub fn descriptors(&self) -> &'static [CommandDescriptor] {
        self.descriptors
    }

    /// Evaluate every descriptor whose keyword occurs in `topic`.
    ///
    /// Returns nothing for an empty topic or payload. The payload is parsed
    /// once; a parse failure rejects each matching descriptor individually.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Vec<RoutedDescriptor> {
        if topic.is_empty() || payload.is_empty() {
            return Vec::new();
        }

        let matching: Vec<&CommandDescriptor> = self
            .descriptors
            .iter()
            .filter(|descriptor| descriptor.matches(topic))
            .collect();
        if matching.is_empty() {
            return Vec::new();
        }

        let parsed = parse_payload(payload);
        matching
            .into_iter()
            .map(|descriptor| {
                let outcome = match &parsed {
                    Ok(object) => match descriptor.extract(object) {
                        Ok(Some(command)) => RouteOutcome::Dispatch(command),
                        Ok(None) => RouteOutcome::NotTriggered,
                        Err(e) => RouteOutcome::Rejected(e),
                    },
                    Err(e) => RouteOutcome::Rejected(e.clone()),
                };
                RoutedDescriptor {
                    keyword: descriptor.keyword,
                    outcome,
                }
            })
            .collect()
    }

    /// Route one inbound message and invoke the resulting commands in table
    /// order. Never fails; every problem is logged and recorded in the report.
    pub async fn handle(
        &self,
        topic: &str,
        payload: &[u8],
        target: &DispatchTarget<'_>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if topic.is_empty() || payload.is_empty() {
            return report;
        }

        let body = String::from_utf8_lossy(payload);
        debug!(topic, "Message received");
        target.reporter.report_log(CATEGORY_MESSAGE, "Body", &body);

        for routed in self.route(topic, payload) {
            match routed.outcome {
                RouteOutcome::Dispatch(command) => {
                    let span = command_span!(
                        keyword = routed.keyword,
                        capability = command.capability_name()
                    );
                    let result = command
                        .execute(target.capabilities, target.subscriptions)
                        .instrument(span)
                        .await;
                    match result {
                        Ok(()) => {
                            info!(
                                topic,
                                keyword = routed.keyword,
                                capability = command.capability_name(),
                                "Command dispatched"
                            );
                            report.dispatched.push(command);
                        }
                        Err(e) => {
                            warn!(
                                topic,
                                keyword = routed.keyword,
                                capability = command.capability_name(),
                                error = %e,
                                "Command failed"
                            );
                            report.failed.push((command, e.sanitized()));
                        }
                    }
                }
                RouteOutcome::NotTriggered => {
                    debug!(topic, keyword = routed.keyword, "Trigger condition not met");
                }
                RouteOutcome::Rejected(e) => {
                    warn!(
                        topic,
                        keyword = routed.keyword,
                        error = %e,
                        "Payload rejected for command"
                    );
                    report.rejected.push((routed.keyword, e));
                }
            }
        }

        report
    }
}
