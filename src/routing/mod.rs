//! Command routing
//!
//! Inbound messages are matched against a static table of descriptors by
//! case-insensitive keyword containment in the topic. Matching is
//! non-exclusive: a topic containing several keywords triggers each of them.

pub mod command;
pub mod descriptors;
pub mod extract;
pub mod router;

pub use command::{Command, SubscriptionSink};
pub use descriptors::{CommandDescriptor, DESCRIPTORS};
pub use extract::ExtractError;
pub use router::{CommandRouter, DispatchReport, DispatchTarget, RouteOutcome, RoutedDescriptor};
