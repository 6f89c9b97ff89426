//! Inbound frame dispatch.

use std::sync::Arc;

use tracing::{debug, warn};

use super::correlator::CommandCorrelator;
use super::protocol::InboundFrame;
use super::registry::SubscriptionRegistry;

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Responses or pushes handed to a waiter or the listener.
    pub delivered: usize,
    /// Elements whose tag matched nothing.
    pub dropped: usize,
}

/// Classifies inbound frames and dispatches them by tag.
///
/// Arrays are command batches for the correlator; objects are pushes for
/// the subscription registry.
#[derive(Clone)]
pub struct MessageRouter {
    correlator: Arc<CommandCorrelator>,
    registry: Arc<SubscriptionRegistry>,
}

impl MessageRouter {
    pub fn new(correlator: Arc<CommandCorrelator>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            correlator,
            registry,
        }
    }

    /// Route one raw text frame. Undecodable frames are logged and dropped.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return RouteOutcome {
                    delivered: 0,
                    dropped: 1,
                };
            }
        };

        let mut outcome = RouteOutcome::default();
        match frame {
            InboundFrame::Batch(responses) => {
                debug!(count = responses.len(), "Routing response batch");
                for response in responses {
                    if self.correlator.resolve(response) {
                        outcome.delivered += 1;
                    } else {
                        outcome.dropped += 1;
                    }
                }
            }
            InboundFrame::Push(push) => {
                if self.registry.deliver(push) {
                    outcome.delivered += 1;
                } else {
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }
}
