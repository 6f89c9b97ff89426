//! RCON client facade.
//!
//! `RconClient` ties the pieces together: commands go through the
//! correlator, subscriptions through the registry, both over the
//! supervisor's shared connection. Inbound frames flow back through the
//! router on the connection task.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::auth::Credentials;
use super::correlator::CommandCorrelator;
use super::error::RconError;
use super::protocol::{self, Command, Subscription as SubscriptionEnvelope, Tag, TagGenerator};
use super::registry::{Subscription, SubscriptionRegistry};
use super::router::MessageRouter;
use super::supervisor::{ConnectionState, ConnectionSupervisor, Link, LinkEvents};
use super::transport::{Transport, WebSocketTransport};
use crate::config::ClientConfig;

/// Resilient client for a JSONAPI server.
///
/// Cheap to clone; clones share the connection, pending commands and
/// subscriptions. Dropping the last clone shuts the connection down.
///
/// # Example
///
/// ```ignore
/// use jsonapi_rcon::{ClientConfig, Credentials, RconClient};
///
/// let config = ClientConfig::new("localhost", 20059, Credentials::new("u", "p", "s"));
/// let client = RconClient::new(config, |push| println!("{}", push))?;
///
/// let players = client.call("getPlayers", vec![]).await?;
/// client.subscribe("chat", false);
/// ```
#[derive(Clone)]
pub struct RconClient {
    core: Arc<Core>,
}

struct Core {
    config: ClientConfig,
    credentials: Credentials,
    tags: TagGenerator,
    supervisor: ConnectionSupervisor,
    correlator: Arc<CommandCorrelator>,
    registry: Arc<SubscriptionRegistry>,
    router: MessageRouter,
}

impl RconClient {
    /// Build a client speaking WebSocket to `config.host:config.port`.
    ///
    /// With `connect_on_start`, a first connection attempt starts right
    /// away; its failure is only logged.
    ///
    /// # Errors
    ///
    /// Returns `RconError::Protocol` if host and port do not form a valid
    /// endpoint URL.
    pub fn new(
        config: ClientConfig,
        listener: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<Self, RconError> {
        Self::with_transport(config, Arc::new(WebSocketTransport), listener)
    }

    /// Build a client over a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        listener: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<Self, RconError> {
        let url = protocol::endpoint(&config.host, config.port)?;
        let correlator = Arc::new(CommandCorrelator::new(config.command_timeout()));
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(listener)));
        let router = MessageRouter::new(Arc::clone(&correlator), Arc::clone(&registry));

        let core = Arc::new_cyclic(|weak: &Weak<Core>| {
            let events: Weak<dyn LinkEvents> = weak.clone();
            Core {
                credentials: config.credentials(),
                tags: TagGenerator::default(),
                supervisor: ConnectionSupervisor::new(
                    url,
                    transport,
                    events,
                    config.reconnect_delay(),
                ),
                correlator,
                registry,
                router,
                config,
            }
        });

        let client = Self { core };
        if client.core.config.connect_on_start {
            client.spawn_initial_connect();
        }
        Ok(client)
    }

    fn spawn_initial_connect(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime; deferring connection to first use");
            return;
        };

        let supervisor = self.core.supervisor.clone();
        runtime.spawn(async move {
            if let Err(e) = supervisor.connect().await {
                debug!(error = %e, "Initial connection failed");
            }
        });
    }

    /// Invoke `method` with `arguments` and wait for its result.
    ///
    /// # Errors
    ///
    /// - `RconError::Connection` if the connection cannot be opened, or
    ///   closes while the command is pending
    /// - `RconError::Timeout` if no response arrives within the command timeout
    /// - `RconError::Remote` if the server answers with `result: "error"`
    /// - `RconError::Shutdown` after `shutdown()`
    pub async fn call(&self, method: &str, arguments: Vec<Value>) -> Result<Value, RconError> {
        let link = self.core.supervisor.connect().await?;
        let tag = self.core.tags.next_tag();

        let command = Command {
            name: method.to_string(),
            username: self.core.credentials.username.clone(),
            key: self.core.credentials.key_for(method),
            arguments,
            tag: tag.clone(),
        };
        let frame = protocol::encode_call(&command)?;

        // Registered before sending so a fast reply cannot miss it
        let reply = self.core.correlator.register(tag, method, link.epoch());
        link.send(frame)?;
        debug!(tag = %reply.tag(), method, epoch = link.epoch(), "Command sent");
        drop(link);

        reply.wait().await
    }

    /// Subscribe to pushes from `source`, fire-and-forget.
    ///
    /// Failures are logged, not returned; use `try_subscribe` to observe
    /// them.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn subscribe(&self, source: &str, show_previous: bool) {
        let client = self.clone();
        let source = source.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.try_subscribe(&source, show_previous).await {
                warn!(source = %source, error = %e, "Subscribe failed");
            }
        });
    }

    /// Subscribe to pushes from `source`, returning the subscription tag.
    ///
    /// # Errors
    ///
    /// Returns the connection error if the connection cannot be opened or
    /// closes before the subscription is sent. A subscription that was
    /// registered but not sent is sent again on the next connection when
    /// `resubscribe_on_reconnect` is set.
    pub async fn try_subscribe(&self, source: &str, show_previous: bool) -> Result<Tag, RconError> {
        let link = self.core.supervisor.connect().await?;
        let tag = self.core.tags.next_tag();

        self.core
            .registry
            .activate(tag.clone(), source, show_previous, link.epoch());
        self.core
            .send_subscription(&link, &tag, source, show_previous)?;

        info!(%tag, source, show_previous, epoch = link.epoch(), "Subscribed");
        Ok(tag)
    }

    /// Ensure the connection is open, cancelling any scheduled reconnect.
    pub async fn connect(&self) -> Result<(), RconError> {
        self.core.supervisor.connect().await.map(|_| ())
    }

    pub fn state(&self) -> ConnectionState {
        self.core.supervisor.state()
    }

    /// Close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.core.supervisor.shutdown();
    }

    /// Active subscriptions, ordered by source.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.core.registry.snapshot()
    }

    /// Number of commands waiting for a response.
    pub fn pending_commands(&self) -> usize {
        self.core.correlator.pending_count()
    }

    pub fn url(&self) -> &Url {
        self.core.supervisor.url()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }
}

impl fmt::Debug for RconClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RconClient")
            .field("url", &self.url().as_str())
            .field("state", &self.state())
            .field("pending_commands", &self.pending_commands())
            .finish_non_exhaustive()
    }
}

impl Core {
    fn send_subscription(
        &self,
        link: &Link,
        tag: &Tag,
        source: &str,
        show_previous: bool,
    ) -> Result<(), RconError> {
        let envelope = SubscriptionEnvelope {
            name: source.to_string(),
            username: self.credentials.username.clone(),
            key: self.credentials.key_for(source),
            show_previous,
            tag: tag.clone(),
        };
        link.send(protocol::encode_subscribe(&envelope)?)
    }
}

impl LinkEvents for Core {
    fn on_open(&self, link: &Link) {
        if !self.config.resubscribe_on_reconnect {
            return;
        }

        for subscription in self.registry.reissue_for(link.epoch()) {
            match self.send_subscription(
                link,
                &subscription.tag,
                &subscription.source,
                subscription.show_previous,
            ) {
                Ok(()) => info!(
                    tag = %subscription.tag,
                    source = %subscription.source,
                    epoch = link.epoch(),
                    "Resubscribed"
                ),
                Err(e) => warn!(
                    tag = %subscription.tag,
                    source = %subscription.source,
                    error = %e,
                    "Resubscribe failed"
                ),
            }
        }
    }

    fn on_frame(&self, raw: &str) {
        let outcome = self.router.route(raw);
        if outcome.dropped > 0 {
            debug!(
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "Frame had unmatched tags"
            );
        }
    }

    fn on_close(&self, epoch: u64, reason: &RconError) {
        if self.config.fail_pending_on_close {
            let failed = self.correlator.fail_epoch(epoch, reason);
            if failed > 0 {
                warn!(epoch, failed, "Failed pending commands on connection close");
            }
        } else {
            let lingering = self.correlator.pending_on(epoch);
            if lingering > 0 {
                debug!(epoch, lingering, "Pending commands left to time out");
            }
        }
    }
}
