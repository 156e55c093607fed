//! Public RPC configuration.
//!
//! One `RpcConfig` describes how either engine reaches the bus (`host`,
//! `port`, credentials, client id) and which topic pair it uses. Transport
//! layers interpret the connection fields; the engines read the topics and
//! the timeout/dispatch policies.

use std::time::Duration;

use crate::{Result, RpcError};

/// What a callee publishes when a request names a method it has no handler for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownMethodPolicy {
    /// Publish the request back unmodified.
    #[default]
    Echo,

    /// Reply with an error payload (`unknown method: <name>`).
    Reject,
}

/// Connection parameters, topic pair and engine policies.
///
/// # Example
///
/// ```
/// use pubsub_rpc::RpcConfig;
/// use std::time::Duration;
///
/// let config = RpcConfig::new("broker", 1883, "test", "/local/request", "/local/reply")
///     .with_password("secret")
///     .with_request_timeout(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Broker host name or address.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Broker user name. Empty means anonymous.
    pub username: String,

    /// Broker password, sent only together with a user name.
    pub password: Option<String>,

    /// Client identifier presented to the broker; also the transport id used
    /// in logs. Defaults to a random `rpc-<uuid>` value.
    pub client_id: String,

    /// Topic requests are published to (caller) or consumed from (callee).
    pub request_topic: String,

    /// Topic replies are published to (callee) or consumed from (caller).
    pub reply_topic: String,

    /// Broker keep-alive interval in seconds; transport default if `None`.
    pub keep_alive_secs: Option<u16>,

    /// How long engine construction waits for the link to come up.
    ///
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Default timeout for [`RpcCaller::call_default`](crate::RpcCaller::call_default).
    ///
    /// `None` waits indefinitely. Default: `None`
    pub request_timeout: Option<Duration>,

    /// Timeout applied by [`RpcCaller::call_async`](crate::RpcCaller::call_async).
    ///
    /// `None` waits indefinitely. Default: `None`
    pub async_timeout: Option<Duration>,

    /// Callee behavior for requests without a registered handler.
    pub unknown_method: UnknownMethodPolicy,

    /// Optional transport type override (`"memory"`, `"rumqttc"`).
    /// If `None`, uses feature-flag driven selection.
    pub transport_type: Option<String>,
}

impl RpcConfig {
    /// Create a broker config from the required connection surface.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        request_topic: impl Into<String>,
        reply_topic: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            client_id: format!("rpc-{}", uuid::Uuid::new_v4()),
            request_topic: request_topic.into(),
            reply_topic: reply_topic.into(),
            keep_alive_secs: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
            async_timeout: None,
            unknown_method: UnknownMethodPolicy::default(),
            transport_type: None,
        }
    }

    /// Create a memory transport config (no broker).
    pub fn memory(request_topic: impl Into<String>, reply_topic: impl Into<String>) -> Self {
        Self {
            transport_type: Some("memory".into()),
            ..Self::new("localhost", 0, "", request_topic, reply_topic)
        }
    }

    /// Set the broker password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set an explicit client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set an explicit keep-alive interval.
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Set how long construction waits for the link.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default timeout for blocking calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the timeout applied to asynchronous calls.
    ///
    /// On expiry the pending slot is released and the callback receives
    /// [`RpcError::Timeout`].
    pub fn with_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = Some(timeout);
        self
    }

    /// Set the callee's unknown-method policy.
    pub fn with_unknown_method(mut self, policy: UnknownMethodPolicy) -> Self {
        self.unknown_method = policy;
        self
    }

    /// Set an explicit transport type.
    pub fn with_transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Check that every required value is present.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingConfig`] naming the first missing value.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.host.is_empty() {
            return Err(RpcError::MissingConfig("host".into()));
        }
        if self.client_id.is_empty() {
            return Err(RpcError::MissingConfig("client_id".into()));
        }
        if self.request_topic.is_empty() {
            return Err(RpcError::MissingConfig("request_topic".into()));
        }
        if self.reply_topic.is_empty() {
            return Err(RpcError::MissingConfig("reply_topic".into()));
        }
        Ok(())
    }
}
