use std::{collections::HashMap, sync::Arc};

use crate::ports::http_client::HttpClient;

/// Named collection of HTTP transports used for outbound proxied requests.
///
/// Per-forward options may name a transport; the registry hands it out at
/// request time. Lookup never fails: an unknown name falls back to the
/// default transport with a warning, so a typo in a transport name degrades
/// to default behavior rather than breaking the route.
pub struct TransportRegistry {
    default: Arc<dyn HttpClient>,
    named: HashMap<String, Arc<dyn HttpClient>>,
}

impl TransportRegistry {
    /// Create a registry around the transport used when no name is given.
    pub fn new(default: Arc<dyn HttpClient>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Register a named transport, replacing any previous entry of that name.
    pub fn with_transport(mut self, name: impl Into<String>, client: Arc<dyn HttpClient>) -> Self {
        self.named.insert(name.into(), client);
        self
    }

    /// Look up a transport by name. `None` or an unregistered name yields the
    /// default transport.
    pub fn get(&self, name: Option<&str>) -> Arc<dyn HttpClient> {
        match name {
            None => Arc::clone(&self.default),
            Some(name) => self.named.get(name).cloned().unwrap_or_else(|| {
                tracing::warn!(
                    transport = name,
                    "No transport registered under this name, using default"
                );
                Arc::clone(&self.default)
            }),
        }
    }
}
