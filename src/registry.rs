use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::{HttpError, Result, TransportHandler};

/// Reserved registry name that resolves to the default transport.
pub const DEFAULT_HANDLER: &str = "default";

/// Named registry of shared transport handlers.
///
/// The reserved [`DEFAULT_HANDLER`] entry is present from construction and
/// maps to no explicit handler: resolving it yields a default transport that
/// is built on first use and shared from then on.
#[derive(Debug)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Option<Arc<TransportHandler>>>,
    default_transport: OnceLock<Arc<TransportHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let handlers = DashMap::new();
        handlers.insert(DEFAULT_HANDLER.to_owned(), None);
        Self {
            handlers,
            default_transport: OnceLock::new(),
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing any previous entry.
    ///
    /// The reserved default name and the empty name are rejected with
    /// [`HttpError::Config`].
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Into<Arc<TransportHandler>>,
    ) -> Result<()> {
        let name = name.into();
        if name == DEFAULT_HANDLER {
            return Err(HttpError::Config(format!(
                "`{DEFAULT_HANDLER}` is reserved for the default transport handler"
            )));
        }
        if name.trim().is_empty() {
            return Err(HttpError::Config(
                "transport handler name cannot be empty".to_owned(),
            ));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(name = %name, "transport handler registered");

        self.handlers.insert(name, Some(handler.into()));
        Ok(())
    }

    /// Looks up the handler registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<TransportHandler>> {
        let entry = self
            .handlers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HttpError::NotFound {
                name: name.to_owned(),
            })?;

        match entry {
            Some(handler) => Ok(handler),
            None => self.default_transport(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, the reserved default included, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    fn default_transport(&self) -> Result<Arc<TransportHandler>> {
        if let Some(transport) = self.default_transport.get() {
            return Ok(Arc::clone(transport));
        }
        // Concurrent first calls may each build one; the first stored wins.
        let built = Arc::new(TransportHandler::new()?);
        Ok(Arc::clone(self.default_transport.get_or_init(|| built)))
    }
}
