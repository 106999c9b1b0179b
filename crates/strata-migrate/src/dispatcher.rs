//! Change dispatch: maps a declared change to the handler that performs it.

use crate::change::{Change, ChangeKind};
use crate::error::MigrationError;
use crate::processor;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use strata_storage::Transaction;
use tracing::debug;

/// Performs one kind of change against the run transaction.
pub trait ChangeHandler: Send + Sync {
    /// Apply the change described by `payload`.
    fn apply(&self, tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError>;
}

impl<F> ChangeHandler for F
where
    F: Fn(&mut Transaction<'_>, &Value) -> Result<(), MigrationError> + Send + Sync,
{
    fn apply(&self, tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
        self(tx, payload)
    }
}

/// Handler table keyed by change kind.
#[derive(Default)]
pub struct ChangeDispatcher {
    handlers: HashMap<ChangeKind, Box<dyn ChangeHandler>>,
}

impl ChangeDispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with a handler for every kind that applies the
    /// change to the storage catalog.
    pub fn with_schema_handlers() -> Self {
        let mut dispatcher = Self::new();
        for kind in ChangeKind::ALL {
            dispatcher.register(kind, processor::schema_handler(kind));
        }
        dispatcher
    }

    /// Register a handler, replacing any previous one for `kind`.
    pub fn register<H>(&mut self, kind: ChangeKind, handler: H) -> &mut Self
    where
        H: ChangeHandler + 'static,
    {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Whether a handler is registered for `kind`.
    pub fn supports(&self, kind: ChangeKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Apply one change.
    ///
    /// Fails with `UnsupportedChangeType` when the type does not name a known
    /// kind or no handler is registered for it.
    pub fn apply(&self, tx: &mut Transaction<'_>, change: &Change) -> Result<(), MigrationError> {
        let handler = change
            .kind()
            .and_then(|kind| self.handlers.get(&kind))
            .ok_or_else(|| MigrationError::UnsupportedChangeType {
                change_type: change.change_type.clone(),
            })?;

        debug!(change_type = %change.change_type, "applying change");
        handler.apply(tx, &change.payload)
    }
}

impl fmt::Debug for ChangeDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&ChangeKind> = self.handlers.keys().collect();
        kinds.sort();
        f.debug_struct("ChangeDispatcher")
            .field("handlers", &kinds)
            .finish()
    }
}
