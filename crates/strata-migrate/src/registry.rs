//! Ordered collection of resolvable migration definitions.

use crate::definition::{Migration, MigrationDefinition};
use crate::error::MigrationError;
use crate::id::{DefinitionKey, MigrationId, VersionStyle};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registered migrations keyed by identifier.
///
/// A registry holds either number-style or step-style definitions, never both.
/// Number-style definitions are assigned contiguous sequence numbers from 1 in
/// registration order, and registration order must follow discovery
/// timestamps.
#[derive(Debug, Default, Clone)]
pub struct MigrationRegistry {
    style: Option<VersionStyle>,
    definitions: BTreeMap<MigrationId, MigrationDefinition>,
    last_timestamp: Option<i64>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from loader output.
    ///
    /// Identifiers are parsed, checked for style mixing, sorted (numerically
    /// for discovery timestamps, lexicographically for step keys) and then
    /// registered in that order.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, MigrationError>
    where
        I: IntoIterator<Item = (S, Arc<dyn Migration>)>,
        S: AsRef<str>,
    {
        let mut parsed = Vec::new();
        let mut style = None;
        for (identifier, handle) in entries {
            let key = DefinitionKey::parse(identifier.as_ref())?;
            match style {
                None => style = Some(key.style()),
                Some(established) if established != key.style() => {
                    return Err(MigrationError::StyleConflict {
                        identifier: key.to_string(),
                        established,
                    });
                }
                Some(_) => {}
            }
            parsed.push((key, handle));
        }

        parsed.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut registry = Self::new();
        for (key, handle) in parsed {
            registry.register(key, handle)?;
        }
        Ok(registry)
    }

    /// Register a definition, returning the identifier it was assigned.
    ///
    /// Number style assigns `max + 1` (or 1 when empty). Step style uses the
    /// key as given.
    pub fn register(
        &mut self,
        key: DefinitionKey,
        handle: Arc<dyn Migration>,
    ) -> Result<MigrationId, MigrationError> {
        if let Some(established) = self.style {
            if established != key.style() {
                return Err(MigrationError::StyleConflict {
                    identifier: key.to_string(),
                    established,
                });
            }
        }

        let id = match &key {
            DefinitionKey::Timestamp(timestamp) => {
                if let Some(previous) = self.last_timestamp {
                    if *timestamp == previous {
                        return Err(MigrationError::DuplicateMigration {
                            identifier: key.to_string(),
                        });
                    }
                    if *timestamp < previous {
                        return Err(MigrationError::OutOfOrder {
                            identifier: key.to_string(),
                            previous: previous.to_string(),
                        });
                    }
                }
                self.last_timestamp = Some(*timestamp);
                MigrationId::Number(self.latest_version() + 1)
            }
            DefinitionKey::Step(step) => {
                let id = MigrationId::Step(step.clone());
                if self.definitions.contains_key(&id) {
                    return Err(MigrationError::DuplicateMigration {
                        identifier: key.to_string(),
                    });
                }
                id
            }
        };

        debug!(migration = %id, source = %key, "registered migration");
        self.style = Some(key.style());
        self.definitions
            .insert(id.clone(), MigrationDefinition::new(id.clone(), key, handle));
        Ok(id)
    }

    /// Register from a raw loader identifier.
    pub fn register_str(
        &mut self,
        identifier: &str,
        handle: Arc<dyn Migration>,
    ) -> Result<MigrationId, MigrationError> {
        self.register(DefinitionKey::parse(identifier)?, handle)
    }

    /// Resolve an identifier to its definition.
    pub fn resolve(&self, id: &MigrationId) -> Result<&MigrationDefinition, MigrationError> {
        self.definitions
            .get(id)
            .ok_or_else(|| MigrationError::UnknownMigration {
                identifier: id.to_string(),
            })
    }

    /// Whether the identifier is registered.
    pub fn contains(&self, id: &MigrationId) -> bool {
        self.definitions.contains_key(id)
    }

    /// Style established by registrations, if any.
    pub fn style(&self) -> Option<VersionStyle> {
        self.style
    }

    /// Highest registered identifier.
    pub fn latest(&self) -> Option<&MigrationId> {
        self.definitions.keys().next_back()
    }

    /// Highest number-style sequence number, or 0 when there is none.
    pub fn latest_version(&self) -> u64 {
        self.latest().and_then(MigrationId::as_number).unwrap_or(0)
    }

    /// Identifiers in ascending order.
    pub fn ascending(&self) -> Vec<MigrationId> {
        self.definitions.keys().cloned().collect()
    }

    /// Identifiers in descending order.
    pub fn descending(&self) -> Vec<MigrationId> {
        self.definitions.keys().rev().cloned().collect()
    }

    /// Iterate definitions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationDefinition> {
        self.definitions.values()
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
