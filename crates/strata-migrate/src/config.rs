//! Migration engine configuration.

use crate::id::VersionStyle;

/// Default name of the version table.
pub const DEFAULT_VERSION_TABLE: &str = "migration_version";

/// Migration engine configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Name of the table that records the database position.
    pub table_name: String,
    /// Versioning style in effect for this database.
    pub style: VersionStyle,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_VERSION_TABLE.to_string(),
            style: VersionStyle::Number,
        }
    }
}

impl MigrationConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version table name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Set the versioning style.
    pub fn with_style(mut self, style: VersionStyle) -> Self {
        self.style = style;
        self
    }
}
