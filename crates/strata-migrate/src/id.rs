//! Migration identifiers, versioning styles and directions.

use crate::error::MigrationError;
use chrono::{NaiveDateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// Length of the `YYYYmmddHHMMSS` timestamp inside a step key.
const STEP_TIMESTAMP_LEN: usize = 14;

/// Separator between a step key's timestamp and its slug.
const STEP_SEPARATOR: &str = "__";

/// Format of the step key timestamp.
pub(crate) const STEP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How the version table records the database position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionStyle {
    /// A single contiguous integer version.
    Number,
    /// One row per applied step key.
    Steps,
}

impl fmt::Display for VersionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStyle::Number => write!(f, "number"),
            VersionStyle::Steps => write!(f, "steps"),
        }
    }
}

impl FromStr for VersionStyle {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(VersionStyle::Number),
            "steps" => Ok(VersionStyle::Steps),
            other => Err(MigrationError::InvalidStyle(other.to_string())),
        }
    }
}

/// Direction of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Advance.
    Up,
    /// Revert.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// A step-style identifier: `V<YYYYmmddHHMMSS>__<slug>`.
///
/// Keys order lexicographically, which is chronological because the
/// timestamp is fixed width.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepKey(String);

impl StepKey {
    /// Parse and validate a step key.
    pub fn parse(key: &str) -> Result<Self, MigrationError> {
        let invalid = |reason: &str| MigrationError::InvalidIdentifier {
            identifier: key.to_string(),
            reason: reason.to_string(),
        };

        let rest = key
            .strip_prefix('V')
            .ok_or_else(|| invalid("step keys start with 'V'"))?;
        let (timestamp, slug) = rest
            .split_once(STEP_SEPARATOR)
            .ok_or_else(|| invalid("missing '__' separator"))?;

        if timestamp.len() != STEP_TIMESTAMP_LEN || !timestamp.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid("timestamp must be 14 digits"));
        }
        NaiveDateTime::parse_from_str(timestamp, STEP_TIMESTAMP_FORMAT)
            .map_err(|_| invalid("timestamp is not a valid date"))?;

        let mut chars = slug.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid("slug must be an identifier"));
        }

        Ok(Self(key.to_string()))
    }

    /// Build a step key from a creation instant and a slug.
    pub fn from_parts(created: NaiveDateTime, slug: &str) -> Result<Self, MigrationError> {
        Self::parse(&format!(
            "V{}{}{}",
            created.format(STEP_TIMESTAMP_FORMAT),
            STEP_SEPARATOR,
            slug
        ))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The creation timestamp encoded in the key.
    pub fn timestamp(&self) -> NaiveDateTime {
        // Validated in `parse`.
        NaiveDateTime::parse_from_str(
            &self.0[1..1 + STEP_TIMESTAMP_LEN],
            STEP_TIMESTAMP_FORMAT,
        )
        .unwrap_or_default()
    }

    /// The descriptive slug after the timestamp.
    pub fn slug(&self) -> &str {
        &self.0[1 + STEP_TIMESTAMP_LEN + STEP_SEPARATOR.len()..]
    }

    /// Human description: the slug with underscores rewritten to spaces.
    pub fn description(&self) -> String {
        self.slug().replace('_', " ")
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StepKey {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Resolved identifier of a registered migration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MigrationId {
    /// Number-style sequence number. `0` is the baseline with nothing applied.
    Number(u64),
    /// Step-style key.
    Step(StepKey),
}

impl MigrationId {
    /// The versioning style this identifier belongs to.
    pub fn style(&self) -> VersionStyle {
        match self {
            MigrationId::Number(_) => VersionStyle::Number,
            MigrationId::Step(_) => VersionStyle::Steps,
        }
    }

    /// The sequence number, for number-style identifiers.
    pub fn as_number(&self) -> Option<u64> {
        match self {
            MigrationId::Number(n) => Some(*n),
            MigrationId::Step(_) => None,
        }
    }

    /// The step key, for step-style identifiers.
    pub fn as_step(&self) -> Option<&StepKey> {
        match self {
            MigrationId::Number(_) => None,
            MigrationId::Step(key) => Some(key),
        }
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationId::Number(n) => write!(f, "{}", n),
            MigrationId::Step(key) => write!(f, "{}", key),
        }
    }
}

impl From<u64> for MigrationId {
    fn from(n: u64) -> Self {
        MigrationId::Number(n)
    }
}

impl From<StepKey> for MigrationId {
    fn from(key: StepKey) -> Self {
        MigrationId::Step(key)
    }
}

/// Identifier handed to the registry by a loader.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefinitionKey {
    /// Number-style discovery timestamp (seconds since the Unix epoch).
    Timestamp(i64),
    /// Step-style key.
    Step(StepKey),
}

impl DefinitionKey {
    /// Parse a loader identifier. All digits is a discovery timestamp,
    /// `V…__…` is a step key.
    pub fn parse(identifier: &str) -> Result<Self, MigrationError> {
        if !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit()) {
            return identifier
                .parse::<i64>()
                .map(DefinitionKey::Timestamp)
                .map_err(|e| MigrationError::InvalidIdentifier {
                    identifier: identifier.to_string(),
                    reason: e.to_string(),
                });
        }
        if identifier.starts_with('V') {
            return StepKey::parse(identifier).map(DefinitionKey::Step);
        }
        Err(MigrationError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "expected a discovery timestamp or a step key".to_string(),
        })
    }

    /// The versioning style this key belongs to.
    pub fn style(&self) -> VersionStyle {
        match self {
            DefinitionKey::Timestamp(_) => VersionStyle::Number,
            DefinitionKey::Step(_) => VersionStyle::Steps,
        }
    }
}

impl fmt::Display for DefinitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionKey::Timestamp(ts) => write!(f, "{}", ts),
            DefinitionKey::Step(key) => write!(f, "{}", key),
        }
    }
}

/// Render a discovery timestamp as the step key it converts to.
pub fn step_key_for_timestamp(timestamp: i64, slug: &str) -> Result<StepKey, MigrationError> {
    let created = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| MigrationError::InvalidIdentifier {
            identifier: timestamp.to_string(),
            reason: "timestamp out of range".to_string(),
        })?;
    StepKey::from_parts(created.naive_utc(), slug)
}
