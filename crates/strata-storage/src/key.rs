//! Row key encoding.
//!
//! Key format: `[table name bytes][0x00][row key bytes]`
//!
//! Table names never contain NUL, so the separator makes every table's rows
//! a distinct prefix range of the rows tree.

use crate::error::Error;

/// Separator between table name and row key.
const SEPARATOR: u8 = 0;

/// Validate a table name.
pub fn validate_table_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.as_bytes().contains(&SEPARATOR) {
        return Err(Error::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// Prefix shared by every row of a table.
pub fn table_prefix(table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(table.len() + 1);
    prefix.extend_from_slice(table.as_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Encode a full row key.
pub fn row_key(table: &str, key: &[u8]) -> Vec<u8> {
    let mut encoded = table_prefix(table);
    encoded.extend_from_slice(key);
    encoded
}

/// Strip the table prefix from an encoded row key.
pub fn strip_prefix<'k>(table: &str, encoded: &'k [u8]) -> Option<&'k [u8]> {
    let prefix_len = table.len() + 1;
    if encoded.len() < prefix_len || !encoded.starts_with(&table_prefix(table)) {
        return None;
    }
    Some(&encoded[prefix_len..])
}
