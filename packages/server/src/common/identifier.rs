//! MySQL identifier validation.
//!
//! Table, schema, and column names coming from operator input are interpolated
//! into SQL text (they cannot be bound as parameters), so they must pass this
//! check before any query is built from them.

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum identifier length accepted by MySQL.
pub const MAX_IDENTIFIER_LEN: usize = 64;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

/// Whether `name` is a plain (unquoted) MySQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(name)
}

/// Wrap an already-validated identifier in backticks for SQL text.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name)
}

/// Qualify a table with its schema, both backquoted.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("`{}`.`{}`", schema, table)
}
