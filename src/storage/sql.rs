//! Identifier validation shared by the database backends.

use crate::{Error, Result};

/// Longest identifier PostgreSQL accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validates a table name before it is interpolated into a query.
///
/// Table names cannot be bound as parameters, so they are restricted to
/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if the name is empty, too long, or
/// contains anything outside the allowed set.
///
/// # Examples
///
/// ```
/// use tally::storage::validate_table_name;
///
/// assert!(validate_table_name("user_counter").is_ok());
/// assert!(validate_table_name("counter; DROP TABLE x").is_err());
/// ```
pub fn validate_table_name(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::Configuration("table name is empty".to_string()));
    };

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Configuration(format!(
            "table name '{name}' is longer than {MAX_IDENTIFIER_LEN} bytes"
        )));
    }

    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(Error::Configuration(format!(
            "table name '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("user_counter" ; "default name")]
    #[test_case("_scratch" ; "leading underscore")]
    #[test_case("bench2" ; "trailing digit")]
    fn test_accepts(name: &str) {
        assert_eq!(validate_table_name(name).unwrap(), name);
    }

    #[test_case("" ; "empty")]
    #[test_case("2fast" ; "leading digit")]
    #[test_case("user-counter" ; "hyphen")]
    #[test_case("counter; DROP TABLE users" ; "injection")]
    #[test_case("schema.table" ; "qualified")]
    fn test_rejects(name: &str) {
        assert!(matches!(
            validate_table_name(name),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_overlong() {
        let name = "t".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_table_name(&name).is_err());
        assert!(validate_table_name(&name[..MAX_IDENTIFIER_LEN]).is_ok());
    }
}
