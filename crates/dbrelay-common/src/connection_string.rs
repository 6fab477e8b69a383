//! `key=value;` connection strings.
//!
//! Keys are matched case-insensitively and keep their first-seen position.
//! Values may be quoted with `'` or `"` to embed `;` or surrounding
//! whitespace; a doubled quote character inside a quoted value stands for
//! itself.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Key naming the gateway address.
pub const GRPC_SERVER_KEY: &str = "GrpcServer";

/// Key naming the caller identity sent with new transactions.
pub const CLIENT_IDENTIFIER_KEY: &str = "ClientIdentifier";

/// Connection string parse errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    /// A segment has no `=`.
    #[error("missing '=' after key '{0}'")]
    MissingValue(String),

    /// A segment starts with `=`.
    #[error("empty key at position {0}")]
    EmptyKey(usize),

    /// A quoted value is not closed.
    #[error("unterminated quoted value for key '{0}'")]
    UnterminatedQuote(String),

    /// Text follows a closing quote.
    #[error("unexpected text after quoted value for key '{0}'")]
    TrailingText(String),
}

/// Ordered, case-insensitive connection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    entries: Vec<(String, String)>,
}

impl ConnectionStringBuilder {
    /// Creates an empty connection string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a connection string.
    pub fn parse(input: &str) -> Result<Self, ConnectionStringError> {
        let mut builder = Self::new();
        let mut chars = input.char_indices().peekable();

        loop {
            while matches!(chars.peek(), Some((_, c)) if c.is_whitespace() || *c == ';') {
                chars.next();
            }
            let Some(&(start, _)) = chars.peek() else {
                break;
            };

            let mut key = String::new();
            let mut found_eq = false;
            for (_, c) in chars.by_ref() {
                match c {
                    '=' => {
                        found_eq = true;
                        break;
                    }
                    ';' => break,
                    _ => key.push(c),
                }
            }
            let key = key.trim().to_string();
            if !found_eq {
                return Err(ConnectionStringError::MissingValue(key));
            }
            if key.is_empty() {
                return Err(ConnectionStringError::EmptyKey(start));
            }

            while matches!(chars.peek(), Some((_, c)) if *c == ' ' || *c == '\t') {
                chars.next();
            }

            let mut value = String::new();
            match chars.peek() {
                Some(&(_, quote)) if quote == '\'' || quote == '"' => {
                    chars.next();
                    let mut closed = false;
                    while let Some((_, c)) = chars.next() {
                        if c == quote {
                            if matches!(chars.peek(), Some((_, n)) if *n == quote) {
                                chars.next();
                                value.push(quote);
                            } else {
                                closed = true;
                                break;
                            }
                        } else {
                            value.push(c);
                        }
                    }
                    if !closed {
                        return Err(ConnectionStringError::UnterminatedQuote(key));
                    }
                    for (_, c) in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        if !c.is_whitespace() {
                            return Err(ConnectionStringError::TrailingText(key));
                        }
                    }
                }
                _ => {
                    for (_, c) in chars.by_ref() {
                        if c == ';' {
                            break;
                        }
                        value.push(c);
                    }
                    value = value.trim_end().to_string();
                }
            }

            builder.set(key, value);
        }

        Ok(builder)
    }

    /// Returns the value for `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].1.as_str())
    }

    /// Returns the value for `key`, or `None` if it is missing or blank.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Sets `key`, keeping the position of an existing entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Removes `key` and returns its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }
}

fn needs_quotes(value: &str) -> bool {
    value.contains(';')
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace)
        || value.starts_with('\'')
        || value.starts_with('"')
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            if !needs_quotes(value) {
                write!(f, "{}={}", key, value)?;
            } else if value.contains('"') {
                write!(f, "{}='{}'", key, value.replace('\'', "''"))?;
            } else {
                write!(f, "{}=\"{}\"", key, value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ConnectionStringBuilder {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let cs = ConnectionStringBuilder::parse(
            "GrpcServer=http://localhost:7400;Data Source=app.db;",
        )
        .unwrap();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs.get("grpcserver"), Some("http://localhost:7400"));
        assert_eq!(cs.get("DATA SOURCE"), Some("app.db"));
        assert_eq!(cs.get("Password"), None);
    }

    #[test]
    fn test_parse_quoted() {
        let cs = ConnectionStringBuilder::parse(
            "Password='a;b'; Name = \" padded \" ; Quote='it''s'",
        )
        .unwrap();
        assert_eq!(cs.get("Password"), Some("a;b"));
        assert_eq!(cs.get("Name"), Some(" padded "));
        assert_eq!(cs.get("Quote"), Some("it's"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ConnectionStringBuilder::parse("Data Source"),
            Err(ConnectionStringError::MissingValue("Data Source".to_string()))
        );
        assert!(matches!(
            ConnectionStringBuilder::parse("=x"),
            Err(ConnectionStringError::EmptyKey(_))
        ));
        assert_eq!(
            ConnectionStringBuilder::parse("A='open"),
            Err(ConnectionStringError::UnterminatedQuote("A".to_string()))
        );
        assert_eq!(
            ConnectionStringBuilder::parse("A='x' y"),
            Err(ConnectionStringError::TrailingText("A".to_string()))
        );
    }

    #[test]
    fn test_duplicate_key_keeps_position() {
        let cs = ConnectionStringBuilder::parse("a=1;b=2;A=3").unwrap();
        assert_eq!(cs.to_string(), "a=3;b=2");
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let mut cs = ConnectionStringBuilder::new();
        cs.set("GrpcServer", "http://h:1");
        cs.set("Password", "x;y");
        cs.set("Name", " z");
        cs.set("Say", "\"hi\"; it's");

        let rendered = cs.to_string();
        assert_eq!(
            rendered,
            "GrpcServer=http://h:1;Password=\"x;y\";Name=\" z\";Say='\"hi\"; it''s'"
        );
        assert_eq!(ConnectionStringBuilder::parse(&rendered).unwrap(), cs);
    }

    #[test]
    fn test_remove_and_blank() {
        let mut cs: ConnectionStringBuilder = "A=1;B=  ".parse().unwrap();
        assert_eq!(cs.get("B"), Some(""));
        assert_eq!(cs.get_non_empty("B"), None);
        assert_eq!(cs.remove("a"), Some("1".to_string()));
        assert!(!cs.contains_key("A"));
    }
}
