//! Error types surfaced by query compilation

use std::fmt;

use thiserror::Error;

/// Category of a [`QueryParseError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The text does not match the grammar or a literal is malformed
    Syntax,
    /// A symbol, property, type or function could not be resolved
    Resolution,
    /// The construct is understood but not supported for the operand types
    Unsupported,
    /// Anything else, wrapped with the original error kept as the source
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Unexpected => "unexpected error",
        };
        f.write_str(name)
    }
}

/// Position of an error inside the query text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    /// Compute a 1-based line/column for a byte offset in `query`
    pub fn locate(query: &str, offset: usize) -> Self {
        let bounded = offset.min(query.len());
        let mut line = 1usize;
        let mut column = 1usize;

        for ch in query[..bounded].chars() {
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }

        Position {
            offset: bounded,
            line,
            column,
        }
    }
}

/// The single error type returned by the parsing entry points
#[derive(Debug)]
pub struct QueryParseError {
    kind: ErrorKind,
    message: String,
    position: Option<Position>,
    query: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryParseError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        QueryParseError {
            kind,
            message: message.into(),
            position: None,
            query: None,
            source: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolution, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Wrap a foreign error, keeping it as the `source()`
    pub fn unexpected(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        let source = source.into();
        QueryParseError {
            kind: ErrorKind::Unexpected,
            message: format!("Unexpected parse error: {source}"),
            position: None,
            query: None,
            source: Some(source),
        }
    }

    /// Attach the query text and the byte offset the error points at.
    /// An already located error keeps its original position.
    pub fn at(mut self, query: &str, offset: Option<usize>) -> Self {
        if self.query.is_none() {
            self.query = Some(query.to_string());
        }
        if self.position.is_none()
            && let Some(offset) = offset
        {
            self.position = Some(Position::locate(query, offset));
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn line(&self) -> Option<usize> {
        self.position.map(|p| p.line)
    }

    pub fn column(&self) -> Option<usize> {
        self.position.map(|p| p.column)
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

impl fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        let Some(position) = self.position else {
            return Ok(());
        };
        write!(f, " (line {}, column {})", position.line, position.column)?;
        if let Some(query) = &self.query
            && let Some(text) = query.lines().nth(position.line - 1)
        {
            let pad: String = text
                .chars()
                .take(position.column - 1)
                .map(|c| if c == '\t' { '\t' } else { ' ' })
                .collect();
            write!(f, "\n    {text}\n    {pad}^")?;
        }
        Ok(())
    }
}

impl std::error::Error for QueryParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Failures reported by a [`crate::QueryTypeResolver`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("No property '{property}' on type {type_name}")]
    UnknownProperty { type_name: String, property: String },

    #[error("Cannot access property '{property}' on non-resource type {type_name}")]
    NotAResource { type_name: String, property: String },

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_counts_lines_and_columns() {
        let p = Position::locate("a eq 1\nand foo", 11);
        assert_eq!((p.line, p.column), (2, 5));
        let p = Position::locate("abc", 99);
        assert_eq!((p.offset, p.line, p.column), (3, 1, 4));
    }

    #[test]
    fn display_renders_caret_under_position() {
        let err = QueryParseError::resolution("No property 'nme' on type Pet").at("nme eq 'x'", Some(0));
        let rendered = err.to_string();
        assert!(rendered.contains("line 1, column 1"));
        assert!(rendered.ends_with("    nme eq 'x'\n    ^"));
    }

    #[test]
    fn first_position_wins() {
        let err = QueryParseError::syntax("bad")
            .at("abc def", Some(4))
            .at("abc def", Some(0));
        assert_eq!(err.column(), Some(5));
    }

    #[test]
    fn unexpected_keeps_source() {
        use std::error::Error as _;
        let err = QueryParseError::unexpected(ResolveError::Other("backend down".into()));
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.message().starts_with("Unexpected parse error"));
        assert!(err.source().is_some());
    }
}
