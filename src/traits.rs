use crate::model::CodeUnit;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported language for file: {0}")]
    UnsupportedLanguage(String),
    #[error("Failed to parse content: {0}")]
    InvalidContent(String),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Symbol extraction collaborator.
#[async_trait]
pub trait Parser: Send + Sync {
    /// Fills `unit.symbols`. Failure leaves the unit without symbol data;
    /// the unit is still stored.
    async fn parse(&self, unit: &mut CodeUnit) -> Result<(), ParseError>;
}

/// Terminal consumer of built code units. Duplicate submissions (e.g. a
/// repository harvested twice) must be tolerated by the implementation.
#[async_trait]
pub trait Database: Send + Sync {
    async fn insert(&self, unit: CodeUnit) -> Result<(), DatabaseError>;
}

/// Parser used when no symbol extraction backend is wired in.
pub struct NullParser;

#[async_trait]
impl Parser for NullParser {
    async fn parse(&self, unit: &mut CodeUnit) -> Result<(), ParseError> {
        Err(ParseError::UnsupportedLanguage(unit.file_path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_parser_reports_unsupported() {
        let mut unit = CodeUnit {
            display_name: "o/r: a.py".to_string(),
            source_text: "x = 1\n".to_string(),
            file_path: "a.py".to_string(),
            authors: vec![],
            canonical_url: None,
            time_created: Default::default(),
            time_last_modified: Default::default(),
            rank: 0.5,
            symbols: Default::default(),
        };

        let err = NullParser.parse(&mut unit).await.unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedLanguage(path) if path == "a.py"));
        assert!(unit.symbols.is_empty());
    }
}
