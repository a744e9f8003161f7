use std::io::Error as IoError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: IoError,
    },

    #[error("Unrecognized line - '{0}'")]
    UnrecognizedLine(String),

    #[error("Unknown test-type '{test_type}' in input '{input}'")]
    UnknownTestType { test_type: String, input: String },

    #[error("Unsupported argument '{name}' for test-type '{test_type}'")]
    UnknownArgument { name: String, test_type: String },

    #[error("Invalid value '{value}' for argument '{name}' of test-type '{test_type}'")]
    InvalidArgument { name: String, value: String, test_type: String },

    #[error("Redeclaring an existing macro - '{0}'")]
    DuplicateMacro(String),

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ParseError>,
    },

    #[error("invalid job payload: {0}")]
    InvalidJob(String),
}
