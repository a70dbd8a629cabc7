//! Errors produced while turning source text into a program.
//!
//! These never reach the host directly: the `load_*` entry points convert
//! them into interpreter exceptions (`SyntaxError`, `IOError`) stored in the
//! state's exception slot.

use thiserror::Error;

/// Lexing, parsing and source loading failures.
#[derive(Debug, Error)]
pub enum VmError {
    /// The source text is not a valid program.
    #[error("line {line}: {message}")]
    Syntax { line: u32, message: String },

    /// The source file could not be read.
    #[error("cannot load file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VmError {
    /// The line an error was reported on, if it has one.
    pub fn line(&self) -> Option<u32> {
        match self {
            VmError::Syntax { line, .. } => Some(*line),
            VmError::Io { .. } => None,
        }
    }

    /// Message without the location prefix.
    pub fn message(&self) -> String {
        match self {
            VmError::Syntax { message, .. } => message.clone(),
            io @ VmError::Io { .. } => io.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_display_carries_line() {
        let err = VmError::Syntax {
            line: 4,
            message: "unexpected 'end'".into(),
        };
        assert_eq!(err.to_string(), "line 4: unexpected 'end'");
        assert_eq!(err.line(), Some(4));
        assert_eq!(err.message(), "unexpected 'end'");
    }

    #[test]
    fn io_display_names_path() {
        let err = VmError::Io {
            path: "missing.rb".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().starts_with("cannot load file 'missing.rb'"));
        assert_eq!(err.line(), None);
    }
}
