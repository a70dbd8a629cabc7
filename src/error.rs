//! Host-side error types.
//!
//! Interpreter failures stay in the interpreter's exception slot; a
//! [`ScriptError`] is only produced when the host asks for one through
//! [`Session::take_error`](crate::Session::take_error) or
//! [`Session::check`](crate::Session::check).

use thiserror::Error;

/// Snapshot of a raised interpreter exception.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({class_name})")]
pub struct ScriptError {
    /// Class of the exception, e.g. `TypeError`.
    pub class_name: String,
    pub message: String,
    /// Source line the exception was raised on, when known.
    pub line: Option<u32>,
}

/// Errors from installing or looking up host class bindings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The host type already has a binding in this session.
    #[error("host type already registered as class '{name}'")]
    AlreadyRegistered { name: String },

    /// No binding was installed for the host type.
    #[error("host type '{type_name}' has no installed class binding")]
    NotRegistered { type_name: &'static str },
}
