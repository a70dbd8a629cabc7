//! Embedded interpreter for a small Ruby subset.
//!
//! The crate exposes the narrow host ABI a binding layer needs:
//! - opening and closing a [`State`] with persistent [`CompileContext`]s
//! - defining classes and native methods ([`State::define_class`], [`State::define_method`])
//! - extracting positional arguments by format string ([`State::get_args`])
//! - tagging data objects with a [`DataType`] and a host payload
//! - calling methods from the host ([`State::funcall`]) with a single pending
//!   exception slot
//!
//! Scripts support classes with instance variables, methods, `if`/`while`,
//! `begin`/`rescue`/`ensure`, string interpolation and array/hash literals.

// Front end
mod ast;
mod lexer;
mod parser;
mod stack;

// Runtime
mod eval;
pub mod builtins;

mod args;
pub use args::{ArgFormat, ArgSlot, ArgSlots, ArgWire};

mod class;
pub use class::{Aspec, ClassFlags, ClassRef, InstanceTT, Method, NativeFn, RClass};

mod context;
pub use context::CompileContext;

mod error;
pub use error::VmError;

mod state;
pub use state::{DEFAULT_MAX_CALL_DEPTH, ExcKind, State, VmOptions};

mod symbol;
pub use symbol::{Sym, SymbolTable};

mod value;
pub use value::{DataFree, DataType, HashKey, IvarTable, RData, RHash, RObject, Value};

pub use builtins::Builtins;
