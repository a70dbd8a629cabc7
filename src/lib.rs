//! Typed bindings between host code and an embedded Ruby interpreter.
//!
//! - [`convert`]: per-type conversion descriptors ([`FromScript`], [`ToScript`])
//! - [`adapter`]: fixed-arity argument extraction and receiver-first dispatch
//! - [`class`]: host types as interpreter classes ([`ClassBinding`], [`ClassDefiner`])
//! - [`session`]: the owning [`Session`], function handles and collection walks
//!
//! ```ignore
//! use rbind::prelude::*;
//!
//! struct Person {
//!     name: String,
//!     age: i32,
//! }
//!
//! let session = Session::new();
//! session
//!     .install_class::<Person>("Person", None)?
//!     .definer(&session)
//!     .constructor(|name: String, age: i32| Person { name, age })
//!     .method("greeting", |p: &mut Person| {
//!         format!("My name is {} and I am {} years old.", p.name, p.age)
//!     });
//!
//! let greeting = session.load_string("Person.new('bob', 35).greeting");
//! assert_eq!(session.to_string(&greeting), "My name is bob and I am 35 years old.");
//! ```

pub mod adapter;
pub mod class;
pub mod convert;
pub mod error;
pub mod function;
pub mod session;

pub use adapter::{FromArgs, HostFn, HostMethod, HostMethodRef, ToArgs, format_string};
pub use class::{ClassBinding, ClassDefiner};
pub use convert::{FromScript, Obj, ToScript};
pub use error::{RegistrationError, ScriptError};
pub use function::FunctionHandle;
pub use session::{Session, SessionBuilder};

pub use rbind_vm::{self as vm, ClassRef, State, Sym, Value, VmOptions};

pub mod prelude {
    pub use crate::adapter::{FromArgs, ToArgs, format_string};
    pub use crate::class::{ClassBinding, ClassDefiner};
    pub use crate::convert::{FromScript, Obj, ToScript};
    pub use crate::error::{RegistrationError, ScriptError};
    pub use crate::function::FunctionHandle;
    pub use crate::session::{Session, SessionBuilder};
    pub use rbind_vm::{Sym, Value};
}
