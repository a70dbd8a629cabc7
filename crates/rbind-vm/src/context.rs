//! Compilation context: top-level locals and source naming that persist
//! across successive loads into the same state.

use rustc_hash::FxHashMap;

use crate::state::State;
use crate::symbol::Sym;
use crate::value::Value;

/// Persistent top-level scope for `load_*_cxt`.
///
/// A context holds values but no reference to its [`State`]; it must still be
/// dropped before the state it was created for, since the values it keeps
/// belong to that interpreter.
#[derive(Debug, Default)]
pub struct CompileContext {
    pub(crate) locals: FxHashMap<Sym, Value>,
    filename: Option<String>,
}

impl CompileContext {
    pub fn new(state: &mut State) -> Self {
        tracing::debug!("compile context created");
        Self {
            locals: FxHashMap::default(),
            filename: state.options().filename.clone(),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    /// Current value of a top-level local.
    pub fn local(&self, sym: Sym) -> Option<&Value> {
        self.locals.get(&sym)
    }

    /// Number of top-level locals defined so far.
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }
}

impl Drop for CompileContext {
    fn drop(&mut self) {
        tracing::debug!(locals = self.locals.len(), "compile context released");
    }
}
