//! Interned symbols.
//!
//! Every identifier, method name and `:symbol` literal the interpreter sees is
//! interned once into a [`SymbolTable`] and afterwards handled as a 32-bit
//! [`Sym`]. Symbols are never freed for the lifetime of the owning state.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

/// An interned name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Sym(u32);

impl Sym {
    /// The empty symbol, interned first in every table.
    pub const EMPTY: Sym = Sym(0);

    /// Raw id of this symbol.
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sym({})", self.0)
    }
}

/// Bidirectional name <-> [`Sym`] table.
pub struct SymbolTable {
    names: Vec<Rc<str>>,
    ids: FxHashMap<Rc<str>, Sym>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self {
            names: Vec::with_capacity(256),
            ids: FxHashMap::default(),
        };
        let empty = table.intern("");
        debug_assert_eq!(empty, Sym::EMPTY);
        table
    }

    /// Intern `name`, returning the existing symbol when already present.
    pub fn intern(&mut self, name: &str) -> Sym {
        if let Some(sym) = self.ids.get(name) {
            return *sym;
        }
        let sym = Sym(self.names.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.names.push(Rc::clone(&name));
        self.ids.insert(name, sym);
        sym
    }

    /// Look up a symbol without interning.
    pub fn lookup(&self, name: &str) -> Option<Sym> {
        self.ids.get(name).copied()
    }

    /// Name of an interned symbol.
    ///
    /// Symbols from another table resolve to the empty name.
    pub fn name(&self, sym: Sym) -> Rc<str> {
        self.names
            .get(sym.0 as usize)
            .cloned()
            .unwrap_or_else(|| Rc::from(""))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_symbol_is_reserved() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup(""), Some(Sym::EMPTY));
        assert_eq!(&*table.name(Sym::EMPTY), "");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("greeting");
        let b = table.intern("greeting");
        let c = table.intern("age");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*table.name(c), "age");
    }

    #[test]
    fn multibyte_names_round_trip() {
        let mut table = SymbolTable::new();
        let sym = table.intern("名前");
        assert_eq!(&*table.name(sym), "名前");
    }
}
