//! Classes and method tables.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::ast::ScriptMethod;
use crate::state::State;
use crate::symbol::Sym;
use crate::value::Value;

/// Shared handle to a class.
pub type ClassRef = Rc<RClass>;

/// A native method thunk. Called with the state and the receiver; arguments
/// are read through [`State::get_args`] or [`State::args`].
pub type NativeFn = Rc<dyn Fn(&mut State, Value) -> Value>;

/// Declared arity of a native method, checked before the thunk runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aspec {
    /// Exactly zero arguments.
    None,
    /// Exactly `n` arguments.
    Req(usize),
    /// Any number; the thunk validates its own arguments.
    Any,
}

impl Aspec {
    /// `Req(n)` for a nonzero count, `None` otherwise.
    pub fn exactly(n: usize) -> Self {
        if n == 0 { Aspec::None } else { Aspec::Req(n) }
    }

    pub fn accepts(self, given: usize) -> bool {
        match self {
            Aspec::None => given == 0,
            Aspec::Req(n) => given == n,
            Aspec::Any => true,
        }
    }

    pub fn expected(self) -> Option<usize> {
        match self {
            Aspec::None => Some(0),
            Aspec::Req(n) => Some(n),
            Aspec::Any => None,
        }
    }
}

bitflags! {
    /// Per-class behavior flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClassFlags: u8 {
        /// Instances are opaque-data objects carrying a host payload.
        const DATA_INSTANCES = 1 << 0;
        /// Defined by the interpreter itself rather than by script or host.
        const BUILTIN = 1 << 1;
        /// Instances are values of a builtin representation (String, Array, ...)
        /// and cannot be allocated through `Class#new`'s generic path.
        const SPECIAL_ALLOC = 1 << 2;
    }
}

/// Instance representation for a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceTT {
    Object,
    Data,
}

/// A method table entry.
#[derive(Clone)]
pub enum Method {
    Native { func: NativeFn, aspec: Aspec },
    Script(Rc<ScriptMethod>),
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Native { aspec, .. } => write!(f, "Native({aspec:?})"),
            Method::Script(m) => write!(f, "Script({:?})", m.name),
        }
    }
}

/// An interpreter class.
pub struct RClass {
    name: Rc<str>,
    superclass: Option<ClassRef>,
    flags: Cell<ClassFlags>,
    methods: RefCell<FxHashMap<Sym, Method>>,
}

impl RClass {
    /// Create a class without a superclass (only `Object` in practice).
    pub fn new_root(name: &str) -> ClassRef {
        Rc::new(Self {
            name: Rc::from(name),
            superclass: None,
            flags: Cell::new(ClassFlags::empty()),
            methods: RefCell::new(FxHashMap::default()),
        })
    }

    /// Create a subclass. Instance representation flags are inherited.
    pub fn new_subclass(name: &str, superclass: &ClassRef) -> ClassRef {
        let inherited = superclass.flags() & (ClassFlags::DATA_INSTANCES | ClassFlags::SPECIAL_ALLOC);
        Rc::new(Self {
            name: Rc::from(name),
            superclass: Some(Rc::clone(superclass)),
            flags: Cell::new(inherited),
            methods: RefCell::new(FxHashMap::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<&ClassRef> {
        self.superclass.as_ref()
    }

    pub fn flags(&self) -> ClassFlags {
        self.flags.get()
    }

    pub fn insert_flags(&self, flags: ClassFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    /// Mark how instances of this class are represented.
    pub fn set_instance_tt(&self, tt: InstanceTT) {
        let mut flags = self.flags.get();
        flags.set(ClassFlags::DATA_INSTANCES, tt == InstanceTT::Data);
        self.flags.set(flags);
    }

    pub fn instance_tt(&self) -> InstanceTT {
        if self.flags().contains(ClassFlags::DATA_INSTANCES) {
            InstanceTT::Data
        } else {
            InstanceTT::Object
        }
    }

    pub fn define(&self, name: Sym, method: Method) {
        self.methods.borrow_mut().insert(name, method);
    }

    /// Look a method up along the superclass chain.
    pub fn find_method(self: &Rc<Self>, name: Sym) -> Option<Method> {
        let mut class = Some(self);
        while let Some(c) = class {
            if let Some(m) = c.methods.borrow().get(&name) {
                return Some(m.clone());
            }
            class = c.superclass.as_ref();
        }
        None
    }

    /// Whether `self` is `other` or inherits from it.
    pub fn is_subclass_of(self: &Rc<Self>, other: &ClassRef) -> bool {
        let mut class = Some(self);
        while let Some(c) = class {
            if Rc::ptr_eq(c, other) {
                return true;
            }
            class = c.superclass.as_ref();
        }
        false
    }

    pub(crate) fn clear_methods(&self) {
        self.methods.borrow_mut().clear();
    }
}

impl fmt::Debug for RClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RClass")
            .field("name", &self.name)
            .field("flags", &self.flags.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspec_exactly() {
        assert_eq!(Aspec::exactly(0), Aspec::None);
        assert_eq!(Aspec::exactly(2), Aspec::Req(2));
        assert!(Aspec::Req(2).accepts(2));
        assert!(!Aspec::Req(2).accepts(1));
        assert!(!Aspec::None.accepts(1));
        assert!(Aspec::Any.accepts(7));
    }

    #[test]
    fn subclass_inherits_data_flag() {
        let object = RClass::new_root("Object");
        let base = RClass::new_subclass("Person", &object);
        base.set_instance_tt(InstanceTT::Data);
        let derived = RClass::new_subclass("Student", &base);
        assert_eq!(derived.instance_tt(), InstanceTT::Data);
        assert!(derived.is_subclass_of(&object));
        assert!(!object.is_subclass_of(&derived));
    }
}
