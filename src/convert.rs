//! Conversion between host values and interpreter values.
//!
//! Every host type that can cross the boundary has a descriptor, expressed as
//! impls of [`FromScript`] (interpreter to host) and [`ToScript`] (host to
//! interpreter). An incoming argument first arrives in its wire shape
//! ([`FromScript::Wire`]) as filled in by the argument-extraction primitive,
//! then [`FromScript::expand`] performs the last step into the host type.
//!
//! | host type                     | code | wire     |
//! |-------------------------------|------|----------|
//! | `i8`..`i64`, `u8`..`u64`, `isize`, `usize` | `i` | `i64` |
//! | `f32`, `f64`                  | `f`  | `f64`    |
//! | `bool`                        | `b`  | `bool`   |
//! | `String`                      | `z`  | `String` |
//! | [`Sym`]                       | `n`  | `Sym`    |
//! | [`Value`], [`Obj<T>`], `()`   | `o`  | `Value`  |
//!
//! A type without a descriptor cannot be used as an argument or return type;
//! the mistake is reported by the compiler:
//!
//! ```compile_fail,E0277
//! use std::collections::HashMap;
//!
//! use rbind::Session;
//!
//! let session = Session::new();
//! session.define_function("lookup", |table: HashMap<String, i64>| table.len() as i64);
//! ```
//!
//! ```compile_fail,E0277
//! use rbind::Session;
//!
//! let session = Session::new();
//! let _: Option<Vec<i64>> = session.call("numbers", ());
//! ```

use std::any::type_name;
use std::cell::{Ref, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use rbind_vm::{ArgFormat, ArgWire, ExcKind, RData, State, Sym, Value};

use crate::class::ClassRegistry;

/// Interpreter-to-host conversion.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be converted from an interpreter value",
    label = "no `FromScript` descriptor",
    note = "arguments and return values are limited to integers, floats, `bool`, `String`, `Sym`, `Value`, `Obj<T>` and `()`"
)]
pub trait FromScript: Sized {
    /// Shape the value has right after argument extraction.
    type Wire: ArgWire;

    /// Format code contributed to a format string.
    const FORMAT: ArgFormat = <Self::Wire as ArgWire>::FORMAT;

    /// Finish converting an extracted wire value. Raises and returns `None`
    /// when the value does not fit.
    fn expand(state: &mut State, wire: Self::Wire) -> Option<Self>;

    /// Convert an arbitrary boxed value, as a call's return value for
    /// instance.
    fn from_value(state: &mut State, value: &Value) -> Option<Self> {
        let slot = state.convert_arg(Self::FORMAT, value)?;
        let wire = Self::Wire::from_slot(slot)?;
        Self::expand(state, wire)
    }
}

/// Host-to-interpreter conversion.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be converted into an interpreter value",
    label = "no `ToScript` descriptor"
)]
pub trait ToScript {
    fn to_value(self, state: &mut State) -> Value;
}

fn out_of_range(state: &mut State, value: impl fmt::Display, target: &str) {
    state.raise(
        ExcKind::Range,
        format!("integer {value} too big to convert to '{target}'"),
    );
}

macro_rules! impl_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromScript for $ty {
                type Wire = i64;

                fn expand(state: &mut State, wire: i64) -> Option<Self> {
                    match <$ty>::try_from(wire) {
                        Ok(v) => Some(v),
                        Err(_) => {
                            out_of_range(state, wire, stringify!($ty));
                            None
                        }
                    }
                }
            }

            impl ToScript for $ty {
                fn to_value(self, state: &mut State) -> Value {
                    match i64::try_from(self) {
                        Ok(v) => Value::Int(v),
                        Err(_) => {
                            out_of_range(state, self, "Integer");
                            Value::Nil
                        }
                    }
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromScript for f64 {
    type Wire = f64;

    fn expand(_: &mut State, wire: f64) -> Option<Self> {
        Some(wire)
    }
}

impl ToScript for f64 {
    fn to_value(self, _: &mut State) -> Value {
        Value::Float(self)
    }
}

impl FromScript for f32 {
    type Wire = f64;

    fn expand(_: &mut State, wire: f64) -> Option<Self> {
        Some(wire as f32)
    }
}

impl ToScript for f32 {
    fn to_value(self, _: &mut State) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromScript for bool {
    type Wire = bool;

    fn expand(_: &mut State, wire: bool) -> Option<Self> {
        Some(wire)
    }
}

impl ToScript for bool {
    fn to_value(self, _: &mut State) -> Value {
        Value::Bool(self)
    }
}

impl FromScript for String {
    type Wire = String;

    fn expand(_: &mut State, wire: String) -> Option<Self> {
        Some(wire)
    }
}

impl ToScript for String {
    fn to_value(self, state: &mut State) -> Value {
        state.str_new(&self)
    }
}

impl ToScript for &str {
    fn to_value(self, state: &mut State) -> Value {
        state.str_new(self)
    }
}

impl FromScript for Sym {
    type Wire = Sym;

    fn expand(_: &mut State, wire: Sym) -> Option<Self> {
        Some(wire)
    }
}

impl ToScript for Sym {
    fn to_value(self, _: &mut State) -> Value {
        Value::Symbol(self)
    }
}

impl FromScript for Value {
    type Wire = Value;

    fn expand(_: &mut State, wire: Value) -> Option<Self> {
        Some(wire)
    }
}

impl ToScript for Value {
    fn to_value(self, _: &mut State) -> Value {
        self
    }
}

impl FromScript for () {
    type Wire = Value;

    fn expand(_: &mut State, _: Value) -> Option<Self> {
        Some(())
    }
}

impl ToScript for () {
    fn to_value(self, _: &mut State) -> Value {
        Value::Nil
    }
}

impl<T: ToScript> ToScript for Option<T> {
    fn to_value(self, state: &mut State) -> Value {
        match self {
            Some(v) => v.to_value(state),
            None => Value::Nil,
        }
    }
}

/// A nullable handle to a host object owned by the interpreter.
///
/// Cloning aliases the same object. The payload is dropped through the class
/// binding's destructor thunk once the last interpreter reference is gone.
pub struct Obj<T> {
    data: Option<Rc<RData>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> Obj<T> {
    /// The null handle.
    pub fn null() -> Self {
        Self {
            data: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_data(data: Rc<RData>) -> Self {
        Self {
            data: Some(data),
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    /// Shared access to the host object. `None` when null, uninitialized, or
    /// mutably borrowed elsewhere.
    pub fn get(&self) -> Option<Ref<'_, T>> {
        self.data.as_ref()?.payload::<T>()
    }

    pub fn get_mut(&self) -> Option<RefMut<'_, T>> {
        self.data.as_ref()?.payload_mut::<T>()
    }

    /// Run `f` against the host object.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.get().map(|obj| f(&obj))
    }

    /// The boxed interpreter object, or `nil` for the null handle.
    pub fn value(&self) -> Value {
        match &self.data {
            Some(data) => Value::Data(Rc::clone(data)),
            None => Value::Nil,
        }
    }

    /// Whether both handles point at the same interpreter object.
    pub fn ptr_eq(&self, other: &Obj<T>) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "Obj<{}>({:p})", type_name::<T>(), Rc::as_ptr(data)),
            None => write!(f, "Obj<{}>(null)", type_name::<T>()),
        }
    }
}

impl<T: 'static> FromScript for Obj<T> {
    type Wire = Value;

    /// A value not carrying `T`'s tag, `nil` included, becomes the null
    /// handle. Method receivers go through the raising tag check instead.
    fn expand(state: &mut State, wire: Value) -> Option<Self> {
        let data = ClassRegistry::lookup::<T>(state)
            .and_then(|entry| state.data_get(&wire, &entry.data_type));
        Some(data.map_or_else(Obj::null, Obj::from_data))
    }
}

impl<T: 'static> ToScript for Obj<T> {
    /// Aliases the existing object. A null handle boxes to an empty object
    /// still tagged with `T`'s class, or `nil` when `T` has no binding.
    fn to_value(self, state: &mut State) -> Value {
        if let Some(data) = self.data {
            return Value::Data(data);
        }
        match ClassRegistry::lookup::<T>(state) {
            Some(entry) => {
                state.data_object_alloc(&entry.class, Some(Rc::clone(&entry.data_type)), None)
            }
            None => Value::Nil,
        }
    }
}
