//! Positional argument extraction.
//!
//! Native thunks describe their expected arguments with a format string of
//! single-character codes. [`State::get_args`](crate::State::get_args) checks
//! the count, converts every argument into an [`ArgSlot`], and either fills
//! all slots or raises for the whole call.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;

use crate::symbol::Sym;
use crate::value::Value;

/// A single format code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ArgFormat {
    /// Integer. Floats are truncated toward zero.
    Int = b'i',
    /// Boolean by truthiness; never fails.
    Bool = b'b',
    /// String, copied out of the interpreter.
    Str = b'z',
    /// Symbol. Strings are interned.
    Sym = b'n',
    /// Any value, unconverted.
    Value = b'o',
    /// Float. Integers widen.
    Float = b'f',
}

impl ArgFormat {
    /// The format character.
    pub fn as_char(self) -> char {
        char::from(u8::from(self))
    }

    /// Name used in conversion error messages.
    pub fn target_name(self) -> &'static str {
        match self {
            ArgFormat::Int => "Integer",
            ArgFormat::Bool => "Boolean",
            ArgFormat::Str => "String",
            ArgFormat::Sym => "Symbol",
            ArgFormat::Value => "Object",
            ArgFormat::Float => "Float",
        }
    }
}

impl TryFrom<char> for ArgFormat {
    type Error = char;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        u8::try_from(c)
            .ok()
            .and_then(|b| ArgFormat::try_from(b).ok())
            .ok_or(c)
    }
}

/// Storage for one extracted argument.
#[derive(Clone, Debug)]
pub enum ArgSlot {
    Int(i64),
    Bool(bool),
    Str(String),
    Sym(Sym),
    Value(Value),
    Float(f64),
}

/// The filled slots of one extraction, in declaration order.
pub type ArgSlots = SmallVec<[ArgSlot; 6]>;

/// A host type that an [`ArgSlot`] can be moved into.
///
/// This is the "wire" representation: the shape an argument has right after
/// extraction, before any binding-level expansion.
pub trait ArgWire: Sized {
    /// The code that produces this wire type.
    const FORMAT: ArgFormat;

    fn from_slot(slot: ArgSlot) -> Option<Self>;
}

impl ArgWire for i64 {
    const FORMAT: ArgFormat = ArgFormat::Int;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl ArgWire for bool {
    const FORMAT: ArgFormat = ArgFormat::Bool;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl ArgWire for String {
    const FORMAT: ArgFormat = ArgFormat::Str;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl ArgWire for Sym {
    const FORMAT: ArgFormat = ArgFormat::Sym;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Sym(v) => Some(v),
            _ => None,
        }
    }
}

impl ArgWire for Value {
    const FORMAT: ArgFormat = ArgFormat::Value;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl ArgWire for f64 {
    const FORMAT: ArgFormat = ArgFormat::Float;

    fn from_slot(slot: ArgSlot) -> Option<Self> {
        match slot {
            ArgSlot::Float(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_u8() {
        for code in [
            ArgFormat::Int,
            ArgFormat::Bool,
            ArgFormat::Str,
            ArgFormat::Sym,
            ArgFormat::Value,
            ArgFormat::Float,
        ] {
            assert_eq!(ArgFormat::try_from(code.as_char()), Ok(code));
        }
        assert_eq!(ArgFormat::Int.as_char(), 'i');
        assert_eq!(ArgFormat::Str.as_char(), 'z');
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(ArgFormat::try_from('q'), Err('q'));
        assert_eq!(ArgFormat::try_from('é'), Err('é'));
    }

    #[test]
    fn wire_types_take_only_their_slot() {
        assert_eq!(i64::from_slot(ArgSlot::Int(4)), Some(4));
        assert_eq!(i64::from_slot(ArgSlot::Bool(true)), None);
        assert_eq!(String::from_slot(ArgSlot::Str("x".into())), Some("x".to_string()));
    }
}
