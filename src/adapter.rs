//! Fixed-arity call adapters.
//!
//! Interpreter thunks are called with `(state, self)` only. The traits here
//! recover the rest: [`FromArgs`] builds one format string for a tuple of
//! argument types, extracts every argument with a single
//! [`State::get_args`] call and expands each slot; [`HostMethod`],
//! [`HostMethodRef`] and [`HostFn`] then call a plain host function with the
//! receiver first.
//!
//! Tuples of up to six elements are supported.

use rbind_vm::{ArgWire, Aspec, State, Value};

use crate::convert::{FromScript, ToScript};

/// A tuple of argument types that can be extracted from a call frame.
pub trait FromArgs: Sized {
    /// Number of positional arguments.
    const ARITY: usize;

    /// The combined format string, in declaration order.
    fn format_string() -> String;

    /// Extract and expand the current call's arguments. Either every
    /// argument converts or an exception is raised and `None` returned.
    fn extract(state: &mut State) -> Option<Self>;

    /// Arity declared to the interpreter.
    fn aspec() -> Aspec {
        Aspec::exactly(Self::ARITY)
    }
}

/// A tuple of host values that can be boxed as call arguments.
pub trait ToArgs {
    fn to_values(self, state: &mut State) -> Vec<Value>;
}

/// A host function backing an interpreter method on `T`: `Fn(&mut T, A...) -> R`.
pub trait HostMethod<T, Args, R>: 'static {
    fn call_method(&self, receiver: &mut T, args: Args) -> R;
}

/// A host function backing a read-only interpreter method on `T`:
/// `Fn(&T, A...) -> R`. The receiver may also appear among the arguments.
pub trait HostMethodRef<T, Args, R>: 'static {
    fn call_method_ref(&self, receiver: &T, args: Args) -> R;
}

/// A host function without a receiver: `Fn(A...) -> R`. Also used for
/// constructors, where `R` is the constructed type.
pub trait HostFn<Args, R>: 'static {
    fn call_fn(&self, args: Args) -> R;
}

/// Format string for an argument tuple, e.g. `"iz"` for `(i32, String)`.
pub fn format_string<Args: FromArgs>() -> String {
    Args::format_string()
}

macro_rules! impl_arity {
    ($n:expr; $($A:ident $a:ident),*) => {
        impl<$($A: FromScript,)*> FromArgs for ($($A,)*) {
            const ARITY: usize = $n;

            #[allow(unused_mut)]
            fn format_string() -> String {
                let mut format = String::with_capacity($n);
                $(format.push(<$A as FromScript>::FORMAT.as_char());)*
                format
            }

            #[allow(unused_variables, unused_mut)]
            fn extract(state: &mut State) -> Option<Self> {
                let format = Self::format_string();
                let mut slots = state.get_args(&format)?.into_iter();
                Some(($(
                    {
                        let wire = <$A::Wire as ArgWire>::from_slot(slots.next()?)?;
                        $A::expand(state, wire)?
                    },
                )*))
            }
        }

        impl<$($A: ToScript,)*> ToArgs for ($($A,)*) {
            #[allow(unused_variables)]
            fn to_values(self, state: &mut State) -> Vec<Value> {
                let ($($a,)*) = self;
                vec![$($a.to_value(state)),*]
            }
        }

        impl<F, T, R, $($A,)*> HostMethod<T, ($($A,)*), R> for F
        where
            F: Fn(&mut T, $($A),*) -> R + 'static,
        {
            fn call_method(&self, receiver: &mut T, args: ($($A,)*)) -> R {
                let ($($a,)*) = args;
                self(receiver, $($a),*)
            }
        }

        impl<F, T, R, $($A,)*> HostMethodRef<T, ($($A,)*), R> for F
        where
            F: Fn(&T, $($A),*) -> R + 'static,
        {
            fn call_method_ref(&self, receiver: &T, args: ($($A,)*)) -> R {
                let ($($a,)*) = args;
                self(receiver, $($a),*)
            }
        }

        impl<F, R, $($A,)*> HostFn<($($A,)*), R> for F
        where
            F: Fn($($A),*) -> R + 'static,
        {
            fn call_fn(&self, args: ($($A,)*)) -> R {
                let ($($a,)*) = args;
                self($($a),*)
            }
        }
    };
}

impl_arity!(0;);
impl_arity!(1; A1 a1);
impl_arity!(2; A1 a1, A2 a2);
impl_arity!(3; A1 a1, A2 a2, A3 a3);
impl_arity!(4; A1 a1, A2 a2, A3 a3, A4 a4);
impl_arity!(5; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_arity!(6; A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Obj;
    use rbind_vm::{Sym, VmOptions};

    #[test]
    fn format_strings_follow_declaration_order() {
        assert_eq!(format_string::<()>(), "");
        assert_eq!(format_string::<(i32, String)>(), "iz");
        assert_eq!(format_string::<(bool, Sym, Value)>(), "bno");
        assert_eq!(format_string::<(f64, Obj<String>, u8, i64, String, bool)>(), "foiizb");
    }

    #[test]
    fn aspec_matches_arity() {
        assert_eq!(<() as FromArgs>::aspec(), Aspec::None);
        assert_eq!(<(i32, i32) as FromArgs>::aspec(), Aspec::Req(2));
    }

    #[test]
    fn host_functions_receive_arguments_in_order() {
        let join = |a: String, b: i32, c: bool| format!("{a}{b}{c}");
        assert_eq!(join.call_fn(("x".to_string(), 4, true)), "x4true");

        let mut total = 10;
        let add = |acc: &mut i32, v: i32| {
            *acc += v;
            *acc
        };
        assert_eq!(add.call_method(&mut total, (5,)), 15);
        assert_eq!(total, 15);
    }

    #[test]
    fn to_args_boxes_each_element() {
        let mut state = State::open(VmOptions {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        });
        let values = (1i32, "two", 3.5f64).to_values(&mut state);
        assert_eq!(values.len(), 3);
        assert_eq!(values[0].as_int(), Some(1));
        assert_eq!(values[1].as_str().as_deref().map(String::as_str), Some("two"));
        assert_eq!(values[2].as_float(), Some(3.5));
        assert!(().to_values(&mut state).is_empty());
    }
}
