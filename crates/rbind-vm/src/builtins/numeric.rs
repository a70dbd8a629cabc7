//! `Integer` and `Float`.

use std::cmp::Ordering;
use std::rc::Rc;

use ordered_float::OrderedFloat;

use crate::class::Aspec;
use crate::state::{ExcKind, State};
use crate::value::Value;

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Int(v) => Some(Num::Int(*v)),
            Value::Float(v) => Some(Num::Float(*v)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

pub(super) fn init(state: &mut State) {
    for class in [Rc::clone(&state.builtins.integer), Rc::clone(&state.builtins.float)] {
        let c = &class;
        state.def_builtin(c, "+", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Add));
        state.def_builtin(c, "-", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Sub));
        state.def_builtin(c, "*", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Mul));
        state.def_builtin(c, "/", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Div));
        state.def_builtin(c, "%", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Rem));
        state.def_builtin(c, "**", Aspec::Req(1), |st, recv, args| arith(st, recv, &args[0], Op::Pow));
        state.def_builtin(c, "<=>", Aspec::Req(1), |_, recv, args| match compare(recv, &args[0]) {
            Some(ordering) => Value::Int(ordering as i64),
            None => Value::Nil,
        });
        state.def_builtin(c, "==", Aspec::Req(1), |_, recv, args| {
            Value::Bool(compare(recv, &args[0]) == Some(Ordering::Equal))
        });
        state.def_builtin(c, "<", Aspec::Req(1), |st, recv, args| relate(st, recv, &args[0], Ordering::is_lt));
        state.def_builtin(c, "<=", Aspec::Req(1), |st, recv, args| relate(st, recv, &args[0], Ordering::is_le));
        state.def_builtin(c, ">", Aspec::Req(1), |st, recv, args| relate(st, recv, &args[0], Ordering::is_gt));
        state.def_builtin(c, ">=", Aspec::Req(1), |st, recv, args| relate(st, recv, &args[0], Ordering::is_ge));
        state.def_builtin(c, "-@", Aspec::None, negate);
        state.def_builtin(c, "abs", Aspec::None, abs);
        state.def_builtin(c, "zero?", Aspec::None, |_, recv, _| {
            Value::Bool(Num::of(recv).is_some_and(|n| n.to_f64() == 0.0))
        });
        state.def_builtin(c, "to_f", Aspec::None, |_, recv, _| Value::Float(recv.as_float().unwrap_or_default()));
        state.def_builtin(c, "to_i", Aspec::None, to_i);
        state.def_builtin(c, "to_s", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
        state.def_builtin(c, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    }

    let integer = Rc::clone(&state.builtins.integer);
    state.def_builtin(&integer, "even?", Aspec::None, |_, recv, _| Value::Bool(recv.as_int().is_some_and(|v| v % 2 == 0)));
    state.def_builtin(&integer, "odd?", Aspec::None, |_, recv, _| Value::Bool(recv.as_int().is_some_and(|v| v % 2 != 0)));
    state.def_builtin(&integer, "succ", Aspec::None, |st, recv, _| {
        arith(st, recv, &Value::Int(1), Op::Add)
    });
    state.def_builtin(&integer, "pred", Aspec::None, |st, recv, _| {
        arith(st, recv, &Value::Int(1), Op::Sub)
    });
    state.def_builtin(&integer, "chr", Aspec::None, |st, recv, _| {
        let code = recv.as_int().unwrap_or_default();
        match u32::try_from(code).ok().and_then(char::from_u32) {
            Some(c) => Value::string(c.encode_utf8(&mut [0; 4])),
            None => {
                st.raise(ExcKind::Range, format!("{code} out of char range"));
                Value::Nil
            }
        }
    });

    let float = Rc::clone(&state.builtins.float);
    state.def_builtin(&float, "nan?", Aspec::None, |_, recv, _| Value::Bool(recv.as_float().is_some_and(f64::is_nan)));
    state.def_builtin(&float, "infinite?", Aspec::None, |_, recv, _| match recv.as_float() {
        Some(v) if v.is_infinite() => Value::Int(if v > 0.0 { 1 } else { -1 }),
        _ => Value::Nil,
    });
    state.def_builtin(&float, "round", Aspec::None, |st, recv, _| float_to_int(st, recv, f64::round));
    state.def_builtin(&float, "floor", Aspec::None, |st, recv, _| float_to_int(st, recv, f64::floor));
    state.def_builtin(&float, "ceil", Aspec::None, |st, recv, _| float_to_int(st, recv, f64::ceil));
}

/// Ruby's float formatting: always carries a fraction or an exponent.
pub(crate) fn format_float(v: f64) -> String {
    if v.is_nan() {
        return "NaN".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let formatted = format!("{v:e}");
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let mut out = v.to_string();
    if !out.contains('.') {
        out.push_str(".0");
    }
    out
}

fn coerce_error(state: &mut State, recv: &Value, other: &Value) -> Value {
    let from = state.describe_class(other);
    let into = state.class_of(recv).name().to_string();
    state.raise(ExcKind::Type, format!("{from} can't be coerced into {into}"));
    Value::Nil
}

fn arith(state: &mut State, recv: &Value, other: &Value, op: Op) -> Value {
    let (Some(lhs), Some(rhs)) = (Num::of(recv), Num::of(other)) else {
        return coerce_error(state, recv, other);
    };
    match (lhs, rhs) {
        (Num::Int(a), Num::Int(b)) => int_arith(state, a, b, op),
        (a, b) => Value::Float(float_arith(a.to_f64(), b.to_f64(), op)),
    }
}

fn int_arith(state: &mut State, a: i64, b: i64, op: Op) -> Value {
    if matches!(op, Op::Div | Op::Rem) && b == 0 {
        state.raise(ExcKind::ZeroDivision, "divided by 0");
        return Value::Nil;
    }
    let result = match op {
        Op::Add => a.checked_add(b),
        Op::Sub => a.checked_sub(b),
        Op::Mul => a.checked_mul(b),
        Op::Div => a.checked_div_euclid(b).map(|q| floor_div(a, b, q)),
        Op::Rem => a.checked_rem_euclid(b).map(|r| floor_rem(b, r)),
        Op::Pow if b < 0 => return Value::Float((a as f64).powf(b as f64)),
        Op::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
    };
    match result {
        Some(v) => Value::Int(v),
        None => {
            state.raise(ExcKind::Range, "integer overflow");
            Value::Nil
        }
    }
}

/// Euclidean quotient adjusted to round toward negative infinity.
fn floor_div(a: i64, b: i64, euclid: i64) -> i64 {
    if b < 0 && a.rem_euclid(b) != 0 { euclid - 1 } else { euclid }
}

/// Euclidean remainder adjusted to take the divisor's sign.
fn floor_rem(b: i64, euclid: i64) -> i64 {
    if b < 0 && euclid != 0 { euclid + b } else { euclid }
}

fn float_arith(a: f64, b: f64, op: Op) -> f64 {
    match op {
        Op::Add => a + b,
        Op::Sub => a - b,
        Op::Mul => a * b,
        Op::Div => a / b,
        Op::Rem => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        Op::Pow => a.powf(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (Num::of(a)?, Num::of(b)?) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (x, y) => {
            let (x, y) = (x.to_f64(), y.to_f64());
            if x.is_nan() || y.is_nan() {
                return None;
            }
            Some(OrderedFloat(x).cmp(&OrderedFloat(y)))
        }
    }
}

fn relate(state: &mut State, recv: &Value, other: &Value, test: fn(Ordering) -> bool) -> Value {
    if let Some(ordering) = compare(recv, other) {
        return Value::Bool(test(ordering));
    }
    if Num::of(other).is_some() {
        // NaN on either side
        return Value::Bool(false);
    }
    let lhs = state.class_of(recv).name().to_string();
    let rhs = state.describe_class(other);
    state.raise(ExcKind::Argument, format!("comparison of {lhs} with {rhs} failed"));
    Value::Nil
}

fn negate(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    match recv {
        Value::Int(v) => match v.checked_neg() {
            Some(v) => Value::Int(v),
            None => {
                state.raise(ExcKind::Range, "integer overflow");
                Value::Nil
            }
        },
        Value::Float(v) => Value::Float(-v),
        _ => Value::Nil,
    }
}

fn abs(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    match recv {
        Value::Int(v) if *v < 0 => negate(state, recv, &[]),
        Value::Float(v) => Value::Float(v.abs()),
        other => other.clone(),
    }
}

fn to_i(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    match recv {
        Value::Float(_) => float_to_int(state, recv, f64::trunc),
        other => other.clone(),
    }
}

fn float_to_int(state: &mut State, recv: &Value, round: fn(f64) -> f64) -> Value {
    let v = round(recv.as_float().unwrap_or_default());
    if v.is_nan() || v.is_infinite() || v >= i64::MAX as f64 || v < i64::MIN as f64 {
        let shown = format_float(v);
        state.raise(ExcKind::Range, format!("float {shown} out of range of integer"));
        return Value::Nil;
    }
    Value::Int(v as i64)
}

#[cfg(test)]
mod tests {
    use super::format_float;
    use crate::{State, Value, VmOptions};

    fn eval(src: &str) -> (State, Value) {
        let mut state = State::open(VmOptions {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        });
        let value = state.load_string(src);
        (state, value)
    }

    #[test]
    fn floats_format_like_ruby() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(-0.125), "-0.125");
        assert_eq!(format_float(1e20), "1.0e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
    }

    #[test]
    fn integer_division_floors() {
        assert_eq!(eval("-7 / 2").1.as_int(), Some(-4));
        assert_eq!(eval("7 / -2").1.as_int(), Some(-4));
        assert_eq!(eval("-7 % 3").1.as_int(), Some(2));
        assert_eq!(eval("7 % -3").1.as_int(), Some(-2));
        assert_eq!(eval("7 / 2").1.as_int(), Some(3));
    }

    #[test]
    fn mixed_arithmetic_widens() {
        assert_eq!(eval("1 + 2.5").1.as_float(), Some(3.5));
        assert_eq!(eval("2 ** 10").1.as_int(), Some(1024));
        assert_eq!(eval("7.5 % 2").1.as_float(), Some(1.5));
    }

    #[test]
    fn division_by_zero_raises() {
        let (state, _) = eval("1 / 0");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: divided by 0 (ZeroDivisionError)")
        );
        let (state, value) = eval("1.0 / 0");
        assert!(state.exc().is_none());
        assert_eq!(value.as_float(), Some(f64::INFINITY));
    }

    #[test]
    fn overflow_raises_range_error() {
        let (state, _) = eval("9223372036854775807 + 1");
        assert!(state.error_string().expect("error").ends_with("(RangeError)"));
    }

    #[test]
    fn comparisons() {
        assert!(eval("1 < 2.5").1.truthy());
        assert!(eval("3 == 3.0").1.truthy());
        assert_eq!(eval("2 <=> 1").1.as_int(), Some(1));
        assert!(eval("1 <=> 'a'").1.is_nil());
        let (state, _) = eval("1 < 'a'");
        assert!(state.error_string().expect("error").contains("comparison of Integer with String failed"));
    }

    #[test]
    fn coercion_failure() {
        let (state, _) = eval("1 + nil");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: nil can't be coerced into Integer (TypeError)")
        );
    }

    #[test]
    fn float_rounding() {
        assert_eq!(eval("2.5.round").1.as_int(), Some(3));
        assert_eq!(eval("(-2.5).floor").1.as_int(), Some(-3));
        assert_eq!(eval("2.1.ceil").1.as_int(), Some(3));
        assert_eq!(eval("3.9.to_i").1.as_int(), Some(3));
    }
}
