//! `String` and `Symbol`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class::Aspec;
use crate::state::{ExcKind, State};
use crate::value::Value;

use super::{MAX_STRING_LEN, inspect_str};

pub(super) fn init(state: &mut State) {
    let string = Rc::clone(&state.builtins.string);
    let s = &string;
    state.def_builtin(s, "initialize", Aspec::Any, initialize);
    state.def_builtin(s, "+", Aspec::Req(1), plus);
    state.def_builtin(s, "*", Aspec::Req(1), times);
    state.def_builtin(s, "<<", Aspec::Req(1), append);
    state.def_builtin(s, "concat", Aspec::Req(1), append);
    state.def_builtin(s, "==", Aspec::Req(1), |_, recv, args| Value::Bool(recv.eql(&args[0])));
    state.def_builtin(s, "<=>", Aspec::Req(1), |_, recv, args| match (text(recv), args[0].as_str()) {
        (Some(a), Some(b)) => Value::Int(a.as_str().cmp(b.as_str()) as i64),
        _ => Value::Nil,
    });
    state.def_builtin(s, "<", Aspec::Req(1), |st, recv, args| compare(st, recv, &args[0], |o| o.is_lt()));
    state.def_builtin(s, ">", Aspec::Req(1), |st, recv, args| compare(st, recv, &args[0], |o| o.is_gt()));
    state.def_builtin(s, "size", Aspec::None, length);
    state.def_builtin(s, "length", Aspec::None, length);
    state.def_builtin(s, "empty?", Aspec::None, |_, recv, _| Value::Bool(text(recv).is_some_and(|t| t.is_empty())));
    state.def_builtin(s, "to_s", Aspec::None, |_, recv, _| recv.clone());
    state.def_builtin(s, "to_str", Aspec::None, |_, recv, _| recv.clone());
    state.def_builtin(s, "inspect", Aspec::None, |_, recv, _| Value::string(&inspect_str(&owned(recv))));
    state.def_builtin(s, "to_sym", Aspec::None, |st, recv, _| {
        let name = owned(recv);
        Value::Symbol(st.intern(&name))
    });
    state.def_builtin(s, "to_i", Aspec::None, |_, recv, _| Value::Int(leading_int(&owned(recv))));
    state.def_builtin(s, "to_f", Aspec::None, |_, recv, _| Value::Float(leading_float(&owned(recv))));
    state.def_builtin(s, "upcase", Aspec::None, |_, recv, _| Value::string(&owned(recv).to_uppercase()));
    state.def_builtin(s, "downcase", Aspec::None, |_, recv, _| Value::string(&owned(recv).to_lowercase()));
    state.def_builtin(s, "capitalize", Aspec::None, |_, recv, _| {
        let source = owned(recv);
        let mut chars = source.chars();
        let capitalized = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
            None => String::new(),
        };
        Value::string(&capitalized)
    });
    state.def_builtin(s, "reverse", Aspec::None, |_, recv, _| {
        Value::string(&owned(recv).chars().rev().collect::<String>())
    });
    state.def_builtin(s, "strip", Aspec::None, |_, recv, _| Value::string(owned(recv).trim()));
    state.def_builtin(s, "chars", Aspec::None, |_, recv, _| {
        let chars = owned(recv).chars().map(|c| Value::string(c.encode_utf8(&mut [0; 4]))).collect();
        Value::array(chars)
    });
    state.def_builtin(s, "split", Aspec::Any, split);
    state.def_builtin(s, "include?", Aspec::Req(1), |st, recv, args| {
        predicate(st, recv, &args[0], |hay, needle| hay.contains(needle))
    });
    state.def_builtin(s, "start_with?", Aspec::Req(1), |st, recv, args| {
        predicate(st, recv, &args[0], |hay, needle| hay.starts_with(needle))
    });
    state.def_builtin(s, "end_with?", Aspec::Req(1), |st, recv, args| {
        predicate(st, recv, &args[0], |hay, needle| hay.ends_with(needle))
    });
    state.def_builtin(s, "[]", Aspec::Any, index);

    let symbol = Rc::clone(&state.builtins.symbol);
    let y = &symbol;
    state.def_builtin(y, "to_s", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    state.def_builtin(y, "id2name", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    state.def_builtin(y, "to_sym", Aspec::None, |_, recv, _| recv.clone());
    state.def_builtin(y, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_inspect(recv)));
    state.def_builtin(y, "==", Aspec::Req(1), |_, recv, args| Value::Bool(recv.eql(&args[0])));
    state.def_builtin(y, "size", Aspec::None, |st, recv, _| {
        let len = st.format_to_s(recv).chars().count();
        Value::Int(len as i64)
    });
    state.def_builtin(y, "length", Aspec::None, |st, recv, _| {
        let len = st.format_to_s(recv).chars().count();
        Value::Int(len as i64)
    });
}

fn text(value: &Value) -> Option<std::cell::Ref<'_, String>> {
    value.as_str()
}

fn owned(value: &Value) -> String {
    value.as_str().map(|s| s.clone()).unwrap_or_default()
}

/// The string behind a `String` argument; raises `TypeError` otherwise.
fn string_arg(state: &mut State, value: &Value) -> Option<String> {
    match value.as_str() {
        Some(s) => Some(s.clone()),
        None => {
            state.type_mismatch(value, "String");
            None
        }
    }
}

fn initialize(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 0, 1) {
        return Value::Nil;
    }
    if let (Value::Str(target), Some(source)) = (recv, args.first()) {
        let Some(source) = string_arg(state, source) else {
            return Value::Nil;
        };
        *target.borrow_mut() = source;
    }
    Value::Nil
}

fn plus(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some(rhs) = string_arg(state, &args[0]) else {
        return Value::Nil;
    };
    let lhs = owned(recv);
    if lhs.len().saturating_add(rhs.len()) > MAX_STRING_LEN {
        state.raise(ExcKind::Argument, "string size too big");
        return Value::Nil;
    }
    Value::string(&(lhs + &rhs))
}

fn times(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let count = match &args[0] {
        Value::Int(n) => *n,
        other => return state.type_mismatch(other, "Integer"),
    };
    let Ok(count) = usize::try_from(count) else {
        state.raise(ExcKind::Argument, "negative argument");
        return Value::Nil;
    };
    let s = owned(recv);
    match s.len().checked_mul(count) {
        Some(len) if len <= MAX_STRING_LEN => Value::string(&s.repeat(count)),
        _ => {
            state.raise(ExcKind::Argument, "argument too big");
            Value::Nil
        }
    }
}

fn append(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some(rhs) = string_arg(state, &args[0]) else {
        return Value::Nil;
    };
    if let Value::Str(target) = recv {
        target.borrow_mut().push_str(&rhs);
    }
    recv.clone()
}

fn length(_: &mut State, recv: &Value, _: &[Value]) -> Value {
    Value::Int(text(recv).map_or(0, |s| s.chars().count()) as i64)
}

fn compare(state: &mut State, recv: &Value, other: &Value, test: fn(std::cmp::Ordering) -> bool) -> Value {
    let Some(rhs) = other.as_str().map(|s| s.clone()) else {
        let rhs = state.describe_class(other);
        state.raise(ExcKind::Argument, format!("comparison of String with {rhs} failed"));
        return Value::Nil;
    };
    Value::Bool(test(owned(recv).cmp(&rhs)))
}

fn predicate(state: &mut State, recv: &Value, other: &Value, test: fn(&str, &str) -> bool) -> Value {
    let Some(needle) = string_arg(state, other) else {
        return Value::Nil;
    };
    Value::Bool(test(&owned(recv), &needle))
}

fn split(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 0, 1) {
        return Value::Nil;
    }
    let source = owned(recv);
    let parts: Vec<Value> = match args.first() {
        None | Some(Value::Nil) => source.split_whitespace().map(Value::string).collect(),
        Some(sep) => {
            let Some(sep) = string_arg(state, sep) else {
                return Value::Nil;
            };
            if sep == " " {
                source.split_whitespace().map(Value::string).collect()
            } else if sep.is_empty() {
                source.chars().map(|c| Value::string(c.encode_utf8(&mut [0; 4]))).collect()
            } else {
                let mut parts: Vec<&str> = source.split(sep.as_str()).collect();
                while parts.last().is_some_and(|p| p.is_empty()) {
                    parts.pop();
                }
                parts.into_iter().map(Value::string).collect()
            }
        }
    };
    Value::array(parts)
}

/// `str[i]` and `str[start, len]` over characters.
fn index(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 1, 2) {
        return Value::Nil;
    }
    let chars: Vec<char> = owned(recv).chars().collect();
    let len = chars.len() as i64;
    let start = match &args[0] {
        Value::Int(i) => *i,
        other => return state.type_mismatch(other, "Integer"),
    };
    let start = if start < 0 { start + len } else { start };
    if start < 0 || start > len {
        return Value::Nil;
    }
    let count = match args.get(1) {
        None if start == len => return Value::Nil,
        None => 1,
        Some(Value::Int(n)) if *n < 0 => return Value::Nil,
        Some(Value::Int(n)) => *n,
        Some(other) => return state.type_mismatch(other, "Integer"),
    };
    let end = (start + count).min(len);
    Value::Str(Rc::new(RefCell::new(chars[start as usize..end as usize].iter().collect())))
}

/// Parse a leading integer the way `String#to_i` does, ignoring the rest.
fn leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let Some(d) = c.to_digit(10) else {
            break;
        };
        value = value.saturating_mul(10).saturating_add(i64::from(d));
    }
    if negative { -value } else { value }
}

fn leading_float(s: &str) -> f64 {
    let s = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = s.as_bytes();
    while end < bytes.len() {
        let b = bytes[end];
        let ok = match b {
            b'0'..=b'9' => true,
            b'+' | b'-' => end == 0 || matches!(bytes[end - 1], b'e' | b'E'),
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                bytes.get(end + 1).is_some_and(u8::is_ascii_digit)
            }
            b'e' | b'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end += 1;
    }
    // back off a dangling exponent or sign
    let mut candidate = &s[..end];
    while !candidate.is_empty() && candidate.parse::<f64>().is_err() {
        candidate = &candidate[..candidate.len() - 1];
    }
    candidate.parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::{leading_float, leading_int};
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

    fn string(src: &str) -> String {
        let (state, value) = eval(src);
        assert!(state.exc().is_none(), "{:?}", state.error_string());
        value.as_str().map(|s| s.clone()).expect("string result")
    }

    #[test]
    fn repetition_and_concatenation() {
        assert_eq!(string("'abc' * 3"), "abcabcabc");
        assert_eq!(string("'a' + 'b'"), "ab");
        assert_eq!(string("s = 'x'\ns << 'y'\ns"), "xy");
    }

    #[test]
    fn negative_repetition_raises() {
        let (state, _) = eval("'a' * -1");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: negative argument (ArgumentError)")
        );
    }

    #[test]
    fn oversized_repetition_raises() {
        let (state, _) = eval("'a' * 10000000000");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: argument too big (ArgumentError)")
        );
        let (state, _) = eval("'ab' * 9223372036854775807");
        assert!(state.error_string().expect("error").contains("argument too big"));
        assert_eq!(string("'' * 10000000000"), "");
    }

    #[test]
    fn concatenating_non_string_raises() {
        let (state, _) = eval("'a' + 1");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: no implicit conversion of Integer into String (TypeError)")
        );
    }

    #[test]
    fn case_and_search() {
        assert_eq!(string("'hello world'.capitalize"), "Hello world");
        assert_eq!(string("'MiXed'.downcase"), "mixed");
        assert!(eval("'hello'.start_with?('he')").1.truthy());
        assert!(!eval("'hello'.include?('z')").1.truthy());
    }

    #[test]
    fn indexing_by_character() {
        assert_eq!(string("'hello'[1]"), "e");
        assert_eq!(string("'hello'[-3, 2]"), "ll");
        assert!(eval("'hello'[5]").1.is_nil());
    }

    #[test]
    fn split_variants() {
        let (_, value) = eval("'a,b,,c,,'.split(',')");
        let Value::Array(items) = value else {
            panic!("expected array");
        };
        let parts: Vec<String> = items.borrow().iter().map(|v| v.as_str().map(|s| s.clone()).unwrap_or_default()).collect();
        assert_eq!(parts, vec!["a", "b", "", "c"]);
        assert_eq!(eval("'  a  b '.split.size").1.as_int(), Some(2));
    }

    #[test]
    fn numeric_prefixes() {
        assert_eq!(leading_int("  42abc"), 42);
        assert_eq!(leading_int("-1_000"), -1000);
        assert_eq!(leading_int("abc"), 0);
        assert_eq!(leading_float("3.5e2x"), 350.0);
        assert_eq!(leading_float("2e"), 2.0);
        assert_eq!(leading_float("."), 0.0);
    }

    #[test]
    fn symbols() {
        assert_eq!(string(":abc.to_s"), "abc");
        assert_eq!(string("'a b'.to_sym.inspect"), ":\"a b\"");
        assert!(eval(":a == 'a'.to_sym").1.truthy());
    }
}
