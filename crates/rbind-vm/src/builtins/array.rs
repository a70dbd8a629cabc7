//! `Array`.

use std::cmp::Ordering;
use std::rc::Rc;

use super::MAX_ARRAY_LEN;
use crate::class::Aspec;
use crate::state::{ExcKind, State};
use crate::value::Value;

type Items = Rc<std::cell::RefCell<Vec<Value>>>;

pub(super) fn init(state: &mut State) {
    let array = Rc::clone(&state.builtins.array);
    let a = &array;
    state.def_builtin(a, "initialize", Aspec::Any, initialize);
    state.def_builtin(a, "[]", Aspec::Req(1), |st, recv, args| {
        let Some(i) = int_arg(st, &args[0]) else {
            return Value::Nil;
        };
        let items = items(recv);
        let items = items.borrow();
        resolve(i, items.len()).and_then(|i| items.get(i).cloned()).unwrap_or_default()
    });
    state.def_builtin(a, "[]=", Aspec::Req(2), store);
    state.def_builtin(a, "<<", Aspec::Req(1), |_, recv, args| {
        items(recv).borrow_mut().push(args[0].clone());
        recv.clone()
    });
    state.def_builtin(a, "push", Aspec::Any, |_, recv, args| {
        items(recv).borrow_mut().extend(args.iter().cloned());
        recv.clone()
    });
    state.def_builtin(a, "pop", Aspec::None, |_, recv, _| items(recv).borrow_mut().pop().unwrap_or_default());
    state.def_builtin(a, "shift", Aspec::None, |_, recv, _| {
        let items = items(recv);
        let mut items = items.borrow_mut();
        if items.is_empty() { Value::Nil } else { items.remove(0) }
    });
    state.def_builtin(a, "unshift", Aspec::Any, |_, recv, args| {
        items(recv).borrow_mut().splice(0..0, args.iter().cloned());
        recv.clone()
    });
    state.def_builtin(a, "size", Aspec::None, |_, recv, _| Value::Int(items(recv).borrow().len() as i64));
    state.def_builtin(a, "length", Aspec::None, |_, recv, _| Value::Int(items(recv).borrow().len() as i64));
    state.def_builtin(a, "empty?", Aspec::None, |_, recv, _| Value::Bool(items(recv).borrow().is_empty()));
    state.def_builtin(a, "first", Aspec::None, |_, recv, _| items(recv).borrow().first().cloned().unwrap_or_default());
    state.def_builtin(a, "last", Aspec::None, |_, recv, _| items(recv).borrow().last().cloned().unwrap_or_default());
    state.def_builtin(a, "include?", Aspec::Req(1), |st, recv, args| match position(st, recv, &args[0]) {
        Some(found) => Value::Bool(found.is_some()),
        None => Value::Nil,
    });
    state.def_builtin(a, "index", Aspec::Req(1), |st, recv, args| match position(st, recv, &args[0]) {
        Some(Some(i)) => Value::Int(i as i64),
        _ => Value::Nil,
    });
    state.def_builtin(a, "delete_at", Aspec::Req(1), |st, recv, args| {
        let Some(i) = int_arg(st, &args[0]) else {
            return Value::Nil;
        };
        let items = items(recv);
        let mut items = items.borrow_mut();
        match resolve(i, items.len()) {
            Some(i) if i < items.len() => items.remove(i),
            _ => Value::Nil,
        }
    });
    state.def_builtin(a, "join", Aspec::Any, join);
    state.def_builtin(a, "reverse", Aspec::None, |_, recv, _| {
        Value::array(items(recv).borrow().iter().rev().cloned().collect())
    });
    state.def_builtin(a, "compact", Aspec::None, |_, recv, _| {
        Value::array(items(recv).borrow().iter().filter(|v| !v.is_nil()).cloned().collect())
    });
    state.def_builtin(a, "sort", Aspec::None, sort);
    state.def_builtin(a, "min", Aspec::None, |st, recv, _| extreme(st, recv, Ordering::Less));
    state.def_builtin(a, "max", Aspec::None, |st, recv, _| extreme(st, recv, Ordering::Greater));
    state.def_builtin(a, "sum", Aspec::None, sum);
    state.def_builtin(a, "+", Aspec::Req(1), |st, recv, args| {
        let Value::Array(other) = &args[0] else {
            return st.type_mismatch(&args[0], "Array");
        };
        let mut joined = items(recv).borrow().clone();
        joined.extend(other.borrow().iter().cloned());
        Value::array(joined)
    });
    state.def_builtin(a, "concat", Aspec::Req(1), |st, recv, args| {
        let Value::Array(other) = &args[0] else {
            return st.type_mismatch(&args[0], "Array");
        };
        let extra = other.borrow().clone();
        items(recv).borrow_mut().extend(extra);
        recv.clone()
    });
    state.def_builtin(a, "==", Aspec::Req(1), equal);
    state.def_builtin(a, "to_a", Aspec::None, |_, recv, _| recv.clone());
    state.def_builtin(a, "inspect", Aspec::None, inspect);
    state.def_builtin(a, "to_s", Aspec::None, inspect);
}

fn items(value: &Value) -> Items {
    match value {
        Value::Array(items) => Rc::clone(items),
        _ => Items::default(),
    }
}

fn int_arg(state: &mut State, value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        other => {
            state.type_mismatch(other, "Integer");
            None
        }
    }
}

/// Map a possibly negative index onto `0..=len`.
fn resolve(i: i64, len: usize) -> Option<usize> {
    let i = if i < 0 { i + len as i64 } else { i };
    usize::try_from(i).ok()
}

fn initialize(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 0, 2) {
        return Value::Nil;
    }
    let size = match args.first() {
        Some(size) => match int_arg(state, size) {
            Some(n) if n < 0 => {
                state.raise(ExcKind::Argument, "negative array size");
                return Value::Nil;
            }
            Some(n) if n as u64 > MAX_ARRAY_LEN as u64 => {
                state.raise(ExcKind::Argument, "array size too big");
                return Value::Nil;
            }
            Some(n) => n as usize,
            None => return Value::Nil,
        },
        None => 0,
    };
    let fill = args.get(1).cloned().unwrap_or_default();
    *items(recv).borrow_mut() = vec![fill; size];
    Value::Nil
}

fn store(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some(i) = int_arg(state, &args[0]) else {
        return Value::Nil;
    };
    let cell = items(recv);
    let mut items = cell.borrow_mut();
    let len = items.len();
    let Some(i) = resolve(i, len) else {
        drop(items);
        state.raise(
            ExcKind::Index,
            format!("index {} too small for array; minimum: -{len}", args[0].as_int().unwrap_or_default()),
        );
        return Value::Nil;
    };
    if i >= MAX_ARRAY_LEN {
        drop(items);
        state.raise(ExcKind::Index, format!("index {i} too big"));
        return Value::Nil;
    }
    if i >= len {
        items.resize(i + 1, Value::Nil);
    }
    items[i] = args[1].clone();
    args[1].clone()
}

/// `Some(index)` of the first element `==` to `needle`; `None` on a raise.
fn position(state: &mut State, recv: &Value, needle: &Value) -> Option<Option<usize>> {
    let snapshot = items(recv).borrow().clone();
    for (i, item) in snapshot.iter().enumerate() {
        match state.values_equal(item, needle) {
            Ok(true) => return Some(Some(i)),
            Ok(false) => {}
            Err(_) => return None,
        }
    }
    Some(None)
}

fn join(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 0, 1) {
        return Value::Nil;
    }
    let sep = match args.first() {
        None | Some(Value::Nil) => String::new(),
        Some(Value::Str(s)) => s.borrow().clone(),
        Some(other) => return state.type_mismatch(other, "String"),
    };
    let snapshot = items(recv).borrow().clone();
    let mut parts = Vec::with_capacity(snapshot.len());
    for item in &snapshot {
        let text = match item {
            Value::Array(_) => {
                let inner = join(state, item, args);
                if state.exc().is_some() {
                    return Value::Nil;
                }
                inner.as_str().map(|s| s.clone()).unwrap_or_default()
            }
            other => match state.stringify(other) {
                Ok(text) => text,
                Err(_) => return Value::Nil,
            },
        };
        parts.push(text);
    }
    Value::string(&parts.join(&sep))
}

/// Order two elements with `<=>`, raising `ArgumentError` when they do not
/// compare.
fn order(state: &mut State, a: &Value, b: &Value) -> Option<Ordering> {
    let cmp = state.syms.cmp;
    let result = state.send(a, cmp, vec![b.clone()])?;
    match result.as_int() {
        Some(n) => Some(n.cmp(&0)),
        None => {
            let lhs = state.describe_class(a);
            let rhs = state.describe_class(b);
            state.raise(ExcKind::Argument, format!("comparison of {lhs} with {rhs} failed"));
            None
        }
    }
}

fn sort(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    let mut sorted = items(recv).borrow().clone();
    // insertion sort so a failed comparison can stop early
    for i in 1..sorted.len() {
        let mut j = i;
        while j > 0 {
            match order(state, &sorted[j - 1], &sorted[j]) {
                Some(Ordering::Greater) => sorted.swap(j - 1, j),
                Some(_) => break,
                None => return Value::Nil,
            }
            j -= 1;
        }
    }
    Value::array(sorted)
}

fn extreme(state: &mut State, recv: &Value, wanted: Ordering) -> Value {
    let snapshot = items(recv).borrow().clone();
    let mut iter = snapshot.into_iter();
    let Some(mut best) = iter.next() else {
        return Value::Nil;
    };
    for item in iter {
        match order(state, &item, &best) {
            Some(ordering) if ordering == wanted => best = item,
            Some(_) => {}
            None => return Value::Nil,
        }
    }
    best
}

fn sum(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    let snapshot = items(recv).borrow().clone();
    let plus = state.intern("+");
    let mut total = Value::Int(0);
    for item in snapshot {
        match state.send(&total, plus, vec![item]) {
            Some(next) => total = next,
            None => return Value::Nil,
        }
    }
    total
}

fn equal(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Value::Array(other) = &args[0] else {
        return Value::Bool(false);
    };
    let lhs = items(recv).borrow().clone();
    let rhs = other.borrow().clone();
    if lhs.len() != rhs.len() {
        return Value::Bool(false);
    }
    for (a, b) in lhs.iter().zip(&rhs) {
        match state.values_equal(a, b) {
            Ok(true) => {}
            Ok(false) => return Value::Bool(false),
            Err(_) => return Value::Nil,
        }
    }
    Value::Bool(true)
}

fn inspect(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    let snapshot = items(recv).borrow().clone();
    let mut out = String::from("[");
    for (i, item) in snapshot.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        match state.inspect_dispatch(item) {
            Ok(text) => out.push_str(&text),
            Err(_) => return Value::Nil,
        }
    }
    out.push(']');
    Value::string(&out)
}

#[cfg(test)]
mod tests {
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

    fn inspected(src: &str) -> String {
        let (state, value) = eval(src);
        assert!(state.exc().is_none(), "{:?}", state.error_string());
        state.format_inspect(&value)
    }

    #[test]
    fn indexing_and_store() {
        assert_eq!(inspected("a = [1, 2, 3]\n[a[0], a[-1], a[5]]"), "[1, 3, nil]");
        assert_eq!(inspected("a = [1]\na[3] = 4\na"), "[1, nil, nil, 4]");
    }

    #[test]
    fn store_before_start_raises() {
        let (state, _) = eval("a = [1]\na[-3] = 0");
        assert!(state.error_string().expect("error").contains("(IndexError)"));
    }

    #[test]
    fn stack_operations() {
        assert_eq!(inspected("a = [2]\na.push(3, 4)\na << 5\na.unshift(1)\na.pop\na.shift\na"), "[2, 3, 4]");
    }

    #[test]
    fn sum_sort_min_max() {
        assert_eq!(eval("[10, 20, 30].sum").1.as_int(), Some(60));
        assert_eq!(eval("[1, 2.5].sum").1.as_float(), Some(3.5));
        assert_eq!(inspected("[3, 1, 2].sort"), "[1, 2, 3]");
        assert_eq!(inspected("['b', 'a'].sort"), "[\"a\", \"b\"]");
        assert_eq!(eval("[3, 9, 1].max").1.as_int(), Some(9));
        assert_eq!(eval("[3, 9, 1].min").1.as_int(), Some(1));
    }

    #[test]
    fn sort_of_mixed_types_raises() {
        let (state, _) = eval("[1, 'a'].sort");
        assert!(state.error_string().expect("error").contains("comparison of"));
    }

    #[test]
    fn join_nested() {
        let (_, value) = eval("[1, [2, 3], nil, 'x'].join('-')");
        assert_eq!(value.as_str().map(|s| s.clone()).as_deref(), Some("1-2-3--x"));
    }

    #[test]
    fn equality_and_search() {
        assert!(eval("[1, 'a'] == [1, 'a']").1.truthy());
        assert!(!eval("[1] == [1, 2]").1.truthy());
        assert_eq!(eval("[:a, :b].index(:b)").1.as_int(), Some(1));
        assert!(eval("[1, 2].include?(2.0)").1.truthy());
    }

    #[test]
    fn array_new_fills() {
        assert_eq!(inspected("Array.new(3, 0)"), "[0, 0, 0]");
    }

    #[test]
    fn oversized_arrays_raise_instead_of_allocating() {
        let (state, _) = eval("a = []\na[100000000000] = 1");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 2: index 100000000000 too big (IndexError)")
        );

        let (state, _) = eval("Array.new(100000000000)");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: array size too big (ArgumentError)")
        );

        assert_eq!(inspected("a = []\na[1000] = 1\na.size"), "1001");
    }
}
