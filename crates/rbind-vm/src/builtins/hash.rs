//! `Hash`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::class::Aspec;
use crate::state::{ExcKind, State};
use crate::value::{RHash, Value};

fn table(value: &Value) -> Rc<RefCell<RHash>> {
    match value {
        Value::Hash(hash) => Rc::clone(hash),
        _ => Rc::default(),
    }
}

pub(super) fn init(state: &mut State) {
    let hash = Rc::clone(&state.builtins.hash);
    let h = &hash;
    state.def_builtin(h, "initialize", Aspec::None, |_, _, _| Value::Nil);
    state.def_builtin(h, "[]", Aspec::Req(1), |_, recv, args| {
        table(recv).borrow().get(&args[0]).cloned().unwrap_or_default()
    });
    state.def_builtin(h, "[]=", Aspec::Req(2), |_, recv, args| {
        table(recv).borrow_mut().insert(args[0].clone(), args[1].clone());
        args[1].clone()
    });
    state.def_builtin(h, "store", Aspec::Req(2), |_, recv, args| {
        table(recv).borrow_mut().insert(args[0].clone(), args[1].clone());
        args[1].clone()
    });
    state.def_builtin(h, "fetch", Aspec::Any, fetch);
    state.def_builtin(h, "delete", Aspec::Req(1), |_, recv, args| {
        table(recv).borrow_mut().remove(&args[0]).unwrap_or_default()
    });
    state.def_builtin(h, "keys", Aspec::None, |_, recv, _| Value::array(table(recv).borrow().keys()));
    state.def_builtin(h, "values", Aspec::None, |_, recv, _| Value::array(table(recv).borrow().values()));
    state.def_builtin(h, "size", Aspec::None, |_, recv, _| Value::Int(table(recv).borrow().len() as i64));
    state.def_builtin(h, "length", Aspec::None, |_, recv, _| Value::Int(table(recv).borrow().len() as i64));
    state.def_builtin(h, "empty?", Aspec::None, |_, recv, _| Value::Bool(table(recv).borrow().is_empty()));
    for name in ["key?", "has_key?", "include?", "member?"] {
        state.def_builtin(h, name, Aspec::Req(1), |_, recv, args| {
            Value::Bool(table(recv).borrow().contains_key(&args[0]))
        });
    }
    state.def_builtin(h, "merge", Aspec::Req(1), |st, recv, args| {
        let Value::Hash(other) = &args[0] else {
            return st.type_mismatch(&args[0], "Hash");
        };
        let mut merged = RHash::new();
        for source in [table(recv), Rc::clone(other)] {
            for (k, v) in source.borrow().iter() {
                merged.insert(k.clone(), v.clone());
            }
        }
        Value::hash(merged)
    });
    state.def_builtin(h, "to_a", Aspec::None, |_, recv, _| {
        let pairs = table(recv)
            .borrow()
            .iter()
            .map(|(k, v)| Value::array(vec![k.clone(), v.clone()]))
            .collect();
        Value::array(pairs)
    });
    state.def_builtin(h, "to_h", Aspec::None, |_, recv, _| recv.clone());
    state.def_builtin(h, "==", Aspec::Req(1), equal);
    state.def_builtin(h, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_inspect(recv)));
    state.def_builtin(h, "to_s", Aspec::None, |st, recv, _| Value::string(&st.format_inspect(recv)));
}

fn fetch(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 1, 2) {
        return Value::Nil;
    }
    if let Some(value) = table(recv).borrow().get(&args[0]) {
        return value.clone();
    }
    if let Some(default) = args.get(1) {
        return default.clone();
    }
    let key = state.format_inspect(&args[0]);
    state.raise(ExcKind::Index, format!("key not found: {key}"));
    Value::Nil
}

fn equal(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Value::Hash(other) = &args[0] else {
        return Value::Bool(false);
    };
    let lhs: Vec<(Value, Value)> = table(recv)
        .borrow()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if lhs.len() != other.borrow().len() {
        return Value::Bool(false);
    }
    for (key, value) in lhs {
        let Some(theirs) = other.borrow().get(&key).cloned() else {
            return Value::Bool(false);
        };
        match state.values_equal(&value, &theirs) {
            Ok(true) => {}
            Ok(false) => return Value::Bool(false),
            Err(_) => return Value::Nil,
        }
    }
    Value::Bool(true)
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

    #[test]
    fn literal_lookup_and_store() {
        let (state, value) = eval("h = {a: 1, 'b' => 2}\nh[:c] = 3\n[h[:a], h['b'], h[:c], h[:zz]]");
        assert_eq!(state.format_inspect(&value), "[1, 2, 3, nil]");
    }

    #[test]
    fn keys_and_values_keep_insertion_order() {
        let (state, value) = eval("h = {10 => 'x', 20 => 'yy', 30 => 'zzz'}\nh[10] = 'a'\n[h.keys, h.values]");
        assert_eq!(state.format_inspect(&value), "[[10, 20, 30], [\"a\", \"yy\", \"zzz\"]]");
    }

    #[test]
    fn fetch_missing_raises_index_error() {
        let (state, _) = eval("{a: 1}.fetch(:b)");
        assert_eq!(
            state.error_string().as_deref(),
            Some("line 1: key not found: :b (IndexError)")
        );
        assert_eq!(eval("{a: 1}.fetch(:b, 7)").1.as_int(), Some(7));
    }

    #[test]
    fn merge_and_delete() {
        let (state, value) = eval("h = {a: 1, b: 2}.merge({b: 3, c: 4})\nh.delete(:a)\nh");
        assert_eq!(state.format_inspect(&value), "{b: 3, c: 4}");
    }

    #[test]
    fn equality_ignores_order() {
        assert!(eval("{a: 1, b: 2} == {b: 2, a: 1}").1.truthy());
        assert!(!eval("{a: 1} == {a: 2}").1.truthy());
    }
}
