//! `Object`, `Class`, and the `nil`/`true`/`false` classes.

use std::rc::Rc;

use crate::class::{Aspec, ClassRef, Method, NativeFn};
use crate::state::{ExcKind, State};
use crate::value::Value;

pub(super) fn init(state: &mut State) {
    let object = state.object_class();
    let o = &object;
    state.def_builtin(o, "initialize", Aspec::None, |_, _, _| Value::Nil);
    state.def_builtin(o, "puts", Aspec::Any, puts);
    state.def_builtin(o, "print", Aspec::Any, print);
    state.def_builtin(o, "p", Aspec::Any, p);
    state.def_builtin(o, "raise", Aspec::Any, raise);
    state.def_builtin(o, "==", Aspec::Req(1), |_, recv, args| Value::Bool(recv.identical(&args[0])));
    state.def_builtin(o, "equal?", Aspec::Req(1), |_, recv, args| Value::Bool(recv.identical(&args[0])));
    state.def_builtin(o, "eql?", Aspec::Req(1), |_, recv, args| Value::Bool(recv.eql(&args[0])));
    state.def_builtin(o, "nil?", Aspec::None, |_, recv, _| Value::Bool(recv.is_nil()));
    state.def_builtin(o, "class", Aspec::None, |st, recv, _| Value::Class(st.class_of(recv)));
    state.def_builtin(o, "object_id", Aspec::None, |_, recv, _| Value::Int(recv.object_id()));
    state.def_builtin(o, "to_s", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    state.def_builtin(o, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_inspect(recv)));
    state.def_builtin(o, "is_a?", Aspec::Req(1), is_a);
    state.def_builtin(o, "kind_of?", Aspec::Req(1), is_a);
    state.def_builtin(o, "instance_of?", Aspec::Req(1), instance_of);
    state.def_builtin(o, "respond_to?", Aspec::Req(1), respond_to);
    state.def_builtin(o, "send", Aspec::Any, send);
    state.def_builtin(o, "__send__", Aspec::Any, send);
    state.def_builtin(o, "instance_variable_get", Aspec::Req(1), ivar_get);
    state.def_builtin(o, "instance_variable_set", Aspec::Req(2), ivar_set);
    state.def_builtin(o, "instance_variables", Aspec::None, instance_variables);

    let class = Rc::clone(&state.builtins.class);
    let c = &class;
    state.def_builtin(c, "new", Aspec::Any, class_new);
    state.def_builtin(c, "allocate", Aspec::None, |st, recv, _| match recv {
        Value::Class(class) => st.allocate(class).unwrap_or_default(),
        _ => Value::Nil,
    });
    state.def_builtin(c, "name", Aspec::None, |_, recv, _| match recv {
        Value::Class(class) => Value::string(class.name()),
        _ => Value::Nil,
    });
    state.def_builtin(c, "to_s", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    state.def_builtin(c, "inspect", Aspec::None, |st, recv, _| Value::string(&st.format_to_s(recv)));
    state.def_builtin(c, "superclass", Aspec::None, |_, recv, _| {
        match recv.as_class().and_then(|c| c.superclass()) {
            Some(superclass) => Value::Class(Rc::clone(superclass)),
            None => Value::Nil,
        }
    });
    state.def_builtin(c, "===", Aspec::Req(1), |st, recv, args| match recv {
        Value::Class(class) => Value::Bool(st.is_a(&args[0], class)),
        _ => Value::Bool(false),
    });
    state.def_builtin(c, "<", Aspec::Req(1), |_, recv, args| match (recv, &args[0]) {
        (Value::Class(a), Value::Class(b)) => Value::Bool(!Rc::ptr_eq(a, b) && a.is_subclass_of(b)),
        _ => Value::Nil,
    });
    state.def_builtin(c, "method_defined?", Aspec::Req(1), |st, recv, args| {
        let Some(class) = recv.as_class() else {
            return Value::Bool(false);
        };
        let Some(name) = symbol_arg(st, &args[0]) else {
            return Value::Nil;
        };
        let sym = st.intern(&name);
        Value::Bool(class.find_method(sym).is_some())
    });
    state.def_builtin(c, "attr_reader", Aspec::Any, |st, recv, args| define_attrs(st, recv, args, true, false));
    state.def_builtin(c, "attr_writer", Aspec::Any, |st, recv, args| define_attrs(st, recv, args, false, true));
    state.def_builtin(c, "attr_accessor", Aspec::Any, |st, recv, args| define_attrs(st, recv, args, true, true));

    let nil = Rc::clone(&state.builtins.nil);
    state.def_builtin(&nil, "to_s", Aspec::None, |_, _, _| Value::string(""));
    state.def_builtin(&nil, "to_a", Aspec::None, |_, _, _| Value::array(Vec::new()));
    state.def_builtin(&nil, "to_i", Aspec::None, |_, _, _| Value::Int(0));
    state.def_builtin(&nil, "inspect", Aspec::None, |_, _, _| Value::string("nil"));

    for class in [Rc::clone(&state.builtins.true_class), Rc::clone(&state.builtins.false_class)] {
        state.def_builtin(&class, "&", Aspec::Req(1), |_, recv, args| Value::Bool(recv.truthy() && args[0].truthy()));
        state.def_builtin(&class, "|", Aspec::Req(1), |_, recv, args| Value::Bool(recv.truthy() || args[0].truthy()));
        state.def_builtin(&class, "^", Aspec::Req(1), |_, recv, args| Value::Bool(recv.truthy() != args[0].truthy()));
    }
}

/// Name carried by a symbol or string argument; raises `TypeError` otherwise.
pub(super) fn symbol_arg(state: &mut State, value: &Value) -> Option<String> {
    match value {
        Value::Symbol(sym) => Some(state.sym_name(*sym).to_string()),
        Value::Str(s) => Some(s.borrow().clone()),
        other => {
            let shown = state.format_inspect(other);
            state.raise(ExcKind::Type, format!("{shown} is not a symbol nor a string"));
            None
        }
    }
}

fn puts(state: &mut State, _: &Value, args: &[Value]) -> Value {
    let mut out = String::new();
    if args.is_empty() {
        out.push('\n');
    }
    let mut lines = Vec::new();
    flatten_into(args, &mut lines, 0);
    for item in lines {
        let Ok(text) = state.stringify(&item) else {
            return Value::Nil;
        };
        out.push_str(&text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }
    state.write_out(&out);
    Value::Nil
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>, depth: usize) {
    for item in items {
        match item {
            Value::Array(inner) if depth < 16 => flatten_into(&inner.borrow(), out, depth + 1),
            other => out.push(other.clone()),
        }
    }
}

fn print(state: &mut State, _: &Value, args: &[Value]) -> Value {
    let mut out = String::new();
    for arg in args {
        let Ok(text) = state.stringify(arg) else {
            return Value::Nil;
        };
        out.push_str(&text);
    }
    state.write_out(&out);
    Value::Nil
}

fn p(state: &mut State, _: &Value, args: &[Value]) -> Value {
    let mut out = String::new();
    for arg in args {
        let Ok(text) = state.inspect_dispatch(arg) else {
            return Value::Nil;
        };
        out.push_str(&text);
        out.push('\n');
    }
    state.write_out(&out);
    match args {
        [] => Value::Nil,
        [single] => single.clone(),
        many => Value::array(many.to_vec()),
    }
}

fn raise(state: &mut State, _: &Value, args: &[Value]) -> Value {
    if !state.check_arity(args, 0, 2) {
        return Value::Nil;
    }
    let exception = Rc::clone(&state.builtins.exception);
    let exc = match args {
        [] => {
            let class = state.builtins.exception_class(ExcKind::Runtime);
            state.exception_new(&class, Value::string("unhandled exception"))
        }
        [Value::Str(message)] => {
            let class = state.builtins.exception_class(ExcKind::Runtime);
            let message = Value::Str(Rc::clone(message));
            state.exception_new(&class, message)
        }
        [Value::Class(class), rest @ ..] if class.is_subclass_of(&exception) => {
            let new = state.intern("new");
            match state.send(&Value::Class(Rc::clone(class)), new, rest.to_vec()) {
                Some(exc) => exc,
                None => return Value::Nil,
            }
        }
        [exc] if state.is_exception(exc) => exc.clone(),
        _ => {
            state.raise(ExcKind::Type, "exception class/object expected");
            return Value::Nil;
        }
    };
    state.raise_value(exc);
    Value::Nil
}

fn is_a(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    match &args[0] {
        Value::Class(class) => Value::Bool(state.is_a(recv, class)),
        _ => {
            state.raise(ExcKind::Type, "class or module required");
            Value::Nil
        }
    }
}

fn instance_of(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    match &args[0] {
        Value::Class(class) => Value::Bool(Rc::ptr_eq(&state.class_of(recv), class)),
        _ => {
            state.raise(ExcKind::Type, "class or module required");
            Value::Nil
        }
    }
}

fn respond_to(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some(name) = symbol_arg(state, &args[0]) else {
        return Value::Nil;
    };
    let sym = state.intern(&name);
    Value::Bool(state.class_of(recv).find_method(sym).is_some())
}

fn send(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some((name, rest)) = args.split_first() else {
        state.raise(ExcKind::Argument, "no method name given");
        return Value::Nil;
    };
    let Some(name) = symbol_arg(state, name) else {
        return Value::Nil;
    };
    let mid = state.intern(&name);
    state.send(recv, mid, rest.to_vec()).unwrap_or_default()
}

fn ivar_name(state: &mut State, value: &Value) -> Option<crate::symbol::Sym> {
    let name = symbol_arg(state, value)?;
    if !name.starts_with('@') {
        state.raise(
            ExcKind::Name,
            format!("'{name}' is not allowed as an instance variable name"),
        );
        return None;
    }
    Some(state.intern(&name))
}

fn ivar_get(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    match ivar_name(state, &args[0]) {
        Some(sym) => state.ivar_get(recv, sym),
        None => Value::Nil,
    }
}

fn ivar_set(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Some(sym) = ivar_name(state, &args[0]) else {
        return Value::Nil;
    };
    state.ivar_set(recv, sym, args[1].clone());
    args[1].clone()
}

fn instance_variables(state: &mut State, recv: &Value, _: &[Value]) -> Value {
    let table = match recv {
        Value::Object(o) => &o.ivars,
        Value::Data(d) => &d.ivars,
        _ => return Value::array(Vec::new()),
    };
    let mut names: Vec<_> = table.borrow().keys().copied().collect();
    names.sort_by_key(|sym| state.sym_name(*sym));
    Value::array(names.into_iter().map(Value::Symbol).collect())
}

/// `Class#new`: allocate, then dispatch `initialize` with the arguments.
fn class_new(state: &mut State, recv: &Value, args: &[Value]) -> Value {
    let Value::Class(class) = recv else {
        return Value::Nil;
    };
    let Some(obj) = state.allocate(class) else {
        return Value::Nil;
    };
    let initialize = state.syms.initialize;
    match state.send(&obj, initialize, args.to_vec()) {
        Some(_) => obj,
        None => Value::Nil,
    }
}

fn define_attrs(state: &mut State, recv: &Value, args: &[Value], reader: bool, writer: bool) -> Value {
    let Some(class) = recv.as_class().cloned() else {
        return Value::Nil;
    };
    let mut defined = Vec::with_capacity(args.len());
    for arg in args {
        let Some(name) = symbol_arg(state, arg) else {
            return Value::Nil;
        };
        let ivar = state.intern(&format!("@{name}"));
        if reader {
            let func: NativeFn = Rc::new(move |st: &mut State, recv: Value| st.ivar_get(&recv, ivar));
            define(state, &class, &name, func, Aspec::None);
            defined.push(Value::Symbol(state.intern(&name)));
        }
        if writer {
            let func: NativeFn = Rc::new(move |st: &mut State, recv: Value| {
                let value = st.args().first().cloned().unwrap_or_default();
                st.ivar_set(&recv, ivar, value.clone());
                value
            });
            let setter = format!("{name}=");
            define(state, &class, &setter, func, Aspec::Req(1));
            defined.push(Value::Symbol(state.intern(&setter)));
        }
    }
    Value::array(defined)
}

fn define(state: &mut State, class: &ClassRef, name: &str, func: NativeFn, aspec: Aspec) {
    let sym = state.intern(name);
    class.define(sym, Method::Native { func, aspec });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use crate::{State, Value, VmOptions};

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run(src: &str) -> (State, Value, String) {
        let out = Capture::default();
        let mut state = State::open(VmOptions {
            stdout: Box::new(out.clone()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        });
        let value = state.load_string(src);
        let text = String::from_utf8(out.0.borrow().clone()).expect("utf8");
        (state, value, text)
    }

    #[test]
    fn puts_print_and_p() {
        let (_, _, out) = run("puts 'a', [1, [2]], nil\nprint 'x', 1\np :s, 'q'");
        assert_eq!(out, "a\n1\n2\n\nx1:s\n\"q\"\n");
    }

    #[test]
    fn attr_accessor_defines_reader_and_writer() {
        let (state, value, _) = run(
            "class Point\n  attr_accessor :x\n  def initialize(x)\n    @x = x\n  end\nend\npt = Point.new(1)\npt.x = pt.x + 41\npt.x",
        );
        assert!(state.exc().is_none(), "{:?}", state.error_string());
        assert_eq!(value.as_int(), Some(42));
    }

    #[test]
    fn send_and_respond_to() {
        let (_, value, _) = run("[1.respond_to?(:+), 1.respond_to?('nope'), 5.send(:-, 2)]");
        let Value::Array(items) = value else {
            panic!("expected array");
        };
        let items = items.borrow();
        assert!(items[0].truthy());
        assert!(!items[1].truthy());
        assert_eq!(items[2].as_int(), Some(3));
    }

    #[test]
    fn object_new_rejects_arguments() {
        let (state, _, _) = run("Object.new(1)");
        let text = state.error_string().expect("error");
        assert!(text.contains("wrong number of arguments (given 1, expected 0)"), "{text}");
    }

    #[test]
    fn integer_cannot_be_instantiated() {
        let (state, _, _) = run("Integer.new");
        assert!(state.error_string().expect("error").contains("undefined method 'new' for class Integer"));
    }

    #[test]
    fn raise_forms() {
        let (state, _, _) = run("raise");
        assert_eq!(state.error_string().as_deref(), Some("line 1: unhandled exception (RuntimeError)"));
        let (state, _, _) = run("raise TypeError");
        assert_eq!(state.error_string().as_deref(), Some("line 1: TypeError (TypeError)"));
        let (state, _, _) = run("raise 42");
        assert!(state.error_string().expect("error").contains("exception class/object expected"));
    }

    #[test]
    fn is_a_follows_hierarchy() {
        let (_, value, _) = run("class A\nend\nclass B < A\nend\n[B.new.is_a?(A), A.new.is_a?(B), 1.is_a?(Object), B.new.instance_of?(A)]");
        let Value::Array(items) = value else {
            panic!("expected array");
        };
        let flags: Vec<bool> = items.borrow().iter().map(Value::truthy).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }
}
