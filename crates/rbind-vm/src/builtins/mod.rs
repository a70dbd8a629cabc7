//! Builtin classes and their native methods.

mod array;
mod exception;
mod hash;
mod kernel;
mod numeric;
mod string;

use std::rc::Rc;

use crate::class::{Aspec, ClassFlags, ClassRef, Method, NativeFn, RClass};
use crate::state::{ExcKind, State, wrong_arity};
use crate::value::Value;

pub(crate) use numeric::format_float;

/// Longest array a script may create by size or index.
pub const MAX_ARRAY_LEN: usize = 1 << 24;

/// Largest string, in bytes, a script may create by repetition or
/// concatenation.
pub const MAX_STRING_LEN: usize = 1 << 28;

/// Native method body over the receiver and its arguments.
pub(crate) type BuiltinFn = fn(&mut State, &Value, &[Value]) -> Value;

/// Handles to every class the interpreter defines itself.
pub struct Builtins {
    pub object: ClassRef,
    pub class: ClassRef,
    pub nil: ClassRef,
    pub true_class: ClassRef,
    pub false_class: ClassRef,
    pub integer: ClassRef,
    pub float: ClassRef,
    pub string: ClassRef,
    pub symbol: ClassRef,
    pub array: ClassRef,
    pub hash: ClassRef,
    pub exception: ClassRef,
    pub script_error: ClassRef,
    pub syntax_error: ClassRef,
    pub standard_error: ClassRef,
    pub runtime_error: ClassRef,
    pub type_error: ClassRef,
    pub argument_error: ClassRef,
    pub name_error: ClassRef,
    pub no_method_error: ClassRef,
    pub zero_division_error: ClassRef,
    pub io_error: ClassRef,
    pub index_error: ClassRef,
    pub range_error: ClassRef,
    pub system_stack_error: ClassRef,
}

fn builtin(name: &str, superclass: &ClassRef, flags: ClassFlags) -> ClassRef {
    let class = RClass::new_subclass(name, superclass);
    class.insert_flags(ClassFlags::BUILTIN | flags);
    class
}

impl Builtins {
    pub(crate) fn new() -> Self {
        let object = RClass::new_root("Object");
        object.insert_flags(ClassFlags::BUILTIN);
        let value = ClassFlags::SPECIAL_ALLOC;
        let plain = ClassFlags::empty();

        let exception = builtin("Exception", &object, plain);
        let script_error = builtin("ScriptError", &exception, plain);
        let standard_error = builtin("StandardError", &exception, plain);
        let name_error = builtin("NameError", &standard_error, plain);

        Self {
            class: builtin("Class", &object, value),
            nil: builtin("NilClass", &object, value),
            true_class: builtin("TrueClass", &object, value),
            false_class: builtin("FalseClass", &object, value),
            integer: builtin("Integer", &object, value),
            float: builtin("Float", &object, value),
            string: builtin("String", &object, value),
            symbol: builtin("Symbol", &object, value),
            array: builtin("Array", &object, value),
            hash: builtin("Hash", &object, value),
            syntax_error: builtin("SyntaxError", &script_error, plain),
            runtime_error: builtin("RuntimeError", &standard_error, plain),
            type_error: builtin("TypeError", &standard_error, plain),
            argument_error: builtin("ArgumentError", &standard_error, plain),
            no_method_error: builtin("NoMethodError", &name_error, plain),
            zero_division_error: builtin("ZeroDivisionError", &standard_error, plain),
            io_error: builtin("IOError", &standard_error, plain),
            index_error: builtin("IndexError", &standard_error, plain),
            range_error: builtin("RangeError", &standard_error, plain),
            system_stack_error: builtin("SystemStackError", &exception, plain),
            object,
            exception,
            script_error,
            standard_error,
            name_error,
        }
    }

    fn all(&self) -> [&ClassRef; 25] {
        [
            &self.object,
            &self.class,
            &self.nil,
            &self.true_class,
            &self.false_class,
            &self.integer,
            &self.float,
            &self.string,
            &self.symbol,
            &self.array,
            &self.hash,
            &self.exception,
            &self.script_error,
            &self.syntax_error,
            &self.standard_error,
            &self.runtime_error,
            &self.type_error,
            &self.argument_error,
            &self.name_error,
            &self.no_method_error,
            &self.zero_division_error,
            &self.io_error,
            &self.index_error,
            &self.range_error,
            &self.system_stack_error,
        ]
    }

    pub(crate) fn exception_class(&self, kind: ExcKind) -> ClassRef {
        let class = match kind {
            ExcKind::Standard => &self.standard_error,
            ExcKind::Runtime => &self.runtime_error,
            ExcKind::Type => &self.type_error,
            ExcKind::Argument => &self.argument_error,
            ExcKind::Name => &self.name_error,
            ExcKind::NoMethod => &self.no_method_error,
            ExcKind::ZeroDivision => &self.zero_division_error,
            ExcKind::Io => &self.io_error,
            ExcKind::Index => &self.index_error,
            ExcKind::Range => &self.range_error,
            ExcKind::Syntax => &self.syntax_error,
            ExcKind::SystemStack => &self.system_stack_error,
        };
        Rc::clone(class)
    }
}

/// Register builtin constants and methods on a freshly opened state.
pub(crate) fn init(state: &mut State) {
    let classes: Vec<ClassRef> = state.builtins.all().into_iter().cloned().collect();
    for class in classes {
        let name = class.name().to_string();
        state.const_set(&name, Value::Class(class));
    }
    kernel::init(state);
    numeric::init(state);
    string::init(state);
    array::init(state);
    hash::init(state);
    exception::init(state);
}

impl State {
    /// Define a builtin method backed by a plain function.
    pub(crate) fn def_builtin(&mut self, class: &ClassRef, name: &str, aspec: Aspec, f: BuiltinFn) {
        let func: NativeFn = Rc::new(move |state: &mut State, recv: Value| {
            let args = state.args();
            f(state, &recv, &args)
        });
        let sym = self.intern(name);
        class.define(sym, Method::Native { func, aspec });
    }

    /// Check an `Aspec::Any` builtin's argument count against `min..=max`.
    pub(crate) fn check_arity(&mut self, args: &[Value], min: usize, max: usize) -> bool {
        if (min..=max).contains(&args.len()) {
            return true;
        }
        let message = if min == max {
            wrong_arity(args.len(), min)
        } else {
            format!(
                "wrong number of arguments (given {}, expected {min}..{max})",
                args.len()
            )
        };
        self.raise(ExcKind::Argument, message);
        false
    }

    /// Raise `TypeError` for a value of the wrong kind and return `nil`.
    pub(crate) fn type_mismatch(&mut self, value: &Value, expected: &str) -> Value {
        let from = self.describe_class(value);
        self.raise(
            ExcKind::Type,
            format!("no implicit conversion of {from} into {expected}"),
        );
        Value::Nil
    }

    /// `to_s` of builtin values without dispatch.
    pub fn format_to_s(&self, value: &Value) -> String {
        match value {
            Value::Nil => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Symbol(sym) => self.sym_name(*sym).to_string(),
            Value::Str(s) => s.borrow().clone(),
            Value::Class(class) => class.name().to_string(),
            Value::Array(_) | Value::Hash(_) => self.format_inspect(value),
            Value::Object(_) if value.identical(&self.top_self) => "main".into(),
            Value::Object(_) if self.is_exception(value) => self.exc_message(value),
            Value::Object(_) | Value::Data(_) => format!("#<{}>", self.class_of(value).name()),
        }
    }

    /// `inspect` of any value without dispatch.
    pub fn format_inspect(&self, value: &Value) -> String {
        let mut out = String::new();
        self.write_inspect(value, &mut out, 0);
        out
    }

    fn write_inspect(&self, value: &Value, out: &mut String, depth: usize) {
        if depth > 16 {
            out.push_str("...");
            return;
        }
        match value {
            Value::Nil => out.push_str("nil"),
            Value::Str(s) => out.push_str(&inspect_str(&s.borrow())),
            Value::Symbol(sym) => {
                let name = self.sym_name(*sym);
                out.push(':');
                if is_plain_symbol(&name) {
                    out.push_str(&name);
                } else {
                    out.push_str(&inspect_str(&name));
                }
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_inspect(item, out, depth + 1);
                }
                out.push(']');
            }
            Value::Hash(hash) => {
                let hash = hash.borrow();
                if hash.is_empty() {
                    out.push_str("{}");
                    return;
                }
                out.push('{');
                for (i, (key, value)) in hash.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    match key {
                        Value::Symbol(sym) if is_plain_symbol(&self.sym_name(*sym)) => {
                            out.push_str(&self.sym_name(*sym));
                            out.push_str(": ");
                        }
                        _ => {
                            self.write_inspect(key, out, depth + 1);
                            out.push_str(" => ");
                        }
                    }
                    self.write_inspect(value, out, depth + 1);
                }
                out.push('}');
            }
            Value::Object(_) if value.identical(&self.top_self) => out.push_str("main"),
            Value::Object(_) if self.is_exception(value) => {
                let class = self.class_of(value);
                let message = self.exc_message(value);
                if message == class.name() {
                    out.push_str(class.name());
                } else {
                    out.push_str(&format!("#<{}: {message}>", class.name()));
                }
            }
            Value::Object(_) | Value::Data(_) => {
                let table = match value {
                    Value::Object(o) => &o.ivars,
                    Value::Data(d) => &d.ivars,
                    _ => return,
                };
                out.push_str("#<");
                out.push_str(self.class_of(value).name());
                let ivars = table.borrow();
                let mut names: Vec<_> = ivars
                    .iter()
                    .map(|(sym, v)| (self.sym_name(*sym), v.clone()))
                    .collect();
                names.sort_by(|a, b| a.0.cmp(&b.0));
                for (i, (name, v)) in names.iter().enumerate() {
                    out.push_str(if i == 0 { " " } else { ", " });
                    out.push_str(name);
                    out.push('=');
                    self.write_inspect(v, out, depth + 1);
                }
                out.push('>');
            }
            other => out.push_str(&self.format_to_s(other)),
        }
    }
}

fn is_plain_symbol(name: &str) -> bool {
    let body = name.strip_prefix('@').unwrap_or(name);
    let body = body.strip_suffix(['?', '!', '=']).unwrap_or(body);
    let identifier = body
        .chars()
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && body.chars().all(|c| c == '_' || c.is_alphanumeric());
    identifier
        || matches!(
            name,
            "+" | "-" | "*" | "/" | "%" | "**" | "==" | "<=>" | "<" | ">" | "<=" | ">=" | "<<" | "[]" | "[]="
        )
}

/// Double-quoted, escaped form of a string.
pub(crate) fn inspect_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\u{1b}' => out.push_str("\\e"),
            '\0' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
