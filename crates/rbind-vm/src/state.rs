//! Interpreter state and the host-facing ABI.
//!
//! Everything the binding layer needs goes through [`State`]: class and
//! method definition, positional argument extraction, value boxing, data
//! object tagging, function invocation and the single exception slot.

use std::any::Any;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::args::{ArgFormat, ArgSlot, ArgSlots};
use crate::builtins::{self, Builtins};
use crate::class::{Aspec, ClassFlags, ClassRef, Method, NativeFn, RClass};
use crate::context::CompileContext;
use crate::error::VmError;
use crate::eval::{Frame, Unwind};
use crate::parser;
use crate::symbol::{Sym, SymbolTable};
use crate::value::{DataType, RData, RObject, Value};

/// Default nesting limit for method calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Options fixed when a state is opened.
pub struct VmOptions {
    /// Method call nesting limit; exceeding it raises `SystemStackError`.
    pub max_call_depth: usize,
    /// Name used in error locations for string loads.
    pub filename: Option<String>,
    /// Sink for `puts`, `print` and `p`.
    pub stdout: Box<dyn Write>,
    /// Sink for [`State::print_error`].
    pub stderr: Box<dyn Write>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            filename: None,
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }
}

impl fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmOptions")
            .field("max_call_depth", &self.max_call_depth)
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

/// Builtin exception classes that native code raises by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcKind {
    Standard,
    Runtime,
    Type,
    Argument,
    Name,
    NoMethod,
    ZeroDivision,
    Io,
    Index,
    Range,
    Syntax,
    SystemStack,
}

/// One active method invocation.
#[derive(Debug)]
pub(crate) struct CallInfo {
    pub mid: Sym,
    pub args: Rc<[Value]>,
}

/// Symbols the interpreter looks up on hot paths.
pub(crate) struct CommonSyms {
    pub initialize: Sym,
    pub to_s: Sym,
    pub inspect: Sym,
    pub message: Sym,
    pub eq: Sym,
    pub cmp: Sym,
}

impl CommonSyms {
    fn new(symbols: &mut SymbolTable) -> Self {
        Self {
            initialize: symbols.intern("initialize"),
            to_s: symbols.intern("to_s"),
            inspect: symbols.intern("inspect"),
            message: symbols.intern("@message"),
            eq: symbols.intern("=="),
            cmp: symbols.intern("<=>"),
        }
    }
}

/// An interpreter instance.
pub struct State {
    pub(crate) symbols: SymbolTable,
    pub(crate) builtins: Builtins,
    pub(crate) syms: CommonSyms,
    pub(crate) consts: FxHashMap<Sym, Value>,
    pub(crate) top_self: Value,
    pub(crate) exc: Option<Value>,
    exc_origin: Option<(Option<Rc<str>>, u32)>,
    pub(crate) ci: Vec<CallInfo>,
    pub(crate) line: u32,
    pub(crate) current_file: Option<Rc<str>>,
    options: VmOptions,
    pub(crate) no_args: Rc<[Value]>,
    ud: Option<Box<dyn Any>>,
}

impl State {
    /// Allocate a state with all builtin classes defined.
    pub fn open(options: VmOptions) -> Self {
        let mut symbols = SymbolTable::new();
        let syms = CommonSyms::new(&mut symbols);
        let builtins = Builtins::new();
        let top_self = Value::Object(Rc::new(RObject::new(Rc::clone(&builtins.object))));
        let mut state = Self {
            symbols,
            builtins,
            syms,
            consts: FxHashMap::default(),
            top_self,
            exc: None,
            exc_origin: None,
            ci: Vec::new(),
            line: 0,
            current_file: None,
            options,
            no_args: Rc::from(Vec::new()),
            ud: None,
        };
        builtins::init(&mut state);
        tracing::debug!(
            max_call_depth = state.options.max_call_depth,
            "interpreter state opened"
        );
        state
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    // ------------------------------------------------------------------
    // symbols and constants
    // ------------------------------------------------------------------

    pub fn intern(&mut self, name: &str) -> Sym {
        self.symbols.intern(name)
    }

    pub fn sym_name(&self, sym: Sym) -> Rc<str> {
        self.symbols.name(sym)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// The receiver of top-level code.
    pub fn top_self(&self) -> Value {
        self.top_self.clone()
    }

    pub fn object_class(&self) -> ClassRef {
        Rc::clone(&self.builtins.object)
    }

    pub fn const_get(&self, name: &str) -> Option<Value> {
        let sym = self.symbols.lookup(name)?;
        self.consts.get(&sym).cloned()
    }

    pub fn const_set(&mut self, name: &str, value: Value) {
        let sym = self.intern(name);
        self.consts.insert(sym, value);
    }

    /// A class constant by name.
    pub fn class_get(&self, name: &str) -> Option<ClassRef> {
        self.const_get(name).and_then(|v| v.as_class().cloned())
    }

    /// Class of any value.
    pub fn class_of(&self, value: &Value) -> ClassRef {
        let b = &self.builtins;
        let class = match value {
            Value::Nil => &b.nil,
            Value::Bool(true) => &b.true_class,
            Value::Bool(false) => &b.false_class,
            Value::Int(_) => &b.integer,
            Value::Float(_) => &b.float,
            Value::Symbol(_) => &b.symbol,
            Value::Str(_) => &b.string,
            Value::Array(_) => &b.array,
            Value::Hash(_) => &b.hash,
            Value::Object(o) => &o.class,
            Value::Data(d) => &d.class,
            Value::Class(_) => &b.class,
        };
        Rc::clone(class)
    }

    pub fn is_a(&self, value: &Value, class: &ClassRef) -> bool {
        self.class_of(value).is_subclass_of(class)
    }

    // ------------------------------------------------------------------
    // definition
    // ------------------------------------------------------------------

    /// Define a class under `name`, inheriting `superclass` or `Object`.
    /// An existing class of the same name is returned as is.
    pub fn define_class(&mut self, name: &str, superclass: Option<&ClassRef>) -> ClassRef {
        if let Some(existing) = self.class_get(name) {
            tracing::debug!(class = name, "reopening existing class");
            return existing;
        }
        let superclass = superclass.cloned().unwrap_or_else(|| self.object_class());
        let class = RClass::new_subclass(name, &superclass);
        self.const_set(name, Value::Class(Rc::clone(&class)));
        tracing::debug!(class = name, superclass = superclass.name(), "class defined");
        class
    }

    /// Bind a native thunk as an instance method of `class`.
    pub fn define_method(&mut self, class: &ClassRef, name: &str, func: NativeFn, aspec: Aspec) {
        let sym = self.intern(name);
        class.define(sym, Method::Native { func, aspec });
        tracing::trace!(class = class.name(), method = name, ?aspec, "native method defined");
    }

    /// Bind a native thunk as a top-level function.
    pub fn define_kernel_method(&mut self, name: &str, func: NativeFn, aspec: Aspec) {
        let object = self.object_class();
        self.define_method(&object, name, func, aspec);
    }

    // ------------------------------------------------------------------
    // arguments
    // ------------------------------------------------------------------

    /// Arguments of the innermost native call.
    pub fn args(&self) -> Rc<[Value]> {
        self.ci
            .last()
            .map(|ci| Rc::clone(&ci.args))
            .unwrap_or_else(|| Rc::clone(&self.no_args))
    }

    /// Name of the innermost method being executed.
    pub fn current_method(&self) -> Option<Rc<str>> {
        self.ci.last().map(|ci| self.symbols.name(ci.mid))
    }

    /// Extract the current call's arguments according to `format`.
    ///
    /// The argument count must match the format length exactly. Every
    /// argument is converted before anything is returned; on the first
    /// mismatch an exception is raised and `None` comes back.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn get_args(&mut self, format: &str) -> Option<ArgSlots> {
        let codes: SmallVec<[ArgFormat; 6]> = match format.chars().map(ArgFormat::try_from).collect() {
            Ok(codes) => codes,
            Err(bad) => {
                self.raise(ExcKind::Argument, format!("invalid argument specifier '{bad}'"));
                return None;
            }
        };
        let args = self.args();
        if args.len() != codes.len() {
            self.raise(ExcKind::Argument, wrong_arity(args.len(), codes.len()));
            return None;
        }
        let mut slots = ArgSlots::new();
        for (&code, arg) in codes.iter().zip(args.iter()) {
            slots.push(self.convert_arg(code, arg)?);
        }
        tracing::trace!(format, "arguments extracted");
        Some(slots)
    }

    /// Convert a single value as `get_args` would for `code`, raising on a
    /// mismatch.
    pub fn convert_arg(&mut self, code: ArgFormat, value: &Value) -> Option<ArgSlot> {
        let slot = match (code, value) {
            (ArgFormat::Value, v) => ArgSlot::Value(v.clone()),
            (ArgFormat::Bool, v) => ArgSlot::Bool(v.truthy()),
            (ArgFormat::Int, Value::Int(v)) => ArgSlot::Int(*v),
            (ArgFormat::Int, Value::Float(f)) => {
                if !f.is_finite() || *f >= i64::MAX as f64 || *f < i64::MIN as f64 {
                    let shown = builtins::format_float(*f);
                    self.raise(ExcKind::Range, format!("float {shown} out of range of integer"));
                    return None;
                }
                ArgSlot::Int(*f as i64)
            }
            (ArgFormat::Float, Value::Float(f)) => ArgSlot::Float(*f),
            (ArgFormat::Float, Value::Int(v)) => ArgSlot::Float(*v as f64),
            (ArgFormat::Str, Value::Str(s)) => ArgSlot::Str(s.borrow().clone()),
            (ArgFormat::Sym, Value::Symbol(sym)) => ArgSlot::Sym(*sym),
            (ArgFormat::Sym, Value::Str(s)) => {
                let name = s.borrow().clone();
                ArgSlot::Sym(self.intern(&name))
            }
            (ArgFormat::Sym, other) => {
                let shown = self.format_inspect(other);
                self.raise(ExcKind::Type, format!("{shown} is not a symbol nor a string"));
                return None;
            }
            (code, other) => {
                let from = self.describe_class(other);
                self.raise(
                    ExcKind::Type,
                    format!("no implicit conversion of {from} into {}", code.target_name()),
                );
                return None;
            }
        };
        Some(slot)
    }

    /// `nil`, `true` and `false` by name, everything else by class name.
    pub(crate) fn describe_class(&self, value: &Value) -> String {
        match value {
            Value::Nil => "nil".into(),
            Value::Bool(b) => b.to_string(),
            other => self.class_of(other).name().to_string(),
        }
    }

    // ------------------------------------------------------------------
    // boxing and data objects
    // ------------------------------------------------------------------

    pub fn str_new(&self, s: &str) -> Value {
        Value::string(s)
    }

    pub fn sym_value(&mut self, name: &str) -> Value {
        Value::Symbol(self.intern(name))
    }

    /// Allocate a data object of `class`.
    pub fn data_object_alloc(
        &mut self,
        class: &ClassRef,
        data_type: Option<Rc<DataType>>,
        payload: Option<Box<dyn Any>>,
    ) -> Value {
        Value::Data(Rc::new(RData::new(Rc::clone(class), data_type, payload)))
    }

    /// Attach a tag and payload to an existing data object, as a constructor
    /// does. Raises `TypeError` when `obj` is not a data object.
    pub fn data_init(&mut self, obj: &Value, data_type: Rc<DataType>, payload: Box<dyn Any>) -> bool {
        match obj {
            Value::Data(data) => {
                data.set(data_type, payload);
                true
            }
            other => {
                let from = self.describe_class(other);
                self.raise(
                    ExcKind::Type,
                    format!("wrong argument type {from} (expected {})", data_type.struct_name),
                );
                false
            }
        }
    }

    /// The data object behind `value` if it carries `data_type`; raises
    /// `TypeError` otherwise.
    pub fn data_check_get(&mut self, value: &Value, data_type: &Rc<DataType>) -> Option<Rc<RData>> {
        if let Some(data) = self.data_get(value, data_type) {
            return Some(data);
        }
        let from = match value.as_data().and_then(|d| d.data_type()) {
            Some(other) => other.struct_name.clone(),
            None => self.describe_class(value),
        };
        self.raise(
            ExcKind::Type,
            format!("wrong argument type {from} (expected {})", data_type.struct_name),
        );
        None
    }

    /// The data object behind `value` if it carries `data_type`.
    pub fn data_get(&self, value: &Value, data_type: &Rc<DataType>) -> Option<Rc<RData>> {
        match value {
            Value::Data(data) if data.is_type(data_type) => Some(Rc::clone(data)),
            _ => None,
        }
    }

    pub fn ivar_get(&self, obj: &Value, name: Sym) -> Value {
        let table = match obj {
            Value::Object(o) => &o.ivars,
            Value::Data(d) => &d.ivars,
            _ => return Value::Nil,
        };
        table.borrow().get(&name).cloned().unwrap_or_default()
    }

    /// Set an instance variable. Raises for values that cannot carry any.
    pub fn ivar_set(&mut self, obj: &Value, name: Sym, value: Value) -> bool {
        let table = match obj {
            Value::Object(o) => &o.ivars,
            Value::Data(d) => &d.ivars,
            other => {
                let from = self.describe_class(other);
                self.raise(
                    ExcKind::Runtime,
                    format!("can't set instance variable on {from}"),
                );
                return false;
            }
        };
        table.borrow_mut().insert(name, value);
        true
    }

    // ------------------------------------------------------------------
    // invocation
    // ------------------------------------------------------------------

    /// Call `name` on `recv` from host code.
    ///
    /// At the outermost level a stale exception is cleared first. When called
    /// from inside a native method while an exception is already pending,
    /// nothing runs and `nil` is returned. A raise leaves the exception set
    /// and returns `nil`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn funcall(&mut self, recv: &Value, name: &str, args: &[Value]) -> Value {
        if self.ci.is_empty() {
            self.clear_exc();
        } else if self.exc.is_some() {
            return Value::Nil;
        }
        tracing::trace!(method = name, argc = args.len(), "funcall");
        let mid = self.intern(name);
        match self.call_method(recv.clone(), mid, args.to_vec()) {
            Ok(value) => value,
            Err(Unwind::Raise) => Value::Nil,
            Err(Unwind::Return(v) | Unwind::Break(v) | Unwind::Next(v)) => v,
        }
    }

    /// Current method nesting.
    pub fn call_depth(&self) -> usize {
        self.ci.len()
    }

    // ------------------------------------------------------------------
    // loading
    // ------------------------------------------------------------------

    /// Compile and run `source` against `cxt`. Returns the value of the last
    /// expression, or `nil` with the exception slot set.
    #[cfg_attr(feature = "profiling", profiling::function)]
    #[tracing::instrument(level = "debug", skip_all, fields(len = source.len()))]
    pub fn load_string_cxt(&mut self, source: &str, cxt: &mut CompileContext) -> Value {
        let filename = cxt.filename().map(Rc::from);
        self.load_source(source, filename, cxt)
    }

    /// Read and run a source file. An unreadable file raises `IOError`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_file_cxt(&mut self, path: impl AsRef<Path>, cxt: &mut CompileContext) -> Value {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(source) => {
                let filename: Rc<str> = Rc::from(path.display().to_string());
                self.load_source(&source, Some(filename), cxt)
            }
            Err(source) => {
                let err = VmError::Io {
                    path: path.display().to_string(),
                    source,
                };
                tracing::debug!(error = %err, "file load failed");
                if self.ci.is_empty() {
                    self.clear_exc();
                }
                self.raise_load_error(err);
                Value::Nil
            }
        }
    }

    /// Run `source` in a throwaway context.
    pub fn load_string(&mut self, source: &str) -> Value {
        let mut cxt = CompileContext::new(self);
        self.load_string_cxt(source, &mut cxt)
    }

    fn load_source(&mut self, source: &str, filename: Option<Rc<str>>, cxt: &mut CompileContext) -> Value {
        if self.ci.is_empty() {
            self.clear_exc();
        }
        let previous_file = std::mem::replace(&mut self.current_file, filename);
        let program = parser::parse(source, 1, &mut self.symbols, cxt.locals.keys().copied());
        let result = match program {
            Ok(program) => {
                for sym in &program.locals {
                    cxt.locals.entry(*sym).or_default();
                }
                let mut frame = Frame {
                    self_val: self.top_self(),
                    locals: std::mem::take(&mut cxt.locals),
                    target: self.object_class(),
                };
                let result = self.eval_body(&program.body, &mut frame);
                cxt.locals = frame.locals;
                match result {
                    Ok(value) => value,
                    Err(Unwind::Raise) => Value::Nil,
                    Err(Unwind::Return(v) | Unwind::Break(v) | Unwind::Next(v)) => v,
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "parse failed");
                self.raise_load_error(err);
                Value::Nil
            }
        };
        self.current_file = previous_file;
        result
    }

    fn raise_load_error(&mut self, err: VmError) {
        match err {
            VmError::Syntax { line, message } => {
                self.line = line;
                self.raise(ExcKind::Syntax, message);
            }
            io @ VmError::Io { .. } => self.raise(ExcKind::Io, io.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // exceptions
    // ------------------------------------------------------------------

    /// The pending exception, if any.
    pub fn exc(&self) -> Option<&Value> {
        self.exc.as_ref()
    }

    /// Line the pending exception was raised on.
    pub fn exc_line(&self) -> Option<u32> {
        self.exc_origin.as_ref().map(|(_, line)| *line)
    }

    pub fn clear_exc(&mut self) {
        self.exc = None;
        self.exc_origin = None;
    }

    pub fn take_exc(&mut self) -> Option<Value> {
        self.exc_origin = None;
        self.exc.take()
    }

    pub(crate) fn stash_exc(&mut self) -> Option<(Value, Option<(Option<Rc<str>>, u32)>)> {
        let exc = self.exc.take()?;
        Some((exc, self.exc_origin.take()))
    }

    pub(crate) fn restore_exc(&mut self, stashed: Option<(Value, Option<(Option<Rc<str>>, u32)>)>) {
        if let Some((exc, origin)) = stashed {
            self.exc = Some(exc);
            self.exc_origin = origin;
        }
    }

    /// Raise a builtin exception with `message`.
    pub fn raise(&mut self, kind: ExcKind, message: impl Into<String>) {
        let class = self.builtins.exception_class(kind);
        let exc = self.exception_new(&class, Value::string(&message.into()));
        self.raise_value(exc);
    }

    /// Raise an already constructed exception object.
    pub fn raise_value(&mut self, exc: Value) {
        self.exc_origin = Some((self.current_file.clone(), self.line));
        self.exc = Some(exc);
    }

    pub(crate) fn exception_new(&mut self, class: &ClassRef, message: Value) -> Value {
        let exc = Value::Object(Rc::new(RObject::new(Rc::clone(class))));
        if !message.is_nil() {
            let name = self.syms.message;
            self.ivar_set(&exc, name, message);
        }
        exc
    }

    /// Whether `value` is an exception object.
    pub fn is_exception(&self, value: &Value) -> bool {
        matches!(value, Value::Object(_)) && self.is_a(value, &self.builtins.exception)
    }

    /// Message of an exception object; the class name when it has none.
    pub fn exc_message(&self, exc: &Value) -> String {
        match self.ivar_get(exc, self.syms.message) {
            Value::Nil => self.class_of(exc).name().to_string(),
            Value::Str(s) => s.borrow().clone(),
            other => self.format_to_s(&other),
        }
    }

    /// `file:line: message (ClassName)` for the pending exception.
    pub fn error_string(&self) -> Option<String> {
        let exc = self.exc.as_ref()?;
        let class = self.class_of(exc);
        let message = self.exc_message(exc);
        let location = match &self.exc_origin {
            Some((Some(file), line)) => format!("{file}:{line}: "),
            Some((None, line)) if *line > 0 => format!("line {line}: "),
            _ => String::new(),
        };
        Some(format!("{location}{message} ({})", class.name()))
    }

    /// Write the pending exception to the error sink.
    pub fn print_error(&mut self) {
        let Some(text) = self.error_string() else {
            return;
        };
        if let Err(err) = writeln!(self.options.stderr, "{text}") {
            tracing::warn!(error = %err, "failed to write error report");
        }
    }

    /// Write the inspected form of `value` to the output sink.
    pub fn p(&mut self, value: &Value) {
        let text = self.format_inspect(value);
        self.write_out(&format!("{text}\n"));
    }

    pub(crate) fn write_out(&mut self, text: &str) {
        if let Err(err) = self.options.stdout.write_all(text.as_bytes()) {
            tracing::warn!(error = %err, "failed to write output");
        }
    }

    pub fn flush(&mut self) {
        if let Err(err) = self.options.stdout.flush() {
            tracing::warn!(error = %err, "failed to flush output");
        }
    }

    // ------------------------------------------------------------------
    // user data
    // ------------------------------------------------------------------

    /// Attach owner data to this state, replacing any previous value.
    pub fn set_ud(&mut self, ud: Box<dyn Any>) {
        self.ud = Some(ud);
    }

    pub fn ud<T: Any>(&self) -> Option<&T> {
        self.ud.as_ref()?.downcast_ref::<T>()
    }

    pub fn ud_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.ud.as_mut()?.downcast_mut::<T>()
    }

    pub(crate) fn is_special_alloc(&self, class: &ClassRef) -> bool {
        class.flags().contains(ClassFlags::SPECIAL_ALLOC)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        self.exc = None;
        self.ud = None;
        // native closures may hold values; clear method tables so they go
        // with the constants
        for value in self.consts.values() {
            if let Value::Class(class) = value {
                class.clear_methods();
            }
        }
        self.consts.clear();
        tracing::debug!("interpreter state closed");
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("symbols", &self.symbols.len())
            .field("consts", &self.consts.len())
            .field("call_depth", &self.ci.len())
            .field("exc", &self.exc)
            .finish_non_exhaustive()
    }
}

pub(crate) fn wrong_arity(given: usize, expected: usize) -> String {
    format!("wrong number of arguments (given {given}, expected {expected})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> State {
        State::open(VmOptions {
            stdout: Box::new(io::sink()),
            stderr: Box::new(io::sink()),
            ..VmOptions::default()
        })
    }

    #[test]
    fn builtin_classes_are_constants() {
        let state = state();
        for name in ["Object", "Integer", "String", "Array", "Hash", "StandardError", "TypeError"] {
            assert!(state.class_get(name).is_some(), "{name} missing");
        }
    }

    #[test]
    fn define_class_twice_returns_existing() {
        let mut state = state();
        let a = state.define_class("Person", None);
        let b = state.define_class("Person", None);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(a.is_subclass_of(&state.object_class()));
    }

    #[test]
    fn raise_sets_slot_and_clear_resets() {
        let mut state = state();
        state.raise(ExcKind::Type, "bad");
        let exc = state.exc().cloned().expect("pending");
        assert_eq!(state.class_of(&exc).name(), "TypeError");
        assert_eq!(state.exc_message(&exc), "bad");
        state.clear_exc();
        assert!(state.exc().is_none());
    }

    #[test]
    fn user_data_downcasts() {
        let mut state = state();
        state.set_ud(Box::new(41_u32));
        *state.ud_mut::<u32>().expect("u32") += 1;
        assert_eq!(state.ud::<u32>(), Some(&42));
        assert!(state.ud::<String>().is_none());
    }

    #[test]
    fn data_check_get_raises_on_mismatch() {
        let mut state = state();
        let class = state.define_class("Thing", None);
        let a = DataType::new("A", |p| drop(p));
        let b = DataType::new("B", |p| drop(p));
        let obj = state.data_object_alloc(&class, Some(Rc::clone(&a)), Some(Box::new(1_u8)));
        assert!(state.data_get(&obj, &b).is_none());
        assert!(state.exc().is_none());
        assert!(state.data_check_get(&obj, &a).is_some());
        assert!(state.data_check_get(&obj, &b).is_none());
        let exc = state.exc().cloned().expect("raised");
        assert_eq!(state.exc_message(&exc), "wrong argument type A (expected B)");
    }

    #[test]
    fn error_string_includes_location_and_class() {
        let mut state = state();
        state.load_string("1 +");
        let text = state.error_string().expect("syntax error pending");
        assert!(text.starts_with("line 1: "), "{text}");
        assert!(text.ends_with("(SyntaxError)"), "{text}");
    }
}
