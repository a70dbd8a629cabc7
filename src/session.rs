//! The interpreter session.
//!
//! A [`Session`] owns one interpreter [`State`] and one [`CompileContext`].
//! Top-level locals and method definitions persist across loads into the
//! same session. Both are released together when the session is dropped.
//!
//! # Example
//!
//! ```ignore
//! use rbind::Session;
//!
//! let session = Session::new();
//! session.load_string("def mul(a, b)\n  a * b\nend");
//!
//! assert_eq!(session.call::<i64, _>("mul", (10, 20)), Some(200));
//! assert_eq!(
//!     session.call::<String, _>("mul", ("abc", 3)).as_deref(),
//!     Some("abcabcabc")
//! );
//! ```
//!
//! # Errors
//!
//! Interpreter failures (syntax errors, raised exceptions, argument
//! mismatches) are recorded in the interpreter's exception slot and never
//! turned into host errors implicitly. Query them after a call with
//! [`Session::exists_error`], [`Session::print_error`] or, to get an owned
//! value, [`Session::take_error`] / [`Session::check`].
//!
//! # Reentrancy
//!
//! The session is single-threaded and not reentrant: host functions and
//! methods called by the interpreter must not call back into the session
//! that is running them. Doing so panics on the inner borrow.
//!
//! The interpreter state itself stays private to the session, which keeps
//! the class registry stored in it out of reach:
//!
//! ```compile_fail,E0624
//! let session = rbind::Session::new();
//! session.with_state(|state| state.set_ud(Box::new(0u8)));
//! ```

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::rc::Rc;

use rbind_vm::{ClassRef, CompileContext, NativeFn, State, Sym, Value, VmOptions};

use crate::adapter::{FromArgs, HostFn, ToArgs};
use crate::class::{ClassBinding, ClassRegistry};
use crate::convert::{FromScript, Obj, ToScript};
use crate::error::{RegistrationError, ScriptError};
use crate::function::FunctionHandle;

/// Fluent configuration for a [`Session`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    options: VmOptions,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported in error locations for string loads.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.options.filename = Some(filename.into());
        self
    }

    /// Method call nesting limit before `SystemStackError` is raised.
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.options.max_call_depth = depth;
        self
    }

    /// Sink for `puts`, `print`, `p` and [`Session::p`].
    pub fn stdout(mut self, writer: impl Write + 'static) -> Self {
        self.options.stdout = Box::new(writer);
        self
    }

    /// Sink for [`Session::print_error`].
    pub fn stderr(mut self, writer: impl Write + 'static) -> Self {
        self.options.stderr = Box::new(writer);
        self
    }

    pub fn build(self) -> Session {
        let max_call_depth = self.options.max_call_depth;
        let mut state = State::open(self.options);
        let context = CompileContext::new(&mut state);
        state.set_ud(Box::new(ClassRegistry::default()));
        tracing::debug!(max_call_depth, "session opened");
        Session {
            context: RefCell::new(context),
            state: RefCell::new(state),
        }
    }
}

/// One interpreter state plus its compilation context.
pub struct Session {
    // declared first so it is dropped before the state it belongs to
    context: RefCell<CompileContext>,
    state: RefCell<State>,
}

impl Session {
    /// Open a session with default options.
    pub fn new() -> Self {
        SessionBuilder::default().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Run `f` with the interpreter state borrowed.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a host callback of this same session.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    // ------------------------------------------------------------------
    // evaluation
    // ------------------------------------------------------------------

    /// Compile and run `source` in the session's context, returning the value
    /// of its last expression (`nil` if it raised).
    #[tracing::instrument(level = "debug", skip_all, fields(len = source.len()))]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_string(&self, source: &str) -> Value {
        let mut state = self.state.borrow_mut();
        let mut context = self.context.borrow_mut();
        state.load_string_cxt(source, &mut context)
    }

    /// Like [`load_string`](Self::load_string), reading the source from a
    /// file. An unreadable file raises `IOError` in the interpreter.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_file(&self, path: impl AsRef<Path>) -> Value {
        let mut state = self.state.borrow_mut();
        let mut context = self.context.borrow_mut();
        let value = state.load_file_cxt(path.as_ref(), &mut context);
        if let Some(message) = state.error_string() {
            tracing::debug!(%message, "load_file left an exception pending");
        }
        value
    }

    // ------------------------------------------------------------------
    // calls
    // ------------------------------------------------------------------

    /// Handle to top-level function `name`.
    pub fn get_function<R: FromScript, A: ToArgs>(&self, name: &str) -> FunctionHandle<'_, R, A> {
        FunctionHandle::new(self, None, name)
    }

    /// Handle to method `name` of `receiver`.
    pub fn get_method_function<R: FromScript, A: ToArgs>(
        &self,
        receiver: &Value,
        name: &str,
    ) -> FunctionHandle<'_, R, A> {
        FunctionHandle::new(self, Some(receiver.clone()), name)
    }

    /// Call top-level function `name` once.
    pub fn call<R: FromScript, A: ToArgs>(&self, name: &str, args: A) -> Option<R> {
        self.invoke(None, name, args)
    }

    /// Call method `name` on `receiver` once.
    pub fn call_on<R: FromScript, A: ToArgs>(&self, receiver: &Value, name: &str, args: A) -> Option<R> {
        self.invoke(Some(receiver), name, args)
    }

    pub(crate) fn invoke<R: FromScript, A: ToArgs>(
        &self,
        receiver: Option<&Value>,
        name: &str,
        args: A,
    ) -> Option<R> {
        let mut state = self.state.borrow_mut();
        if state.call_depth() == 0 {
            state.clear_exc();
        }
        let receiver = match receiver {
            Some(recv) => recv.clone(),
            None => state.top_self(),
        };
        let args = args.to_values(&mut state);
        if state.exc().is_some() {
            return None;
        }
        tracing::trace!(method = name, argc = args.len(), "calling into interpreter");
        let result = state.funcall(&receiver, name, &args);
        if state.exc().is_some() {
            return None;
        }
        R::from_value(&mut state, &result)
    }

    // ------------------------------------------------------------------
    // collections
    // ------------------------------------------------------------------

    /// Visit every element of an interpreter array in index order, converted
    /// to `T`. Stops at the first element that fails to convert.
    pub fn each_array<T: FromScript>(&self, array: &Value, mut f: impl FnMut(T)) {
        self.walk_indexed(array, |item| match self.unbox::<T>(&item) {
            Some(value) => {
                f(value);
                ControlFlow::Continue(())
            }
            None => ControlFlow::Break(()),
        });
    }

    /// Visit every key/value pair of an interpreter hash, in the order its
    /// `keys` method returns them.
    pub fn each_hash<K: FromScript, V: FromScript>(&self, hash: &Value, mut f: impl FnMut(K, V)) {
        let Some(keys) = self.invoke::<Value, _>(Some(hash), "keys", ()) else {
            return;
        };
        self.walk_indexed(&keys, |key| {
            let Some(k) = self.unbox::<K>(&key) else {
                return ControlFlow::Break(());
            };
            let Some(v) = self.invoke::<V, _>(Some(hash), "[]", (key,)) else {
                return ControlFlow::Break(());
            };
            f(k, v);
            ControlFlow::Continue(())
        });
    }

    /// Drive `visit` over `collection[0..collection.size]`. The state is not
    /// borrowed while `visit` runs.
    fn walk_indexed(&self, collection: &Value, mut visit: impl FnMut(Value) -> ControlFlow<()>) {
        let Some(size) = self.invoke::<i64, _>(Some(collection), "size", ()) else {
            return;
        };
        for index in 0..size {
            let Some(item) = self.invoke::<Value, _>(Some(collection), "[]", (index,)) else {
                return;
            };
            if visit(item).is_break() {
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // values
    // ------------------------------------------------------------------

    pub fn is_nil(&self, value: &Value) -> bool {
        value.is_nil()
    }

    /// Intern `name` as a symbol.
    pub fn sym(&self, name: &str) -> Sym {
        self.state.borrow_mut().intern(name)
    }

    /// The text of a string value, or the `to_s` form of a builtin value.
    pub fn to_string(&self, value: &Value) -> String {
        self.state.borrow().format_to_s(value)
    }

    /// Convert a boxed value to `T`. Raises and returns `None` on mismatch.
    pub fn unbox<T: FromScript>(&self, value: &Value) -> Option<T> {
        T::from_value(&mut self.state.borrow_mut(), value)
    }

    pub fn to_value<T: ToScript>(&self, value: T) -> Value {
        value.to_value(&mut self.state.borrow_mut())
    }

    /// The host object behind `value` if it is a `T` instance. Does not raise.
    pub fn get_data<T: 'static>(&self, value: &Value) -> Option<Obj<T>> {
        let state = self.state.borrow();
        let entry = ClassRegistry::lookup::<T>(&state)?;
        state.data_get(value, &entry.data_type).map(Obj::from_data)
    }

    // ------------------------------------------------------------------
    // registration
    // ------------------------------------------------------------------

    /// Bind host type `T` to a new interpreter class.
    pub fn install_class<T: 'static>(
        &self,
        name: &str,
        superclass: Option<&ClassRef>,
    ) -> Result<ClassBinding<T>, RegistrationError> {
        ClassBinding::install(self, name, superclass)
    }

    /// The binding installed for `T`.
    pub fn class_binding<T: 'static>(&self) -> Result<ClassBinding<T>, RegistrationError> {
        ClassBinding::lookup(self)
    }

    /// Look up an interpreter class by constant name, e.g. to use as a
    /// superclass.
    pub fn class(&self, name: &str) -> Option<ClassRef> {
        self.state
            .borrow()
            .const_get(name)
            .and_then(|v| v.as_class().cloned())
    }

    /// Expose host function `f` as top-level interpreter function `name`.
    pub fn define_function<Args, R, F>(&self, name: &str, f: F)
    where
        Args: FromArgs + 'static,
        R: ToScript + 'static,
        F: HostFn<Args, R>,
    {
        let func: NativeFn = Rc::new(move |state: &mut State, _recv: Value| {
            let Some(args) = Args::extract(state) else {
                return Value::Nil;
            };
            f.call_fn(args).to_value(state)
        });
        self.state
            .borrow_mut()
            .define_kernel_method(name, func, Args::aspec());
        tracing::debug!(function = name, arity = Args::ARITY, "host function defined");
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    /// Whether an interpreter exception is pending.
    pub fn exists_error(&self) -> bool {
        self.state.borrow().exc().is_some()
    }

    /// `line N: message (ClassName)` for the pending exception.
    pub fn error_string(&self) -> Option<String> {
        self.state.borrow().error_string()
    }

    /// Write the pending exception to the error sink.
    pub fn print_error(&self) {
        self.state.borrow_mut().print_error();
    }

    /// Print and keep the pending exception, if any. Returns whether there
    /// was one.
    pub fn print_error_if_exists(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.exc().is_none() {
            return false;
        }
        state.print_error();
        true
    }

    /// Write `value.inspect` to the output sink.
    pub fn p(&self, value: &Value) {
        let mut state = self.state.borrow_mut();
        state.p(value);
        state.flush();
    }

    /// Clear and return the pending exception.
    pub fn take_error(&self) -> Option<ScriptError> {
        let mut state = self.state.borrow_mut();
        let line = state.exc_line().filter(|line| *line > 0);
        let exc = state.take_exc()?;
        Some(ScriptError {
            class_name: state.class_of(&exc).name().to_string(),
            message: state.exc_message(&exc),
            line,
        })
    }

    /// `Err` with the pending exception, clearing it.
    pub fn check(&self) -> Result<(), ScriptError> {
        match self.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Session");
        if let Ok(state) = self.state.try_borrow() {
            out.field("classes", &state.ud::<ClassRegistry>().map_or(0, ClassRegistry::len));
            out.field("pending_error", &state.exc().is_some());
        }
        out.finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!("session closed");
    }
}
