//! Class registration.
//!
//! [`Session::install_class`] creates an interpreter class for a host type
//! `T` whose instances are data objects carrying a `T`. The returned
//! [`ClassBinding`] then registers a constructor and methods:
//!
//! ```ignore
//! let person = session.install_class::<Person>("Person", None)?;
//! person
//!     .definer(&session)
//!     .constructor(|name: String, age: i32| Person { name, age })
//!     .method("greeting", |p: &mut Person| p.greeting());
//! ```
//!
//! Ownership: an instance created by the interpreter (`Person.new`) or moved
//! in with [`Session::wrap`] belongs to the interpreter. Its payload is
//! dropped by [`free_instance`] when the last reference goes away; host code
//! only ever holds [`Obj`] handles, which keep the object alive but never
//! free it on their own.

use std::any::{Any, TypeId, type_name};
use std::marker::PhantomData;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use rbind_vm::{ClassFlags, ClassRef, DataType, ExcKind, InstanceTT, NativeFn, RData, State, Value};

use crate::adapter::{FromArgs, HostFn, HostMethod, HostMethodRef, ToArgs};
use crate::convert::{Obj, ToScript};
use crate::error::RegistrationError;
use crate::session::Session;

/// What the session knows about one bound host type.
#[derive(Debug)]
pub(crate) struct ClassEntry {
    pub name: String,
    pub class: ClassRef,
    pub data_type: Rc<DataType>,
}

/// Per-session map from host type to class binding, kept in the state's
/// user-data slot.
#[derive(Debug, Default)]
pub(crate) struct ClassRegistry {
    entries: FxHashMap<TypeId, Rc<ClassEntry>>,
}

impl ClassRegistry {
    pub fn get<T: 'static>(&self) -> Option<Rc<ClassEntry>> {
        self.entries.get(&TypeId::of::<T>()).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entry for `T` in the registry attached to `state`.
    pub fn lookup<T: 'static>(state: &State) -> Option<Rc<ClassEntry>> {
        state.ud::<ClassRegistry>()?.get::<T>()
    }

    /// Record `entry` in the registry [`SessionBuilder::build`] attached to
    /// `state`.
    ///
    /// [`SessionBuilder::build`]: crate::SessionBuilder::build
    fn register<T: 'static>(state: &mut State, entry: Rc<ClassEntry>) {
        if let Some(registry) = state.ud_mut::<ClassRegistry>() {
            registry.entries.insert(TypeId::of::<T>(), entry);
        }
    }
}

/// Destructor thunk for data objects carrying a `T`.
pub(crate) fn free_instance<T: 'static>(payload: Box<dyn Any>) {
    match payload.downcast::<T>() {
        Ok(instance) => {
            tracing::trace!(host_type = type_name::<T>(), "host instance released");
            drop(instance);
        }
        Err(other) => {
            tracing::warn!(
                host_type = type_name::<T>(),
                "released payload has an unexpected type"
            );
            drop(other);
        }
    }
}

/// The binding between host type `T` and its interpreter class.
pub struct ClassBinding<T> {
    entry: Rc<ClassEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ClassBinding<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Rc::clone(&self.entry),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ClassBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassBinding")
            .field("name", &self.entry.name)
            .field("host_type", &type_name::<T>())
            .finish()
    }
}

impl<T: 'static> ClassBinding<T> {
    /// Define class `name` (under `superclass`, or `Object`) for `T`.
    ///
    /// Fails if `T` is already bound in this session.
    pub fn install(
        session: &Session,
        name: &str,
        superclass: Option<&ClassRef>,
    ) -> Result<Self, RegistrationError> {
        session.with_state(|state| {
            if let Some(existing) = ClassRegistry::lookup::<T>(state) {
                return Err(RegistrationError::AlreadyRegistered {
                    name: existing.name.clone(),
                });
            }
            let class = state.define_class(name, superclass);
            class.insert_flags(ClassFlags::DATA_INSTANCES);
            class.set_instance_tt(InstanceTT::Data);
            let entry = Rc::new(ClassEntry {
                name: name.to_string(),
                class,
                data_type: DataType::new(name, free_instance::<T>),
            });
            ClassRegistry::register::<T>(state, Rc::clone(&entry));
            tracing::debug!(class = name, host_type = type_name::<T>(), "class installed");
            Ok(Self {
                entry,
                _marker: PhantomData,
            })
        })
    }

    /// The binding previously installed for `T`.
    pub fn lookup(session: &Session) -> Result<Self, RegistrationError> {
        session
            .with_state(|state| ClassRegistry::lookup::<T>(state))
            .map(|entry| Self {
                entry,
                _marker: PhantomData,
            })
            .ok_or(RegistrationError::NotRegistered {
                type_name: type_name::<T>(),
            })
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn class(&self) -> &ClassRef {
        &self.entry.class
    }

    /// The class as a boxed value, e.g. to call `new` on it.
    pub fn class_value(&self) -> Value {
        Value::Class(Rc::clone(&self.entry.class))
    }

    pub fn data_type(&self) -> &Rc<DataType> {
        &self.entry.data_type
    }

    /// Start registering the constructor and methods.
    pub fn definer<'s>(&self, session: &'s Session) -> ClassDefiner<'s, T> {
        ClassDefiner {
            session,
            binding: self.clone(),
        }
    }
}

/// Fluent registration of a bound class's constructor and methods.
pub struct ClassDefiner<'s, T> {
    session: &'s Session,
    binding: ClassBinding<T>,
}

impl<'s, T: 'static> ClassDefiner<'s, T> {
    /// Register `initialize`: the interpreter must pass exactly the
    /// constructor's arity, and the constructed `T` becomes the new object's
    /// payload.
    pub fn constructor<Args, F>(self, ctor: F) -> Self
    where
        Args: FromArgs + 'static,
        F: HostFn<Args, T>,
    {
        let data_type = Rc::clone(self.binding.data_type());
        let func: NativeFn = Rc::new(move |state: &mut State, recv: Value| {
            let Some(args) = Args::extract(state) else {
                return Value::Nil;
            };
            let instance = ctor.call_fn(args);
            if !state.data_init(&recv, Rc::clone(&data_type), Box::new(instance)) {
                return Value::Nil;
            }
            recv
        });
        self.define("initialize", func, Args::aspec());
        self
    }

    /// Register method `name` backed by `f(&mut T, args...)`.
    ///
    /// The receiver is resolved through the interpreter's data tag check,
    /// which raises `TypeError` for a foreign object. It stays exclusively
    /// borrowed during the call, so passing the receiver as one of its own
    /// arguments raises `RuntimeError`; see [`method_ref`](Self::method_ref).
    ///
    /// The receiver parameter must be the bound type:
    ///
    /// ```compile_fail
    /// use rbind::Session;
    ///
    /// struct Person {
    ///     age: i32,
    /// }
    ///
    /// struct Pet {
    ///     age: i32,
    /// }
    ///
    /// let session = Session::new();
    /// let Ok(binding) = session.install_class::<Person>("Person", None) else {
    ///     return;
    /// };
    /// binding.definer(&session).method("age", |p: &mut Pet| p.age);
    /// ```
    pub fn method<Args, R, F>(self, name: &str, f: F) -> Self
    where
        Args: FromArgs + 'static,
        R: ToScript + 'static,
        F: HostMethod<T, Args, R>,
    {
        let data_type = Rc::clone(self.binding.data_type());
        let func: NativeFn = Rc::new(move |state: &mut State, recv: Value| {
            let Some((data, args)) = receiver_and_args::<Args>(state, &recv, &data_type) else {
                return Value::Nil;
            };
            let aliased = state
                .args()
                .iter()
                .any(|arg| matches!(arg, Value::Data(other) if Rc::ptr_eq(other, &data)));
            let receiver = if aliased { None } else { data.payload_mut::<T>() };
            let result = match receiver {
                Some(mut receiver) => f.call_method(&mut *receiver, args),
                None => return in_use(state, &data_type),
            };
            result.to_value(state)
        });
        self.define(name, func, Args::aspec());
        self
    }

    /// Register method `name` backed by `f(&T, args...)`.
    ///
    /// The receiver is only borrowed shared, so the same object may also be
    /// passed as an [`Obj`] argument and read through it.
    pub fn method_ref<Args, R, F>(self, name: &str, f: F) -> Self
    where
        Args: FromArgs + 'static,
        R: ToScript + 'static,
        F: HostMethodRef<T, Args, R>,
    {
        let data_type = Rc::clone(self.binding.data_type());
        let func: NativeFn = Rc::new(move |state: &mut State, recv: Value| {
            let Some((data, args)) = receiver_and_args::<Args>(state, &recv, &data_type) else {
                return Value::Nil;
            };
            let result = match data.payload::<T>() {
                Some(receiver) => f.call_method_ref(&receiver, args),
                None => return in_use(state, &data_type),
            };
            result.to_value(state)
        });
        self.define(name, func, Args::aspec());
        self
    }

    /// Finish and hand back the binding.
    pub fn finish(self) -> ClassBinding<T> {
        self.binding
    }

    fn define(&self, name: &str, func: NativeFn, aspec: rbind_vm::Aspec) {
        let class = self.binding.class();
        self.session.with_state(|state| state.define_method(class, name, func, aspec));
        tracing::debug!(class = self.binding.name(), method = name, "host method defined");
    }
}

/// Tag-checked receiver payload plus the extracted arguments of a host
/// method call.
fn receiver_and_args<Args: FromArgs>(
    state: &mut State,
    recv: &Value,
    data_type: &Rc<DataType>,
) -> Option<(Rc<RData>, Args)> {
    let data = state.data_check_get(recv, data_type)?;
    let args = Args::extract(state)?;
    if !data.is_initialized() {
        state.raise(
            ExcKind::Argument,
            format!("uninitialized {}", data_type.struct_name),
        );
        return None;
    }
    Some((data, args))
}

fn in_use(state: &mut State, data_type: &DataType) -> Value {
    state.raise(
        ExcKind::Runtime,
        format!("{} instance is already in use", data_type.struct_name),
    );
    Value::Nil
}

impl Session {
    /// Instantiate a bound class through the interpreter (`Name.new(args...)`).
    ///
    /// `args` go to the registered constructor, which builds the payload. Use
    /// [`new_instance_with`](Self::new_instance_with) to adjust the object on
    /// the host side instead.
    pub fn new_instance<T: 'static, A: ToArgs>(
        &self,
        binding: &ClassBinding<T>,
        args: A,
    ) -> Option<Obj<T>> {
        let obj = self.invoke::<Value, _>(Some(&binding.class_value()), "new", args)?;
        self.with_state(|state| state.data_get(&obj, binding.data_type()))
            .map(Obj::from_data)
    }

    /// Run `Name.new` with no arguments, then hand the fresh payload to
    /// `initialize`.
    ///
    /// Returns `None` if construction raised or left the object without a
    /// payload.
    pub fn new_instance_with<T: 'static>(
        &self,
        binding: &ClassBinding<T>,
        initialize: impl FnOnce(&mut T),
    ) -> Option<Obj<T>> {
        let obj = self.new_instance(binding, ())?;
        initialize(&mut *obj.get_mut()?);
        Some(obj)
    }

    /// Move a host value into a new interpreter-owned object of its bound
    /// class.
    pub fn wrap<T: 'static>(&self, value: T) -> Result<Obj<T>, RegistrationError> {
        let binding = ClassBinding::<T>::lookup(self)?;
        let obj = self.with_state(|state| {
            state.data_object_alloc(
                binding.class(),
                Some(Rc::clone(binding.data_type())),
                Some(Box::new(value)),
            )
        });
        match obj {
            Value::Data(data) => Ok(Obj::from_data(data)),
            _ => Err(RegistrationError::NotRegistered {
                type_name: type_name::<T>(),
            }),
        }
    }
}
