//! Boxed interpreter values.
//!
//! Immediates (`nil`, booleans, integers, floats, symbols) are stored inline.
//! Everything else is reference counted: dropping the last [`Value`] that
//! points at an object is the collection event for that object. Data objects
//! run their destructor thunk at that point, exactly once.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;

use crate::class::ClassRef;
use crate::symbol::Sym;

/// Instance variable table shared by plain objects and data objects.
pub type IvarTable = RefCell<FxHashMap<Sym, Value>>;

/// A boxed interpreter value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(Sym),
    Str(Rc<RefCell<String>>),
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<RHash>>),
    Object(Rc<RObject>),
    Data(Rc<RData>),
    Class(ClassRef),
}

impl Value {
    #[inline]
    pub fn int(v: i64) -> Self {
        Value::Int(v)
    }

    #[inline]
    pub fn float(v: f64) -> Self {
        Value::Float(v)
    }

    #[inline]
    pub fn bool(v: bool) -> Self {
        Value::Bool(v)
    }

    #[inline]
    pub fn symbol(sym: Sym) -> Self {
        Value::Symbol(sym)
    }

    /// Allocate a new string value holding a copy of `s`.
    pub fn string(s: &str) -> Self {
        Value::Str(Rc::new(RefCell::new(s.to_owned())))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn hash(hash: RHash) -> Self {
        Value::Hash(Rc::new(RefCell::new(hash)))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Ruby truthiness: everything except `nil` and `false`.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Sym> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    /// Borrow the contents of a string value.
    pub fn as_str(&self) -> Option<Ref<'_, String>> {
        match self {
            Value::Str(s) => Some(s.borrow()),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Rc<RData>> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(true) => "true",
            Value::Bool(false) => "false",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Symbol(_) => "Symbol",
            Value::Str(_) => "String",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Object(_) => "Object",
            Value::Data(_) => "Data",
            Value::Class(_) => "Class",
        }
    }

    /// Identity comparison: immediates by value, heap objects by address.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Data(a), Value::Data(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Structural equality for builtin values; identity for objects.
    pub fn eql(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.eql(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|other| other.eql(v)))
            }
            _ => self.identical(other),
        }
    }

    /// Stable per-object identifier.
    pub fn object_id(&self) -> i64 {
        match self {
            Value::Nil => 8,
            Value::Bool(true) => 20,
            Value::Bool(false) => 0,
            Value::Int(v) => v.wrapping_mul(2).wrapping_add(1),
            Value::Float(v) => v.to_bits() as i64,
            Value::Symbol(s) => (s.id() as i64) * 256 + 12,
            Value::Str(s) => Rc::as_ptr(s) as *const u8 as i64,
            Value::Array(a) => Rc::as_ptr(a) as *const u8 as i64,
            Value::Hash(h) => Rc::as_ptr(h) as *const u8 as i64,
            Value::Object(o) => Rc::as_ptr(o) as *const u8 as i64,
            Value::Data(d) => Rc::as_ptr(d) as *const u8 as i64,
            Value::Class(c) => Rc::as_ptr(c) as *const u8 as i64,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Symbol(s) => write!(f, "{s:?}"),
            Value::Str(s) => write!(f, "Str({:?})", s.borrow()),
            Value::Array(a) => write!(f, "Array(len={})", a.borrow().len()),
            Value::Hash(h) => write!(f, "Hash(len={})", h.borrow().len()),
            Value::Object(o) => write!(f, "Object(#<{}>)", o.class.name()),
            Value::Data(d) => write!(f, "Data(#<{}>)", d.class.name()),
            Value::Class(c) => write!(f, "Class({})", c.name()),
        }
    }
}

/// A plain interpreter object: a class pointer plus instance variables.
pub struct RObject {
    pub class: ClassRef,
    pub ivars: IvarTable,
}

impl RObject {
    pub fn new(class: ClassRef) -> Self {
        Self {
            class,
            ivars: RefCell::new(FxHashMap::default()),
        }
    }
}

/// Destructor thunk invoked with the payload of a collected data object.
pub type DataFree = fn(Box<dyn Any>);

/// Type tag attached to data objects.
///
/// Two data objects carry the same host type exactly when they point at the
/// same `DataType` allocation; the name is for diagnostics only.
pub struct DataType {
    pub struct_name: String,
    pub dfree: DataFree,
}

impl DataType {
    pub fn new(struct_name: impl Into<String>, dfree: DataFree) -> Rc<Self> {
        Rc::new(Self {
            struct_name: struct_name.into(),
            dfree,
        })
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataType")
            .field("struct_name", &self.struct_name)
            .finish_non_exhaustive()
    }
}

/// An opaque-data object: an interpreter instance carrying a host payload
/// and the destructor thunk that owns its deletion.
pub struct RData {
    pub class: ClassRef,
    pub ivars: IvarTable,
    data_type: RefCell<Option<Rc<DataType>>>,
    payload: RefCell<Option<Box<dyn Any>>>,
}

impl RData {
    pub fn new(
        class: ClassRef,
        data_type: Option<Rc<DataType>>,
        payload: Option<Box<dyn Any>>,
    ) -> Self {
        Self {
            class,
            ivars: RefCell::new(FxHashMap::default()),
            data_type: RefCell::new(data_type),
            payload: RefCell::new(payload),
        }
    }

    /// The type tag, if one has been attached.
    pub fn data_type(&self) -> Option<Rc<DataType>> {
        self.data_type.borrow().clone()
    }

    /// Whether this object is tagged with exactly `data_type`.
    pub fn is_type(&self, data_type: &Rc<DataType>) -> bool {
        self.data_type
            .borrow()
            .as_ref()
            .is_some_and(|t| Rc::ptr_eq(t, data_type))
    }

    /// Attach a tag and payload. A previous payload is released through its
    /// own destructor thunk.
    pub fn set(&self, data_type: Rc<DataType>, payload: Box<dyn Any>) {
        let old_type = self.data_type.replace(Some(data_type));
        let old_payload = self.payload.replace(Some(payload));
        release(old_type, old_payload);
    }

    /// Attach only the tag, leaving the payload empty.
    pub fn set_type(&self, data_type: Rc<DataType>) {
        *self.data_type.borrow_mut() = Some(data_type);
    }

    pub fn is_initialized(&self) -> bool {
        self.payload.borrow().is_some()
    }

    /// Shared access to the payload, if present and of type `T`.
    pub fn payload<T: Any>(&self) -> Option<Ref<'_, T>> {
        let payload = self.payload.try_borrow().ok()?;
        Ref::filter_map(payload, |p| p.as_ref().and_then(|b| b.downcast_ref::<T>())).ok()
    }

    /// Exclusive access to the payload, if present, of type `T`, and not
    /// already borrowed.
    pub fn payload_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let payload = self.payload.try_borrow_mut().ok()?;
        RefMut::filter_map(payload, |p| p.as_mut().and_then(|b| b.downcast_mut::<T>())).ok()
    }
}

impl Drop for RData {
    fn drop(&mut self) {
        release(self.data_type.get_mut().take(), self.payload.get_mut().take());
    }
}

fn release(data_type: Option<Rc<DataType>>, payload: Option<Box<dyn Any>>) {
    match (data_type, payload) {
        (Some(data_type), Some(payload)) => (data_type.dfree)(payload),
        (None, Some(payload)) => drop(payload),
        _ => {}
    }
}

/// Key projection used to index hash entries.
///
/// Follows `eql?` semantics: `1` and `1.0` are distinct keys, strings hash
/// by content, other heap objects by identity.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum HashKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Symbol(Sym),
    Str(String),
    Identity(i64),
}

impl HashKey {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Nil => HashKey::Nil,
            Value::Bool(b) => HashKey::Bool(*b),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => HashKey::Float(OrderedFloat(*f)),
            Value::Symbol(s) => HashKey::Symbol(*s),
            Value::Str(s) => HashKey::Str(s.borrow().clone()),
            other => HashKey::Identity(other.object_id()),
        }
    }
}

/// Insertion-ordered hash table.
#[derive(Default)]
pub struct RHash {
    entries: Vec<(Value, Value)>,
    index: FxHashMap<HashKey, usize>,
}

impl RHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index
            .get(&HashKey::of(key))
            .map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.index.contains_key(&HashKey::of(key))
    }

    /// Insert or overwrite. Overwriting keeps the original position.
    pub fn insert(&mut self, key: Value, value: Value) {
        let hkey = HashKey::of(&key);
        match self.index.get(&hkey) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                // String keys are copied so later mutation of the caller's
                // string cannot desynchronize the index.
                let key = match &key {
                    Value::Str(s) => Value::string(&s.borrow()),
                    _ => key,
                };
                self.index.insert(hkey, self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let i = self.index.remove(&HashKey::of(key))?;
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Bool(true).truthy());
        assert!(Value::Int(0).truthy());
        assert!(Value::string("").truthy());
    }

    #[test]
    fn eql_compares_strings_by_content() {
        let a = Value::string("abc");
        let b = Value::string("abc");
        assert!(a.eql(&b));
        assert!(!a.identical(&b));
        assert!(a.identical(&a.clone()));
    }

    #[test]
    fn eql_mixes_int_and_float() {
        assert!(Value::Int(3).eql(&Value::Float(3.0)));
        assert!(!Value::Int(3).eql(&Value::Float(3.5)));
    }

    #[test]
    fn hash_keeps_insertion_order() {
        let mut hash = RHash::new();
        hash.insert(Value::Int(30), Value::string("c"));
        hash.insert(Value::Int(10), Value::string("a"));
        hash.insert(Value::Int(20), Value::string("b"));
        hash.insert(Value::Int(10), Value::string("z"));
        let keys: Vec<i64> = hash.keys().iter().filter_map(Value::as_int).collect();
        assert_eq!(keys, vec![30, 10, 20]);
        assert_eq!(hash.get(&Value::Int(10)).and_then(|v| v.as_str().map(|s| s.clone())), Some("z".to_string()));
    }

    #[test]
    fn hash_distinguishes_int_and_float_keys() {
        let mut hash = RHash::new();
        hash.insert(Value::Int(1), Value::Int(1));
        hash.insert(Value::Float(1.0), Value::Int(2));
        assert_eq!(hash.len(), 2);
    }

    #[test]
    fn hash_remove_reindexes() {
        let mut hash = RHash::new();
        for i in 0..4 {
            hash.insert(Value::Int(i), Value::Int(i * 10));
        }
        assert_eq!(hash.remove(&Value::Int(1)).and_then(|v| v.as_int()), Some(10));
        assert_eq!(hash.get(&Value::Int(3)).and_then(Value::as_int), Some(30));
        assert_eq!(hash.len(), 3);
    }

    thread_local! {
        static FREED: Cell<usize> = const { Cell::new(0) };
    }

    fn count_free(payload: Box<dyn Any>) {
        FREED.with(|f| f.set(f.get() + 1));
        drop(payload);
    }

    #[test]
    fn data_payload_freed_once_through_thunk() {
        let class = crate::class::RClass::new_root("Thing");
        let ty = DataType::new("Thing", count_free);
        let data = Rc::new(RData::new(class, Some(ty), Some(Box::new(5_i32))));
        let alias = Value::Data(Rc::clone(&data));
        assert_eq!(data.payload::<i32>().map(|v| *v), Some(5));
        drop(data);
        assert_eq!(FREED.with(Cell::get), 0);
        drop(alias);
        assert_eq!(FREED.with(Cell::get), 1);
    }

    #[test]
    fn data_payload_borrow_conflict_is_reported() {
        let class = crate::class::RClass::new_root("Thing");
        let data = RData::new(class, None, Some(Box::new(String::from("x"))));
        let guard = data.payload_mut::<String>();
        assert!(guard.is_some());
        assert!(data.payload::<String>().is_none());
    }
}
