//! Script-visible value graphs

use core_types::PortId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Shared, mutable backing store of an array node
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Shared, mutable backing store of an object node (insertion ordered)
pub type ObjectRef = Rc<RefCell<Vec<(String, Value)>>>;

/// A value as seen by a scripting context
///
/// Arrays and objects are reference-counted so a graph may share sub-nodes
/// or contain cycles, just like the values of a script heap. Cloning a
/// `Value` clones the reference, never the node.
///
/// Cyclic graphs are not reclaimed when the last outside reference goes
/// away; break the cycle first if that matters.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(ArrayRef),
    Object(ObjectRef),
    /// A port owned by the current context
    Port(PortId),
    /// A callable; never serializable
    Function(String),
    /// An engine or embedder handle; never serializable
    Native(String),
}

impl Value {
    /// Creates an array node holding `items`
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Creates an object node from key/value pairs, keeping their order
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let entries = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn empty_array() -> Self {
        Self::array(Vec::new())
    }

    pub fn empty_object() -> Self {
        Value::Object(Rc::new(RefCell::new(Vec::new())))
    }

    /// Short name of this value's kind, used in errors and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Port(_) => "port",
            Value::Function(_) => "function",
            Value::Native(_) => "native",
        }
    }

    /// Looks up `key` on an object. Returns `None` for non-objects.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(entries) => entries
                .borrow()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Inserts or replaces `key` on an object. Returns false for non-objects.
    pub fn set(&self, key: impl Into<String>, value: Value) -> bool {
        let Value::Object(entries) = self else {
            return false;
        };
        let key = key.into();
        let mut entries = entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
        true
    }

    /// Returns the element at `index` of an array
    pub fn index(&self, index: usize) -> Option<Value> {
        match self {
            Value::Array(items) => items.borrow().get(index).cloned(),
            _ => None,
        }
    }

    /// Appends to an array. Returns false for non-arrays.
    pub fn push(&self, value: Value) -> bool {
        match self {
            Value::Array(items) => {
                items.borrow_mut().push(value);
                true
            }
            _ => false,
        }
    }

    /// Number of elements or entries of a composite node
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Array(items) => Some(items.borrow().len()),
            Value::Object(entries) => Some(entries.borrow().len()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<PortId> {
        match self {
            Value::Port(id) => Some(*id),
            _ => None,
        }
    }

    /// True when both values are the same composite node
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Compares two graphs by shape and content, terminating on cycles
    ///
    /// Node pairs already under comparison are assumed equal, so two cyclic
    /// graphs compare equal when they unfold to the same infinite tree.
    /// NaN compares equal to NaN.
    pub fn structural_eq(&self, other: &Value) -> bool {
        let mut assumed = HashSet::new();
        structural_eq_inner(self, other, &mut assumed)
    }

    fn node_ptr(&self) -> Option<*const ()> {
        match self {
            Value::Array(rc) => Some(Rc::as_ptr(rc) as *const ()),
            Value::Object(rc) => Some(Rc::as_ptr(rc) as *const ()),
            _ => None,
        }
    }
}

fn structural_eq_inner(
    a: &Value,
    b: &Value,
    assumed: &mut HashSet<(*const (), *const ())>,
) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Port(x), Value::Port(y)) => x == y,
        (Value::Function(x), Value::Function(y)) | (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) || !assumed.insert(pair(a, b)) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(l, r)| structural_eq_inner(l, r, assumed))
        }
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) || !assumed.insert(pair(a, b)) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((lk, lv), (rk, rv))| {
                    lk == rk && structural_eq_inner(lv, rv, assumed)
                })
        }
        _ => false,
    }
}

fn pair(a: &Value, b: &Value) -> (*const (), *const ()) {
    (
        a.node_ptr().unwrap_or(std::ptr::null()),
        b.node_ptr().unwrap_or(std::ptr::null()),
    )
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        debug_inner(self, f, &mut path)
    }
}

// Prints nested nodes, replacing a node already on the current path with `<cycle>`.
fn debug_inner(
    value: &Value,
    f: &mut fmt::Formatter<'_>,
    path: &mut Vec<*const ()>,
) -> fmt::Result {
    if let Some(ptr) = value.node_ptr() {
        if path.contains(&ptr) {
            return f.write_str("<cycle>");
        }
        path.push(ptr);
    }
    let result = match value {
        Value::Undefined => f.write_str("undefined"),
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write!(f, "{n}"),
        Value::String(s) => write!(f, "{s:?}"),
        Value::Port(id) => write!(f, "{id}"),
        Value::Function(name) => write!(f, "[function {name}]"),
        Value::Native(name) => write!(f, "[native {name}]"),
        Value::Array(items) => {
            f.write_str("[")?;
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                debug_inner(item, f, path)?;
            }
            f.write_str("]")
        }
        Value::Object(entries) => {
            f.write_str("{")?;
            for (i, (key, item)) in entries.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}: ")?;
                debug_inner(item, f, path)?;
            }
            f.write_str("}")
        }
    };
    if value.node_ptr().is_some() {
        path.pop();
    }
    result
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_get_set_keeps_order() {
        let obj = Value::object([("a", Value::from(1)), ("b", Value::from(2))]);
        assert!(obj.set("a", Value::from("x")));
        assert!(obj.set("c", Value::Null));

        assert_eq!(obj.get("a"), Some(Value::from("x")));
        let Value::Object(entries) = &obj else {
            panic!("Expected object");
        };
        let keys: Vec<String> = entries.borrow().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_on_non_object_is_rejected() {
        assert!(!Value::from(1).set("a", Value::Null));
        assert!(!Value::Null.push(Value::Null));
    }

    #[test]
    fn test_structural_eq_distinguishes_content() {
        let a = Value::array(vec![Value::from(1), Value::from("two")]);
        let b = Value::array(vec![Value::from(1), Value::from("two")]);
        let c = Value::array(vec![Value::from(1), Value::from("three")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
    }

    #[test]
    fn test_structural_eq_terminates_on_cycles() {
        let a = Value::empty_object();
        a.set("self", a.clone());
        let b = Value::empty_object();
        b.set("self", b.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_nan_is_structurally_equal_to_nan() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
    }

    #[test]
    fn test_debug_marks_cycles() {
        let list = Value::array(vec![Value::from(1)]);
        list.push(list.clone());
        assert_eq!(format!("{:?}", list), "[1, <cycle>]");
    }

    #[test]
    fn test_debug_prints_shared_nodes_twice() {
        let shared = Value::array(vec![Value::Null]);
        let outer = Value::array(vec![shared.clone(), shared]);
        assert_eq!(format!("{:?}", outer), "[[null], [null]]");
    }
}
