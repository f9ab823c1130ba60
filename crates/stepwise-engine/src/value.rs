use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Trait implemented by every value the instrumented runtime hands to the
/// engine (locals, return values, exceptions).
///
/// It is blanket-implemented, so any `Debug + Send + Sync` type qualifies.
pub trait DebugValue: Any + fmt::Debug + Send + Sync {
    /// Returns `self` as [Any], for downcasting to the runtime's value type.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> DebugValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reference to a runtime value.
pub type Value = Arc<dyn DebugValue>;

/// Wraps a plain value into a [Value].
pub fn value<T: DebugValue>(v: T) -> Value {
    Arc::new(v)
}

/// Downcasts a [Value] to the runtime's concrete value type.
///
/// Calling [DebugValue::as_any] on the `Arc` itself would go through the
/// blanket implementation for `Arc`, hence this helper.
pub fn downcast<T: Any>(value: &Value) -> Option<&T> {
    (**value).as_any().downcast_ref()
}

/// A thrown user exception.
///
/// Cloning keeps the identity: clones compare equal with [Exception::ptr_eq].
#[derive(Clone)]
pub struct Exception(Value);

impl Exception {
    /// Creates an exception carrying the given runtime value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Returns the thrown runtime value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Returns whether both handles refer to the same thrown object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Exception").field(&self.0).finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
