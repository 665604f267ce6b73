use std::{any::Any, fmt};

use crate::error::TypeMismatchError;

/// A move-only container carrying one result value of arbitrary type.
///
/// A `Value` is produced by a task and handed back to the submitter through a
/// [`ResultHandle`](crate::ResultHandle). The payload type is erased at
/// construction and recovered with [`extract`](Value::extract), which succeeds
/// only when asked for the exact type that was stored.
///
/// # Examples
///
/// ```
/// use threadmill::Value;
///
/// let value = Value::new(String::from("hello"));
/// let payload: String = value.extract().unwrap();
///
/// assert_eq!(payload, "hello");
/// ```
pub struct Value(Option<Box<dyn Any + Send>>);

impl Value {
    /// Create a value from any movable payload, erasing its type.
    pub fn new<T: Send + 'static>(payload: T) -> Self {
        Self(Some(Box::new(payload)))
    }

    /// Create a value carrying no payload.
    ///
    /// Empty values are what an invalid [`ResultHandle`](crate::ResultHandle)
    /// yields, and what a task that panicked delivers.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Check whether this value carries a payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Move the payload out, consuming the value.
    ///
    /// Fails if the stored payload is not a `T` (or if the value is empty).
    /// The error returns the value so the extraction can be retried with the
    /// right type.
    ///
    /// # Examples
    ///
    /// ```
    /// use threadmill::Value;
    ///
    /// let value = Value::new(42u64);
    ///
    /// // Asking for the wrong type hands the value back.
    /// let value = value.extract::<String>().unwrap_err().into_inner();
    ///
    /// assert_eq!(value.extract::<u64>().unwrap(), 42);
    /// ```
    pub fn extract<T: 'static>(self) -> Result<T, TypeMismatchError> {
        match self.0 {
            Some(boxed) => match boxed.downcast::<T>() {
                Ok(payload) => Ok(*payload),
                Err(boxed) => Err(TypeMismatchError(Self(Some(boxed)))),
            },
            None => Err(TypeMismatchError(Self(None))),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("empty", &self.is_empty())
            .finish()
    }
}
