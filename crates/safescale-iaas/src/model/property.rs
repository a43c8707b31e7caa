//! Independently lockable property groups.
//!
//! Every mutable sub-record of a resource (sizing, network, shares, ...) is
//! wrapped in its own [`Property`], so readers and writers of different
//! groups never contend, while concurrent writers of the same group
//! serialize. Closures run under the lock and must not await.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::RwLock;

pub struct Property<T> {
    inner: RwLock<T>,
}

impl<T> Property<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Runs `f` with shared access to the property.
    pub fn inspect<R>(&self, f: impl FnOnce(&T) -> Result<R>) -> Result<R> {
        let guard = self
            .inner
            .read()
            .map_err(|_| Error::inconsistent("property lock poisoned"))?;
        f(&guard)
    }

    /// Runs `f` with exclusive access to the property.
    pub fn alter<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| Error::inconsistent("property lock poisoned"))?;
        f(&mut guard)
    }
}

impl<T: Clone> Property<T> {
    /// Copy of the current value.
    pub fn snapshot(&self) -> T {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.alter(|v| {
            *v = value;
            Ok(())
        })
    }
}

impl<T: Default> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self::new(self.snapshot())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_read() {
            Ok(guard) => std::fmt::Debug::fmt(&*guard, f),
            Err(_) => f.write_str("<locked>"),
        }
    }
}

impl<T: Serialize> Serialize for Property<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let guard = self
            .inner
            .read()
            .map_err(|_| serde::ser::Error::custom("property lock poisoned"))?;
        guard.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Property<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        T::deserialize(deserializer).map(Property::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alter_then_inspect() {
        let p = Property::new(vec![1, 2]);
        p.alter(|v| {
            v.push(3);
            Ok(())
        })
        .unwrap();
        let len = p.inspect(|v| Ok(v.len())).unwrap();
        assert_eq!(len, 3);
    }

    #[test]
    fn test_error_in_closure_is_returned() {
        let p = Property::new(0u32);
        let err = p
            .alter(|v| {
                *v = 7;
                Err::<(), _>(Error::logic("refused"))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Logic(_)));
        // changes made before the error are kept; callers decide whether to save
        assert_eq!(p.snapshot(), 7);
    }

    #[test]
    fn test_serializes_as_inner_value() {
        let p = Property::new(String::from("abc"));
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"abc\"");
        let back: Property<String> = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(back.snapshot(), "xyz");
    }
}
