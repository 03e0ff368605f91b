//! Call arguments and the receiving-side object interface

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::callback::Callback;
use rnp_core::prelude::*;

/// One argument of a remote call: a plain JSON value or a live callback
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Callback(Callback),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<Callback> for Arg {
    fn from(callback: Callback) -> Self {
        Arg::Callback(callback)
    }
}

/// Arguments delivered to a [`RemoteObject`] method, with typed accessors
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn new(args: Vec<Arg>) -> Self {
        Self(args)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserialize the value argument at `index`
    pub fn value<T: DeserializeOwned>(&self, index: usize, name: &str) -> Result<T> {
        match self.0.get(index) {
            Some(Arg::Value(value)) => serde_json::from_value(value.clone())
                .map_err(|e| Error::protocol(format!("Invalid argument '{}': {}", name, e))),
            Some(Arg::Callback(_)) => Err(Error::protocol(format!(
                "Argument '{}' must be a value, got a callback",
                name
            ))),
            None => Err(Error::protocol(format!("Missing argument '{}'", name))),
        }
    }

    /// Like [`Args::value`], but a missing or null argument yields `T::default()`
    pub fn value_or_default<T: DeserializeOwned + Default>(
        &self,
        index: usize,
        name: &str,
    ) -> Result<T> {
        match self.0.get(index) {
            None | Some(Arg::Value(Value::Null)) => Ok(T::default()),
            Some(_) => self.value(index, name),
        }
    }

    /// The callback argument at `index`
    pub fn callback(&self, index: usize, name: &str) -> Result<Callback> {
        match self.0.get(index) {
            Some(Arg::Callback(callback)) => Ok(callback.clone()),
            Some(Arg::Value(_)) => Err(Error::protocol(format!(
                "Argument '{}' must be a callback",
                name
            ))),
            None => Err(Error::protocol(format!("Missing argument '{}'", name))),
        }
    }
}

/// Future returned by [`RemoteObject::dispatch`]
pub type CallFuture = BoxFuture<'static, Result<Value>>;

/// An object in this process whose methods the peer can call.
///
/// `dispatch` is invoked on the bridge's receive loop in message order, so
/// work done before the returned future is created (for example forwarding
/// input to a subprocess) happens in the order the calls were sent. Long work
/// belongs in the returned future, which runs on its own task.
pub trait RemoteObject: Send + Sync + 'static {
    fn dispatch(&self, method: &str, args: Args) -> CallFuture;
}

/// Error for a method name an object does not implement
pub fn unknown_method(object: &str, method: &str) -> Error {
    Error::protocol(format!("Unknown method '{}.{}'", object, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_value_access() {
        let args = Args::new(vec![json!("phone-1").into(), json!(0.5).into()]);
        let id: String = args.value(0, "deviceId").unwrap();
        let x: f64 = args.value(1, "x").unwrap();
        assert_eq!(id, "phone-1");
        assert_eq!(x, 0.5);
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_missing_and_mistyped_arguments() {
        let args = Args::new(vec![Callback::new(|_| {}).into()]);
        assert!(args.value::<String>(0, "deviceId").is_err());
        assert!(args.value::<String>(1, "other").is_err());
        assert!(args.callback(0, "listener").is_ok());

        let args = Args::new(vec![json!(3).into()]);
        let err = args.value::<String>(0, "deviceId").unwrap_err();
        assert!(err.to_string().contains("deviceId"));
        assert!(args.callback(0, "listener").is_err());
    }

    #[test]
    fn test_value_or_default() {
        let args = Args::new(vec![Value::Null.into()]);
        let n: u32 = args.value_or_default(0, "n").unwrap();
        let m: u32 = args.value_or_default(3, "m").unwrap();
        assert_eq!((n, m), (0, 0));
    }
}
