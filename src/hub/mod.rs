//! Hub definitions and the per-connection dispatcher.
//!
//! A [`Hub`] is a table of named methods built once with [`HubBuilder`].
//! [`HubConnectionHandler`] serves it on every connection: it answers the
//! handshake, routes invocations to the table by target name and writes
//! completions back.
//!
//! ```
//! use hubframe::hub::{Hub, HubCallContext, HandlerResult};
//!
//! async fn add(_ctx: HubCallContext, (a, b): (i64, i64)) -> HandlerResult<i64> { Ok(a + b) }
//!
//! let hub = Hub::builder().method("Add", add).unwrap().build();
//! assert!(hub.has_method("Add"));
//! ```

use std::{collections::HashMap, fmt, future::Future};

use futures::Stream;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

mod clients;
mod context;
mod dispatcher;
mod handler;
mod options;

pub use clients::HubClients;
pub use context::HubCallContext;
pub use dispatcher::HubConnectionHandler;
pub(crate) use handler::Invoker;
pub use handler::{HandlerError, HandlerResult};
use handler::{ConnectedFn, DisconnectedFn, typed_method, typed_stream};
pub use options::HubOptions;

/// Errors raised while building a [`Hub`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubBuildError {
    #[error("a method named '{0}' is already registered")]
    DuplicateMethod(String),
}

/// Dispatch table and lifecycle hooks.
pub struct Hub {
    pub(crate) methods: HashMap<String, Invoker>,
    pub(crate) on_connected: Option<ConnectedFn>,
    pub(crate) on_disconnected: Option<DisconnectedFn>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Hub").field("methods", &methods).finish_non_exhaustive()
    }
}

impl Hub {
    #[must_use]
    pub fn builder() -> HubBuilder { HubBuilder::default() }

    /// Whether `target` can be invoked.
    #[must_use]
    pub fn has_method(&self, target: &str) -> bool { self.methods.contains_key(target) }
}

/// Builder registering hub methods.
#[derive(Default)]
pub struct HubBuilder {
    methods: HashMap<String, Invoker>,
    on_connected: Option<ConnectedFn>,
    on_disconnected: Option<DisconnectedFn>,
}

impl fmt::Debug for HubBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("HubBuilder").field("methods", &methods).finish_non_exhaustive()
    }
}

impl HubBuilder {
    fn insert(mut self, name: impl Into<String>, invoker: Invoker) -> Result<Self, HubBuildError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(HubBuildError::DuplicateMethod(name));
        }
        self.methods.insert(name, invoker);
        Ok(self)
    }

    /// Register a method taking positional arguments bound to `A` (usually a
    /// tuple) and returning `R`. Methods returning `()` complete without a
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`HubBuildError::DuplicateMethod`] if `name` is taken.
    pub fn method<A, R, F, Fut>(self, name: impl Into<String>, handler: F) -> Result<Self, HubBuildError>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(HubCallContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.insert(name, Invoker::Method(typed_method(handler)))
    }

    /// Register a streaming method. Each item becomes a `StreamItem`; the
    /// stream ending sends the completion.
    ///
    /// # Errors
    ///
    /// Returns [`HubBuildError::DuplicateMethod`] if `name` is taken.
    pub fn stream<A, T, F, S>(self, name: impl Into<String>, handler: F) -> Result<Self, HubBuildError>
    where
        A: DeserializeOwned + Send + 'static,
        T: Serialize + Send + 'static,
        F: Fn(HubCallContext, A) -> S + Send + Sync + 'static,
        S: Stream<Item = HandlerResult<T>> + Send + 'static,
    {
        self.insert(name, Invoker::Stream(typed_stream(handler)))
    }

    /// Register a method working on raw argument values. Returning
    /// `Ok(None)` completes without a result.
    ///
    /// # Errors
    ///
    /// Returns [`HubBuildError::DuplicateMethod`] if `name` is taken.
    pub fn raw_method<F, Fut>(self, name: impl Into<String>, handler: F) -> Result<Self, HubBuildError>
    where
        F: Fn(HubCallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<Value>>> + Send + 'static,
    {
        self.insert(
            name,
            Invoker::Method(std::sync::Arc::new(move |ctx, args| Box::pin(handler(ctx, args)))),
        )
    }

    /// Run `hook` after the handshake, before any invocation is read.
    #[must_use]
    pub fn on_connected<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HubCallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connected = Some(std::sync::Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Run `hook` once the connection has closed, with the error that closed
    /// it if any.
    #[must_use]
    pub fn on_disconnected<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HubCallContext, Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnected = Some(std::sync::Arc::new(move |ctx, error| Box::pin(hook(ctx, error))));
        self
    }

    #[must_use]
    pub fn build(self) -> Hub {
        Hub {
            methods: self.methods,
            on_connected: self.on_connected,
            on_disconnected: self.on_disconnected,
        }
    }
}
