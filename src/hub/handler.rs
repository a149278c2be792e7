//! Handler signatures and the type-erased invokers stored in the dispatch
//! table.

use std::{any::TypeId, fmt, future::Future, pin::Pin, sync::Arc};

use futures::{Stream, StreamExt, stream::BoxStream};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::HubCallContext;

/// Error returned by a hub method.
///
/// Any [`std::error::Error`] converts into [`HandlerError::Internal`], whose
/// text only reaches the caller when detailed errors are enabled. Use
/// [`HandlerError::hub`] for messages meant for the caller.
pub enum HandlerError {
    /// Caller-visible failure.
    Hub(String),
    /// Argument binding failed.
    Binding(serde_json::Error),
    /// Any other failure; hidden from callers by default.
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// A failure whose message is always sent to the caller.
    pub fn hub(message: impl Into<String>) -> Self { Self::Hub(message.into()) }

    /// Text sent in the error completion for an invocation of `target`.
    #[must_use]
    pub fn client_message(&self, target: &str, detailed: bool) -> String {
        match self {
            Self::Hub(message) => message.clone(),
            Self::Binding(err) if detailed => {
                format!("Failed to invoke '{target}' due to an error on the server. {err}")
            }
            Self::Binding(_) => {
                format!("Failed to invoke '{target}' due to an error on the server. InvalidDataException: Invalid arguments.")
            }
            Self::Internal(err) if detailed => {
                format!("An unexpected error occurred invoking '{target}' on the server. {err}")
            }
            Self::Internal(_) => {
                format!("An unexpected error occurred invoking '{target}' on the server.")
            }
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self { Self::Internal(Box::new(err)) }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub(message) => f.write_str(message),
            Self::Binding(err) => write!(f, "argument binding failed: {err}"),
            Self::Internal(err) => err.fmt(f),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub(message) => f.debug_tuple("Hub").field(message).finish(),
            Self::Binding(err) => f.debug_tuple("Binding").field(err).finish(),
            Self::Internal(err) => f.debug_tuple("Internal").field(err).finish(),
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased unary method. `None` means the method returns nothing.
pub(crate) type MethodFn =
    Arc<dyn Fn(HubCallContext, Vec<Value>) -> BoxFuture<HandlerResult<Option<Value>>> + Send + Sync>;

/// Type-erased streaming method.
pub(crate) type StreamFn = Arc<
    dyn Fn(HubCallContext, Vec<Value>) -> HandlerResult<BoxStream<'static, HandlerResult<Value>>>
        + Send
        + Sync,
>;

/// Lifecycle hook.
pub(crate) type ConnectedFn = Arc<dyn Fn(HubCallContext) -> BoxFuture<()> + Send + Sync>;

/// Disconnect hook, receiving the error that ended the connection.
pub(crate) type DisconnectedFn =
    Arc<dyn Fn(HubCallContext, Option<String>) -> BoxFuture<()> + Send + Sync>;

/// Entry of the dispatch table.
#[derive(Clone)]
pub(crate) enum Invoker {
    Method(MethodFn),
    Stream(StreamFn),
}

/// Deserialise positional arguments into `A`, normally a tuple.
///
/// An empty argument list also binds to `()`.
pub(crate) fn bind_arguments<A: DeserializeOwned>(arguments: Vec<Value>) -> HandlerResult<A> {
    let empty = arguments.is_empty();
    match serde_json::from_value(Value::Array(arguments)) {
        Ok(args) => Ok(args),
        Err(_) if empty => serde_json::from_value(Value::Null).map_err(HandlerError::Binding),
        Err(err) => Err(HandlerError::Binding(err)),
    }
}

/// Serialise a method's return value; `()` completes without a result.
pub(crate) fn to_result<R: Serialize + 'static>(value: &R) -> HandlerResult<Option<Value>> {
    if TypeId::of::<R>() == TypeId::of::<()>() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_value(value)?))
}

pub(crate) fn typed_method<A, R, F, Fut>(handler: F) -> MethodFn
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(HubCallContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |ctx, arguments| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let args = bind_arguments::<A>(arguments)?;
            let value = handler(ctx, args).await?;
            to_result(&value)
        })
    })
}

pub(crate) fn typed_stream<A, T, F, S>(handler: F) -> StreamFn
where
    A: DeserializeOwned + Send + 'static,
    T: Serialize + Send + 'static,
    F: Fn(HubCallContext, A) -> S + Send + Sync + 'static,
    S: Stream<Item = HandlerResult<T>> + Send + 'static,
{
    Arc::new(move |ctx, arguments| {
        let args = bind_arguments::<A>(arguments)?;
        let items = handler(ctx, args)
            .map(|item: HandlerResult<T>| -> HandlerResult<Value> { Ok(serde_json::to_value(item?)?) });
        Ok(items.boxed())
    })
}
