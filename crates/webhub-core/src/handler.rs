//! Application callbacks.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Error returned by an application action handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of an action handler: the output, if any.
pub type ActionResult = Result<Option<Value>, HandlerError>;

/// Performs an action on behalf of the application.
///
/// Any async closure `Fn(Option<Value>) -> impl Future<Output = ActionResult>`
/// is a handler.
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// Run the action with the (already validated) input.
    async fn invoke(&self, input: Option<Value>) -> ActionResult;
}

#[async_trait]
impl<F, Fut> ActionHandler for F
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    async fn invoke(&self, input: Option<Value>) -> ActionResult {
        (self)(input).await
    }
}

/// Informs the application that a client wrote a property.
pub type WriteHandler = Arc<dyn Fn(&Value) + Send + Sync>;
