//! Message handler trait and isolated dispatch.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use super::message::Message;
use crate::error::{HubError, Result, panic_message};

/// Receives messages delivered to an agent's inbox or published on the bus.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<()>;
}

pub type BoxedHandler = Arc<dyn MessageHandler>;

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> Result<()> {
        (self.func)(message.clone()).await
    }
}

pub fn handler_fn<F, Fut>(func: F) -> BoxedHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        func,
        _marker: PhantomData,
    })
}

/// Run one handler, converting a panic into an error.
pub(crate) async fn invoke_isolated(handler: &BoxedHandler, message: &Message) -> Result<()> {
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HubError::Handler(format!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Deliver a message to every handler in order. A failing handler is logged
/// and does not stop delivery to the rest. Returns the number of failures.
pub(crate) async fn dispatch_all(owner: &str, handlers: &[BoxedHandler], message: &Message) -> usize {
    let mut failures = 0;
    for (index, handler) in handlers.iter().enumerate() {
        if let Err(e) = invoke_isolated(handler, message).await {
            failures += 1;
            error!(
                owner = %owner,
                handler = index,
                msg_id = %message.id,
                msg_type = %message.message_type,
                from = %message.from_agent,
                error = %e,
                "Message handler failed"
            );
        }
    }
    failures
}
