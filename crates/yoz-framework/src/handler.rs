//! Handler type.
//!
//! Commands, listeners and redirects all share one handler shape: a cloneable
//! tower service that takes the [`HandlerContext`] of a dispatched event.

use std::future::Future;
use std::sync::Arc;

use tower::util::BoxCloneSyncService;
use tower::{BoxError, ServiceExt};

use crate::context::HandlerContext;

/// A type-erased, cloneable handler.
pub type BoxedHandler = BoxCloneSyncService<Arc<HandlerContext>, (), BoxError>;

/// Wraps an async function as a [`BoxedHandler`].
///
/// ```rust,ignore
/// let ping = handler_fn(|ctx: Arc<HandlerContext>| async move {
///     ctx.reply("pong").await?;
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> BoxedHandler
where
    F: Fn(Arc<HandlerContext>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    BoxCloneSyncService::new(tower::service_fn(f))
}

/// Drives one invocation of `handler` to completion.
pub(crate) async fn invoke(handler: BoxedHandler, ctx: Arc<HandlerContext>) -> Result<(), BoxError> {
    handler.oneshot(ctx).await
}
