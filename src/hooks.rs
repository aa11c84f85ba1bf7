//! Lifecycle hooks and the best-effort policy that runs them.
//!
//! Every consumer callback in a tour (step hooks, tour lifecycle hooks,
//! previous-button handlers, custom action handlers) is a [`Hook`]: an async
//! closure returning `anyhow::Result<()>`. A failing hook never aborts a
//! transition; [`run_hook`] logs the failure and hands the result back so the
//! caller can still inspect it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::dom::ElementHandle;
use crate::types::TourStep;

pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// What a hook gets to see when it runs.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub tour_id: String,
    pub step: Option<TourStep>,
    pub step_index: usize,
    /// Element resolved for the step, when there is one.
    pub element: Option<ElementHandle>,
}

type HookFn = dyn Fn(HookContext) -> HookFuture + Send + Sync;

/// A shareable async callback.
#[derive(Clone)]
pub struct Hook(Arc<HookFn>);

impl Hook {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Hook(Arc::new(move |ctx: HookContext| -> HookFuture {
            Box::pin(f(ctx))
        }))
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Hook(Arc::new(move |ctx: HookContext| -> HookFuture {
            let result = f(&ctx);
            Box::pin(async move { result })
        }))
    }

    pub fn call(&self, ctx: HookContext) -> HookFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

/// Run an optional hook, logging (and swallowing) any failure.
///
/// Returns `Ok(())` when there is no hook. The error is returned rather than
/// dropped so tests and callers with stricter needs can look at it, but no
/// engine transition ever branches on it.
pub async fn run_hook(hook: Option<&Hook>, ctx: HookContext, label: &str) -> anyhow::Result<()> {
    let Some(hook) = hook else {
        return Ok(());
    };
    let tour_id = ctx.tour_id.clone();
    let step_index = ctx.step_index;
    match hook.call(ctx).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(
                tour = %tour_id,
                step_index,
                hook = label,
                "hook failed, continuing: {:#}",
                err
            );
            Err(err)
        }
    }
}
