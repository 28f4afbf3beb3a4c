//! Agent behavior authoring surface.
//!
//! A [`Behavior`] is the user-supplied logic an [`crate::agent::Agent`]
//! executes. It exposes setup/shutdown hooks plus two tables built by
//! [`BehaviorBuilder`]: named actions invoked on demand by remote handles,
//! and background loops that run for the agent's lifetime.
//!
//! Rust has no runtime method-tagging decorator equivalent to the
//! originating framework's `@action`/`@loop`, so actions and loops are
//! registered explicitly through the builder instead of being discovered
//! by reflection. Likewise, handles to other agents are not auto-bound by
//! scanning a behavior's fields; a behavior acquires them on demand by
//! calling [`crate::agent::AgentContext::bind`] or
//! [`crate::agent::AgentContext::get_handle`] from any hook, action, or
//! loop, since all four are passed the running agent's context.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::AgentContext;
use crate::error::AgentError;

/// A boxed, type-erased action: takes the running agent's context plus
/// positional and keyword arguments, returns a JSON result or an error
/// message.
pub type ActionFn = Arc<
    dyn Fn(
            AgentContext,
            Vec<Value>,
            Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>>
        + Send
        + Sync,
>;

/// A boxed, type-erased background loop: runs until it returns or the
/// agent's shutdown signal fires.
pub type LoopFn = Arc<
    dyn Fn(
            AgentContext,
            tokio_util::sync::CancellationToken,
        ) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// Lifecycle hooks every behavior implements.
///
/// `on_setup` runs once before any action or loop starts; `on_shutdown`
/// runs once after every action and loop has stopped, regardless of
/// whether shutdown was requested or caused by a loop failure. Both
/// receive the agent's [`AgentContext`] so they can bind handles or send
/// messages of their own.
#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    /// Runs once before the agent's action pool, loop pool, and listener
    /// start.
    async fn on_setup(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let _ = ctx;
        Ok(())
    }

    /// Runs once after the action pool and loop pool have both drained,
    /// before the agent reports itself shut down.
    async fn on_shutdown(&self, ctx: &AgentContext) -> Result<(), AgentError> {
        let _ = ctx;
        Ok(())
    }

    /// Named actions this behavior exposes to remote handles, and the
    /// background loops it runs for the duration of the agent.
    ///
    /// Behaviors construct their tables once, typically in their own
    /// constructor, and return the already-built [`BehaviorTables`] here.
    fn tables(&self) -> BehaviorTables;
}

/// The action and loop tables for a behavior, assembled by
/// [`BehaviorBuilder`].
#[derive(Clone, Default)]
pub struct BehaviorTables {
    actions: HashMap<String, ActionFn>,
    loops: HashMap<String, LoopFn>,
}

impl BehaviorTables {
    /// Looks up a registered action by name.
    #[must_use]
    pub fn action(&self, name: &str) -> Option<ActionFn> {
        self.actions.get(name).cloned()
    }

    /// Every registered loop, keyed by name for diagnostics.
    #[must_use]
    pub fn loops(&self) -> &HashMap<String, LoopFn> {
        &self.loops
    }

    /// Names of every registered action, for discovery and error messages.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }
}

/// Assembles a behavior's action and loop tables.
///
/// ```ignore
/// let tables = BehaviorBuilder::new()
///     .action("add", |_ctx, pargs, _kargs| async move {
///         let a = pargs[0].as_i64().unwrap_or_default();
///         let b = pargs[1].as_i64().unwrap_or_default();
///         Ok(serde_json::json!(a + b))
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct BehaviorBuilder {
    tables: BehaviorTables,
}

impl BehaviorBuilder {
    /// Starts an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named action.
    #[must_use]
    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(AgentContext, Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.tables.actions.insert(
            name.into(),
            Arc::new(move |ctx, pargs, kargs| Box::pin(f(ctx, pargs, kargs))),
        );
        self
    }

    /// Registers a named background loop.
    #[must_use]
    pub fn loop_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(AgentContext, tokio_util::sync::CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.tables
            .loops
            .insert(name.into(), Arc::new(move |ctx, token| Box::pin(f(ctx, token))));
        self
    }

    /// Finalizes the tables.
    #[must_use]
    pub fn build(self) -> BehaviorTables {
        self.tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_registers_actions_by_name() {
        let tables = BehaviorBuilder::new()
            .action("echo", |_ctx, pargs, _kargs| async move {
                Ok(pargs.into_iter().next().unwrap_or(Value::Null))
            })
            .build();

        let action = tables.action("echo").expect("action registered");
        let ctx = AgentContext::for_test().await;
        let result = action(ctx, vec![Value::from("hi")], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("hi"));
        assert!(tables.action("missing").is_none());
    }

    #[tokio::test]
    async fn builder_registers_loops_by_name() {
        let tables = BehaviorBuilder::new()
            .loop_fn("heartbeat", |_ctx, _token| async move { Ok(()) })
            .build();

        assert_eq!(tables.loops().len(), 1);
        let loop_fn = tables.loops().get("heartbeat").unwrap().clone();
        let ctx = AgentContext::for_test().await;
        loop_fn(ctx, tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();
    }
}
