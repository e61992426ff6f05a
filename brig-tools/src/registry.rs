//! Runtime registry for local tool descriptors and handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use brig_primitives::ToolDescriptor;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Trait implemented by tool handlers.
///
/// Any `Fn(Value) -> impl Future<Output = ToolResult<Value>>` closure is a
/// handler, so most callers never implement this directly.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invokes the tool with the given JSON parameters, returning JSON output.
    async fn invoke(&self, params: Value) -> ToolResult<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Send + Sync + Fn(Value) -> Fut,
    Fut: Future<Output = ToolResult<Value>> + Send,
{
    async fn invoke(&self, params: Value) -> ToolResult<Value> {
        (self)(params).await
    }
}

/// Handle returned by the registry for direct invocation.
#[derive(Clone)]
pub struct ToolHandle {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl ToolHandle {
    /// Returns the associated descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Executes the underlying handler.
    ///
    /// # Errors
    ///
    /// Propagates any [`ToolError::Execution`] returned by the handler.
    pub async fn invoke(&self, params: Value) -> ToolResult<Value> {
        self.handler.invoke(params).await
    }
}

/// Registry that stores tool handlers keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<HashMap<String, ToolHandle>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any previous registration of the same name.
    ///
    /// Returns the descriptor that was replaced, if any.
    pub fn register<H>(&self, descriptor: ToolDescriptor, handler: H) -> Option<ToolDescriptor>
    where
        H: ToolHandler + 'static,
    {
        let name = descriptor.name().to_owned();
        let handle = ToolHandle {
            descriptor,
            handler: Arc::new(handler),
        };

        let previous = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handle)
            .map(|old| old.descriptor);

        if previous.is_some() {
            debug!(tool = %name, "replaced tool registration");
        } else {
            debug!(tool = %name, "registered tool");
        }
        previous
    }

    /// Returns a handle to the tool matching the supplied name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns `true` if a tool with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Invokes a registered tool directly.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] when the tool is not found or
    /// propagates [`ToolError::Execution`] when the handler fails.
    pub async fn invoke(&self, name: &str, params: Value) -> ToolResult<Value> {
        let handle = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_owned(),
        })?;
        handle.invoke(params).await
    }

    /// Lists the descriptors of all registered tools, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|handle| handle.descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors produced by tool invocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name of the missing tool.
        name: String,
    },

    /// Tool execution failed.
    #[error("{reason}")]
    Execution {
        /// Human-readable error returned by the tool handler.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(name)
            .unwrap()
            .with_description("Echo incoming payload")
    }

    #[tokio::test]
    async fn register_and_invoke_tool() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("echo"), |input: Value| async move { Ok::<_, ToolError>(input) });

        let payload = serde_json::json!({ "message": "hello" });
        let output = registry.invoke("echo", payload.clone()).await.unwrap();
        assert_eq!(output, payload);
    }

    #[tokio::test]
    async fn re_registration_overwrites() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("echo"), |_: Value| async move {
            Ok::<_, ToolError>(Value::from("first"))
        });

        let previous = registry.register(
            ToolDescriptor::new("echo").unwrap(),
            |_: Value| async move { Ok::<_, ToolError>(Value::from("second")) },
        );

        assert_eq!(
            previous.and_then(|d| d.description().map(str::to_owned)),
            Some("Echo incoming payload".to_owned())
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.list()[0].description().is_none());
        let output = registry.invoke("echo", Value::Null).await.unwrap();
        assert_eq!(output, Value::from("second"));
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", Value::Null)
            .await
            .expect_err("unknown tool should error");

        assert!(matches!(err, ToolError::UnknownTool { name } if name == "missing"));
    }

    #[tokio::test]
    async fn handler_failure_carries_reason() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("explode"), |_: Value| async move {
            Err::<Value, _>(ToolError::execution("kaboom"))
        });

        let err = registry.invoke("explode", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "kaboom");
    }

    #[test]
    fn list_is_sorted_by_name() {
        let registry = ToolRegistry::new();
        for name in ["weather", "anchor", "map"] {
            registry.register(descriptor(name), |v: Value| async move { Ok::<_, ToolError>(v) });
        }
        let names: Vec<_> = registry
            .list()
            .iter()
            .map(|tool| tool.name().to_owned())
            .collect();
        assert_eq!(names, ["anchor", "map", "weather"]);
        assert!(registry.contains("map"));
        assert!(!registry.is_empty());
    }
}
