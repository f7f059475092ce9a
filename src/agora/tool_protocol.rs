//! Tool capabilities injected into agents.
//!
//! A debate agent may consult external capabilities (web search, document recall, ...)
//! while drafting a response. The engine does not care what these capabilities do; it
//! only needs a named `(query) -> text` callable and a record of how it was used.
//!
//! ```text
//! Agent → ToolSet → Tool (trait) → [FunctionTool | AsyncFunctionTool | user-defined]
//! ```
//!
//! Tools are resolved once, when the agent is constructed, and handed to the reasoning
//! backend on every `respond` call.
//!
//! # Example
//!
//! ```rust
//! use agora::tool_protocol::{FunctionTool, ToolSet};
//! use std::sync::Arc;
//!
//! # tokio_test_block(async {
//! let tools = ToolSet::new().with_tool(Arc::new(FunctionTool::new(
//!     "shout",
//!     "Upper-cases the query",
//!     Arc::new(|query: &str| Ok(query.to_uppercase())),
//! )));
//!
//! assert_eq!(tools.invoke("shout", "hello").await.unwrap(), "HELLO");
//! assert_eq!(tools.take_usage().await.len(), 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Type alias for synchronous tool functions.
pub type ToolFunction =
    Arc<dyn Fn(&str) -> Result<String, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// Type alias for asynchronous tool functions.
pub type AsyncToolFunction = Arc<
    dyn Fn(String) -> BoxFuture<'static, Result<String, Box<dyn Error + Send + Sync>>>
        + Send
        + Sync,
>;

/// Name and description advertised to the reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub query: String,
    pub success: bool,
    /// Character length of the tool output (0 on failure).
    pub output_chars: usize,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Error types for tool operations
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not part of the agent's tool set.
    NotFound(String),
    /// The tool ran and reported a failure.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// A named `(query) -> text` capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn metadata(&self) -> &ToolMetadata;

    async fn call(&self, query: &str) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Tool backed by a synchronous closure.
pub struct FunctionTool {
    metadata: ToolMetadata,
    function: ToolFunction,
}

impl FunctionTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        function: ToolFunction,
    ) -> Self {
        Self {
            metadata: ToolMetadata::new(name, description),
            function,
        }
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn call(&self, query: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        (self.function)(query)
    }
}

/// Tool backed by an async closure, for I/O bound capabilities.
///
/// ```rust
/// use agora::tool_protocol::AsyncFunctionTool;
/// use std::sync::Arc;
///
/// let recall = AsyncFunctionTool::new(
///     "recall",
///     "Searches the uploaded documents",
///     Arc::new(|query: String| {
///         Box::pin(async move { Ok(format!("no documents mention '{}'", query)) })
///     }),
/// );
/// ```
pub struct AsyncFunctionTool {
    metadata: ToolMetadata,
    function: AsyncToolFunction,
}

impl AsyncFunctionTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        function: AsyncToolFunction,
    ) -> Self {
        Self {
            metadata: ToolMetadata::new(name, description),
            function,
        }
    }
}

#[async_trait]
impl Tool for AsyncFunctionTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn call(&self, query: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        (self.function)(query.to_string()).await
    }
}

/// Named collection of tools available to one agent, plus its usage log.
///
/// Cloning a `ToolSet` shares both the tools and the usage log. Use
/// [`ToolSet::detached`] to hand the same tools to another agent with a separate log.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    usage: Arc<Mutex<Vec<ToolUsage>>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a tool, keyed by its metadata name.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.add_tool(tool);
        self
    }

    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.metadata().name.clone(), tool);
    }

    /// Same tools, fresh usage log.
    pub fn detached(&self) -> Self {
        Self {
            tools: self.tools.clone(),
            usage: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Metadata for every tool, ordered by name.
    pub fn descriptors(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|t| t.metadata().clone()).collect()
    }

    /// Run a tool by name and record the outcome.
    pub async fn invoke(&self, name: &str, query: &str) -> Result<String, ToolError> {
        let result = match self.tools.get(name) {
            Some(tool) => tool
                .call(query)
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string())),
            None => Err(ToolError::NotFound(name.to_string())),
        };

        let record = ToolUsage {
            tool: name.to_string(),
            query: query.to_string(),
            success: result.is_ok(),
            output_chars: result.as_ref().map(|s| s.chars().count()).unwrap_or(0),
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        };
        if let Err(e) = &result {
            log::warn!("agora::tool_protocol: tool '{}' failed: {}", name, e);
        }
        self.usage.lock().await.push(record);
        result
    }

    /// Drain the usage log.
    pub async fn take_usage(&self) -> Vec<ToolUsage> {
        std::mem::take(&mut *self.usage.lock().await)
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
