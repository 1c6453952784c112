use serde_json::{Map, Value};

use crate::decode::ResponseDecoder;
use crate::error::ToolTestError;
use crate::invoker::RemoteInvoker;
use crate::outcome::Outcome;
use crate::session::SessionResolver;
use crate::tools::{ToolReference, ToolResolver, ToolStore};

/// Runs a tool test end to end: session check, tool resolution, remote call,
/// response decoding.
pub struct ToolTestService<S> {
    sessions: SessionResolver,
    resolver: ToolResolver<S>,
    invoker: RemoteInvoker,
    decoder: ResponseDecoder,
}

impl<S: ToolStore> ToolTestService<S> {
    pub fn new(store: S, invoker: RemoteInvoker) -> Self {
        Self {
            sessions: SessionResolver,
            resolver: ToolResolver::new(store),
            invoker,
            decoder: ResponseDecoder,
        }
    }

    pub fn resolver(&self) -> &ToolResolver<S> {
        &self.resolver
    }

    pub fn invoker(&self) -> &RemoteInvoker {
        &self.invoker
    }

    /// Never fails: every stage error comes back as an error [`Outcome`].
    pub async fn test_tool(
        &self,
        reference: ToolReference,
        arguments: Option<Map<String, Value>>,
        session_id: Option<&str>,
    ) -> Outcome {
        match self.run(reference, arguments, session_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    reference = reference.value(),
                    kind = ?err.kind(),
                    error = %err,
                    "tool test failed"
                );
                Outcome::from(err)
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.invoker.is_connected().await
    }

    async fn run(
        &self,
        reference: ToolReference,
        arguments: Option<Map<String, Value>>,
        session_id: Option<&str>,
    ) -> Result<Outcome, ToolTestError> {
        let session_id = self.sessions.resolve(session_id)?;
        let tool = self.resolver.resolve(reference, true).await?;
        tracing::info!(
            tool_id = tool.id,
            tool_num = tool.tool_num,
            tool_name = %tool.tool_name,
            arguments = ?arguments,
            "testing tool"
        );
        let body = self.invoker.invoke(&tool, arguments, &session_id).await?;
        Ok(self.decoder.decode(&body))
    }
}
