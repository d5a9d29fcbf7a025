//! The conversation runner — one conversational step over a store.

use std::sync::Arc;
use tracing::{debug, info, warn};
use turnstore_core::responder::Responder;
use turnstore_core::turn::{SessionKey, Turn};
use turnstore_memory::{ConversationStore, SessionState};

use crate::error::AgentError;
use crate::tool::ToolRegistry;

/// Drives `append → get_context → respond → append` against a store.
///
/// The runner holds no conversation state of its own; everything lives in
/// the store under the session key, so any number of runners can share one
/// store.
pub struct ConversationRunner {
    store: Arc<ConversationStore>,
    responder: Arc<dyn Responder>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
    system_prompt: Option<String>,
}

impl ConversationRunner {
    pub fn new(store: Arc<ConversationStore>, responder: Arc<dyn Responder>) -> Self {
        Self {
            store,
            responder,
            tools: Arc::new(ToolRegistry::new()),
            max_iterations: 8,
            system_prompt: None,
        }
    }

    /// Execute tool calls from the responder with these tools.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the maximum number of responder calls per step.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Standing instruction logged as the first turn of new sessions.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    /// Run one step for `user_text` and return the final assistant turn.
    ///
    /// Every turn produced along the way (tool invocations, tool results,
    /// the reply) is appended to the session. Responder errors are returned
    /// unchanged; turns appended before the failure stay in the log.
    pub async fn invoke(
        &self,
        key: &SessionKey,
        user_text: impl Into<String>,
    ) -> Result<Turn, AgentError> {
        if let Some(prompt) = &self.system_prompt
            && self.store.state(key).await? == SessionState::Empty
        {
            self.store.append(key, Turn::system(prompt.clone())).await?;
        }
        self.store.append(key, Turn::user(user_text)).await?;

        for iteration in 1..=self.max_iterations {
            let context = self.store.get_context(key).await?;
            debug!(
                session = %key,
                iteration,
                context_turns = context.len(),
                "Calling responder"
            );

            let reply = self.responder.respond(&context).await?;
            self.store.append(key, reply.clone()).await?;

            let calls = reply.tool_calls().to_vec();
            if calls.is_empty() || self.tools.is_empty() {
                info!(session = %key, iterations = iteration, "Step complete");
                return Ok(reply);
            }

            debug!(session = %key, tool_count = calls.len(), "Executing tool calls");
            for call in &calls {
                let result = match self.tools.execute(call).await {
                    Ok(output) => Turn::tool_result(&call.id, output),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool execution failed");
                        // Reported back so the responder can recover
                        Turn::tool_error(&call.id, format!("Error: {e}"))
                    }
                };
                self.store.append(key, result).await?;
            }
        }

        warn!(session = %key, limit = self.max_iterations, "Max tool iterations reached");
        Err(AgentError::MaxIterations {
            limit: self.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::default_registry;
    use async_trait::async_trait;
    use turnstore_core::error::{ResponderError, SummarizerError};
    use turnstore_core::responder::Summarizer;
    use turnstore_core::turn::{Payload, Role, ToolInvocation};
    use turnstore_memory::StoreSettings;
    use turnstore_providers::ScriptedResponder;

    struct FixedSummarizer;

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn summarize(&self, turns: &[Turn]) -> Result<String, SummarizerError> {
            Ok(format!("{} earlier turns", turns.len()))
        }
    }

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::new(Arc::new(FixedSummarizer), StoreSettings::default()).unwrap())
    }

    fn key(s: &str) -> SessionKey {
        SessionKey::parse(s).unwrap()
    }

    fn calculator_call(a: i64, b: i64) -> Turn {
        Turn::tool_invocation(
            "",
            vec![ToolInvocation::new(
                "calculator",
                serde_json::json!({"operation": "multiply", "a": a, "b": b}),
            )],
        )
    }

    #[tokio::test]
    async fn simple_text_response() {
        let responder = Arc::new(ScriptedResponder::texts(["Hello! How can I help?"]));
        let runner = ConversationRunner::new(store(), responder)
            .with_system_prompt("You are a helpful assistant.");
        let k = key("thread-1");

        let reply = runner.invoke(&k, "Hello!").await.unwrap();
        assert_eq!(reply.content, "Hello! How can I help?");

        let history = runner.store().history(&k).await.unwrap();
        let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn system_prompt_is_logged_once() {
        let responder = Arc::new(ScriptedResponder::texts(["one", "two"]));
        let runner = ConversationRunner::new(store(), responder).with_system_prompt("be brief");
        let k = key("thread-1");
        runner.invoke(&k, "a").await.unwrap();
        runner.invoke(&k, "b").await.unwrap();

        let history = runner.store().history(&k).await.unwrap();
        assert_eq!(history.iter().filter(|t| t.role == Role::System).count(), 1);
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn remembers_within_a_session_only() {
        let responder = Arc::new(ScriptedResponder::texts(["Hi Alice", "Your name is Alice", "I don't know"]));
        let runner = ConversationRunner::new(store(), responder.clone());

        let alice = key("user_alice");
        let bob = key("user_bob");
        runner.invoke(&alice, "My name is Alice").await.unwrap();
        runner.invoke(&alice, "What is my name?").await.unwrap();
        runner.invoke(&bob, "What is my name?").await.unwrap();

        let contexts = responder.contexts();
        assert_eq!(contexts[1].len(), 3);
        assert_eq!(contexts[1][0].content, "My name is Alice");
        assert_eq!(contexts[2].len(), 1);
    }

    #[tokio::test]
    async fn executes_tool_calls_then_answers() {
        let responder = Arc::new(ScriptedResponder::new(vec![
            calculator_call(15, 30),
            Turn::assistant("15*30 = 450"),
        ]));
        let runner = ConversationRunner::new(store(), responder.clone())
            .with_tools(Arc::new(default_registry()));
        let k = key("thread-1");

        let reply = runner.invoke(&k, "What is 15*30?").await.unwrap();
        assert_eq!(reply.content, "15*30 = 450");

        let history = runner.store().history(&k).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, Role::ToolResult);
        assert_eq!(history[2].content, "450");
        let call_id = &history[1].tool_calls()[0].id;
        assert!(matches!(&history[2].payload, Payload::ToolResult { call_id: id, is_error: false } if id == call_id));

        // The second responder call saw the tool result
        assert_eq!(responder.contexts()[1].len(), 3);
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_result() {
        let bad_call = Turn::tool_invocation(
            "",
            vec![ToolInvocation::new("weather", serde_json::json!({"city": "Shanghai"}))],
        );
        let responder = Arc::new(ScriptedResponder::new(vec![bad_call, Turn::assistant("Sorry")]));
        let runner = ConversationRunner::new(store(), responder)
            .with_tools(Arc::new(default_registry()));
        let k = key("thread-1");

        runner.invoke(&k, "Weather in Shanghai?").await.unwrap();
        let history = runner.store().history(&k).await.unwrap();
        assert!(matches!(history[2].payload, Payload::ToolResult { is_error: true, .. }));
        assert!(history[2].content.contains("weather"));
    }

    #[tokio::test]
    async fn tool_calls_without_tools_are_returned() {
        let responder = Arc::new(ScriptedResponder::new(vec![calculator_call(2, 3)]));
        let runner = ConversationRunner::new(store(), responder);
        let reply = runner.invoke(&key("thread-1"), "2*3?").await.unwrap();
        assert_eq!(reply.tool_calls().len(), 1);
    }

    #[tokio::test]
    async fn responder_error_propagates_unchanged() {
        let responder = Arc::new(ScriptedResponder::from_results(vec![Err(
            ResponderError::Authentication("bad key".into()),
        )]));
        let runner = ConversationRunner::new(store(), responder);
        let k = key("thread-1");

        let err = runner.invoke(&k, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Responder(ResponderError::Authentication(_))));
        assert_eq!(runner.store().history(&k).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stops_after_max_iterations() {
        let responder = Arc::new(ScriptedResponder::new(vec![
            calculator_call(1, 1),
            calculator_call(2, 2),
            calculator_call(3, 3),
        ]));
        let runner = ConversationRunner::new(store(), responder.clone())
            .with_tools(Arc::new(default_registry()))
            .with_max_iterations(2);

        let err = runner.invoke(&key("thread-1"), "loop").await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterations { limit: 2 }));
        assert_eq!(responder.call_count(), 2);
    }

    #[tokio::test]
    async fn responder_sees_compacted_context() {
        let per_turn = |turns: &[Turn]| turns.len();
        let settings = StoreSettings {
            max_tokens_before_summary: 4,
            ..StoreSettings::default()
        };
        let store = Arc::new(
            ConversationStore::new(Arc::new(FixedSummarizer), settings)
                .unwrap()
                .with_estimator(Arc::new(per_turn)),
        );
        let responder = Arc::new(ScriptedResponder::texts(["a1", "a2", "a3", "a4"]));
        let runner = ConversationRunner::new(store, responder.clone()).with_system_prompt("sys");
        let k = key("thread-1");
        for q in ["q1", "q2", "q3", "q4"] {
            runner.invoke(&k, q).await.unwrap();
        }

        // Before the 4th call the log is sys + 7 turns; K = 4 keeps a2, q3, a3, q4
        let last = responder.contexts().pop().unwrap();
        assert_eq!(last[0].role, Role::System);
        assert_eq!(last[1].role, Role::SystemMemory);
        assert_eq!(last.len(), 6);
        assert_eq!(runner.store().history(&k).await.unwrap().len(), 9);
    }
}
