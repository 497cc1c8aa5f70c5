//! Orchestrator - drives one user turn from free text to clarification or rendered chart
//!
//! Each turn: lock the conversation, persist the user message, interpret it, feed the
//! conversation state, then either ask for what is missing or dispatch and persist the
//! outcome.

mod locks;
mod turn;

use std::sync::Arc;

use serde_json::{Map, json};

use crate::conversation::{CHART_TYPE_PARAM, ConversationState, DialogueTurnResult, StateSnapshot};
use crate::engine::EngineDispatcher;
use crate::error::Result;
use crate::interpret::{InterpretContext, Interpreter};
use crate::params;
use crate::storage::{ConversationStore, Role, StoredMessage};
use crate::tools::ToolCatalog;

pub use locks::{ConversationGuard, ConversationLocks};
pub use turn::{TurnInput, TurnResponse, UserIdentity};

/// Metadata key holding the persisted conversation state
const STATE_KEY: &str = "state";

pub struct Orchestrator<S: ConversationStore, I: Interpreter> {
    catalog: Arc<ToolCatalog>,
    dispatcher: Arc<EngineDispatcher>,
    interpreter: I,
    store: S,
    locks: ConversationLocks,
}

impl<S: ConversationStore, I: Interpreter> Orchestrator<S, I> {
    pub fn new(catalog: Arc<ToolCatalog>, dispatcher: Arc<EngineDispatcher>, interpreter: I, store: S) -> Self {
        Self {
            catalog,
            dispatcher,
            interpreter,
            store,
            locks: ConversationLocks::new(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one user turn
    ///
    /// User-facing failures (unknown tool, bad parameter, unsupported engine, backend
    /// failure, timeout, overload) come back as an unsuccessful `Execution` response.
    /// A concurrent turn on the same conversation and internal failures are errors.
    pub async fn handle_turn(&self, input: TurnInput) -> Result<TurnResponse> {
        let mut state = self.locks.try_acquire(&input.conversation_id)?;
        log::info!(
            "Turn for conversation {} from {}",
            input.conversation_id,
            input.user.user_id
        );

        let conversation_id = input.conversation_id.clone();
        match self.run_turn(&mut state, input).await {
            Err(e) if e.is_user_facing() => {
                log::info!("Conversation {}: {}", conversation_id, e);
                self.store.append_message(
                    &conversation_id,
                    Role::Assistant,
                    &e.to_string(),
                    json!({"error": e.to_string(), "retryable": e.is_retryable(), STATE_KEY: state.snapshot()}),
                    true,
                )?;
                Ok(TurnResponse::failed(&e, Map::new()))
            }
            other => other,
        }
    }

    async fn run_turn(&self, state: &mut ConversationState, input: TurnInput) -> Result<TurnResponse> {
        let TurnInput {
            conversation_id,
            user,
            message,
            params: explicit_params,
            engine,
            chart_type,
        } = input;

        let history = self.store.read_history(&conversation_id)?;
        if state.turns() == 0 {
            if let Some(snapshot) = latest_snapshot(&history) {
                log::debug!("Restoring conversation {} from history", conversation_id);
                *state = ConversationState::restore(&conversation_id, snapshot);
            }
        }

        self.store.append_message(
            &conversation_id,
            Role::User,
            &message,
            json!({
                "user": user.user_id,
                "params": explicit_params,
                "engine": engine,
                "chart_type": chart_type,
            }),
            true,
        )?;

        let index = self.catalog.snapshot();
        let context = InterpretContext {
            catalog: &index,
            history: &history,
            current_chart_type: state.chart_type(),
        };
        let mut interpretation = self.interpreter.interpret(&message, &context).await?;

        // Structured inputs are held to a stricter standard than free text
        if let Some(reference) = chart_type {
            interpretation.chart_type = Some(index.lookup(&reference)?.key());
        }
        if !explicit_params.is_empty() {
            let target = interpretation
                .chart_type
                .clone()
                .or_else(|| state.chart_type().map(String::from));
            if let Some(tool) = target.and_then(|key| index.lookup(&key).ok()) {
                params::validate_strict(&tool, &explicit_params)?;
            }
            interpretation.params.extend(explicit_params);
        }
        if engine.is_some() {
            interpretation.engine = engine;
        }

        match state.apply(&index, interpretation, &message) {
            DialogueTurnResult::NeedsInfo {
                missing_params,
                suggestions,
                notes,
            } => {
                let last_error = state.take_last_error();
                let text = clarification_text(&missing_params, &suggestions, &notes, last_error.as_deref());
                self.store.append_message(
                    &conversation_id,
                    Role::Assistant,
                    &text,
                    json!({
                        "missing_params": missing_params,
                        "suggestions": suggestions,
                        STATE_KEY: state.snapshot(),
                    }),
                    true,
                )?;
                Ok(TurnResponse::Clarification {
                    message: text,
                    missing_params,
                    suggestions,
                })
            }
            DialogueTurnResult::Ready(_) => self.dispatch(state, &conversation_id).await,
            DialogueTurnResult::Unchanged { chart_type } => {
                let text = match chart_type {
                    Some(key) => format!(
                        "Nothing to change for {}. Name a parameter to adjust or another chart type.",
                        key
                    ),
                    None => "Which chart would you like?".to_string(),
                };
                self.store.append_message(
                    &conversation_id,
                    Role::Assistant,
                    &text,
                    json!({STATE_KEY: state.snapshot()}),
                    true,
                )?;
                Ok(TurnResponse::Clarification {
                    message: text,
                    missing_params: Vec::new(),
                    suggestions: Vec::new(),
                })
            }
        }
    }

    async fn dispatch(&self, state: &mut ConversationState, conversation_id: &str) -> Result<TurnResponse> {
        let request = state.begin_dispatch()?;
        let pending_id = self.store.append_message(
            conversation_id,
            Role::Assistant,
            &format!("Rendering {}", request.chart_type()),
            json!({"request": request.request(), STATE_KEY: state.snapshot()}),
            false,
        )?;

        match self.dispatcher.dispatch(&request).await {
            Ok(execution) => {
                state.complete()?;
                let text = format!(
                    "Rendered {} with the {} engine ({})",
                    execution.chart_type,
                    execution.engine,
                    execution.payload.kinds().join(", ")
                );
                self.store.finalize_message(
                    conversation_id,
                    &pending_id,
                    &text,
                    json!({
                        "request": request.request(),
                        "run_id": execution.run_id,
                        "engine": execution.engine,
                        "elapsed_ms": execution.elapsed_ms,
                        "payload": execution.payload,
                        STATE_KEY: state.snapshot(),
                    }),
                )?;
                Ok(TurnResponse::succeeded(execution, text))
            }
            Err(e) => {
                state.fail(e.to_string());
                self.store.finalize_message(
                    conversation_id,
                    &pending_id,
                    &e.to_string(),
                    json!({
                        "request": request.request(),
                        "error": e.to_string(),
                        "retryable": e.is_retryable(),
                        STATE_KEY: state.snapshot(),
                    }),
                )?;
                if e.is_user_facing() {
                    Ok(TurnResponse::failed(&e, request.params().clone()))
                } else {
                    Err(e)
                }
            }
        }
    }
}

fn latest_snapshot(history: &[StoredMessage]) -> Option<StateSnapshot> {
    history
        .iter()
        .rev()
        .filter_map(|m| m.metadata.get(STATE_KEY))
        .find_map(|value| serde_json::from_value::<StateSnapshot>(value.clone()).ok())
}

fn clarification_text(
    missing: &[String],
    suggestions: &[String],
    notes: &[String],
    last_error: Option<&str>,
) -> String {
    let mut lines = Vec::new();
    if let Some(error) = last_error {
        lines.push(format!("The last attempt failed: {}", error));
    }
    lines.extend(notes.iter().cloned());
    if missing.iter().any(|m| m == CHART_TYPE_PARAM) {
        lines.push("Which chart would you like?".to_string());
        if !suggestions.is_empty() {
            lines.push(format!("Available: {}", suggestions.join(", ")));
        }
    } else {
        lines.push(format!("Please provide: {}", missing.join(", ")));
        lines.extend(suggestions.iter().map(|s| format!("  {}", s)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChartsmithError;
    use crate::engine::{EngineKind, ProcessEngine, WorkerPool};
    use crate::interpret::Interpretation;
    use crate::output::ResultNormalizer;
    use crate::params::{ParamSpec, ParamType};
    use crate::storage::{JsonlConversationStore, MemoryStore};
    use crate::tools::{CatalogIndex, ToolDefinition, ToolPath};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Returns scripted interpretations in order, then empty ones
    #[derive(Default)]
    struct MockInterpreter {
        responses: Mutex<VecDeque<Interpretation>>,
    }

    impl MockInterpreter {
        fn scripted(responses: Vec<Interpretation>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl Interpreter for MockInterpreter {
        async fn interpret(&self, _message: &str, _context: &InterpretContext<'_>) -> Result<Interpretation> {
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn says(chart_type: Option<&str>, params: Value) -> Interpretation {
        Interpretation {
            chart_type: chart_type.map(String::from),
            params: params.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    struct Fixture {
        temp: TempDir,
        catalog: Arc<ToolCatalog>,
        dispatcher: Arc<EngineDispatcher>,
    }

    impl Fixture {
        /// One script-only volcano tool whose render.sh is `script`
        fn new(script: &str, timeout: Duration) -> Self {
            let temp = TempDir::new().unwrap();
            let dir = temp.path().join("tools/scatter/volcano");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("render.sh"), script).unwrap();

            let volcano = ToolDefinition::new(ToolPath::new("scatter", "volcano"), "Volcano plot", EngineKind::Script)
                .with_param("x", ParamSpec::new(ParamType::String).required())
                .with_param("y", ParamSpec::new(ParamType::String).required())
                .with_param("alpha", ParamSpec::new(ParamType::Number).with_range(Some(0.0), Some(1.0)))
                .with_dir(&dir);
            let catalog = Arc::new(ToolCatalog::from_index(CatalogIndex::from_definitions(vec![volcano])));

            let engine = ProcessEngine::new(EngineKind::Script, "sh", "render.sh").with_timeout(timeout);
            let dispatcher = Arc::new(
                EngineDispatcher::new(WorkerPool::new(2, 2), ResultNormalizer::new(temp.path().join("artifacts")))
                    .with_engine(Arc::new(engine)),
            );
            Self {
                temp,
                catalog,
                dispatcher,
            }
        }

        fn tool_dir(&self) -> std::path::PathBuf {
            self.temp.path().join("tools/scatter/volcano")
        }

        fn orchestrator<S: ConversationStore>(&self, store: S, interpreter: MockInterpreter) -> Orchestrator<S, MockInterpreter> {
            Orchestrator::new(self.catalog.clone(), self.dispatcher.clone(), interpreter, store)
        }
    }

    const ECHO_ROWS: &str = "cat > /dev/null\necho '{\"data\": [{\"gene\": \"TP53\"}]}'\n";

    fn turn(message: &str) -> TurnInput {
        TurnInput::new("c1", UserIdentity::new("u1"), message)
    }

    #[tokio::test]
    async fn test_volcano_conversation() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![
                says(Some("scatter/volcano"), json!({"x": "log2fc"})),
                says(None, json!({"y": "pvalue"})),
            ]),
        );

        let first = orchestrator.handle_turn(turn("volcano plot of log2fc")).await.unwrap();
        assert_eq!(first.missing_params(), ["y".to_string()]);
        assert!(first.message().contains("Please provide: y"));

        let second = orchestrator.handle_turn(turn("y is pvalue")).await.unwrap();
        match second {
            TurnResponse::Execution {
                success,
                data,
                params_used,
                ..
            } => {
                assert!(success);
                assert_eq!(data, Some(json!([{"gene": "TP53"}])));
                assert_eq!(params_used["x"], json!("log2fc"));
                assert_eq!(params_used["y"], json!("pvalue"));
            }
            other => panic!("expected execution, got {:?}", other),
        }

        let history = orchestrator.store().read_history("c1").unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert!(history.iter().all(|m| m.is_complete));
        assert_eq!(history[3].metadata["request"]["chart_type"], "scatter/volcano");
        assert!(history[3].metadata["run_id"].as_str().unwrap().starts_with("run-volcano-"));
    }

    #[tokio::test]
    async fn test_unknown_chart_type_in_free_text_asks() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![says(Some("volcano"), json!({}))]),
        );

        let response = orchestrator.handle_turn(turn("volcano please")).await.unwrap();
        match response {
            TurnResponse::Clarification {
                missing_params,
                suggestions,
                message,
            } => {
                assert_eq!(missing_params, vec![CHART_TYPE_PARAM]);
                assert_eq!(suggestions, vec!["scatter/volcano"]);
                assert!(message.contains("Which chart would you like?"));
            }
            other => panic!("expected clarification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_unknown_chart_type_is_not_found() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(MemoryStore::new(), MockInterpreter::default());

        let response = orchestrator
            .handle_turn(turn("draw").with_chart_type("tree/radial/extra"))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(response.message(), "Tool not found: tree/radial/extra");
        assert!(matches!(response, TurnResponse::Execution { retryable: false, .. }));

        let history = orchestrator.store().read_history("c1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].metadata["error"], "Tool not found: tree/radial/extra");
    }

    #[tokio::test]
    async fn test_explicit_invalid_param_rejected() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(MemoryStore::new(), MockInterpreter::default());

        let response = orchestrator
            .handle_turn(
                turn("volcano")
                    .with_chart_type("scatter/volcano")
                    .with_param("alpha", json!(5)),
            )
            .await
            .unwrap();
        assert!(!response.is_success());
        assert!(response.message().starts_with("Invalid parameter 'alpha'"));
    }

    #[tokio::test]
    async fn test_unsupported_engine_does_not_execute() {
        let marker_script = "touch ran\necho '[1]'\n";
        let fixture = Fixture::new(marker_script, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(MemoryStore::new(), MockInterpreter::default());

        let response = orchestrator
            .handle_turn(
                turn("volcano in markup")
                    .with_chart_type("scatter/volcano")
                    .with_param("x", json!("a"))
                    .with_param("y", json!("b"))
                    .with_engine(EngineKind::Markup),
            )
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(
            response.message(),
            "Tool 'scatter/volcano' does not support the markup engine"
        );
        assert!(!fixture.tool_dir().join("ran").exists());
    }

    #[tokio::test]
    async fn test_timeout_then_resubmit_succeeds() {
        // First run hangs, later runs answer immediately
        let script = "if [ -f attempted ]; then echo '[1]'; else touch attempted; sleep 5; fi\n";
        let fixture = Fixture::new(script, Duration::from_millis(300));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![says(Some("scatter/volcano"), json!({"x": "a", "y": "b"}))]),
        );

        let first = orchestrator.handle_turn(turn("volcano x=a y=b")).await.unwrap();
        assert_eq!(first.message(), "Execution timed out after 300ms");
        assert!(matches!(first, TurnResponse::Execution { success: false, retryable: true, .. }));

        let history = orchestrator.store().read_history("c1").unwrap();
        let last = history.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.metadata["retryable"], true);

        let second = orchestrator.handle_turn(turn("try again")).await.unwrap();
        assert!(second.is_success());
    }

    #[tokio::test]
    async fn test_concurrent_turns_conflict() {
        let fixture = Fixture::new("sleep 1\necho '[1]'\n", Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![says(Some("scatter/volcano"), json!({"x": "a", "y": "b"}))]),
        );

        let (first, second) = tokio::join!(
            orchestrator.handle_turn(turn("volcano")),
            orchestrator.handle_turn(turn("again"))
        );
        assert!(first.unwrap().is_success());
        let err = second.unwrap_err();
        assert!(matches!(err, ChartsmithError::ConcurrentConversationConflict(ref id) if id == "c1"));

        // Other conversations are unaffected and the lock is released afterwards
        let third = orchestrator
            .handle_turn(TurnInput::new("c2", UserIdentity::new("u2"), "hello"))
            .await
            .unwrap();
        assert!(third.is_clarification());
    }

    #[tokio::test]
    async fn test_conversation_resumes_from_persisted_history() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let conversations = fixture.temp.path().join("conversations");

        let first = fixture.orchestrator(
            JsonlConversationStore::new(&conversations).unwrap(),
            MockInterpreter::scripted(vec![says(Some("scatter/volcano"), json!({"x": "log2fc"}))]),
        );
        let response = first.handle_turn(turn("volcano x=log2fc")).await.unwrap();
        assert!(response.is_clarification());
        drop(first);

        let second = fixture.orchestrator(
            JsonlConversationStore::new(&conversations).unwrap(),
            MockInterpreter::scripted(vec![says(None, json!({"y": "pvalue"}))]),
        );
        let response = second.handle_turn(turn("y=pvalue")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(second.store().read_history("c1").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_turn_after_success_does_not_execute() {
        // Every run appends a line, so the file counts executions
        let script = "cat > /dev/null\necho run >> runs\necho '[1]'\n";
        let fixture = Fixture::new(script, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![says(Some("scatter/volcano"), json!({"x": "a", "y": "b"}))]),
        );

        let first = orchestrator.handle_turn(turn("volcano x=a y=b")).await.unwrap();
        assert!(first.is_success());

        let second = orchestrator.handle_turn(turn("thanks!")).await.unwrap();
        assert!(second.is_clarification());
        assert!(second.missing_params().is_empty());
        assert!(second.message().starts_with("Nothing to change for scatter/volcano"));

        let runs = fs::read_to_string(fixture.tool_dir().join("runs")).unwrap();
        assert_eq!(runs.lines().count(), 1);
        let history = orchestrator.store().read_history("c1").unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].metadata[STATE_KEY]["terminal"], true);
    }

    #[tokio::test]
    async fn test_failure_note_is_shown_once() {
        let script = "if [ -f attempted ]; then echo '[1]'; else touch attempted; sleep 5; fi\n";
        let fixture = Fixture::new(script, Duration::from_millis(300));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![
                says(Some("scatter/volcano"), json!({"x": "a", "y": "b"})),
                says(None, json!({"alpha": 7})),
                says(None, json!({"alpha": 9})),
            ]),
        );

        let first = orchestrator.handle_turn(turn("volcano x=a y=b")).await.unwrap();
        assert!(!first.is_success());

        let second = orchestrator.handle_turn(turn("alpha 7")).await.unwrap();
        assert!(second.is_clarification());
        assert!(second.message().contains("The last attempt failed"));

        let third = orchestrator.handle_turn(turn("alpha 9")).await.unwrap();
        assert!(third.is_clarification());
        assert!(!third.message().contains("The last attempt failed"));
    }

    #[tokio::test]
    async fn test_lock_slots_released_between_turns() {
        let fixture = Fixture::new(ECHO_ROWS, Duration::from_secs(10));
        let orchestrator = fixture.orchestrator(
            MemoryStore::new(),
            MockInterpreter::scripted(vec![
                says(Some("scatter/volcano"), json!({"x": "log2fc"})),
                says(None, json!({"y": "pvalue"})),
            ]),
        );

        let first = orchestrator.handle_turn(turn("volcano x=log2fc")).await.unwrap();
        assert!(first.is_clarification());
        assert!(orchestrator.locks.is_empty());

        // The evicted conversation picks up from its persisted state
        let second = orchestrator.handle_turn(turn("y=pvalue")).await.unwrap();
        assert!(second.is_success());
        assert!(orchestrator.locks.is_empty());
    }

    #[test]
    fn test_clarification_text() {
        let text = clarification_text(
            &["y".to_string()],
            &["y (string): column for the y axis".to_string()],
            &["alpha: 7 is above the maximum 1".to_string()],
            Some("Execution timed out after 300ms"),
        );
        assert_eq!(
            text,
            "The last attempt failed: Execution timed out after 300ms\nalpha: 7 is above the maximum 1\nPlease provide: y\n  y (string): column for the y axis"
        );
    }
}
