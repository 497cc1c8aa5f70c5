//! Per-conversation state machine
//!
//! Accumulates chart type, engine, inline data, and parameters across turns until a
//! complete request can be assembled.
//!
//! ```text
//! Collecting --complete--> Ready --begin_dispatch--> Dispatched --complete--> Terminal
//!     ^                                                  |
//!     +------------------ fail (timeout/error) ----------+
//! any phase --new turn--> Collecting
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::EngineKind;
use crate::error::{ChartsmithError, Result};
use crate::interpret::Interpretation;
use crate::params;
use crate::tools::{CatalogIndex, ToolDefinition};

use super::request::{DialogueTurnResult, ValidatedRequest};

/// Pseudo-parameter reported when the tool itself is unknown
pub const CHART_TYPE_PARAM: &str = "chart_type";

const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Gathering chart type and/or parameters
    Collecting,
    /// A complete request has been assembled
    Ready,
    /// The request is executing
    Dispatched,
    /// Result delivered or conversation abandoned
    Terminal,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminal)
    }
}

/// Persistable view of a conversation, restored when a process picks it up again
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub engine: Option<EngineKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub asked: BTreeSet<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    conversation_id: String,
    phase: Phase,
    chart_type: Option<String>,
    engine: Option<EngineKind>,
    data: Option<Value>,
    params: Map<String, Value>,
    asked: BTreeSet<String>,
    pending: Option<ValidatedRequest>,
    last_error: Option<String>,
    turns: u32,
}

impl ConversationState {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            phase: Phase::Collecting,
            chart_type: None,
            engine: None,
            data: None,
            params: Map::new(),
            asked: BTreeSet::new(),
            pending: None,
            last_error: None,
            turns: 0,
        }
    }

    /// Rebuild from a snapshot; anything that was mid-flight resumes collecting
    pub fn restore(conversation_id: impl Into<String>, snapshot: StateSnapshot) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            phase: if snapshot.terminal { Phase::Terminal } else { Phase::Collecting },
            chart_type: snapshot.chart_type,
            engine: snapshot.engine,
            data: snapshot.data,
            params: snapshot.params,
            asked: snapshot.asked,
            pending: None,
            last_error: snapshot.last_error,
            turns: snapshot.turns,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            chart_type: self.chart_type.clone(),
            engine: self.engine,
            data: self.data.clone(),
            params: self.params.clone(),
            asked: self.asked.clone(),
            last_error: self.last_error.clone(),
            turns: self.turns,
            terminal: self.phase.is_terminal(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn chart_type(&self) -> Option<&str> {
        self.chart_type.as_deref()
    }

    pub fn engine(&self) -> Option<EngineKind> {
        self.engine
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Whether this conversation has already prompted for a parameter
    pub fn has_asked(&self, name: &str) -> bool {
        self.asked.contains(name)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hand out the last failure note once; later prompts no longer repeat it
    pub fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    /// Feed one interpreted user turn into the machine
    pub fn apply(&mut self, catalog: &CatalogIndex, interpretation: Interpretation, message: &str) -> DialogueTurnResult {
        self.turns += 1;
        if interpretation.is_empty() && matches!(self.phase, Phase::Ready | Phase::Terminal) {
            log::debug!(
                "Conversation {}: nothing actionable in turn, staying {:?}",
                self.conversation_id,
                self.phase
            );
            return DialogueTurnResult::Unchanged {
                chart_type: self.chart_type.clone(),
            };
        }
        if self.phase != Phase::Collecting {
            log::debug!(
                "Conversation {} restarting collection from {:?}",
                self.conversation_id,
                self.phase
            );
            self.phase = Phase::Collecting;
            self.pending = None;
        }

        let Interpretation {
            chart_type,
            params: supplied,
            engine,
            data,
            justification,
        } = interpretation;

        if let Some(reference) = chart_type {
            match catalog.lookup(&reference) {
                Ok(tool) => {
                    if self.chart_type.as_deref() != Some(tool.key().as_str()) {
                        self.switch_tool(&tool);
                    }
                }
                Err(_) => {
                    log::debug!(
                        "Conversation {}: '{}' does not resolve to a tool",
                        self.conversation_id,
                        reference
                    );
                    self.chart_type = None;
                    self.merge_params(supplied);
                    return self.ask_for_chart_type(
                        catalog.suggest(&reference, MAX_SUGGESTIONS),
                        vec![format!("'{}' is not a known chart type", reference)],
                    );
                }
            }
        }

        if engine.is_some() {
            self.engine = engine;
        }
        if data.is_some() {
            self.data = data;
        }
        self.merge_params(supplied);

        let Some(key) = self.chart_type.clone() else {
            return self.ask_for_chart_type(catalog.suggest(message, MAX_SUGGESTIONS), Vec::new());
        };
        let tool = match catalog.lookup(&key) {
            Ok(tool) => tool,
            Err(_) => {
                // The tool disappeared in a catalog refresh
                self.chart_type = None;
                return self.ask_for_chart_type(
                    catalog.suggest(&key, MAX_SUGGESTIONS),
                    vec![format!("'{}' is no longer available", key)],
                );
            }
        };

        let resolution = params::resolve(&tool, &self.params);
        if !resolution.is_complete() {
            for invalid in &resolution.invalid {
                self.params.remove(&invalid.name);
            }
            self.asked.extend(resolution.missing_required.iter().cloned());
            let suggestions = resolution
                .missing_required
                .iter()
                .map(|name| match tool.params.get(name) {
                    Some(spec) => spec.hint(name),
                    None => name.clone(),
                })
                .collect();
            let notes = resolution
                .invalid
                .iter()
                .map(|i| format!("{}: {}", i.name, i.reason))
                .collect();
            return DialogueTurnResult::NeedsInfo {
                missing_params: resolution.missing_required,
                suggestions,
                notes,
            };
        }

        match resolution.into_request(tool, self.engine, self.data.clone(), justification) {
            Ok(request) => {
                self.phase = Phase::Ready;
                self.pending = Some(request.clone());
                DialogueTurnResult::Ready(request)
            }
            Err(e) => DialogueTurnResult::NeedsInfo {
                missing_params: match e {
                    ChartsmithError::MissingRequiredParameter(missing) => missing,
                    _ => Vec::new(),
                },
                suggestions: Vec::new(),
                notes: Vec::new(),
            },
        }
    }

    /// Ready -> Dispatched, handing out the pending request
    pub fn begin_dispatch(&mut self) -> Result<ValidatedRequest> {
        if self.phase != Phase::Ready {
            return Err(ChartsmithError::InvalidState(format!(
                "cannot dispatch conversation {} from {:?}",
                self.conversation_id, self.phase
            )));
        }
        let request = self
            .pending
            .take()
            .ok_or_else(|| ChartsmithError::InvalidState("ready without a pending request".to_string()))?;
        self.phase = Phase::Dispatched;
        Ok(request)
    }

    /// Dispatched -> Terminal
    pub fn complete(&mut self) -> Result<()> {
        if self.phase != Phase::Dispatched {
            return Err(ChartsmithError::InvalidState(format!(
                "cannot complete conversation {} from {:?}",
                self.conversation_id, self.phase
            )));
        }
        self.phase = Phase::Terminal;
        self.last_error = None;
        Ok(())
    }

    /// Dispatched -> Collecting with an error note; the accumulated request is kept for retry
    pub fn fail(&mut self, note: impl Into<String>) {
        let note = note.into();
        log::debug!("Conversation {} back to collecting: {}", self.conversation_id, note);
        self.phase = Phase::Collecting;
        self.pending = None;
        self.last_error = Some(note);
    }

    pub fn abandon(&mut self) {
        self.phase = Phase::Terminal;
        self.pending = None;
    }

    fn switch_tool(&mut self, tool: &ToolDefinition) {
        let key = tool.key();
        log::info!(
            "Conversation {} chart type {} -> {}",
            self.conversation_id,
            self.chart_type.as_deref().unwrap_or("<none>"),
            key
        );
        self.params
            .retain(|name, value| tool.params.get(name).is_some_and(|spec| spec.validate(value).is_ok()));
        if self.engine.is_some_and(|engine| !tool.supports(engine)) {
            self.engine = None;
        }
        self.asked.clear();
        self.last_error = None;
        self.chart_type = Some(key);
    }

    fn merge_params(&mut self, supplied: Map<String, Value>) {
        for (name, value) in supplied {
            if let Some(previous) = self.params.get(&name) {
                if previous != &value {
                    log::debug!("Conversation {}: '{}' replaced", self.conversation_id, name);
                }
            }
            self.params.insert(name, value);
        }
    }

    fn ask_for_chart_type(&mut self, suggestions: Vec<String>, notes: Vec<String>) -> DialogueTurnResult {
        self.asked.insert(CHART_TYPE_PARAM.to_string());
        DialogueTurnResult::NeedsInfo {
            missing_params: vec![CHART_TYPE_PARAM.to_string()],
            suggestions,
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamSpec, ParamType};
    use crate::tools::{ToolDefinition, ToolPath};
    use serde_json::json;

    fn catalog() -> CatalogIndex {
        CatalogIndex::from_definitions(vec![
            ToolDefinition::new(ToolPath::new("scatter", "volcano"), "Volcano plot", EngineKind::Script)
                .with_param("x", ParamSpec::new(ParamType::String).required())
                .with_param("y", ParamSpec::new(ParamType::String).required())
                .with_param("alpha", ParamSpec::new(ParamType::Number).with_range(Some(0.0), Some(1.0))),
            ToolDefinition::new(ToolPath::new("scatter", "ma"), "MA plot", EngineKind::Script)
                .with_engines(vec![EngineKind::Script, EngineKind::Markup])
                .with_param("x", ParamSpec::new(ParamType::String).required())
                .with_param("title", ParamSpec::new(ParamType::String)),
            ToolDefinition::new(ToolPath::new("tree", "radial"), "Radial tree", EngineKind::Markup),
        ])
    }

    fn turn(chart_type: Option<&str>, params: Value) -> Interpretation {
        Interpretation {
            chart_type: chart_type.map(String::from),
            params: params.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_volcano_scenario() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");

        let result = state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "log2fc"})), "volcano");
        assert_eq!(result.missing_params(), ["y".to_string()]);
        assert_eq!(state.phase(), Phase::Collecting);
        assert!(state.has_asked("y"));

        let result = state.apply(&catalog, turn(None, json!({"y": "pvalue"})), "y is pvalue");
        assert!(result.is_ready());
        assert_eq!(state.phase(), Phase::Ready);
        if let DialogueTurnResult::Ready(request) = result {
            assert_eq!(request.chart_type(), "scatter/volcano");
            assert_eq!(request.params()["x"], json!("log2fc"));
            assert_eq!(request.params()["y"], json!("pvalue"));
        }
    }

    #[test]
    fn test_both_supplied_is_ready_in_one_turn() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let result = state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"})), "");
        assert!(result.is_ready());
    }

    #[test]
    fn test_unknown_chart_type_reprompts_with_suggestions() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");

        for reference in ["volcano", "scatter-volcano", "scatter/volcano/extra", ""] {
            let result = state.apply(&catalog, turn(Some(reference), json!({})), reference);
            match result {
                DialogueTurnResult::NeedsInfo {
                    missing_params, notes, ..
                } => {
                    assert_eq!(missing_params, vec![CHART_TYPE_PARAM]);
                    assert_eq!(notes.len(), 1);
                }
                other => panic!("'{}' must not resolve, got {:?}", reference, other),
            }
            assert_eq!(state.phase(), Phase::Collecting);
            assert!(state.chart_type().is_none());
        }

        let result = state.apply(&catalog, turn(Some("volcano"), json!({})), "volcano");
        if let DialogueTurnResult::NeedsInfo { suggestions, .. } = result {
            assert_eq!(suggestions[0], "scatter/volcano");
        }
    }

    #[test]
    fn test_no_chart_type_asks_for_one() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let result = state.apply(&catalog, turn(None, json!({"x": "a"})), "draw me something radial");
        match result {
            DialogueTurnResult::NeedsInfo {
                missing_params,
                suggestions,
                ..
            } => {
                assert_eq!(missing_params, vec![CHART_TYPE_PARAM]);
                assert_eq!(suggestions[0], "tree/radial");
            }
            other => panic!("no chart type given, got {:?}", other),
        }
        assert!(state.has_asked(CHART_TYPE_PARAM));
        // Parameters given before the chart type are kept
        assert_eq!(state.params()["x"], json!("a"));
    }

    #[test]
    fn test_invalid_value_is_reasked() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let result = state.apply(
            &catalog,
            turn(Some("scatter/volcano"), json!({"x": "a", "y": "b", "alpha": 7})),
            "",
        );
        match result {
            DialogueTurnResult::NeedsInfo {
                missing_params,
                suggestions,
                notes,
            } => {
                assert_eq!(missing_params, vec!["alpha"]);
                assert!(suggestions[0].starts_with("alpha (number)"));
                assert!(notes[0].contains("above the maximum"));
            }
            other => panic!("invalid alpha must not dispatch, got {:?}", other),
        }
        assert!(!state.params().contains_key("alpha"));

        let result = state.apply(&catalog, turn(None, json!({"alpha": "0.01"})), "");
        assert!(result.is_ready());
    }

    #[test]
    fn test_switching_tool_preserves_compatible_values() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "log2fc", "alpha": 0.1})), "");
        assert!(state.has_asked("y"));

        let result = state.apply(&catalog, turn(Some("scatter/ma"), json!({})), "make it an MA plot");
        assert!(result.is_ready());
        assert_eq!(state.chart_type(), Some("scatter/ma"));
        assert_eq!(state.params()["x"], json!("log2fc"));
        assert!(!state.params().contains_key("alpha"));
        assert!(!state.has_asked("y"));
    }

    #[test]
    fn test_switching_tool_drops_unsupported_engine_preference() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let mut interpretation = turn(Some("tree/radial"), json!({}));
        interpretation.engine = Some(EngineKind::Markup);
        state.apply(&catalog, interpretation, "");
        assert_eq!(state.engine(), Some(EngineKind::Markup));

        state.apply(&catalog, turn(Some("scatter/volcano"), json!({})), "");
        assert_eq!(state.engine(), None);
    }

    #[test]
    fn test_explicit_engine_kept_even_if_unsupported() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let mut interpretation = turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"}));
        interpretation.engine = Some(EngineKind::Markup);
        let result = state.apply(&catalog, interpretation, "");
        if let DialogueTurnResult::Ready(request) = result {
            assert_eq!(request.request().engine, Some(EngineKind::Markup));
        } else {
            panic!("expected ready");
        }
    }

    #[test]
    fn test_dispatch_lifecycle() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        assert!(state.begin_dispatch().is_err());

        state.apply(&catalog, turn(Some("tree/radial"), json!({})), "");
        assert_eq!(state.phase(), Phase::Ready);

        let request = state.begin_dispatch().unwrap();
        assert_eq!(request.chart_type(), "tree/radial");
        assert_eq!(state.phase(), Phase::Dispatched);
        assert!(state.begin_dispatch().is_err());

        state.complete().unwrap();
        assert!(state.phase().is_terminal());
        assert!(state.complete().is_err());
    }

    #[test]
    fn test_failure_returns_to_collecting_and_retry_succeeds() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"})), "");
        state.begin_dispatch().unwrap();

        state.fail("Execution timed out after 100ms");
        assert_eq!(state.phase(), Phase::Collecting);
        assert_eq!(state.last_error(), Some("Execution timed out after 100ms"));

        let result = state.apply(&catalog, turn(None, json!({})), "try again");
        assert!(result.is_ready());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_terminal_follow_up_reuses_chart_type() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"})), "");
        state.begin_dispatch().unwrap();
        state.complete().unwrap();

        let result = state.apply(&catalog, turn(None, json!({"alpha": 0.2})), "now with alpha 0.2");
        assert!(result.is_ready());
        assert_eq!(state.params()["alpha"], json!(0.2));
    }

    #[test]
    fn test_empty_turn_after_completion_stays_terminal() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("tree/radial"), json!({})), "");
        state.begin_dispatch().unwrap();
        state.complete().unwrap();

        let result = state.apply(&catalog, Interpretation::default(), "thanks!");
        assert!(!result.is_ready());
        assert!(matches!(
            result,
            DialogueTurnResult::Unchanged { chart_type: Some(ref key) } if key == "tree/radial"
        ));
        assert!(state.phase().is_terminal());
        assert!(state.begin_dispatch().is_err());

        // A restored terminal conversation behaves the same
        let mut restored = ConversationState::restore("c1", state.snapshot());
        let result = restored.apply(&catalog, Interpretation::default(), "ok");
        assert!(matches!(result, DialogueTurnResult::Unchanged { .. }));
        assert!(restored.phase().is_terminal());
    }

    #[test]
    fn test_empty_turn_while_ready_keeps_pending_request() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("tree/radial"), json!({})), "");

        let result = state.apply(&catalog, Interpretation::default(), "hmm");
        assert!(matches!(result, DialogueTurnResult::Unchanged { .. }));
        assert_eq!(state.phase(), Phase::Ready);
        assert_eq!(state.begin_dispatch().unwrap().chart_type(), "tree/radial");
    }

    #[test]
    fn test_switching_tool_clears_last_error() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"})), "");
        state.begin_dispatch().unwrap();
        state.fail("Execution timed out after 100ms");

        state.apply(&catalog, turn(Some("scatter/ma"), json!({})), "try an MA plot");
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_last_error_is_handed_out_once() {
        let mut state = ConversationState::new("c1");
        state.fail("backend exited with 1");
        assert_eq!(state.take_last_error().as_deref(), Some("backend exited with 1"));
        assert!(state.take_last_error().is_none());
        assert!(state.snapshot().last_error.is_none());
    }

    #[test]
    fn test_new_information_while_ready_restarts_collection() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a", "y": "b"})), "");
        assert_eq!(state.phase(), Phase::Ready);

        let result = state.apply(&catalog, turn(None, json!({"alpha": 9})), "");
        assert!(!result.is_ready());
        assert_eq!(state.phase(), Phase::Collecting);
        assert!(state.begin_dispatch().is_err());
    }

    #[test]
    fn test_every_turn_yields_exactly_one_outcome() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        let turns = vec![
            turn(None, json!({})),
            turn(Some("bogus"), json!({"x": 1})),
            turn(Some("scatter/volcano"), json!({})),
            turn(None, json!({"x": "a"})),
            turn(None, json!({"y": "b"})),
            turn(Some("tree/radial"), json!({})),
        ];
        for interpretation in turns {
            match state.apply(&catalog, interpretation, "") {
                DialogueTurnResult::NeedsInfo { missing_params, .. } => {
                    assert!(!missing_params.is_empty());
                    assert_ne!(state.phase(), Phase::Ready);
                }
                DialogueTurnResult::Ready(_) => assert_eq!(state.phase(), Phase::Ready),
                DialogueTurnResult::Unchanged { .. } => panic!("every turn here carries information"),
            }
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("scatter/volcano"), json!({"x": "a"})), "");
        let snapshot = state.snapshot();
        assert!(!snapshot.terminal);

        let json = serde_json::to_value(&snapshot).unwrap();
        let mut restored = ConversationState::restore("c1", serde_json::from_value(json).unwrap());
        assert_eq!(restored.phase(), Phase::Collecting);
        assert_eq!(restored.chart_type(), Some("scatter/volcano"));
        assert!(restored.has_asked("y"));
        assert_eq!(restored.turns(), 1);

        let result = restored.apply(&catalog, turn(None, json!({"y": "b"})), "");
        assert!(result.is_ready());
    }

    #[test]
    fn test_restore_mid_dispatch_resumes_collecting() {
        let catalog = catalog();
        let mut state = ConversationState::new("c1");
        state.apply(&catalog, turn(Some("tree/radial"), json!({})), "");
        state.begin_dispatch().unwrap();

        let restored = ConversationState::restore("c1", state.snapshot());
        assert_eq!(restored.phase(), Phase::Collecting);
    }

    #[test]
    fn test_abandon() {
        let mut state = ConversationState::new("c1");
        state.abandon();
        assert!(state.phase().is_terminal());
        assert_eq!(state.turns(), 0);
    }
}
