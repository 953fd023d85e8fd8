//! The dialogue manager: a command handler orchestrating one turn at a time.
//!
//! Single public entrypoint: [`DialogueManager::handle`].  Commands in,
//! tagged results out; the consultation state travels inside an opaque
//! envelope that only this module and the state manager inspect.  Each turn
//! is an atomic unit of work — the state manager is rehydrated from the
//! incoming snapshot, mutated, and sealed into a fresh envelope.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use iris_config::AppConfig;
use iris_core::{
    Command, CommandResult, ConsultationState, ConversationMode, FieldType, FinalReport,
    IllegalCommand, QuestionDescriptor, TurnMetadata, TurnResult, ValueEnvelope,
};
use iris_extract::{build_prompt, FieldSpec, ParseOutcome, ParseResult, PromptSpec, ResponseParser};
use iris_llm::GenerateJson;
use iris_rules::QuestionSelector;
use iris_state::{ClinicalDataModel, StateManager};
use iris_triage::{
    assess_episode_safety, narrowing_prompt, EpisodeContext, EpisodeHypothesisGenerator,
    SafetyPolicy,
};

use crate::display::format_state_for_display;
use crate::reports;
use crate::routing::{FieldRoute, FieldRouting};

const EXIT_COMMANDS: &[&str] = &["quit", "exit", "stop"];
const MAX_TRANSITION_RETRIES: u64 = 2;
const GATING_SECTION: &str = "gating_questions";

/// The meta-question presented when an episode's protocol is exhausted.
fn transition_question() -> QuestionDescriptor {
    QuestionDescriptor {
        id: "episode_transition".into(),
        question: "Have you had any other episodes of eye-related problems you would like to \
                   discuss?"
            .into(),
        field: "additional_episodes_present".into(),
        field_type: FieldType::Boolean,
        kind: iris_core::QuestionKind::Probe,
        condition: None,
        valid_values: None,
        field_label: Some("additional episodes present".into()),
        field_description: Some(
            "whether the patient has additional distinct episodes to discuss".into(),
        ),
        definitions: None,
    }
}

/// Turn-level envelope state owned by the orchestrator, never by the state
/// manager.
#[derive(Debug, Clone)]
struct TurnContext {
    consultation_id: String,
    turn_count: u64,
    current_episode_id: u32,
    awaiting_first_question: bool,
    awaiting_episode_transition: bool,
    transition_retries: u64,
    pending_question: Option<QuestionDescriptor>,
    errors: Vec<Value>,
    previous_mode: ConversationMode,
}

impl TurnContext {
    fn from_snapshot(root: &Map<String, Value>, previous_mode: ConversationMode) -> Result<Self> {
        let consultation_id = root
            .get("consultation_id")
            .and_then(Value::as_str)
            .context("state missing consultation_id")?
            .to_string();
        let turn_count = root
            .get("turn_count")
            .and_then(Value::as_u64)
            .context("state missing turn_count")?;
        let current_episode_id = root
            .get("current_episode_id")
            .and_then(Value::as_u64)
            .context("state missing current_episode_id")? as u32;

        let pending_question = match root.get("pending_question") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .context("state pending_question is malformed")?,
            ),
        };

        Ok(Self {
            consultation_id,
            turn_count,
            current_episode_id,
            awaiting_first_question: root
                .get("awaiting_first_question")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            awaiting_episode_transition: root
                .get("awaiting_episode_transition")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            transition_retries: root
                .get("transition_retries")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            pending_question,
            errors: root
                .get("errors")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            previous_mode,
        })
    }
}

pub struct DialogueManager {
    selector: QuestionSelector,
    parser: ResponseParser,
    hypothesis_generator: EpisodeHypothesisGenerator,
    routing: FieldRouting,
    data_model: ClinicalDataModel,
    safety_policy: SafetyPolicy,
    lookahead: usize,
    output_dir: PathBuf,
    /// `(field, label)` of each symptom gating question, for triage context.
    symptom_categories: Vec<(String, String)>,
}

impl DialogueManager {
    /// Wire the manager from parts.  Startup-fatal checks live here: the
    /// gating section must exist, and every ruleset question must compile
    /// into a prompt field spec so no turn can fail on prompt assembly.
    pub fn new(
        selector: QuestionSelector,
        llm: Arc<dyn GenerateJson>,
        routing: FieldRouting,
        data_model: ClinicalDataModel,
        safety_policy: SafetyPolicy,
        lookahead: usize,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let gating = selector.section(GATING_SECTION);
        if gating.is_empty() {
            bail!("ruleset has no '{GATING_SECTION}' section; symptom categories unavailable");
        }
        let symptom_categories: Vec<(String, String)> = gating
            .iter()
            .map(|question| {
                let label = question
                    .field_label
                    .clone()
                    .unwrap_or_else(|| question.field.trim_end_matches("_present").to_string());
                (question.field.clone(), label)
            })
            .collect();

        for question in selector.questions() {
            FieldSpec::from_question(question).with_context(|| {
                format!("question '{}' cannot be compiled for extraction", question.id)
            })?;
        }
        FieldSpec::from_question(&transition_question())
            .context("transition question cannot be compiled for extraction")?;

        info!(
            symptom_categories = symptom_categories.len(),
            lookahead, "dialogue manager initialized"
        );

        Ok(Self {
            selector,
            parser: ResponseParser::new(llm.clone()),
            hypothesis_generator: EpisodeHypothesisGenerator::new(llm),
            routing,
            data_model,
            safety_policy,
            lookahead,
            output_dir: output_dir.into(),
            symptom_categories,
        })
    }

    /// Production wiring from the application config.
    pub fn from_config(config: &AppConfig, llm: Arc<dyn GenerateJson>) -> Result<Self> {
        Self::new(
            QuestionSelector::from_path(&config.paths.ruleset)?,
            llm,
            FieldRouting::with_defaults()?,
            ClinicalDataModel::load(&config.paths.clinical_data_model)?,
            SafetyPolicy { zero_hypothesis_safe: config.triage.zero_hypothesis_safe },
            config.triage.lookahead,
            &config.paths.output_dir,
        )
    }

    /// The only public method.  All interaction flows through commands.
    ///
    /// Returns `Err` only for faults of the runtime itself (e.g. the triage
    /// model being unreachable); everything a caller can get wrong comes
    /// back as [`IllegalCommand`].
    pub async fn handle(&self, command: Command) -> Result<CommandResult> {
        match command {
            Command::Start => Ok(CommandResult::Turn(self.handle_start())),
            Command::UserTurn { ref user_input, ref state } => {
                self.handle_user_turn(&command, user_input, state).await
            }
            Command::Finalize { ref state } => Ok(self.handle_finalize(&command, state)),
        }
    }

    // ─── start ───────────────────────────────────────────────────────────

    fn handle_start(&self) -> TurnResult {
        let consultation_id = Uuid::new_v4().simple().to_string()[..8].to_string();

        let mut state = StateManager::new(&self.data_model);
        let episode_id = state.create_episode();
        // Initial mode is a policy decision, not an inference.
        state.set_conversation_mode(ConversationMode::Discovery);

        let mut ctx = TurnContext {
            consultation_id: consultation_id.clone(),
            turn_count: 1,
            current_episode_id: episode_id,
            awaiting_first_question: false,
            awaiting_episode_transition: false,
            transition_retries: 0,
            pending_question: None,
            errors: Vec::new(),
            previous_mode: ConversationMode::Discovery,
        };

        let view = state.episode_view(episode_id).expect("episode just created");
        match self.selector.next_question(&view) {
            Some(first) => {
                info!(consultation_id = %ctx.consultation_id, "consultation started");
                ctx.pending_question = Some(first.clone());
                self.build_turn_result(
                    &state,
                    &ctx,
                    first.question.clone(),
                    debug_map(&[("first_question", Value::Bool(true))]),
                    false,
                    None,
                )
            }
            None => {
                // A ruleset with no eligible opening question is a
                // deployment problem, reported rather than crashed on.
                warn!("no questions available at consultation start");
                self.build_turn_result(
                    &state,
                    &ctx,
                    "Error: No questions configured".to_string(),
                    debug_map(&[("error", Value::String("no_questions".into()))]),
                    true,
                    None,
                )
            }
        }
    }

    // ─── user turns ──────────────────────────────────────────────────────

    async fn handle_user_turn(
        &self,
        command: &Command,
        user_input: &str,
        state: &ConsultationState,
    ) -> Result<CommandResult> {
        let snapshot = state.to_json();
        let Some(root) = snapshot.as_object() else {
            return Ok(illegal(command, "state envelope is not a JSON object"));
        };

        let mut state_manager = match StateManager::from_snapshot(&snapshot, &self.data_model) {
            Ok(state_manager) => state_manager,
            Err(err) => return Ok(illegal(command, format!("invalid state envelope: {err:#}"))),
        };

        let current_mode = state_manager.conversation_mode();
        let ctx = match TurnContext::from_snapshot(root, current_mode) {
            Ok(ctx) => ctx,
            Err(err) => return Ok(illegal(command, format!("invalid state envelope: {err:#}"))),
        };
        if state_manager.episode_view(ctx.current_episode_id).is_err() {
            return Ok(illegal(
                command,
                format!("state references unknown episode {}", ctx.current_episode_id),
            ));
        }

        // Mode transitions are explicit and authored here alone; today's
        // rule is a deliberate no-op.
        let next_mode = Self::determine_next_mode(current_mode);
        state_manager.set_conversation_mode(next_mode);

        if EXIT_COMMANDS.contains(&user_input.trim().to_lowercase().as_str()) {
            let mut ctx = ctx;
            ctx.turn_count += 1;
            return Ok(CommandResult::Turn(self.build_turn_result(
                &state_manager,
                &ctx,
                "Consultation ended by user".to_string(),
                debug_map(&[("exit_command", Value::Bool(true))]),
                true,
                None,
            )));
        }

        if ctx.awaiting_first_question {
            return Ok(CommandResult::Turn(self.emit_first_question(state_manager, ctx)));
        }

        if ctx.awaiting_episode_transition {
            return Ok(CommandResult::Turn(
                self.process_episode_transition(user_input, state_manager, ctx).await,
            ));
        }

        if ctx.pending_question.is_none() {
            return Ok(illegal(command, "no pending question in state"));
        }
        let result = self.process_regular_turn(user_input, state_manager, ctx).await?;
        Ok(CommandResult::Turn(result))
    }

    /// Bootstrap path: the stored state predates the first question.
    fn emit_first_question(&self, state: StateManager, mut ctx: TurnContext) -> TurnResult {
        ctx.turn_count += 1;
        ctx.awaiting_first_question = false;

        let view = match state.episode_view(ctx.current_episode_id) {
            Ok(view) => view,
            Err(err) => {
                ctx.errors.push(error_entry("bootstrap", &err.to_string(), None));
                return self.build_turn_result(
                    &state,
                    &ctx,
                    "Error: consultation state is inconsistent".to_string(),
                    Map::new(),
                    true,
                    None,
                );
            }
        };

        match self.selector.next_question(&view) {
            Some(first) => {
                ctx.pending_question = Some(first.clone());
                self.build_turn_result(
                    &state,
                    &ctx,
                    first.question.clone(),
                    debug_map(&[("first_question", Value::Bool(true))]),
                    false,
                    None,
                )
            }
            None => self.build_turn_result(
                &state,
                &ctx,
                "Error: No questions configured".to_string(),
                debug_map(&[("error", Value::String("no_questions".into()))]),
                true,
                None,
            ),
        }
    }

    /// The hot path: triage, extract, route, advance.
    async fn process_regular_turn(
        &self,
        user_input: &str,
        mut state: StateManager,
        mut ctx: TurnContext,
    ) -> Result<TurnResult> {
        let pending = ctx.pending_question.clone().expect("checked by caller");
        ctx.turn_count += 1;

        // Step 1: episode triage gate.  A generator transport failure is a
        // runtime fault and propagates.
        let episode_context = self.episode_context_for_triage(&state, ctx.current_episode_id);
        let signal = self
            .hypothesis_generator
            .generate(user_input, Some(&pending.question), Some(&episode_context))
            .await?;
        let safety = assess_episode_safety(&signal, self.safety_policy);

        if !safety.is_safe() {
            // Coerce back to the current problem: nothing is parsed and
            // nothing is committed.  The pending question stands.
            let coercion = narrowing_prompt(safety)?;
            warn!(
                status = safety.as_str(),
                episode_id = ctx.current_episode_id,
                question_id = %pending.id,
                "episode ambiguity detected, coercing"
            );
            let debug = debug_map(&[
                ("episode_ambiguity_detected", Value::Bool(true)),
                ("safety_status", Value::String(safety.as_str().into())),
                ("ehg_signal", serde_json::to_value(signal)?),
                ("coercion_applied", Value::Bool(true)),
                ("parser_output_discarded", Value::Bool(true)),
            ]);
            let output = format!("{coercion}\n\nFor the current problem, {}", pending.question);
            return Ok(self.build_turn_result(&state, &ctx, output, debug, false, None));
        }

        // Step 2: widen extraction with the lookahead window plus the
        // symptom-category gating fields.
        let additional = self.additional_field_specs(&pending);
        let parse_result = match self.run_extraction(&pending, additional, user_input, &ctx).await {
            Ok(parse_result) => parse_result,
            Err(err) => {
                // Prompt assembly failure is recorded, never fatal
                // mid-conversation; the question is simply re-asked.
                warn!(%err, question_id = %pending.id, "extraction could not run");
                ctx.errors.push(error_entry("extraction", &format!("{err:#}"), Some(&pending.id)));
                let output = pending.question.clone();
                return Ok(self.build_turn_result(
                    &state,
                    &ctx,
                    output,
                    debug_map(&[("extraction_error", Value::Bool(true))]),
                    false,
                    None,
                ));
            }
        };

        // Step 3: route extracted fields into state.
        let (unmapped, routing_debug) =
            self.route_extracted_fields(&mut state, &mut ctx, &parse_result.fields);

        // Step 4: satisfaction and answered bookkeeping.  Satisfaction is
        // data-driven (any question whose field arrived); answered requires
        // that the asked question's own field was obtained, so an unclear
        // turn leaves it unsatisfied and the selector re-presents it.
        for field in parse_result.fields.keys() {
            if let Some(question_ids) = self.selector.questions_for_field(field) {
                for question_id in question_ids {
                    if let Err(err) =
                        state.mark_question_satisfied(ctx.current_episode_id, question_id)
                    {
                        ctx.errors.push(error_entry("satisfaction", &err.to_string(), Some(question_id)));
                    }
                }
            }
        }
        if parse_result.outcome == ParseOutcome::Success {
            if let Err(err) = state.mark_question_answered(ctx.current_episode_id, &pending.id) {
                ctx.errors.push(error_entry("answered", &err.to_string(), Some(&pending.id)));
            }
        }

        // Step 5: triggers and block completion.
        self.update_follow_up_blocks(&mut state, &mut ctx);

        // Step 6: record the dialogue turn, parser metadata included.
        let mut extracted = Map::new();
        for (field, envelope) in &parse_result.fields {
            extracted.insert(field.clone(), envelope.value.clone());
        }
        extracted.insert("_unmapped".into(), Value::Object(unmapped));
        extracted.insert(
            "_parse_outcome".into(),
            Value::String(parse_result.outcome.as_str().into()),
        );
        extracted.insert("_parse_metadata".into(), serde_json::to_value(&parse_result.parse_metadata)?);
        if let Err(err) = state.add_dialogue_turn(
            ctx.current_episode_id,
            &pending.id,
            &pending.question,
            user_input,
            extracted,
        ) {
            ctx.errors.push(error_entry("dialogue", &err.to_string(), Some(&pending.id)));
        }

        // Step 7: advance the protocol.
        let mut debug = debug_map(&[("parser_output", serde_json::to_value(&parse_result)?)]);
        let view = state.episode_view(ctx.current_episode_id)?;
        match self.selector.next_question(&view) {
            Some(next) => {
                ctx.pending_question = Some(next.clone());
                ctx.awaiting_episode_transition = false;
                Ok(self.build_turn_result(
                    &state,
                    &ctx,
                    next.question.clone(),
                    debug,
                    false,
                    Some(routing_debug),
                ))
            }
            None => {
                // Episode protocol exhausted: offer the transition.
                debug.insert("episode_complete".into(), Value::Bool(true));
                let transition = transition_question();
                ctx.pending_question = Some(transition.clone());
                ctx.awaiting_episode_transition = true;
                ctx.transition_retries = 0;
                Ok(self.build_turn_result(
                    &state,
                    &ctx,
                    transition.question,
                    debug,
                    false,
                    Some(routing_debug),
                ))
            }
        }
    }

    /// Answer to the episode-transition meta-question.
    async fn process_episode_transition(
        &self,
        user_input: &str,
        mut state: StateManager,
        mut ctx: TurnContext,
    ) -> TurnResult {
        ctx.turn_count += 1;
        let transition = transition_question();

        let parse_result = match self.run_extraction(&transition, Vec::new(), user_input, &ctx).await
        {
            Ok(parse_result) => Some(parse_result),
            Err(err) => {
                warn!(%err, "transition extraction failed");
                ctx.errors.push(error_entry("episode_transition", &format!("{err:#}"), None));
                None
            }
        };

        let mut debug = Map::new();
        if let Some(parse_result) = &parse_result {
            if let Ok(value) = serde_json::to_value(parse_result) {
                debug.insert("parser_output".into(), value);
            }
        }

        let answer = parse_result.as_ref().and_then(|result| {
            if !matches!(result.outcome, ParseOutcome::Success | ParseOutcome::PartialSuccess) {
                return None;
            }
            match result.fields.get(&transition.field).map(|envelope| &envelope.value) {
                // Only a clear boolean counts as an answer.
                Some(Value::Bool(flag)) => Some(*flag),
                _ => None,
            }
        });

        match answer {
            Some(true) => {
                let new_episode_id = state.create_episode();
                info!(new_episode_id, "additional episode opened");
                ctx.current_episode_id = new_episode_id;
                ctx.awaiting_episode_transition = false;
                ctx.transition_retries = 0;
                debug.insert("new_episode".into(), new_episode_id.into());

                let view = state.episode_view(new_episode_id).expect("episode just created");
                match self.selector.next_question(&view) {
                    Some(first) => {
                        ctx.pending_question = Some(first.clone());
                        let output = format!("Episode {new_episode_id} - {}", first.question);
                        self.build_turn_result(&state, &ctx, output, debug, false, None)
                    }
                    None => {
                        ctx.errors.push(error_entry(
                            "episode_transition",
                            &format!("no questions configured for episode {new_episode_id}"),
                            None,
                        ));
                        ctx.pending_question = None;
                        debug.insert("error".into(), "no_questions_for_new_episode".into());
                        self.build_turn_result(
                            &state,
                            &ctx,
                            "Error: Unable to start new episode - no questions configured"
                                .to_string(),
                            debug,
                            true,
                            None,
                        )
                    }
                }
            }
            Some(false) => {
                debug.insert("no_more_episodes".into(), Value::Bool(true));
                ctx.pending_question = None;
                ctx.awaiting_episode_transition = false;
                self.build_turn_result(
                    &state,
                    &ctx,
                    "Consultation complete. Generating outputs...".to_string(),
                    debug,
                    true,
                    None,
                )
            }
            None if ctx.transition_retries >= MAX_TRANSITION_RETRIES => {
                // Retry budget spent: close out rather than loop forever.
                debug.insert("transition_retries_exhausted".into(), Value::Bool(true));
                ctx.pending_question = None;
                ctx.awaiting_episode_transition = false;
                self.build_turn_result(
                    &state,
                    &ctx,
                    "Thank you. Completing the consultation now.".to_string(),
                    debug,
                    true,
                    None,
                )
            }
            None => {
                debug.insert("unclear_transition".into(), Value::Bool(true));
                ctx.transition_retries += 1;
                ctx.pending_question = Some(transition.clone());
                let output = format!(
                    "I didn't quite catch that. Please answer yes or no: {}",
                    transition.question
                );
                self.build_turn_result(&state, &ctx, output, debug, false, None)
            }
        }
    }

    // ─── finalize ────────────────────────────────────────────────────────

    fn handle_finalize(&self, command: &Command, state: &ConsultationState) -> CommandResult {
        let snapshot = state.to_json();
        if !snapshot
            .get("consultation_complete")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return illegal(command, "cannot finalize: consultation not complete");
        }
        let Some(consultation_id) = snapshot
            .get("consultation_id")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return illegal(command, "state missing consultation_id");
        };

        let state_manager = match StateManager::from_snapshot(&snapshot, &self.data_model) {
            Ok(state_manager) => state_manager,
            Err(err) => return illegal(command, format!("invalid state envelope: {err:#}")),
        };

        let report = (|| -> Result<FinalReport> {
            let (json_path, json_filename) =
                reports::write_clinical_json(&state_manager.export_clinical_view(), &self.output_dir)?;
            let (summary_path, summary_filename) =
                reports::write_summary(&state_manager.export_for_summary(), &self.output_dir)?;
            Ok(FinalReport {
                json_path: json_path.display().to_string(),
                summary_path: summary_path.display().to_string(),
                json_filename,
                summary_filename,
                consultation_id: consultation_id.clone(),
                total_episodes: state_manager.episode_count(),
            })
        })();

        match report {
            Ok(report) => {
                info!(consultation_id = %report.consultation_id, "consultation finalized");
                CommandResult::Final(report)
            }
            Err(err) => illegal(command, format!("finalization failed: {err:#}")),
        }
    }

    // ─── internals ───────────────────────────────────────────────────────

    /// Mode transitions happen here and nowhere else.  The current rule is
    /// the identity: clarification wiring will add explicit signal-driven
    /// transitions, never inferred ones.
    fn determine_next_mode(current: ConversationMode) -> ConversationMode {
        current
    }

    /// The commit guard: the single decision site for episode writes.
    /// Allow-all today; clarification/discovery blocking lands here.
    fn commit_allowed(_mode: ConversationMode) -> bool {
        true
    }

    fn episode_context_for_triage(&self, state: &StateManager, episode_id: u32) -> EpisodeContext {
        let mut active = Vec::new();
        if let Ok(view) = state.episode_view(episode_id) {
            for (field, label) in &self.symptom_categories {
                if view.fields.get(field) == Some(&Value::Bool(true)) {
                    active.push(label.clone());
                }
            }
        }
        EpisodeContext { active_symptom_categories: active }
    }

    /// Lookahead window plus gating fields, deduplicated, primary excluded.
    fn additional_field_specs(&self, pending: &QuestionDescriptor) -> Vec<FieldSpec> {
        let mut specs: Vec<FieldSpec> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        seen.insert(pending.field.clone());

        let window = self.selector.next_window(&pending.id, self.lookahead);
        let gating = self.selector.section(GATING_SECTION).to_vec();
        for question in window.iter().chain(gating.iter()) {
            if !seen.insert(question.field.clone()) {
                continue;
            }
            match FieldSpec::from_question(question) {
                Ok(spec) => specs.push(spec),
                // Questions without prompt metadata stay out of the window.
                Err(err) => debug!(question_id = %question.id, %err, "skipping window question"),
            }
        }
        specs
    }

    async fn run_extraction(
        &self,
        pending: &QuestionDescriptor,
        additional: Vec<FieldSpec>,
        user_input: &str,
        ctx: &TurnContext,
    ) -> Result<ParseResult> {
        let primary = FieldSpec::from_question(pending)?;
        let spec = PromptSpec::primary(primary, pending.question.clone(), additional)?;
        let prompt_text = build_prompt(&spec, user_input)?;
        debug!(
            question_id = %pending.id,
            additional = spec.additional_fields.len(),
            "extraction prompt built"
        );

        let turn_id = format!("turn_{:03}", ctx.turn_count);
        Ok(self
            .parser
            .parse(&prompt_text, user_input, Some(&pending.field), Some(&turn_id))
            .await)
    }

    /// Classify every extracted field and write it through the guard.
    /// Shared fields bypass the guard; episode fields commit as a group iff
    /// the mode permits; unknown fields are quarantined for the dialogue
    /// record.
    fn route_extracted_fields(
        &self,
        state: &mut StateManager,
        ctx: &mut TurnContext,
        fields: &BTreeMap<String, ValueEnvelope>,
    ) -> (Map<String, Value>, Vec<Value>) {
        let mut unmapped = Map::new();
        let mut routing_debug = Vec::new();
        let mut episode_commits: Vec<(&String, &ValueEnvelope)> = Vec::new();

        for (field, envelope) in fields {
            let route = self.routing.classify(field);
            routing_debug.push(serde_json::json!({
                "field": field,
                "value": truncate(&envelope.value.to_string(), 50),
                "resolution": route.as_str(),
                "episode_id": matches!(route, FieldRoute::Episode)
                    .then_some(ctx.current_episode_id),
                "rule": self.routing.matched_rule(field),
                "recognized": route != FieldRoute::Unknown,
            }));

            match route {
                FieldRoute::Episode => episode_commits.push((field, envelope)),
                FieldRoute::Shared => {
                    if let Err(err) = state.commit_shared_envelope(field, envelope.clone()) {
                        warn!(field = %field, %err, "shared field write failed");
                        ctx.errors.push(error_entry("shared_write", &err.to_string(), Some(field)));
                    }
                }
                FieldRoute::Unknown => {
                    warn!(field = %field, "unmapped field quarantined");
                    unmapped.insert(field.clone(), envelope.value.clone());
                }
            }
        }

        if !episode_commits.is_empty() {
            if Self::commit_allowed(state.conversation_mode()) {
                for (field, envelope) in episode_commits {
                    if let Err(err) =
                        state.commit_envelope(ctx.current_episode_id, field, envelope.clone())
                    {
                        warn!(field = %field, %err, "episode field write failed");
                        ctx.errors.push(error_entry("episode_write", &err.to_string(), Some(field)));
                    }
                }
            } else {
                warn!(
                    mode = %state.conversation_mode(),
                    episode_id = ctx.current_episode_id,
                    blocked = episode_commits.len(),
                    "episode commits blocked by guard"
                );
            }
        }

        (unmapped, routing_debug)
    }

    fn update_follow_up_blocks(&self, state: &mut StateManager, ctx: &mut TurnContext) {
        let view = match state.episode_view(ctx.current_episode_id) {
            Ok(view) => view,
            Err(err) => {
                ctx.errors.push(error_entry("triggers", &err.to_string(), None));
                return;
            }
        };

        let triggered = self.selector.check_triggers(&view);
        for block_id in triggered.difference(&view.blocks_activated) {
            info!(episode_id = ctx.current_episode_id, block_id = %block_id, "block activated");
            if let Err(err) = state.activate_follow_up_block(ctx.current_episode_id, block_id) {
                ctx.errors.push(error_entry("triggers", &err.to_string(), Some(block_id)));
            }
        }

        let view = match state.episode_view(ctx.current_episode_id) {
            Ok(view) => view,
            Err(err) => {
                ctx.errors.push(error_entry("block_completion", &err.to_string(), None));
                return;
            }
        };
        let pending: Vec<String> = view.pending_blocks().cloned().collect();
        for block_id in pending {
            if self.selector.is_block_complete(&block_id, &view) {
                info!(episode_id = ctx.current_episode_id, block_id = %block_id, "block completed");
                if let Err(err) = state.complete_follow_up_block(ctx.current_episode_id, &block_id)
                {
                    ctx.errors.push(error_entry("block_completion", &err.to_string(), Some(&block_id)));
                }
            }
        }
    }

    /// Seal state and turn context into a `TurnResult` envelope.
    fn build_turn_result(
        &self,
        state: &StateManager,
        ctx: &TurnContext,
        system_output: String,
        mut debug: Map<String, Value>,
        consultation_complete: bool,
        routing_debug: Option<Vec<Value>>,
    ) -> TurnResult {
        let current_mode = state.conversation_mode();
        let mode_changed = ctx.previous_mode != current_mode;

        let mut snapshot = match state.snapshot_state() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        snapshot.insert("consultation_id".into(), ctx.consultation_id.clone().into());
        snapshot.insert("turn_count".into(), ctx.turn_count.into());
        snapshot.insert("current_episode_id".into(), ctx.current_episode_id.into());
        snapshot.insert(
            "awaiting_first_question".into(),
            ctx.awaiting_first_question.into(),
        );
        snapshot.insert(
            "awaiting_episode_transition".into(),
            ctx.awaiting_episode_transition.into(),
        );
        snapshot.insert("transition_retries".into(), ctx.transition_retries.into());
        snapshot.insert(
            "pending_question".into(),
            ctx.pending_question
                .as_ref()
                .map(|question| serde_json::to_value(question).expect("question serializes"))
                .unwrap_or(Value::Null),
        );
        snapshot.insert("errors".into(), Value::Array(ctx.errors.clone()));
        snapshot.insert("consultation_complete".into(), consultation_complete.into());

        let snapshot = Value::Object(snapshot);
        if let Some(routing_debug) = routing_debug {
            if !routing_debug.is_empty() {
                debug.insert("routing".into(), Value::Array(routing_debug));
            }
        }
        debug.insert("state_view".into(), format_state_for_display(&snapshot).into());

        TurnResult {
            system_output,
            state: ConsultationState::from_json(snapshot),
            debug: Value::Object(debug),
            turn_metadata: TurnMetadata {
                turn_count: ctx.turn_count,
                current_episode_id: ctx.current_episode_id,
                consultation_id: ctx.consultation_id.clone(),
                conversation_mode: current_mode,
                mode_changed,
            },
            consultation_complete,
        }
    }
}

fn illegal(command: &Command, reason: impl Into<String>) -> CommandResult {
    CommandResult::Illegal(IllegalCommand::rejecting(command, reason))
}

fn debug_map(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn error_entry(context: &str, error: &str, subject: Option<&str>) -> Value {
    serde_json::json!({
        "context": context,
        "error": error,
        "subject": subject,
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}…")
}
