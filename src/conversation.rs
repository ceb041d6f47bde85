use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::api::{ChatContext, ChatRequest};
use crate::extract::extract_plant_name;
use crate::registry::{resolve, PlantRegistry};

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

/// One transcript entry. Ids only need to be unique within a session.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Local>,
    pub is_error: bool,
}

impl ChatMessage {
    fn new(sender: Sender, text: String, is_error: bool) -> Self {
        let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let now = Local::now();
        Self {
            id: format!("msg-{}-{}", now.timestamp_millis(), counter),
            text,
            sender,
            timestamp: now,
            is_error,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text.into(), false)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text.into(), false)
    }

    pub fn bot_error(text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, text.into(), true)
    }
}

/// What the state machine decided to do with one user turn. The caller
/// (TUI or one-shot command) renders confirmations and performs the
/// network side of `Forward`.
#[derive(Debug, Clone)]
pub enum TurnAction {
    /// "omitir": active plant cleared, reply and stop.
    OmitCleared { confirmation: String },
    /// Numeric pick accepted; the canned health check is a UX follow-up
    /// the caller may schedule after a short delay.
    PlantSelected {
        plant_id: i64,
        confirmation: String,
        follow_up: ChatRequest,
    },
    /// Present the numbered registry list and wait; nothing is forwarded
    /// this turn.
    Disambiguate { prompt: String },
    /// Send to the AI endpoint with whatever plant context exists.
    Forward { request: ChatRequest },
}

/// Session-scoped conversation state. Created fresh per chat UI
/// instance, never persisted. Owns `active_plant` exclusively.
#[derive(Debug, Default)]
pub struct Conversation {
    active_plant: Option<i64>,
    awaiting_selection: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preselect a plant (entry from a plant detail view).
    pub fn with_active_plant(plant_id: i64) -> Self {
        Self {
            active_plant: Some(plant_id),
            awaiting_selection: false,
        }
    }

    pub fn active_plant(&self) -> Option<i64> {
        self.active_plant
    }

    pub fn awaiting_selection(&self) -> bool {
        self.awaiting_selection
    }

    pub fn clear_active_plant(&mut self) {
        self.active_plant = None;
    }

    /// User-initiated change from the plants panel; cancels any pending
    /// disambiguation.
    pub fn select_active_plant(&mut self, plant_id: i64) {
        self.active_plant = Some(plant_id);
        self.awaiting_selection = false;
    }

    /// Route one user utterance. Priority order: omit, pending numeric
    /// selection, extraction + resolution, forward.
    pub fn plan_turn(&mut self, utterance: &str, registry: &PlantRegistry) -> TurnAction {
        let trimmed = utterance.trim();
        let normalized = trimmed.to_lowercase();

        // 1. "omitir" wins from any state and ends the turn
        if normalized == "omitir" {
            self.active_plant = None;
            self.awaiting_selection = false;
            debug!("turn: omit");
            return TurnAction::OmitCleared {
                confirmation:
                    "✅ Continuando sin planta específica. Puedes preguntar sobre plantas en general."
                        .to_string(),
            };
        }

        // 2. Pending numeric selection; bad input falls through
        if self.awaiting_selection {
            if let Ok(n) = normalized.parse::<usize>() {
                if let Some(plant) = n.checked_sub(1).and_then(|i| registry.get(i)) {
                    self.active_plant = Some(plant.id);
                    self.awaiting_selection = false;
                    debug!(plant_id = plant.id, "turn: selected by number");
                    return TurnAction::PlantSelected {
                        plant_id: plant.id,
                        confirmation: format!(
                            "✅ **{}** seleccionada. Te ayudo a analizarla...",
                            plant.display_name
                        ),
                        follow_up: health_check_request(plant.id, registry),
                    };
                }
            }
        }

        // 3. Extraction against the registry
        match extract_plant_name(trimmed) {
            Some(candidate) => {
                if let Some(plant) = resolve(&candidate, registry.plants()) {
                    let plant_id = plant.id;
                    self.active_plant = Some(plant_id);
                    self.awaiting_selection = false;
                    debug!(plant_id, candidate = %candidate, "turn: resolved");
                    let message = rewrite_with_placeholder(trimmed, &candidate);
                    TurnAction::Forward {
                        request: advice_request(message, trimmed, Some(plant_id), registry),
                    }
                } else if registry.is_empty() {
                    // Nothing to disambiguate against; a numbered list
                    // here would be empty and leave the user stuck
                    self.awaiting_selection = false;
                    TurnAction::Forward {
                        request: advice_request(
                            trimmed.to_string(),
                            trimmed,
                            self.active_plant,
                            registry,
                        ),
                    }
                } else {
                    self.awaiting_selection = true;
                    debug!(candidate = %candidate, "turn: unresolved candidate");
                    TurnAction::Disambiguate {
                        prompt: format!(
                            "🤔 No encuentro **\"{}\"** en tus plantas.\n\n**Tus plantas disponibles:**\n{}\n\nResponde con el **número** de la planta o escribe **\"omitir\"** para continuar.",
                            candidate,
                            numbered_list(registry)
                        ),
                    }
                }
            }
            None if self.active_plant.is_none() && !registry.is_empty() => {
                self.awaiting_selection = true;
                debug!("turn: no candidate, presenting list");
                TurnAction::Disambiguate {
                    prompt: format!(
                        "🌿 **Tus plantas disponibles:**\n\n{}\n\nResponde con el **número** de la planta o escribe **\"omitir\"** para preguntas generales.",
                        numbered_list(registry)
                    ),
                }
            }
            None => {
                // Generic follow-up: keep whatever context exists
                self.awaiting_selection = false;
                TurnAction::Forward {
                    request: advice_request(
                        trimmed.to_string(),
                        trimmed,
                        self.active_plant,
                        registry,
                    ),
                }
            }
        }
    }
}

fn numbered_list(registry: &PlantRegistry) -> String {
    registry
        .plants()
        .iter()
        .enumerate()
        .map(|(i, p)| match &p.species {
            Some(species) => format!("{}. {} ({})", i + 1, p.display_name, species),
            None => format!("{}. {}", i + 1, p.display_name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace the matched name span with a generic placeholder before
/// forwarding, so the backend prompt does not repeat a user-invented
/// label it knows nothing about.
fn rewrite_with_placeholder(original: &str, candidate: &str) -> String {
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(candidate))) {
        Ok(re) => re.replace_all(original, "esta planta").trim().to_string(),
        Err(_) => original.to_string(),
    }
}

fn plant_context(plant_id: Option<i64>, registry: &PlantRegistry) -> ChatContext {
    let plant = plant_id.and_then(|id| registry.by_id(id));
    ChatContext {
        plant_name: plant.map(|p| p.display_name.clone()),
        plant_species: plant.and_then(|p| p.species.clone()),
        plant_state: plant.and_then(|p| p.state.clone()),
        ..Default::default()
    }
}

pub fn advice_request(
    message: String,
    user_question: &str,
    plant_id: Option<i64>,
    registry: &PlantRegistry,
) -> ChatRequest {
    let mut context = plant_context(plant_id, registry);
    context.user_question = user_question.to_string();
    context.response_type = Some("detailed_plant_advice".to_string());
    ChatRequest {
        message,
        plant_id,
        context,
    }
}

fn health_check_request(plant_id: i64, registry: &PlantRegistry) -> ChatRequest {
    let mut context = plant_context(Some(plant_id), registry);
    context.user_question = "¿Cómo está mi planta?".to_string();
    context.request_type = Some("plant_health_check".to_string());
    ChatRequest {
        message: "¿Cómo está esta planta? Dame un análisis detallado.".to_string(),
        plant_id: Some(plant_id),
        context,
    }
}

/// Fallback body when the backend reports success but sends no text.
pub fn templated_status_reply(plant_id: Option<i64>, registry: &PlantRegistry) -> String {
    match plant_id.and_then(|id| registry.by_id(id)) {
        Some(plant) => format!(
            "## 📊 **Análisis de {}**\n\n✅ Estado: {}\n🌱 Especie: {}",
            plant.display_name,
            plant.state_label(),
            plant.species.as_deref().unwrap_or("No especificada"),
        ),
        None => "✅ He procesado tu consulta sobre plantas.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Plant;

    fn plant(id: i64, name: &str, species: Option<&str>) -> Plant {
        Plant {
            id,
            display_name: name.to_string(),
            species: species.map(|s| s.to_string()),
            state: Some("normal".to_string()),
        }
    }

    fn registry() -> PlantRegistry {
        PlantRegistry::from_plants(vec![
            plant(1, "Rosa", None),
            plant(2, "Romero", Some("Salvia rosmarinus")),
        ])
    }

    #[test]
    fn single_word_name_resolves_and_rewrites() {
        let registry = PlantRegistry::from_plants(vec![plant(1, "Lavanda", None)]);
        let mut convo = Conversation::new();

        match convo.plan_turn("lavanda", &registry) {
            TurnAction::Forward { request } => {
                assert_eq!(request.plant_id, Some(1));
                assert_eq!(request.message, "esta planta");
                assert_eq!(request.context.plant_name.as_deref(), Some("Lavanda"));
            }
            other => panic!("expected Forward, got {:?}", other),
        }
        assert_eq!(convo.active_plant(), Some(1));
    }

    #[test]
    fn rewrite_replaces_span_inside_sentence() {
        let registry = PlantRegistry::from_plants(vec![plant(1, "Lavanda", None)]);
        let mut convo = Conversation::new();

        match convo.plan_turn("mi lavanda necesita algo", &registry) {
            TurnAction::Forward { request } => {
                assert!(request.message.contains("esta planta"));
                assert!(!request.message.to_lowercase().contains("lavanda"));
            }
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn general_question_without_active_plant_presents_list() {
        let registry = registry();
        let mut convo = Conversation::new();

        match convo.plan_turn("¿Cómo está mi planta?", &registry) {
            TurnAction::Disambiguate { prompt } => {
                assert!(prompt.contains("1. Rosa"));
                assert!(prompt.contains("2. Romero"));
            }
            other => panic!("expected Disambiguate, got {:?}", other),
        }
        assert!(convo.awaiting_selection());
        assert_eq!(convo.active_plant(), None);
    }

    #[test]
    fn numeric_selection_picks_plant_and_schedules_follow_up() {
        let registry = registry();
        let mut convo = Conversation::new();
        convo.plan_turn("¿Cómo está mi planta?", &registry);

        match convo.plan_turn("2", &registry) {
            TurnAction::PlantSelected {
                plant_id,
                confirmation,
                follow_up,
            } => {
                assert_eq!(plant_id, 2);
                assert!(confirmation.contains("Romero"));
                assert_eq!(follow_up.plant_id, Some(2));
                assert_eq!(
                    follow_up.context.request_type.as_deref(),
                    Some("plant_health_check")
                );
                assert!(follow_up.context.response_type.is_none());
            }
            other => panic!("expected PlantSelected, got {:?}", other),
        }
        assert!(!convo.awaiting_selection());
        assert_eq!(convo.active_plant(), Some(2));
    }

    #[test]
    fn omit_clears_from_any_state() {
        let registry = registry();

        // While awaiting selection
        let mut convo = Conversation::new();
        convo.plan_turn("¿Cómo está mi planta?", &registry);
        assert!(matches!(
            convo.plan_turn("omitir", &registry),
            TurnAction::OmitCleared { .. }
        ));
        assert_eq!(convo.active_plant(), None);
        assert!(!convo.awaiting_selection());

        // With an active plant
        let mut convo = Conversation::with_active_plant(1);
        assert!(matches!(
            convo.plan_turn("  OMITIR ", &registry),
            TurnAction::OmitCleared { .. }
        ));
        assert_eq!(convo.active_plant(), None);
    }

    #[test]
    fn out_of_range_number_falls_through_without_selecting() {
        let registry = registry();
        let mut convo = Conversation::new();
        convo.plan_turn("¿Cómo está mi planta?", &registry);

        let action = convo.plan_turn("7", &registry);
        assert_eq!(convo.active_plant(), None);
        // "7" is a single token, treated as a candidate that resolves to
        // nothing, so the list is shown again
        assert!(matches!(action, TurnAction::Disambiguate { .. }));
    }

    #[test]
    fn active_plant_sticks_across_generic_follow_ups() {
        let registry = registry();
        let mut convo = Conversation::new();
        convo.plan_turn("¿Cómo está mi planta?", &registry);
        convo.plan_turn("1", &registry);
        assert_eq!(convo.active_plant(), Some(1));

        match convo.plan_turn("¿necesita agua mi planta?", &registry) {
            TurnAction::Forward { request } => {
                assert_eq!(request.plant_id, Some(1));
                assert_eq!(request.context.plant_name.as_deref(), Some("Rosa"));
            }
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn species_match_sets_active_plant() {
        let registry =
            PlantRegistry::from_plants(vec![plant(1, "Cactus", Some("Cactaceae"))]);
        let mut convo = Conversation::new();

        match convo.plan_turn("mi cactaceae necesita agua", &registry) {
            TurnAction::Forward { request } => assert_eq!(request.plant_id, Some(1)),
            other => panic!("expected Forward, got {:?}", other),
        }
        assert_eq!(convo.active_plant(), Some(1));
    }

    #[test]
    fn unknown_candidate_asks_for_clarification() {
        let registry = registry();
        let mut convo = Conversation::new();

        match convo.plan_turn("mi helecho está raro", &registry) {
            TurnAction::Disambiguate { prompt } => {
                assert!(prompt.contains("helecho"));
                assert!(prompt.contains("omitir"));
            }
            other => panic!("expected Disambiguate, got {:?}", other),
        }
        assert!(convo.awaiting_selection());
    }

    #[test]
    fn empty_registry_forwards_generic_questions() {
        let registry = PlantRegistry::new();
        let mut convo = Conversation::new();

        match convo.plan_turn("¿Cómo está mi planta?", &registry) {
            TurnAction::Forward { request } => {
                assert_eq!(request.plant_id, None);
                assert!(request.context.plant_name.is_none());
            }
            other => panic!("expected Forward, got {:?}", other),
        }
    }

    #[test]
    fn empty_registry_forwards_named_candidates_unchanged() {
        // A failed plant load must not trap the user in a selection
        // loop over an empty list
        let registry = PlantRegistry::new();
        let mut convo = Conversation::new();

        match convo.plan_turn("lavanda", &registry) {
            TurnAction::Forward { request } => {
                assert_eq!(request.message, "lavanda");
                assert_eq!(request.plant_id, None);
            }
            other => panic!("expected Forward, got {:?}", other),
        }
        assert!(!convo.awaiting_selection());
        assert_eq!(convo.active_plant(), None);
    }

    #[test]
    fn message_ids_are_unique() {
        let a = ChatMessage::bot("x");
        let b = ChatMessage::bot("x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn templated_reply_uses_plant_details() {
        let registry = PlantRegistry::from_plants(vec![plant(1, "Rosa", Some("Rosa gallica"))]);
        let text = templated_status_reply(Some(1), &registry);
        assert!(text.contains("Rosa"));
        assert!(text.contains("Rosa gallica"));

        let generic = templated_status_reply(None, &registry);
        assert!(generic.contains("consulta"));
    }
}
