use ratatui::widgets::ListState;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::api::{ApiClient, ApiError, ApiResult, ChatOutcome, ChatRequest, DashboardSummary};
use crate::conversation::{templated_status_reply, ChatMessage, Conversation, TurnAction};
use crate::registry::PlantRegistry;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Chat,
    Plants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Delay before the canned health-check follow-up fires after a numeric
/// selection. Pure UX; nothing depends on it.
const FOLLOW_UP_DELAY: Duration = Duration::from_millis(800);

pub struct App {
    // Core state
    pub should_quit: bool,
    pub screen: Screen,
    pub input_mode: InputMode,

    // Backend
    pub api: ApiClient,
    pub session: Session,

    // Chat session state
    pub registry: PlantRegistry,
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,

    // Input state
    pub input: String,
    pub cursor: usize,

    // In-flight turn. At most one: Enter is ignored while this is Some,
    // which keeps the transcript in turn-initiation order.
    pub turn_task: Option<tokio::task::JoinHandle<(ChatRequest, ApiResult<ChatOutcome>)>>,
    pub loading: bool,
    pending_follow_up: Option<(Instant, ChatRequest)>,

    // Scroll/layout bookkeeping (updated during render)
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,

    // Plants panel
    pub plants_state: ListState,

    // Polled data
    pub dashboard: Option<DashboardSummary>,
    pub unread_alerts: usize,

    // Animation state, 0-2 for the ellipsis
    pub animation_frame: u8,
}

impl App {
    pub async fn new(session: Session, preselected_plant: Option<i64>) -> anyhow::Result<Self> {
        let api = ApiClient::from_session(&session)?;

        // Registry load failure is not fatal: the conversation runs in
        // "no plants known" mode
        let mut registry = PlantRegistry::new();
        match api.list_plants().await {
            Ok(plants) => registry.fill(plants),
            Err(e) => warn!(error = %e, "could not load plants, continuing without registry"),
        }

        let conversation = match preselected_plant.filter(|id| registry.by_id(*id).is_some()) {
            Some(id) => Conversation::with_active_plant(id),
            None => Conversation::new(),
        };

        let greeting = match conversation.active_plant().and_then(|id| registry.by_id(id)) {
            Some(plant) => format!(
                "¡Hola! Soy el asistente de EcoBox. ¿En qué puedo ayudarte con {} hoy? 🌱",
                plant.display_name
            ),
            None => {
                "¡Hola! Soy el asistente de EcoBox. ¿En qué puedo ayudarte con tus plantas hoy? 🌱"
                    .to_string()
            }
        };

        let mut plants_state = ListState::default();
        if !registry.is_empty() {
            plants_state.select(Some(0));
        }

        Ok(Self {
            should_quit: false,
            screen: Screen::Chat,
            input_mode: InputMode::Editing,

            api,
            session,

            registry,
            conversation,
            messages: vec![ChatMessage::bot(greeting)],

            input: String::new(),
            cursor: 0,

            turn_task: None,
            loading: false,
            pending_follow_up: None,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            plants_state,

            dashboard: None,
            unread_alerts: 0,

            animation_frame: 0,
        })
    }

    /// Submit the input box as one conversation turn.
    pub fn send_current_input(&mut self) {
        if self.input.trim().is_empty() || self.turn_task.is_some() {
            return;
        }

        let utterance = self.input.trim().to_string();
        self.input.clear();
        self.cursor = 0;

        self.messages.push(ChatMessage::user(utterance.clone()));

        match self.conversation.plan_turn(&utterance, &self.registry) {
            TurnAction::OmitCleared { confirmation } => {
                self.messages.push(ChatMessage::bot(confirmation));
            }
            TurnAction::Disambiguate { prompt } => {
                self.messages.push(ChatMessage::bot(prompt));
            }
            TurnAction::PlantSelected {
                confirmation,
                follow_up,
                ..
            } => {
                self.messages.push(ChatMessage::bot(confirmation));
                self.pending_follow_up = Some((Instant::now() + FOLLOW_UP_DELAY, follow_up));
            }
            TurnAction::Forward { request } => self.spawn_turn(request),
        }

        self.scroll_chat_to_bottom();
    }

    fn spawn_turn(&mut self, request: ChatRequest) {
        let api = self.api.clone();
        let sent = request.clone();
        self.loading = true;
        self.turn_task = Some(tokio::spawn(async move {
            let result = api.chat(&sent).await;
            (sent, result)
        }));
    }

    /// Fire the scheduled health-check question once its delay has
    /// passed and no turn is pending.
    pub fn fire_follow_up_if_due(&mut self) {
        if self.turn_task.is_some() {
            return;
        }
        let due = matches!(
            &self.pending_follow_up,
            Some((deadline, _)) if Instant::now() >= *deadline
        );
        if due {
            if let Some((_, request)) = self.pending_follow_up.take() {
                self.messages
                    .push(ChatMessage::user(request.context.user_question.clone()));
                self.spawn_turn(request);
                self.scroll_chat_to_bottom();
            }
        }
    }

    /// Render the finished turn into the transcript. Failures become one
    /// error message and leave the conversation state untouched.
    pub fn finish_turn(&mut self, request: ChatRequest, result: ApiResult<ChatOutcome>) {
        self.loading = false;

        let message = match result {
            Ok(ChatOutcome::Answer(text)) => ChatMessage::bot(self.format_answer(&request, &text)),
            Ok(ChatOutcome::Empty) => {
                ChatMessage::bot(templated_status_reply(request.plant_id, &self.registry))
            }
            Ok(ChatOutcome::Failure(reason)) => {
                ChatMessage::bot_error(format!("⚠️ **Error del servidor**\n\n{}", reason))
            }
            Err(ApiError::Auth) => ChatMessage::bot_error(
                "⚠️ **Sesión expirada**\n\nCierra el asistente y ejecuta `ecobox login`.",
            ),
            Err(e) => ChatMessage::bot_error(format!("⚠️ **Error de conexión**\n\n{}", e)),
        };

        self.messages.push(message);
        self.scroll_chat_to_bottom();
    }

    fn format_answer(&self, request: &ChatRequest, text: &str) -> String {
        let plant = request.plant_id.and_then(|id| self.registry.by_id(id));

        if request.context.request_type.as_deref() == Some("plant_health_check") {
            if let Some(plant) = plant {
                return format!("## 📊 **Análisis de {}**\n\n{}", plant.display_name, text);
            }
        }

        match plant {
            Some(plant) => format!(
                "## 🌱 **{}**\n*{}*\n\n{}\n\n---\n💡 *Puedes preguntar sobre riego, luz, temperatura o plagas.*",
                plant.display_name,
                plant.species.as_deref().unwrap_or("Planta"),
                text
            ),
            None => format!("## 🌿 **Información General**\n\n{}", text),
        }
    }

    /// The plant the conversation currently treats as implicit subject.
    pub fn active_plant(&self) -> Option<&crate::registry::Plant> {
        self.conversation
            .active_plant()
            .and_then(|id| self.registry.by_id(id))
    }

    // Plants panel navigation
    pub fn plants_nav_down(&mut self) {
        let len = self.registry.len();
        if len > 0 {
            let i = self.plants_state.selected().unwrap_or(0);
            self.plants_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn plants_nav_up(&mut self) {
        let i = self.plants_state.selected().unwrap_or(0);
        self.plants_state.select(Some(i.saturating_sub(1)));
    }

    // Transcript scrolling
    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
    }

    /// Keep the newest message (and the typing indicator) visible.
    pub fn scroll_chat_to_bottom(&mut self) {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in &self.messages {
            total_lines += 1; // sender line
            for line in msg.text.lines() {
                // Character count, not byte length, for UTF-8 text
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1;
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // blank line after message
        }

        total_lines += 2; // typing indicator

        let visible = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible {
            self.chat_scroll = total_lines.saturating_sub(visible);
        }
    }

    pub fn tick_animation(&mut self) {
        if self.loading {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}
