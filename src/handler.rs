use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::app::{App, InputMode, Screen};
use crate::conversation::ChatMessage;
use crate::tui::{AppEvent, PollKind};

/// Convert a character index to a byte index for UTF-8 safe edits.
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(
    app: &mut App,
    event: AppEvent,
    tx: &UnboundedSender<AppEvent>,
) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => {
            app.tick_animation();
            app.fire_follow_up_if_due();
        }
        AppEvent::Poll(kind) => start_poll(app, kind, tx),
        AppEvent::DashboardLoaded(summary) => {
            app.dashboard = Some(summary);
        }
        AppEvent::UnreadAlerts(count) => {
            app.unread_alerts = count;
        }
    }
    Ok(())
}

/// Kick off the fetch for a poll tick. Results come back through the
/// event channel; failures are logged and the stale value stays.
fn start_poll(app: &App, kind: PollKind, tx: &UnboundedSender<AppEvent>) {
    let api = app.api.clone();
    let tx = tx.clone();

    tokio::spawn(async move {
        match kind {
            PollKind::Dashboard => match api.dashboard().await {
                Ok(summary) => {
                    let _ = tx.send(AppEvent::DashboardLoaded(summary));
                }
                Err(e) => debug!(error = %e, "dashboard poll failed"),
            },
            PollKind::Alerts => match api.notifications(true).await {
                Ok(unread) => {
                    let _ = tx.send(AppEvent::UnreadAlerts(unread.len()));
                }
                Err(e) => debug!(error = %e, "alerts poll failed"),
            },
        }
    });
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Works in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match app.screen {
        Screen::Chat => handle_chat_normal(app, key),
        Screen::Plants => handle_plants_normal(app, key),
    }
}

fn handle_chat_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Transcript scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
        KeyCode::Char('g') => app.chat_scroll = 0,
        KeyCode::Char('G') => app.scroll_chat_to_bottom(),

        // Drop the active plant ("Cambiar" in the original banner)
        KeyCode::Char('x') => {
            if app.active_plant().is_some() {
                app.conversation.clear_active_plant();
            }
        }

        // Plants panel
        KeyCode::Char('p') | KeyCode::Tab => app.screen = Screen::Plants,

        // Back to typing
        KeyCode::Char('i') | KeyCode::Char('e') | KeyCode::Enter => {
            app.input_mode = InputMode::Editing;
            app.cursor = app.input.chars().count();
        }

        _ => {}
    }
}

fn handle_plants_normal(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Esc | KeyCode::Char('p') | KeyCode::Tab => app.screen = Screen::Chat,

        KeyCode::Char('j') | KeyCode::Down => app.plants_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.plants_nav_up(),

        // Make the highlighted plant the conversation subject
        KeyCode::Enter => {
            if let Some(plant) = app
                .plants_state
                .selected()
                .and_then(|i| app.registry.get(i))
            {
                let id = plant.id;
                let name = plant.display_name.clone();
                app.conversation.select_active_plant(id);
                app.messages.push(ChatMessage::bot(format!(
                    "✅ **{}** seleccionada. Pregúntame lo que quieras sobre ella.",
                    name
                )));
                app.screen = Screen::Chat;
                app.input_mode = InputMode::Editing;
                app.scroll_chat_to_bottom();
            }
        }

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            app.send_current_input();
        }
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Tab => {
            app.input_mode = InputMode::Normal;
            app.screen = Screen::Plants;
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_to_byte_index_handles_multibyte() {
        let s = "más allá";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 1), 1);
        // 'á' is two bytes, so char 2 starts at byte 3
        assert_eq!(char_to_byte_index(s, 2), 3);
        assert_eq!(char_to_byte_index(s, 100), s.len());
    }
}
