use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState, Wrap},
};

use crate::app::{App, InputMode, Screen};
use crate::conversation::Sender;

/// Lightweight markup carried in bot messages: heading, divider,
/// numbered option, or plain text with optional **bold** spans.
#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    Heading(&'a str),
    Divider,
    Numbered,
    Plain,
}

fn classify_line(line: &str) -> LineKind<'_> {
    if let Some(rest) = line.strip_prefix("## ") {
        LineKind::Heading(rest)
    } else if line == "---" {
        LineKind::Divider
    } else if line
        .split_once(". ")
        .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
    {
        LineKind::Numbered
    } else {
        LineKind::Plain
    }
}

/// Convert **bold** runs into styled spans; everything else is raw.
fn parse_bold_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut current_text = String::new();

    while let Some((_, c)) = chars.next() {
        if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
            chars.next();

            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some((_, c)) = chars.next() {
                if c == '*' && chars.peek().map(|(_, c)| *c) == Some('*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn format_message_line(line: &str) -> Line<'static> {
    match classify_line(line) {
        LineKind::Heading(rest) => {
            let plain: String = rest.replace("**", "");
            Line::from(Span::styled(
                plain,
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ))
        }
        LineKind::Divider => Line::from(Span::styled(
            "─".repeat(30),
            Style::default().fg(Color::DarkGray),
        )),
        LineKind::Numbered => Line::from(Span::styled(
            line.to_string(),
            Style::default().fg(Color::Yellow),
        )),
        LineKind::Plain => parse_bold_line(line),
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    match app.screen {
        Screen::Chat => render_chat_screen(app, frame, body_area),
        Screen::Plants => render_plants_screen(app, frame, body_area),
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" EcoBox ", Style::default().fg(Color::Green).bold()),
        Span::styled(
            format!("{} ", app.session.user.email),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("🌿 {} ", app.registry.len()),
            Style::default().fg(Color::White),
        ),
    ];

    if app.unread_alerts > 0 {
        spans.push(Span::styled(
            format!("🔔 {} ", app.unread_alerts),
            Style::default().fg(Color::Yellow),
        ));
    }

    if let Some(dashboard) = &app.dashboard {
        if dashboard.plantas_necesitan_agua > 0 {
            spans.push(Span::styled(
                format!("💧 {} ", dashboard.plantas_necesitan_agua),
                Style::default().fg(Color::Cyan),
            ));
        }
        if let Some(hum) = &dashboard.humedad_promedio {
            spans.push(Span::styled(
                format!("~{} ", hum),
                Style::default().fg(Color::DarkGray),
            ));
        }
    }

    spans.push(Span::styled(
        format!("v{}", env!("CARGO_PKG_VERSION")),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match app.screen {
        Screen::Chat => " CHAT ",
        Screen::Plants => " PLANTAS ",
    };

    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match (app.screen, app.input_mode) {
        (Screen::Chat, InputMode::Editing) => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" enviar ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" modo normal ", label_style),
            Span::styled(" Tab ", key_style),
            Span::styled(" plantas ", label_style),
        ],
        (Screen::Chat, InputMode::Normal) => {
            let mut hints = vec![
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
                Span::styled(" i ", key_style),
                Span::styled(" escribir ", label_style),
                Span::styled(" p ", key_style),
                Span::styled(" plantas ", label_style),
            ];
            if app.active_plant().is_some() {
                hints.extend(vec![
                    Span::styled(" x ", key_style),
                    Span::styled(" cambiar planta ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" q ", key_style),
                Span::styled(" salir ", label_style),
            ]);
            hints
        }
        (Screen::Plants, _) => vec![
            Span::styled(" j/k ", key_style),
            Span::styled(" nav ", label_style),
            Span::styled(" Enter ", key_style),
            Span::styled(" seleccionar ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" chat ", label_style),
            Span::styled(" q ", key_style),
            Span::styled(" salir ", label_style),
        ],
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_chat_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let banner_height = if app.active_plant().is_some() { 3 } else { 0 };
    let hint_height = if app.conversation.awaiting_selection() { 1 } else { 0 };

    let chat_layout = Layout::vertical([
        Constraint::Length(banner_height),
        Constraint::Min(0),
        Constraint::Length(hint_height),
        Constraint::Length(3),
    ])
    .split(area);
    let banner_area = chat_layout[0];
    let chat_area = chat_layout[1];
    let hint_area = chat_layout[2];
    let input_area = chat_layout[3];

    if banner_height > 0 {
        render_plant_banner(app, frame, banner_area);
    }

    render_transcript(app, frame, chat_area);

    if hint_height > 0 {
        let hint = Paragraph::new(Line::from(Span::styled(
            format!(
                " Escribe el número (1-{}) o \"omitir\" para continuar ",
                app.registry.len()
            ),
            Style::default().fg(Color::Black).bg(Color::Yellow),
        )));
        frame.render_widget(hint, hint_area);
    }

    render_input(app, frame, input_area);
}

fn render_plant_banner(app: &App, frame: &mut Frame, area: Rect) {
    // Caller only routes here with an active plant
    let Some(plant) = app.active_plant() else {
        return;
    };

    let line = Line::from(vec![
        Span::raw("🌱 "),
        Span::styled(
            plant.display_name.clone(),
            Style::default().fg(Color::Green).bold(),
        ),
        Span::raw("  "),
        Span::styled(
            plant.species.clone().unwrap_or_default(),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(
            format!(" {} ", plant.state_label()),
            Style::default().fg(Color::Black).bg(Color::Green),
        ),
    ]);

    let banner = Paragraph::new(line).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green))
            .title(" Planta activa (x para cambiar) "),
    );
    frame.render_widget(banner, area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Asistente ");

    let inner = block.inner(area);
    app.chat_height = inner.height;
    app.chat_width = inner.width;

    let mut lines: Vec<Line> = Vec::new();

    for msg in &app.messages {
        match msg.sender {
            Sender::User => {
                lines.push(Line::from(vec![
                    Span::styled(
                        "Tú ",
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        msg.timestamp.format("%H:%M").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]));
                lines.push(Line::from(msg.text.clone()));
            }
            Sender::Bot => {
                let label_style = if msg.is_error {
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                };
                lines.push(Line::from(vec![
                    Span::styled("EcoBox ", label_style),
                    Span::styled(
                        msg.timestamp.format("%H:%M").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                ]));
                for line in msg.text.lines() {
                    lines.push(format_message_line(line));
                }
            }
        }
        lines.push(Line::default());
    }

    if app.loading {
        lines.push(Line::from(Span::styled(
            "EcoBox",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )));
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Pensando{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    let total_lines = lines.len() as u16;

    let transcript = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: true })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(transcript, area);

    if total_lines > app.chat_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));

        let mut scrollbar_state =
            ScrollbarState::new(total_lines as usize).position(app.chat_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let placeholder = if app.conversation.awaiting_selection() {
        format!("Escribe el número (1-{}) o \"omitir\"...", app.registry.len())
    } else if let Some(plant) = app.active_plant() {
        format!("Pregunta sobre {}...", plant.display_name)
    } else if !app.registry.is_empty() {
        "Escribe el nombre de tu planta (ej: \"lavanda\")...".to_string()
    } else {
        "Escribe tu pregunta sobre plantas...".to_string()
    };

    let border_color = if app.input_mode == InputMode::Editing {
        Color::Yellow
    } else {
        Color::DarkGray
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Mensaje ");

    let content = if app.input.is_empty() {
        Paragraph::new(placeholder)
            .style(Style::default().fg(Color::DarkGray))
            .block(block)
    } else {
        Paragraph::new(app.input.as_str())
            .style(Style::default().fg(Color::White))
            .block(block)
    };

    frame.render_widget(content, area);

    if app.input_mode == InputMode::Editing {
        frame.set_cursor_position((input_cursor_x(area, app.cursor), area.y + 1));
    }
}

/// Screen column for the input cursor, clamped so a line wider than the
/// box never draws the cursor past the right border.
fn input_cursor_x(area: Rect, cursor: usize) -> u16 {
    // Inner columns run from x+1 to x+width-2; the offset caps there
    let max = area.width.saturating_sub(3) as usize;
    area.x + 1 + cursor.min(max) as u16
}

fn render_plants_screen(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" Mis plantas ({}) ", app.registry.len()));

    if app.registry.is_empty() {
        let placeholder = Paragraph::new(
            "No hay plantas registradas.\nAgrega plantas desde la aplicación web de EcoBox.",
        )
        .style(Style::default().fg(Color::DarkGray))
        .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let active = app.conversation.active_plant();
    let items: Vec<ListItem> = app
        .registry
        .plants()
        .iter()
        .map(|p| {
            let marker = if active == Some(p.id) { "● " } else { "  " };
            let species = p
                .species
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(marker.to_string(), Style::default().fg(Color::Green)),
                Span::raw(p.display_name.clone()),
                Span::styled(species, Style::default().fg(Color::DarkGray)),
                Span::styled(
                    format!("  [{}]", p.state_label()),
                    Style::default().fg(Color::Yellow),
                ),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.plants_state);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_markup_lines() {
        assert_eq!(classify_line("## 🌱 **Rosa**"), LineKind::Heading("🌱 **Rosa**"));
        assert_eq!(classify_line("---"), LineKind::Divider);
        assert_eq!(classify_line("1. Rosa"), LineKind::Numbered);
        assert_eq!(classify_line("12. Tomate Cherry (Solanum)"), LineKind::Numbered);
        assert_eq!(classify_line("hola"), LineKind::Plain);
        assert_eq!(classify_line("x. no es número"), LineKind::Plain);
    }

    #[test]
    fn bold_runs_become_styled_spans() {
        let line = parse_bold_line("antes **fuerte** después");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "fuerte");
    }

    #[test]
    fn unterminated_bold_is_literal() {
        let line = parse_bold_line("sin **cierre");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "sin **cierre");
    }

    #[test]
    fn cursor_stays_inside_input_box() {
        let area = Rect::new(5, 0, 20, 3);
        assert_eq!(input_cursor_x(area, 0), 6);
        assert_eq!(input_cursor_x(area, 10), 16);
        // Past the inner width, pinned to the last column before the border
        assert_eq!(input_cursor_x(area, 18), 23);
        assert_eq!(input_cursor_x(area, 500), 23);
    }
}
