use afc_core::connection::ConnectionPhase;
use afc_core::journal::LogLevel;
use afc_core::RunStatus;
use chrono::{DateTime, Utc};
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::app::{AgentStatus, App, ArtifactBody, DashboardView, Focus, PendingAction};
use crate::dispatch::Intent;

#[derive(Clone, Copy)]
struct Theme {
    bg: Color,
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
}

fn theme() -> Theme {
    Theme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
    }
}

pub fn render_ui(frame: &mut ratatui::Frame, app: &App) {
    let size = frame.size();
    let theme = theme();
    let view = app.view();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(size);
    frame.render_widget(render_header(&view, theme, size.width), rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(24),
            Constraint::Percentage(46),
            Constraint::Percentage(30),
        ])
        .split(rows[1]);
    render_agents(frame, app, &view, theme, columns[0]);
    render_transcript(frame, &view, theme, columns[1]);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(columns[2]);
    render_artifacts(frame, app, &view, theme, side[0]);
    render_runs(frame, app, &view, theme, side[1]);

    frame.render_widget(render_log(&view, theme, rows[2]), rows[2]);
    frame.render_widget(render_footer(app, &view, theme, size.width), rows[3]);

    if view.viewer.is_some() {
        render_artifact_overlay(frame, &view, theme);
    }
}

fn panel<'a>(title: &'a str, theme: Theme, focused: bool) -> Block<'a> {
    let border = if focused { theme.accent } else { theme.border };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn status_color(status: RunStatus, theme: Theme) -> Color {
    match status {
        RunStatus::Idle => theme.muted,
        RunStatus::Running => theme.accent,
        RunStatus::Paused => theme.warn,
        RunStatus::Complete => theme.ok,
        RunStatus::Error => theme.critical,
    }
}

fn render_header(view: &DashboardView<'_>, theme: Theme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let run = view.run;
    let connection = match view.connection.phase {
        ConnectionPhase::Open => "online".to_string(),
        ConnectionPhase::Connecting => "connecting".to_string(),
        ConnectionPhase::Closed => format!("offline (retry {})", view.connection.retry_count),
    };
    let run_label = run.run_id.as_deref().unwrap_or("no run");
    let tokens = run
        .total_tokens
        .map(|tokens| tokens.to_string())
        .unwrap_or_else(|| "-".to_string());
    let status_line = format!(
        "Run: {}  Status: {}  Tokens: {tokens}  Stream: {connection}",
        ellipsize(run_label, 36),
        run.status
    );
    let detail = if run.status == RunStatus::Paused && !run.paused_before.is_empty() {
        format!("Awaiting approval before: {}", run.paused_before.join(", "))
    } else if let Some(phase) = run.phase.as_ref() {
        match phase.agent.as_deref() {
            Some(agent) => format!("Phase: {} ({agent})", phase.name),
            None => format!("Phase: {}", phase.name),
        }
    } else if run.product_idea.is_empty() {
        "Idea: -".to_string()
    } else {
        format!("Idea: {}", run.product_idea)
    };

    Paragraph::new(Text::from(vec![
        Line::from(vec![Span::styled(
            ellipsize(&status_line, inner_width.max(12)),
            Style::default().fg(status_color(run.status, theme)),
        )]),
        Line::from(Span::styled(
            ellipsize(&detail, inner_width.max(12)),
            Style::default().fg(theme.muted),
        )),
    ]))
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(theme.border))
            .style(Style::default().bg(theme.bg))
            .title(Span::styled(
                "Agent Flow Control",
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            )),
    )
}

fn render_agents(frame: &mut ratatui::Frame, app: &App, view: &DashboardView<'_>, theme: Theme, area: Rect) {
    let items: Vec<ListItem> = view
        .agents
        .iter()
        .map(|row| {
            let (marker, color) = match row.status {
                AgentStatus::Waiting => ("·", theme.muted),
                AgentStatus::Idle => ("○", theme.text),
                AgentStatus::Active => ("●", theme.accent),
                AgentStatus::Done => ("✓", theme.ok),
                AgentStatus::Failed => ("✗", theme.critical),
            };
            let mut spans = vec![
                Span::styled(format!("{marker} "), Style::default().fg(color)),
                Span::styled(row.name.clone(), Style::default().fg(theme.text)),
            ];
            if let Some(role) = row.role.as_deref().filter(|role| *role != row.name) {
                spans.push(Span::styled(format!("  {role}"), Style::default().fg(theme.muted)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();
    let list = List::new(items)
        .block(panel("Agents", theme, app.focus == Focus::Agents))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if !view.agents.is_empty() {
        state.select(Some(app.selected_agent));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_transcript(frame: &mut ratatui::Frame, view: &DashboardView<'_>, theme: Theme, area: Rect) {
    let (title, body) = match view.viewing {
        Some(thread) => {
            let suffix = if view.following { "" } else { " [pinned]" };
            let title = format!("Thoughts: {}{suffix}", thread.agent_id);
            let mut text = String::new();
            if thread.transcript.truncated() {
                text.push_str("[earlier output trimmed]\n");
            }
            text.push_str(thread.transcript.as_str());
            (title, text)
        }
        None => ("Thoughts".to_string(), "Waiting for an agent to start...".to_string()),
    };
    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    let scroll = wrapped_height(&body, inner_width).saturating_sub(inner_height);
    let paragraph = Paragraph::new(body)
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0))
        .block(panel_owned(title, theme));
    frame.render_widget(paragraph, area);
}

fn panel_owned(title: String, theme: Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title,
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_artifacts(frame: &mut ratatui::Frame, app: &App, view: &DashboardView<'_>, theme: Theme, area: Rect) {
    let items: Vec<ListItem> = view
        .run
        .artifacts
        .iter()
        .map(|artifact| {
            let by = artifact.produced_by.as_deref().unwrap_or("-");
            ListItem::new(Line::from(vec![
                Span::styled(artifact.filename.clone(), Style::default().fg(theme.text)),
                Span::styled(
                    format!("  {by} {}", artifact.produced_at.format("%H:%M:%S")),
                    Style::default().fg(theme.muted),
                ),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(panel("Artifacts", theme, app.focus == Focus::Artifacts))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if !view.run.artifacts.is_empty() {
        state.select(Some(app.selected_artifact));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_runs(frame: &mut ratatui::Frame, app: &App, view: &DashboardView<'_>, theme: Theme, area: Rect) {
    let current = view.run.run_id.as_deref();
    let items: Vec<ListItem> = view
        .runs
        .iter()
        .map(|run| {
            let status = run.run_status().unwrap_or_default();
            let marker = if Some(run.id.as_str()) == current { "> " } else { "  " };
            let title = if run.product_idea.is_empty() {
                run.id.clone()
            } else {
                run.product_idea.clone()
            };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(theme.accent)),
                Span::styled(
                    format!("{:<8}", run.status),
                    Style::default().fg(status_color(status, theme)),
                ),
                Span::styled(title, Style::default().fg(theme.text)),
                Span::styled(
                    run.total_tokens
                        .map(|tokens| format!("  {tokens} tok"))
                        .unwrap_or_default(),
                    Style::default().fg(theme.muted),
                ),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(panel("Runs", theme, app.focus == Focus::Runs))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    let mut state = ListState::default();
    if !view.runs.is_empty() {
        state.select(Some(app.selected_run));
    }
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_log(view: &DashboardView<'_>, theme: Theme, area: Rect) -> Paragraph<'static> {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = view
        .log
        .tail(visible)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => theme.text,
                LogLevel::Success => theme.ok,
                LogLevel::Warn => theme.warn,
                LogLevel::Error => theme.critical,
            };
            Line::from(Span::styled(entry.render(), Style::default().fg(color)))
        })
        .collect();
    Paragraph::new(Text::from(lines))
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(panel("System Log", theme, false))
}

fn render_footer(app: &App, view: &DashboardView<'_>, theme: Theme, width: u16) -> Paragraph<'static> {
    let inner_width = width.saturating_sub(4) as usize;
    let line = if let Some(draft) = app.idea_draft.as_deref() {
        Line::from(vec![
            Span::styled("Idea> ", Style::default().fg(theme.accent)),
            Span::styled(format!("{draft}_"), Style::default().fg(theme.text)),
        ])
    } else {
        let mut spans = vec![Span::styled(
            ellipsize(
                &format!(
                    "[s]tart [r]esume [x] stop [i]dea [h]itl:{} [f]ollow [R]efresh  Idea: {}",
                    if view.hitl_enabled { "on" } else { "off" },
                    view.product_idea
                ),
                inner_width.saturating_sub(24).max(12),
            ),
            Style::default().fg(theme.muted),
        )];
        for (kind, pending) in view.actions {
            let (label, color) = match pending {
                PendingAction::InFlight => (format!("  {}...", kind.label()), theme.accent),
                PendingAction::Failed(reason) => (
                    format!("  {} failed: {}", kind.label(), ellipsize(reason, 40)),
                    theme.critical,
                ),
            };
            spans.push(Span::styled(label, Style::default().fg(color)));
        }
        Line::from(spans)
    };
    Paragraph::new(line)
        .style(Style::default().fg(theme.text).bg(theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.bg)),
        )
}

fn render_artifact_overlay(frame: &mut ratatui::Frame, view: &DashboardView<'_>, theme: Theme) {
    let Some(viewer) = view.viewer else {
        return;
    };
    let area = centered_rect(80, 80, frame.size());
    let (body, color) = match &viewer.body {
        ArtifactBody::Loading => ("Loading...".to_string(), theme.muted),
        ArtifactBody::Loaded(content) => (content.clone(), theme.text),
        ArtifactBody::Failed(reason) => (format!("Could not load artifact: {reason}"), theme.critical),
    };
    let paragraph = Paragraph::new(body)
        .style(Style::default().fg(color).bg(theme.surface))
        .wrap(Wrap { trim: false })
        .scroll((viewer.scroll, 0))
        .block(panel_owned(format!("{} (Esc to close)", viewer.filename), theme));
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100u16.saturating_sub(percent_y)) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100u16.saturating_sub(percent_x)) / 2),
        ])
        .split(vertical[1])[1]
}

/// Rows `text` occupies when wrapped at `width` columns.
fn wrapped_height(text: &str, width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let rows: usize = text
        .split('\n')
        .map(|line| line.chars().count().max(1).div_ceil(width))
        .sum();
    rows.min(usize::from(u16::MAX)) as u16
}

fn ellipsize(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    if max <= 3 {
        return "...".chars().take(max).collect();
    }
    let prefix: String = input.chars().take(max - 3).collect();
    format!("{prefix}...")
}

/// Returns true when the operator asked to quit.
pub fn handle_input(event: Event, app: &mut App, at: DateTime<Utc>) -> bool {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(key, app, at),
        _ => false,
    }
}

fn handle_key(key: KeyEvent, app: &mut App, at: DateTime<Utc>) -> bool {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }
    if app.idea_draft.is_some() {
        handle_idea_key(key, app);
        return false;
    }
    if app.viewer_open() {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => app.close_viewer(),
            KeyCode::Down | KeyCode::Char('j') => app.scroll_viewer(1),
            KeyCode::Up | KeyCode::Char('k') => app.scroll_viewer(-1),
            KeyCode::PageDown => app.scroll_viewer(10),
            KeyCode::PageUp => app.scroll_viewer(-10),
            _ => {}
        }
        return false;
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Tab => app.focus = app.focus.next(),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::Enter => match app.focus {
            Focus::Agents => app.pin_selected_agent(),
            Focus::Artifacts => app.view_selected_artifact(at),
            Focus::Runs => app.switch_to_selected_run(at),
        },
        KeyCode::Char('s') => app.start(at),
        KeyCode::Char('r') => app.resume(at),
        KeyCode::Char('x') => app.stop(at),
        KeyCode::Char('h') => app.toggle_hitl(),
        KeyCode::Char('f') => app.follow_active_agent(),
        KeyCode::Char('i') => app.idea_draft = Some(app.product_idea.clone()),
        KeyCode::Char('R') => app.submit(Intent::RefreshRuns, at),
        _ => {}
    }
    false
}

fn handle_idea_key(key: KeyEvent, app: &mut App) {
    match key.code {
        KeyCode::Esc => app.idea_draft = None,
        KeyCode::Enter => {
            if let Some(draft) = app.idea_draft.take() {
                if !draft.trim().is_empty() {
                    app.product_idea = draft.trim().to_string();
                }
            }
        }
        KeyCode::Backspace => {
            if let Some(draft) = app.idea_draft.as_mut() {
                draft.pop();
            }
        }
        KeyCode::Char(ch) => {
            if let Some(draft) = app.idea_draft.as_mut() {
                draft.push(ch);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ratatui::backend::TestBackend;
    use ratatui::Terminal;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::{load_config_with, Args};
    use crate::dispatch::testing::FakeApi;
    use crate::dispatch::Dispatcher;
    use crate::stream::StreamEvent;

    fn app() -> App {
        let config = load_config_with(Args::default(), |_| None).expect("config");
        let (tx, _rx) = mpsc::channel(4);
        App::new(&config, Dispatcher::new(Arc::new(FakeApi::default()), tx))
    }

    fn press(app: &mut App, code: KeyCode) -> bool {
        handle_key(KeyEvent::new(code, KeyModifiers::NONE), app, Utc::now())
    }

    fn screen(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn idea_editing_commits_on_enter_and_cancels_on_esc() {
        let mut app = app();
        press(&mut app, KeyCode::Char('i'));
        for _ in 0..app.product_idea.chars().count() {
            press(&mut app, KeyCode::Backspace);
        }
        for ch in "Dark mode".chars() {
            press(&mut app, KeyCode::Char(ch));
        }
        // 'q' is text while editing.
        assert!(!press(&mut app, KeyCode::Char('q')));
        press(&mut app, KeyCode::Backspace);
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.product_idea, "Dark mode");

        press(&mut app, KeyCode::Char('i'));
        press(&mut app, KeyCode::Char('!'));
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.product_idea, "Dark mode");
        assert!(app.idea_draft.is_none());
    }

    #[test]
    fn navigation_keys_cycle_focus_and_toggle_hitl() {
        let mut app = app();
        assert_eq!(app.focus, Focus::Agents);
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, Focus::Runs);
        press(&mut app, KeyCode::Down);
        assert_eq!(app.selected_run, 0);
        press(&mut app, KeyCode::Char('h'));
        assert!(app.hitl_enabled);
        assert!(press(&mut app, KeyCode::Char('q')));
    }

    #[test]
    fn wrapped_height_counts_wrapped_rows() {
        assert_eq!(wrapped_height("abcdef", 3), 2);
        assert_eq!(wrapped_height("ab\n\ncd", 10), 3);
        assert_eq!(wrapped_height("abc", 0), 3);
    }

    #[test]
    fn render_shows_run_agents_and_log() {
        let mut app = app();
        let at = Utc::now();
        app.apply_stream_event(
            StreamEvent::Message(
                r#"{"type":"agent_start","data":{"agent":"ProductManager","role":"Product Manager"}}"#
                    .to_string(),
            ),
            at,
        );
        app.apply_stream_event(
            StreamEvent::Message(
                r#"{"type":"thought_chunk","data":{"agent":"ProductManager","chunk":"Drafting MRS"}}"#
                    .to_string(),
            ),
            at,
        );
        let mut terminal = Terminal::new(TestBackend::new(140, 40)).expect("terminal");
        terminal.draw(|frame| render_ui(frame, &app)).expect("draw");
        let text = screen(&terminal);
        assert!(text.contains("Agent Flow Control"));
        assert!(text.contains("ProductManager"));
        assert!(text.contains("Drafting MRS"));
        assert!(text.contains("Agent active: ProductManager"));
    }
}
