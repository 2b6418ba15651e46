/// Ratatui draw entry-point. Side panels live in panels.rs, popups in overlays.rs.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::{AppState, layout, overlays, panels};
use crate::commands;
use crate::conversation::{Message, Role};
use crate::status::WorkflowPhase;
use crate::theme::Theme;

// ── Spinner ───────────────────────────────────────────────────────────────────

pub const SPINNER_GLYPHS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_MSGS: &[&str] = &["thinking…", "reasoning…", "working on it…", "almost there…", "on it…"];

pub fn spinner_frame(tick: u32) -> (&'static str, &'static str) {
    let glyph = SPINNER_GLYPHS[(tick as usize) % SPINNER_GLYPHS.len()];
    // message changes every ~2 seconds (120ms × 16 ticks)
    let msg = SPINNER_MSGS[(tick as usize / 16) % SPINNER_MSGS.len()];
    (glyph, msg)
}

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw(f: &mut Frame, state: &AppState) {
    let area = f.area();
    let theme = &state.theme;
    f.render_widget(Block::default().style(Style::default().bg(theme.bg)), area);

    let l = layout::compute(area, &state.focus.visibility);
    draw_header(f, state, l.header);
    draw_conversation(f, state, l.conversation);
    panels::draw(f, state, &l);
    draw_status_bar(f, state, l.status);
    draw_input(f, state, l.input);

    if state.overlays.is_empty() && state.focus.input_focused() && state.input.as_str().starts_with('/') {
        draw_slash_palette(f, state, area, l.input);
    }
    if let Some(overlay) = state.overlays.top() {
        overlays::draw(f, state, overlay, area);
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

fn draw_header(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let mut spans = vec![
        Span::styled(" ◆ quorum", theme.title()),
        Span::styled("  ", theme.muted()),
        Span::styled(state.profile.clone(), theme.text().add_modifier(Modifier::BOLD)),
        Span::styled("  ·  ", theme.muted()),
        Span::styled(state.model.clone(), theme.text()),
    ];
    if let Some(agent) = state.chat_agent() {
        spans.push(Span::styled("  ·  chat ", theme.muted()));
        spans.push(Span::styled(agent, theme.text()));
    }
    if state.focus.nav.is_active() {
        spans.push(Span::styled("  ◇ panel nav (arrows)", Style::default().fg(theme.warn).add_modifier(Modifier::BOLD)));
    }
    spans.push(Span::styled("  F1 help", theme.muted()));

    f.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(theme.panel_bg)), area);
}

// ── Conversation ──────────────────────────────────────────────────────────────

fn message_items(msg: &Message, theme: &Theme, width: usize, out: &mut Vec<ListItem<'static>>) {
    let color = theme.role(msg.role);
    let label = match msg.role {
        Role::User => "you".to_string(),
        Role::Agent => msg.author.clone(),
        Role::System => "system".to_string(),
    };
    let mut head = vec![
        Span::styled(format!(" {label}"), Style::default().fg(color).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  {}", msg.timestamp.format("%H:%M:%S")), theme.muted()),
    ];
    if let Some(meta) = &msg.meta {
        let mut parts = Vec::new();
        if let Some(model) = &meta.model {
            parts.push(model.clone());
        }
        parts.push(format!("↑{} ↓{}", fmt_k(meta.tokens_in), fmt_k(meta.tokens_out)));
        if meta.elapsed_ms > 0 {
            parts.push(format!("{:.1}s", meta.elapsed_ms as f64 / 1000.0));
        }
        head.push(Span::styled(format!("  {}", parts.join(" · ")), theme.muted()));
    }
    out.push(ListItem::new(Line::from(head)));

    let body_style = if msg.role == Role::System { theme.muted() } else { theme.text() };
    let wrap_width = width.saturating_sub(3).max(10);
    for src in msg.body.lines() {
        for line in wrap_text(src, wrap_width) {
            out.push(ListItem::new(Line::from(vec![Span::raw("   "), Span::styled(line, body_style)])));
        }
    }
    out.push(ListItem::new(Line::raw("")));
}

fn draw_conversation(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let mut items = Vec::new();
    if state.conversation.history.is_empty() {
        items.push(ListItem::new(Line::from(Span::styled(
            "  Type a message to chat, or /plan <task> to start a workflow. /help lists commands.",
            theme.muted(),
        ))));
    }
    for msg in state.conversation.history.iter() {
        message_items(msg, theme, area.width as usize, &mut items);
    }
    if state.conversation.streaming {
        let (glyph, msg) = spinner_frame(state.spinner_tick);
        let who = state.conversation.slot.label().unwrap_or("chat").to_string();
        items.push(ListItem::new(Line::from(vec![
            Span::styled(format!(" {glyph} "), Style::default().fg(theme.accent)),
            Span::styled(who, theme.text()),
            Span::styled(format!("  {msg}"), theme.muted()),
        ])));
    }

    // scroll is an offset from the bottom
    let total = items.len();
    let visible = area.height as usize;
    let skip = if total > visible {
        (total - visible).saturating_sub(state.conversation.scroll)
    } else {
        0
    };
    let sliced: Vec<ListItem<'static>> = items.into_iter().skip(skip).collect();
    f.render_widget(List::new(sliced).block(Block::default().style(Style::default().bg(theme.bg))), area);
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status_bar(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let wf = &state.workflow.state;

    let (glyph, glyph_color) = if state.is_busy() {
        (SPINNER_GLYPHS[(state.spinner_tick as usize) % SPINNER_GLYPHS.len()], theme.accent)
    } else {
        ("▲", theme.fg)
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(glyph, Style::default().fg(glyph_color).add_modifier(Modifier::BOLD)),
        Span::styled(format!(" {}", state.focus.current().label()), theme.text()),
        Span::styled("  ·  ", theme.muted()),
    ];

    let phase_color = match wf.phase {
        WorkflowPhase::Idle => theme.dim,
        WorkflowPhase::Running => theme.accent,
        WorkflowPhase::Done => if wf.last_error.is_some() { theme.error } else { theme.ok },
    };
    let mut phase = format!("workflow {}", wf.phase.label());
    if let Some(stage) = &wf.stage {
        phase.push_str(&format!(" ({stage})"));
    }
    if !wf.tasks.is_empty() {
        let done = wf.tasks.iter().filter(|t| t.status.is_finished()).count();
        phase.push_str(&format!(" {done}/{}", wf.tasks.len()));
    }
    spans.push(Span::styled(phase, Style::default().fg(phase_color)));

    if let Some(label) = state.workflow.slot.label().or(state.conversation.slot.label()) {
        spans.push(Span::styled(format!("  ▶ {label}"), Style::default().fg(theme.accent)));
    }

    spans.push(Span::styled(
        format!(
            "  ∑ ↑{} ↓{}",
            fmt_k(state.totals.tokens_in),
            fmt_k(state.totals.tokens_out)
        ),
        theme.muted(),
    ));
    if state.is_busy() {
        spans.push(Span::styled("  Ctrl+X cancel", theme.muted()));
    }

    f.render_widget(Paragraph::new(Line::from(spans)).style(Style::default().bg(theme.panel_bg)), area);
}

// ── Input box ─────────────────────────────────────────────────────────────────

fn draw_input(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let focused = state.focus.input_focused() && state.overlays.is_empty();
    let prompt_char = if state.input.as_str().starts_with('/') { "/" } else { "❯" };

    let prompt_span = Span::styled(
        format!("  {prompt_char} "),
        Style::default().fg(if focused { theme.accent } else { theme.dim }).add_modifier(Modifier::BOLD),
    );
    let content_span = if state.input.is_empty() {
        let hint = if state.is_busy() {
            "Esc or Ctrl+X to cancel"
        } else {
            "message · /command · Tab tasks · Ctrl+Z panels"
        };
        Span::styled(hint, theme.muted())
    } else if prompt_char == "/" {
        // the prompt glyph already shows the slash
        Span::styled(state.input.as_str()[1..].to_string(), theme.text())
    } else {
        Span::styled(state.input.as_str().to_string(), theme.text())
    };

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(theme.border_style(focused))
        .style(Style::default().bg(theme.panel_bg));
    f.render_widget(
        Paragraph::new(Line::from(vec![prompt_span, content_span]))
            .block(block)
            .wrap(Wrap { trim: false }),
        area,
    );

    if focused {
        // prompt is "  ❯ ", 4 columns; a leading '/' is drawn as the prompt
        let prompt_width: u16 = 4;
        let col = if prompt_char == "/" {
            state.input.cursor_col().saturating_sub(1)
        } else {
            state.input.cursor_col()
        };
        let cursor_x = area.x + prompt_width + col as u16;
        let cursor_y = area.y + 1;
        if cursor_x < area.x + area.width {
            f.set_cursor_position((cursor_x, cursor_y));
        }
    }
}

// ── Slash palette ─────────────────────────────────────────────────────────────

fn draw_slash_palette(f: &mut Frame, state: &AppState, area: Rect, input: Rect) {
    let prefix = state.input.as_str().split_whitespace().next().unwrap_or("/");
    // hide once a command has been completed and arguments are being typed
    if state.input.as_str().contains(' ') {
        return;
    }
    let matches = commands::matching(prefix);
    if matches.is_empty() {
        return;
    }
    let theme = &state.theme;

    let height = (matches.len() as u16 + 2).min(14).min(input.y.saturating_sub(area.y));
    let width = 62u16.min(area.width.saturating_sub(4));
    if height < 3 {
        return;
    }
    let popup = Rect { x: input.x + 2, y: input.y.saturating_sub(height), width, height };
    f.render_widget(Clear, popup);

    let items: Vec<ListItem<'static>> = matches
        .iter()
        .map(|cmd| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("  {:<12}", cmd.key), Style::default().fg(theme.accent)),
                Span::styled(cmd.label.to_string(), theme.muted()),
            ]))
        })
        .collect();
    let block = Block::default()
        .title(Span::styled(" Commands  Tab complete ", theme.muted()))
        .borders(Borders::ALL)
        .border_style(theme.border_style(true))
        .style(Style::default().bg(theme.panel_bg));
    f.render_widget(List::new(items).block(block), popup);
}

// ── Utilities ─────────────────────────────────────────────────────────────────

pub fn fmt_k(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1000 {
        format!("{:.1}k", n as f64 / 1000.0)
    } else {
        n.to_string()
    }
}

/// Word-wrap a single line to `max_width` display columns. Words wider than
/// the line are hard-split.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.width();
        if word_width > max_width {
            if current_width > 0 {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
            }
            for c in word.chars() {
                let w = c.width().unwrap_or(0);
                if current_width + w > max_width {
                    lines.push(std::mem::take(&mut current));
                    current_width = 0;
                }
                current.push(c);
                current_width += w;
            }
        } else if current_width == 0 {
            current.push_str(word);
            current_width = word_width;
        } else if current_width + 1 + word_width <= max_width {
            current.push(' ');
            current.push_str(word);
            current_width += 1 + word_width;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_width = word_width;
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Trim to `max` columns from the left, keeping the tail of a path visible.
pub fn truncate_left(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    let mut out: Vec<char> = Vec::new();
    let mut width = 1;
    for c in s.chars().rev() {
        let w = c.width().unwrap_or(0);
        if width + w > max {
            break;
        }
        width += w;
        out.push(c);
    }
    out.reverse();
    format!("…{}", out.into_iter().collect::<String>())
}
