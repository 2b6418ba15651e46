/// Overlay/popup draw functions: shortcuts, history search, diff, consensus, tasks, file viewer.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use super::render::wrap_text;
use super::{AppState, TextView};
use crate::focus::Overlay;
use crate::theme::Theme;

pub fn draw(f: &mut Frame, state: &AppState, overlay: Overlay, area: Rect) {
    match overlay {
        Overlay::Shortcuts => draw_shortcuts(f, state, area),
        Overlay::HistorySearch => draw_history_search(f, state, area),
        Overlay::DiffView => draw_diff(f, state, area),
        Overlay::Consensus => draw_consensus(f, state, area),
        Overlay::Tasks => draw_tasks(f, state, area),
        Overlay::FileViewer => draw_file(f, state, area),
    }
}

/// Centered popup of at most `width`×`height`, cleared and framed.
fn popup(f: &mut Frame, theme: &Theme, area: Rect, width: u16, height: u16, title: String) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    let rect = Rect { x, y, width, height };
    f.render_widget(Clear, rect);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, theme.title()))
        .border_style(theme.border_style(true))
        .style(Style::default().bg(theme.panel_bg));
    let inner = block.inner(rect);
    f.render_widget(block, rect);
    inner
}

/// Full-screen popup with a 2-char inset.
fn sheet(f: &mut Frame, theme: &Theme, area: Rect, title: String) -> Rect {
    popup(f, theme, area, area.width.saturating_sub(4), area.height.saturating_sub(2), title)
}

fn scrolled(lines: Vec<Line<'static>>, offset: usize, visible: usize) -> Vec<Line<'static>> {
    let skip = offset.min(lines.len().saturating_sub(visible));
    lines.into_iter().skip(skip).collect()
}

// ── Shortcuts ─────────────────────────────────────────────────────────────────

const SHORTCUTS: &[(&str, &str)] = &[
    ("Enter", "send message / run command"),
    ("Esc", "cancel running work, close overlay, clear input"),
    ("Ctrl+X", "cancel chat and workflow"),
    ("Ctrl+C", "quit"),
    ("Ctrl+Z ←→↑↓", "panel navigation (1.5s window)"),
    ("Tab", "complete /command, else task list"),
    ("↑ ↓", "prompt history"),
    ("PgUp PgDn", "scroll conversation"),
    ("Ctrl+E", "toggle explorer"),
    ("Ctrl+L", "toggle logs"),
    ("Ctrl+R", "toggle run stats"),
    ("Ctrl+T", "toggle agents"),
    ("Ctrl+H", "search prompt history"),
    ("Ctrl+D", "git diff"),
    ("Ctrl+K", "consensus view"),
    ("F1  ?", "this help"),
];

fn draw_shortcuts(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let inner = popup(f, theme, area, 64, SHORTCUTS.len() as u16 + 4, " Shortcuts  (Esc close) ".to_string());
    let mut lines: Vec<Line<'static>> = SHORTCUTS
        .iter()
        .map(|(key, what)| {
            Line::from(vec![
                Span::styled(format!("  {key:<14}"), Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
                Span::styled(what.to_string(), theme.text()),
            ])
        })
        .collect();
    lines.push(Line::raw(""));
    lines.push(Line::from(Span::styled("  /help lists slash commands", theme.muted())));
    f.render_widget(Paragraph::new(lines), inner);
}

// ── History search ────────────────────────────────────────────────────────────

fn draw_history_search(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let inner = popup(f, theme, area, 72, 18, " Prompt history  ↑↓ select  Enter use  Esc close ".to_string());

    let search_area = Rect { height: 1, ..inner };
    let list_area = Rect {
        y: inner.y + 2,
        height: inner.height.saturating_sub(2),
        ..inner
    };
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("  ❯ ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
            Span::styled(state.overlay.history_query.clone(), theme.text()),
        ])),
        search_area,
    );

    let hits = state.prompt_history.search(&state.overlay.history_query);
    if hits.is_empty() {
        f.render_widget(Paragraph::new(Span::styled("  no matches", theme.muted())), list_area);
        return;
    }
    let sel = state.overlay.history_selected;
    let visible = list_area.height as usize;
    let skip = if visible > 0 && sel >= visible { sel - visible + 1 } else { 0 };
    let width = list_area.width.saturating_sub(4) as usize;
    let items: Vec<ListItem<'static>> = hits
        .into_iter()
        .enumerate()
        .skip(skip)
        .take(visible)
        .map(|(i, line)| {
            let text: String = line.chars().take(width).collect();
            let style = if i == sel { theme.selected().fg(theme.fg) } else { theme.text() };
            ListItem::new(Line::from(Span::styled(format!("  {text}"), style)))
        })
        .collect();
    f.render_widget(List::new(items), list_area);
}

// ── Text views ────────────────────────────────────────────────────────────────

fn text_status(view: &TextView, theme: &Theme) -> Option<Line<'static>> {
    if view.loading {
        return Some(Line::from(Span::styled("  loading…", theme.muted())));
    }
    view.error
        .as_ref()
        .map(|e| Line::from(Span::styled(format!("  {e}"), Style::default().fg(theme.error))))
}

fn draw_diff(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let view = &state.overlay.diff;
    let inner = sheet(f, theme, area, " git diff  (Esc close · j/k scroll · PgDn/PgUp fast) ".to_string());
    if let Some(line) = text_status(view, theme) {
        f.render_widget(Paragraph::new(line), inner);
        return;
    }
    if view.body.trim().is_empty() {
        f.render_widget(Paragraph::new(Span::styled("  working tree clean", theme.muted())), inner);
        return;
    }

    // color by line prefix
    let lines: Vec<Line<'static>> = view
        .body
        .lines()
        .map(|line| {
            let style = if line.starts_with("+++") || line.starts_with("---") {
                Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
            } else if line.starts_with('+') {
                Style::default().fg(theme.ok)
            } else if line.starts_with('-') {
                Style::default().fg(theme.error)
            } else if line.starts_with("@@") {
                Style::default().fg(theme.warn)
            } else if line.starts_with("diff ") || line.starts_with("index ") {
                theme.title()
            } else {
                theme.muted()
            };
            Line::from(Span::styled(line.to_string(), style))
        })
        .collect();
    f.render_widget(Paragraph::new(scrolled(lines, view.scroll, inner.height as usize)), inner);
}

fn draw_file(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let view = &state.overlay.file;
    let inner = sheet(f, theme, area, format!(" {}  (q close · j/k scroll) ", view.title));
    if let Some(line) = text_status(view, theme) {
        f.render_widget(Paragraph::new(line), inner);
        return;
    }
    let gutter = view.line_count().to_string().len();
    let lines: Vec<Line<'static>> = view
        .body
        .lines()
        .enumerate()
        .map(|(i, line)| {
            Line::from(vec![
                Span::styled(format!("{:>gutter$} │ ", i + 1), theme.muted()),
                Span::styled(line.replace('\t', "    "), theme.text()),
            ])
        })
        .collect();
    f.render_widget(Paragraph::new(scrolled(lines, view.scroll, inner.height as usize)), inner);
}

// ── Consensus ─────────────────────────────────────────────────────────────────

/// Unicode block bar, `width` chars, filled to `ratio` (0.0–1.0).
fn bar(ratio: f64, width: usize) -> String {
    let blocks = ["▏", "▎", "▍", "▌", "▋", "▊", "▉", "█"];
    let eighths = ((ratio.clamp(0.0, 1.0) * (width * 8) as f64).round() as usize).min(width * 8);
    let full = eighths / 8;
    let partial = eighths % 8;
    let mut s = "█".repeat(full);
    if partial > 0 && full < width {
        s.push_str(blocks[partial - 1]);
    }
    let empty = width.saturating_sub(s.chars().count());
    s.push_str(&"░".repeat(empty));
    s
}

fn draw_consensus(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let inner = sheet(f, theme, area, " Consensus  (Esc close · j/k scroll) ".to_string());
    let metrics = &state.workflow.state.metrics;
    let answers = &state.workflow.analysis;

    let mut lines: Vec<Line<'static>> = Vec::new();
    match metrics.consensus {
        Some(c) => lines.push(Line::from(vec![
            Span::styled("  overall   ", theme.muted()),
            Span::styled(bar(c, 20), Style::default().fg(theme.accent)),
            Span::styled(format!("  {:.0}%", c * 100.0), theme.text().add_modifier(Modifier::BOLD)),
        ])),
        None => lines.push(Line::from(Span::styled(
            "  No consensus yet. /analyze <task> asks every agent.",
            theme.muted(),
        ))),
    }
    for a in &metrics.agreement {
        lines.push(Line::from(vec![
            Span::styled(format!("  {:<10}", a.agent), theme.text()),
            Span::styled(bar(a.score, 20), Style::default().fg(theme.ok)),
            Span::styled(format!("  {:.0}%", a.score * 100.0), theme.muted()),
        ]));
    }

    let width = inner.width.saturating_sub(4) as usize;
    for answer in answers {
        lines.push(Line::raw(""));
        lines.push(Line::from(Span::styled(format!("  ── {} ", answer.agent), theme.title())));
        for src in answer.output.lines() {
            for w in wrap_text(src, width) {
                lines.push(Line::from(Span::styled(format!("    {w}"), theme.text())));
            }
        }
    }
    f.render_widget(
        Paragraph::new(scrolled(lines, state.overlay.consensus_scroll, inner.height as usize)),
        inner,
    );
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

fn draw_tasks(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let wf = &state.workflow.state;
    let title = match &wf.id {
        Some(id) => format!(" Tasks · {id} · {}  (Tab/Esc close) ", wf.phase.label()),
        None => " Tasks  (Tab/Esc close) ".to_string(),
    };
    let inner = popup(f, theme, area, 90, 24, title);

    if wf.tasks.is_empty() {
        f.render_widget(
            Paragraph::new(Span::styled("  No tasks. /plan <task> creates some.", theme.muted())),
            inner,
        );
        return;
    }
    let mut lines: Vec<Line<'static>> = Vec::new();
    for t in &wf.tasks {
        let mut spans = vec![
            Span::styled(format!("  {} ", t.status.glyph()), Style::default().fg(theme.task_status(t.status))),
            Span::styled(format!("{:<8}", t.id), theme.muted()),
            Span::styled(t.description.clone(), theme.text()),
        ];
        if let Some(agent) = &t.agent {
            spans.push(Span::styled(format!("  @{agent}"), Style::default().fg(theme.agent)));
        }
        lines.push(Line::from(spans));
        if let Some(err) = &t.error {
            lines.push(Line::from(Span::styled(format!("      ✗ {err}"), Style::default().fg(theme.error))));
        }
    }
    let skip = state.overlay.tasks_scroll.min(lines.len().saturating_sub(1));
    let shown: Vec<Line<'static>> = lines.into_iter().skip(skip).collect();
    f.render_widget(Paragraph::new(shown).wrap(Wrap { trim: false }), inner);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_fill() {
        assert_eq!(bar(0.0, 4), "░░░░");
        assert_eq!(bar(1.0, 4), "████");
        assert_eq!(bar(0.5, 4), "██░░");
        // out-of-range ratios clamp
        assert_eq!(bar(3.0, 2), "██");
    }
}
