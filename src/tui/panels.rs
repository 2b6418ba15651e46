//! Side panels: explorer and agent tokens on the left, logs and run stats on the right.
use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use super::AppState;
use super::layout::PanelLayout;
use super::render::{fmt_k, truncate_left};
use crate::error::fmt_elapsed;
use crate::focus::FocusTarget;
use crate::status::{AgentStatus, TaskStatus};
use crate::theme::{Theme, parse_color};
use crate::workflow::estimate_cost;

pub fn draw(f: &mut Frame, state: &AppState, l: &PanelLayout) {
    if let Some(area) = l.explorer {
        draw_explorer(f, state, area);
    }
    if let Some(area) = l.tokens {
        draw_tokens(f, state, area);
    }
    if let Some(area) = l.logs {
        draw_logs(f, state, area);
    }
    if let Some(area) = l.stats {
        draw_stats(f, state, area);
    }
}

fn panel_block(theme: &Theme, title: String, focused: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, if focused { theme.title() } else { theme.muted() }))
        .border_style(theme.border_style(focused))
        .style(Style::default().bg(theme.panel_bg))
}

/// First row to show so `selected` stays in view.
fn window_start(selected: usize, visible: usize) -> usize {
    if visible == 0 { 0 } else { selected.saturating_sub(visible - 1) }
}

/// Slice `items` for a bottom-anchored view scrolled `offset` rows back.
fn tail<T>(items: Vec<T>, visible: usize, offset: usize) -> Vec<T> {
    let total = items.len();
    let end = total.saturating_sub(offset.min(total.saturating_sub(visible)));
    let start = end.saturating_sub(visible);
    items.into_iter().skip(start).take(end - start).collect()
}

// ── Explorer ──────────────────────────────────────────────────────────────────

fn draw_explorer(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let focused = state.focus.current() == FocusTarget::Explorer;
    let ex = &state.explorer;
    let title = format!(" {} ", truncate_left(&ex.display_dir(), area.width.saturating_sub(4) as usize));
    let block = panel_block(theme, title, focused);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(err) = &ex.error {
        f.render_widget(Paragraph::new(Span::styled(format!(" {err}"), Style::default().fg(theme.error))), inner);
        return;
    }
    if ex.entries.is_empty() {
        let msg = if ex.loading { " loading…" } else { " (empty)" };
        f.render_widget(Paragraph::new(Span::styled(msg, theme.muted())), inner);
        return;
    }

    let visible = inner.height as usize;
    let start = window_start(ex.selected, visible);
    let items: Vec<ListItem<'static>> = ex
        .entries
        .iter()
        .enumerate()
        .skip(start)
        .take(visible)
        .map(|(i, e)| {
            let (glyph, color) = if e.is_parent {
                ("↰ ", theme.dim)
            } else if e.is_dir {
                ("▸ ", theme.accent)
            } else {
                ("  ", theme.fg)
            };
            let mut style = Style::default().fg(color);
            if i == ex.selected && focused {
                style = style.patch(theme.selected());
            }
            ListItem::new(Line::from(Span::styled(format!("{glyph}{}", e.name), style)))
        })
        .collect();
    f.render_widget(List::new(items), inner);
}

// ── Agents / tokens ───────────────────────────────────────────────────────────

fn draw_tokens(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let focused = state.focus.current() == FocusTarget::Tokens;
    let block = panel_block(theme, " Agents ".to_string(), focused);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chat = state.chat_agent();
    let mut items: Vec<ListItem<'static>> = Vec::new();
    for (i, agent) in state.roster.iter().enumerate() {
        let marker = if chat.as_deref() == Some(agent.name.as_str()) { "›" } else { " " };
        let mut name_style = Style::default().fg(parse_color(&agent.color)).add_modifier(Modifier::BOLD);
        if agent.status == AgentStatus::Disabled {
            name_style = theme.muted();
        }
        if i == state.tokens_selected && focused {
            name_style = name_style.patch(theme.selected());
        }
        items.push(ListItem::new(Line::from(vec![
            Span::styled(marker.to_string(), Style::default().fg(theme.accent)),
            Span::styled(format!("{:<10}", agent.name), name_style),
            Span::styled(
                agent.status.label().to_string(),
                Style::default().fg(theme.agent_status(agent.status)),
            ),
        ])));
        items.push(ListItem::new(Line::from(Span::styled(
            format!("   ↑{} ↓{}", fmt_k(agent.tokens_in), fmt_k(agent.tokens_out)),
            theme.muted(),
        ))));
        let detail = match agent.status {
            AgentStatus::Error => agent.error.clone().map(|e| (e, theme.error)),
            AgentStatus::Running if !agent.activity.is_empty() => Some((agent.activity.clone(), theme.dim)),
            AgentStatus::Running => agent.phase.clone().map(|p| (p, theme.dim)),
            _ => None,
        };
        if let Some((text, color)) = detail {
            let w = inner.width.saturating_sub(3) as usize;
            let text: String = text.chars().take(w).collect();
            items.push(ListItem::new(Line::from(Span::styled(format!("   {text}"), Style::default().fg(color)))));
        }
    }
    items.push(ListItem::new(Line::from(Span::styled(
        format!(" ∑ ↑{} ↓{}", fmt_k(state.totals.tokens_in), fmt_k(state.totals.tokens_out)),
        theme.text().add_modifier(Modifier::BOLD),
    ))));
    f.render_widget(List::new(items), inner);
}

// ── Logs ──────────────────────────────────────────────────────────────────────

fn draw_logs(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let focused = state.focus.current() == FocusTarget::Logs;
    let title = format!(" Logs ({}) ", state.logs.buffer.len());
    let block = panel_block(theme, title, focused);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let lines: Vec<Line<'static>> = state
        .logs
        .buffer
        .iter()
        .map(|e| {
            Line::from(vec![
                Span::styled(format!("{} ", e.timestamp.format("%H:%M:%S")), theme.muted()),
                Span::styled(format!("{:<5}", e.level.label()), Style::default().fg(theme.log_level(e.level))),
                Span::styled(format!(" {}: ", e.source), theme.muted()),
                Span::styled(e.message.clone(), theme.text()),
            ])
        })
        .collect();
    let shown = tail(lines, inner.height as usize, state.logs.scroll);
    f.render_widget(Paragraph::new(shown), inner);
}

// ── Stats ─────────────────────────────────────────────────────────────────────

fn kv(theme: &Theme, label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!(" {label:<10}"), theme.muted()),
        Span::styled(value, theme.text()),
    ])
}

pub fn stats_lines(state: &AppState) -> Vec<Line<'static>> {
    let theme = &state.theme;
    let wf = &state.workflow.state;
    let m = &wf.metrics;
    let mut lines = vec![
        kv(theme, "workflow", wf.id.clone().unwrap_or_else(|| "-".to_string())),
        kv(theme, "phase", wf.phase.label().to_string()),
    ];
    if let Some(stage) = &wf.stage {
        lines.push(kv(theme, "stage", stage.clone()));
    }
    if let Some(elapsed) = wf.elapsed() {
        lines.push(kv(theme, "elapsed", fmt_elapsed(elapsed)));
    }
    if !wf.tasks.is_empty() {
        lines.push(kv(
            theme,
            "tasks",
            format!(
                "{} done · {} run · {} fail · {} wait",
                wf.count(TaskStatus::Completed) + wf.count(TaskStatus::Skipped),
                wf.count(TaskStatus::Running),
                wf.count(TaskStatus::Failed),
                wf.count(TaskStatus::Pending),
            ),
        ));
    }
    lines.push(kv(theme, "tokens", format!("↑{} ↓{}", fmt_k(m.tokens_in), fmt_k(m.tokens_out))));
    // prefer the runner's own figure; fall back to the configured rate
    let cost = if m.cost_usd > 0.0 {
        m.cost_usd
    } else {
        estimate_cost(m.tokens_in, m.tokens_out, state.cost_per_mtok_input)
    };
    if cost > 0.0 {
        lines.push(kv(theme, "cost", format!("${cost:.3}")));
    }
    if let Some(c) = m.consensus {
        lines.push(kv(theme, "consensus", format!("{:.0}%", c * 100.0)));
    }
    if let Some(err) = &wf.last_error {
        lines.push(Line::from(Span::styled(format!(" ✗ {err}"), Style::default().fg(theme.error))));
    }
    if !wf.tasks.is_empty() {
        lines.push(Line::raw(""));
        for t in &wf.tasks {
            lines.push(Line::from(vec![
                Span::styled(format!(" {} ", t.status.glyph()), Style::default().fg(theme.task_status(t.status))),
                Span::styled(t.description.clone(), theme.text()),
            ]));
        }
    }
    lines
}

fn draw_stats(f: &mut Frame, state: &AppState, area: Rect) {
    let theme = &state.theme;
    let focused = state.focus.current() == FocusTarget::Stats;
    let block = panel_block(theme, " Run ".to_string(), focused);
    let inner = block.inner(area);
    f.render_widget(block, area);

    // stats read top-down; scroll counts rows hidden from the top
    let lines = stats_lines(state);
    let skip = state.stats_scroll.min(lines.len().saturating_sub(inner.height as usize));
    let shown: Vec<Line<'static>> = lines.into_iter().skip(skip).collect();
    f.render_widget(Paragraph::new(shown), inner);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_window() {
        let v: Vec<u32> = (0..10).collect();
        assert_eq!(tail(v.clone(), 3, 0), vec![7, 8, 9]);
        assert_eq!(tail(v.clone(), 3, 2), vec![5, 6, 7]);
        // offset clamps to the oldest full page
        assert_eq!(tail(v.clone(), 3, 50), vec![0, 1, 2]);
        assert_eq!(tail(v, 20, 0).len(), 10);
    }

    #[test]
    fn test_window_start_keeps_selection_visible() {
        assert_eq!(window_start(0, 5), 0);
        assert_eq!(window_start(4, 5), 0);
        assert_eq!(window_start(9, 5), 5);
        assert_eq!(window_start(3, 0), 0);
    }
}
