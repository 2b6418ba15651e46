//! Key and mouse handling. `focus::route_key` picks the consumer; this module
//! carries out what each consumer does with the key.
use std::time::Instant;

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use crate::commands;
use crate::focus::{FocusTarget, GlobalAction, Overlay, PANEL_NAV_WINDOW, Route, route_click, route_key};

use super::actions;
use super::layout;
use super::{AppState, Services, UiEvent};

const PAGE: usize = 10;

/// Returns false when the session should end.
pub fn handle_key(state: &mut AppState, services: &Services, key: KeyEvent) -> bool {
    // Windows reports releases too
    if key.kind != KeyEventKind::Press {
        return true;
    }

    match route_key(&mut state.focus, &mut state.overlays, key, Instant::now()) {
        Route::Overlay(overlay, key) => overlay_key(state, overlay, key),
        Route::OverlayClosed(_) | Route::PanelNav | Route::FocusReturned => {}
        Route::PanelNavArmed { seq } => {
            services.dispatcher.schedule(PANEL_NAV_WINDOW, UiEvent::PanelNavTimeout { seq });
        }
        Route::Global(action) => return global_action(state, services, action),
        Route::Panel(target, key) => panel_key(state, services, target, key),
        Route::Input(key) => return input_key(state, services, key),
    }
    true
}

fn global_action(state: &mut AppState, services: &Services, action: GlobalAction) -> bool {
    match action {
        GlobalAction::Quit => return false,
        GlobalAction::Cancel => {
            actions::cancel_active(state);
        }
        GlobalAction::TogglePanel(target) => {
            // the router already flipped visibility
            if target == FocusTarget::Explorer && state.focus.visibility.explorer {
                actions::load_explorer(state, services);
            }
        }
        GlobalAction::ToggleOverlay(overlay) => toggle_overlay(state, services, overlay),
    }
    true
}

pub fn toggle_overlay(state: &mut AppState, services: &Services, overlay: Overlay) {
    state.overlays.toggle(overlay);
    if !state.overlays.is_open(overlay) {
        return;
    }
    match overlay {
        Overlay::DiffView => actions::load_diff(state, services),
        Overlay::HistorySearch => {
            state.overlay.history_query.clear();
            state.overlay.history_selected = 0;
        }
        Overlay::Consensus => state.overlay.consensus_scroll = 0,
        Overlay::Tasks => state.overlay.tasks_scroll = 0,
        Overlay::Shortcuts | Overlay::FileViewer => {}
    }
}

// ── Input line ────────────────────────────────────────────────────────────────

fn input_key(state: &mut AppState, services: &Services, key: KeyEvent) -> bool {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    match key.code {
        KeyCode::Enter => return actions::submit_input(state, services),
        // Esc: cancel outstanding work, else clear the line
        KeyCode::Esc => {
            if state.is_busy() {
                actions::cancel_active(state);
            } else {
                state.input.clear();
            }
        }
        KeyCode::Tab => {
            if state.input.as_str().starts_with('/') {
                if let Some(cmd) = commands::complete(state.input.as_str()) {
                    state.input.set(&format!("{cmd} "));
                }
            } else {
                toggle_overlay(state, services, Overlay::Tasks);
            }
        }
        KeyCode::Char('?') if state.input.is_empty() && !ctrl => {
            toggle_overlay(state, services, Overlay::Shortcuts);
        }
        KeyCode::Char('u') if ctrl => state.input.delete_to_start(),
        KeyCode::Char('w') if ctrl => state.input.delete_word(),
        KeyCode::Char('a') if ctrl => state.input.home(),
        KeyCode::Char(c) if !ctrl => state.input.insert_char(c),
        KeyCode::Backspace if ctrl || alt => state.input.delete_word(),
        KeyCode::Backspace => state.input.backspace(),
        KeyCode::Delete => state.input.delete_forward(),
        KeyCode::Left if ctrl || alt => state.input.word_left(),
        KeyCode::Right if ctrl || alt => state.input.word_right(),
        KeyCode::Left => state.input.left(),
        KeyCode::Right => state.input.right(),
        KeyCode::Home => state.input.home(),
        KeyCode::End => state.input.end(),
        KeyCode::Up => {
            let entries = state.prompt_history.entries().to_vec();
            state.input.recall_prev(&entries);
        }
        KeyCode::Down => {
            let entries = state.prompt_history.entries().to_vec();
            state.input.recall_next(&entries);
        }
        KeyCode::PageUp => state.conversation.scroll = state.conversation.scroll.saturating_add(PAGE),
        KeyCode::PageDown => state.conversation.scroll = state.conversation.scroll.saturating_sub(PAGE),
        _ => {}
    }
    true
}

pub fn handle_paste(state: &mut AppState, text: &str) {
    if !state.overlays.is_empty() {
        return;
    }
    state.focus.focus_input();
    // single-line input: newlines become spaces
    let flat: String = text.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }).collect();
    state.input.insert_str(&flat);
}

// ── Side panels ───────────────────────────────────────────────────────────────

fn panel_key(state: &mut AppState, services: &Services, target: FocusTarget, key: KeyEvent) {
    match target {
        FocusTarget::Explorer => match key.code {
            KeyCode::Up => state.explorer.move_by(-1),
            KeyCode::Down => state.explorer.move_by(1),
            KeyCode::PageUp => state.explorer.move_by(-(PAGE as isize)),
            KeyCode::PageDown => state.explorer.move_by(PAGE as isize),
            KeyCode::Home => state.explorer.home(),
            KeyCode::End => state.explorer.end(),
            KeyCode::Enter => actions::open_selected(state, services),
            KeyCode::Backspace => actions::explorer_parent(state, services),
            _ => {}
        },
        FocusTarget::Logs => {
            let max = state.logs.buffer.len();
            scroll(&mut state.logs.scroll, key.code, max);
        }
        FocusTarget::Stats => {
            let max = state.workflow.state.tasks.len() + 12;
            top_scroll(&mut state.stats_scroll, key.code, max);
        }
        FocusTarget::Tokens => {
            let last = state.roster.len().saturating_sub(1);
            match key.code {
                KeyCode::Up => state.tokens_selected = state.tokens_selected.saturating_sub(1),
                KeyCode::Down => state.tokens_selected = (state.tokens_selected + 1).min(last),
                KeyCode::Home => state.tokens_selected = 0,
                KeyCode::End => state.tokens_selected = last,
                KeyCode::Enter => {
                    let name = state.roster.iter().nth(state.tokens_selected).map(|a| a.name.clone());
                    if let Some(name) = name {
                        actions::set_chat_agent(state, &name);
                    }
                }
                _ => {}
            }
        }
        FocusTarget::Input => {}
    }
}

/// Offset-from-bottom scrolling for the log view. Up moves back in time.
fn scroll(offset: &mut usize, code: KeyCode, max: usize) {
    *offset = match code {
        KeyCode::Up => offset.saturating_add(1),
        KeyCode::Down => offset.saturating_sub(1),
        KeyCode::PageUp => offset.saturating_add(PAGE),
        KeyCode::PageDown => offset.saturating_sub(PAGE),
        KeyCode::Home => max,
        KeyCode::End => 0,
        _ => *offset,
    }
    .min(max);
}

// ── Overlays ──────────────────────────────────────────────────────────────────

/// Keys inside a visible overlay. Nothing here ever reaches panels or input;
/// keys an overlay has no use for (Ctrl+C included) are dropped.
fn overlay_key(state: &mut AppState, overlay: Overlay, key: KeyEvent) {
    match overlay {
        Overlay::Shortcuts => {
            if matches!(key.code, KeyCode::F(1) | KeyCode::Char('?')) {
                state.overlays.close();
            }
        }
        Overlay::HistorySearch => history_key(state, key),
        Overlay::DiffView => {
            let max = state.overlay.diff.line_count();
            top_scroll(&mut state.overlay.diff.scroll, key.code, max);
        }
        Overlay::FileViewer => {
            let max = state.overlay.file.line_count();
            top_scroll(&mut state.overlay.file.scroll, key.code, max);
        }
        Overlay::Consensus => {
            let max = state.workflow.analysis.len() * 4 + state.workflow.state.metrics.agreement.len();
            top_scroll(&mut state.overlay.consensus_scroll, key.code, max);
        }
        Overlay::Tasks => {
            if key.code == KeyCode::Tab {
                state.overlays.close();
                return;
            }
            let max = state.workflow.state.tasks.len();
            top_scroll(&mut state.overlay.tasks_scroll, key.code, max);
        }
    }
}

/// Offset-from-top scrolling for overlay text.
fn top_scroll(offset: &mut usize, code: KeyCode, max: usize) {
    *offset = match code {
        KeyCode::Up | KeyCode::Char('k') => offset.saturating_sub(1),
        KeyCode::Down | KeyCode::Char('j') => offset.saturating_add(1),
        KeyCode::PageUp => offset.saturating_sub(PAGE),
        KeyCode::PageDown | KeyCode::Char(' ') => offset.saturating_add(PAGE),
        KeyCode::Home | KeyCode::Char('g') => 0,
        KeyCode::End | KeyCode::Char('G') => max,
        _ => *offset,
    }
    .min(max.saturating_sub(1));
}

fn history_key(state: &mut AppState, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Enter => {
            let hits = state.prompt_history.search(&state.overlay.history_query);
            if let Some(line) = hits.get(state.overlay.history_selected) {
                state.input.set(line);
            }
            state.overlays.close();
            state.focus.focus_input();
        }
        KeyCode::Up => state.overlay.history_selected = state.overlay.history_selected.saturating_sub(1),
        KeyCode::Down => {
            let n = state.prompt_history.search(&state.overlay.history_query).len();
            state.overlay.history_selected = (state.overlay.history_selected + 1).min(n.saturating_sub(1));
        }
        KeyCode::Backspace => {
            state.overlay.history_query.pop();
            state.overlay.history_selected = 0;
        }
        KeyCode::Char(c) if !ctrl => {
            state.overlay.history_query.push(c);
            state.overlay.history_selected = 0;
        }
        _ => {}
    }
}

// ── Mouse ─────────────────────────────────────────────────────────────────────

pub fn handle_mouse(state: &mut AppState, mouse: MouseEvent) {
    let layout = layout::compute(state.viewport, &state.focus.visibility);
    let target = layout::hit_test(&layout, mouse.column, mouse.row);
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some(t) = target {
                route_click(&mut state.focus, &state.overlays, t);
            }
        }
        MouseEventKind::ScrollUp => wheel(state, target, KeyCode::Up),
        MouseEventKind::ScrollDown => wheel(state, target, KeyCode::Down),
        _ => {}
    }
}

fn wheel(state: &mut AppState, target: Option<FocusTarget>, code: KeyCode) {
    if let Some(overlay) = state.overlays.top() {
        if overlay != Overlay::HistorySearch && overlay != Overlay::Shortcuts {
            for _ in 0..3 {
                overlay_key(state, overlay, KeyEvent::new(code, KeyModifiers::NONE));
            }
        }
        return;
    }
    match target {
        Some(FocusTarget::Logs) => {
            let max = state.logs.buffer.len();
            scroll(&mut state.logs.scroll, code, max);
        }
        Some(FocusTarget::Stats) => {
            let max = state.workflow.state.tasks.len() + 12;
            top_scroll(&mut state.stats_scroll, code, max);
        }
        Some(FocusTarget::Explorer) => state.explorer.move_by(if code == KeyCode::Up { -1 } else { 1 }),
        Some(FocusTarget::Input) => {
            state.conversation.scroll = if code == KeyCode::Up {
                state.conversation.scroll.saturating_add(3)
            } else {
                state.conversation.scroll.saturating_sub(3)
            };
        }
        Some(FocusTarget::Tokens) | None => {}
    }
}
