//! Screen geometry. Pure so rendering and mouse hit-testing agree on where
//! every panel is.
//!
//!   ┌──────────────────────── header (1) ─────────────────────────┐
//!   │ explorer │                                     │ logs       │
//!   │──────────│  conversation                       │────────────│
//!   │ tokens   │                                     │ stats      │
//!   ├──────────────────────── status (1) ─────────────────────────┤
//!   │                         input (3)                           │
//!   └─────────────────────────────────────────────────────────────┘
use ratatui::layout::{Constraint, Direction, Layout, Rect};

use crate::focus::{FocusTarget, PanelVisibility};

const LEFT_WIDTH: u16 = 28;
const RIGHT_WIDTH: u16 = 36;
/// Below this width the side columns are not drawn at all.
const MIN_WIDTH_FOR_SIDES: u16 = 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelLayout {
    pub header: Rect,
    pub explorer: Option<Rect>,
    pub tokens: Option<Rect>,
    pub logs: Option<Rect>,
    pub stats: Option<Rect>,
    pub conversation: Rect,
    pub status: Rect,
    pub input: Rect,
}

impl PanelLayout {
    pub fn panel(&self, target: FocusTarget) -> Option<Rect> {
        match target {
            FocusTarget::Input => Some(self.input),
            FocusTarget::Explorer => self.explorer,
            FocusTarget::Tokens => self.tokens,
            FocusTarget::Logs => self.logs,
            FocusTarget::Stats => self.stats,
        }
    }
}

pub fn compute(area: Rect, vis: &PanelVisibility) -> PanelLayout {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(area);
    let (header, body, status, input) = (rows[0], rows[1], rows[2], rows[3]);

    let wide = area.width >= MIN_WIDTH_FOR_SIDES;
    let show_left = wide && (vis.explorer || vis.tokens);
    let show_right = wide && (vis.logs || vis.stats);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(if show_left { LEFT_WIDTH } else { 0 }),
            Constraint::Min(0),
            Constraint::Length(if show_right { RIGHT_WIDTH } else { 0 }),
        ])
        .split(body);

    let (explorer, tokens) = if show_left {
        stack(cols[0], vis.explorer, vis.tokens)
    } else {
        (None, None)
    };
    let (logs, stats) = if show_right {
        stack(cols[2], vis.logs, vis.stats)
    } else {
        (None, None)
    };

    PanelLayout {
        header,
        explorer,
        tokens,
        logs,
        stats,
        conversation: cols[1],
        status,
        input,
    }
}

/// Split a side column between its upper and lower panel.
fn stack(col: Rect, upper: bool, lower: bool) -> (Option<Rect>, Option<Rect>) {
    match (upper, lower) {
        (true, true) => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(col);
            (Some(parts[0]), Some(parts[1]))
        }
        (true, false) => (Some(col), None),
        (false, true) => (None, Some(col)),
        (false, false) => (None, None),
    }
}

fn contains(r: Rect, col: u16, row: u16) -> bool {
    col >= r.x && col < r.x + r.width && row >= r.y && row < r.y + r.height
}

/// Which focus target a click at (col, row) lands on. The conversation and
/// the input line both count as `Input`; header and status bar hit nothing.
pub fn hit_test(layout: &PanelLayout, col: u16, row: u16) -> Option<FocusTarget> {
    for target in FocusTarget::PANELS {
        if layout.panel(target).is_some_and(|r| contains(r, col, row)) {
            return Some(target);
        }
    }
    if contains(layout.conversation, col, row) || contains(layout.input, col, row) {
        return Some(FocusTarget::Input);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> PanelVisibility {
        PanelVisibility { explorer: true, logs: true, stats: true, tokens: true }
    }

    #[test]
    fn test_all_panels_placed_around_conversation() {
        let l = compute(Rect::new(0, 0, 120, 40), &all());
        let explorer = l.explorer.unwrap();
        let tokens = l.tokens.unwrap();
        let logs = l.logs.unwrap();
        assert_eq!(explorer.width, LEFT_WIDTH);
        assert_eq!(logs.width, RIGHT_WIDTH);
        assert!(tokens.y > explorer.y);
        assert_eq!(l.conversation.x, LEFT_WIDTH);
        assert_eq!(l.conversation.width, 120 - LEFT_WIDTH - RIGHT_WIDTH);
        assert_eq!(l.input.height, 3);
        assert_eq!(l.status.y, 36);
    }

    #[test]
    fn test_narrow_terminal_hides_sides() {
        let l = compute(Rect::new(0, 0, 50, 20), &all());
        assert!(l.explorer.is_none() && l.logs.is_none());
        assert_eq!(l.conversation.width, 50);
    }

    #[test]
    fn test_single_panel_takes_whole_column() {
        let vis = PanelVisibility { explorer: false, logs: true, stats: false, tokens: false };
        let l = compute(Rect::new(0, 0, 100, 30), &vis);
        assert!(l.explorer.is_none() && l.tokens.is_none());
        assert_eq!(l.conversation.x, 0);
        assert_eq!(l.logs.unwrap().height, 30 - 1 - 1 - 3);
    }

    #[test]
    fn test_hit_test() {
        let l = compute(Rect::new(0, 0, 120, 40), &all());
        assert_eq!(hit_test(&l, 2, 3), Some(FocusTarget::Explorer));
        assert_eq!(hit_test(&l, 119, 3), Some(FocusTarget::Logs));
        assert_eq!(hit_test(&l, 60, 10), Some(FocusTarget::Input));
        assert_eq!(hit_test(&l, 60, 38), Some(FocusTarget::Input));
        assert_eq!(hit_test(&l, 60, 0), None);
        let tokens = l.tokens.unwrap();
        assert_eq!(hit_test(&l, 1, tokens.y + 1), Some(FocusTarget::Tokens));
    }
}
