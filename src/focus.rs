//! Focus router and modal stack.
//!
//! Every key event is routed to exactly one consumer. Evaluation order, first
//! match wins:
//!   1. a visible overlay (it owns all input, Ctrl+C included)
//!   2. active panel-nav mode
//!   3. the panel-nav prefix key (Ctrl+Z)
//!   4. global chords
//!   5. the focused side panel
//!   6. the input line
//!
//! The router only moves focus and flips visibility. Anything with side effects
//! beyond that (quitting, cancelling, overlay internals, editing the input) is
//! returned as a `Route` for the controller to carry out.
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Panel-nav mode expires this long after being armed.
pub const PANEL_NAV_WINDOW: Duration = Duration::from_millis(1500);

// ── Focus targets ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusTarget {
    #[default]
    Input,
    Explorer,
    Logs,
    Stats,
    Tokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl FocusTarget {
    pub const PANELS: [FocusTarget; 4] = [
        FocusTarget::Explorer,
        FocusTarget::Tokens,
        FocusTarget::Logs,
        FocusTarget::Stats,
    ];

    pub fn side(self) -> Option<Side> {
        match self {
            FocusTarget::Explorer | FocusTarget::Tokens => Some(Side::Left),
            FocusTarget::Logs | FocusTarget::Stats => Some(Side::Right),
            FocusTarget::Input => None,
        }
    }

    /// The other panel sharing this panel's side.
    pub fn sibling(self) -> Option<FocusTarget> {
        match self {
            FocusTarget::Explorer => Some(FocusTarget::Tokens),
            FocusTarget::Tokens => Some(FocusTarget::Explorer),
            FocusTarget::Logs => Some(FocusTarget::Stats),
            FocusTarget::Stats => Some(FocusTarget::Logs),
            FocusTarget::Input => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FocusTarget::Input => "input",
            FocusTarget::Explorer => "explorer",
            FocusTarget::Logs => "logs",
            FocusTarget::Stats => "stats",
            FocusTarget::Tokens => "tokens",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelVisibility {
    pub explorer: bool,
    pub logs: bool,
    pub stats: bool,
    pub tokens: bool,
}

impl Default for PanelVisibility {
    fn default() -> Self {
        Self {
            explorer: false,
            logs: true,
            stats: false,
            tokens: true,
        }
    }
}

impl PanelVisibility {
    pub fn is_visible(&self, target: FocusTarget) -> bool {
        match target {
            FocusTarget::Input => true,
            FocusTarget::Explorer => self.explorer,
            FocusTarget::Logs => self.logs,
            FocusTarget::Stats => self.stats,
            FocusTarget::Tokens => self.tokens,
        }
    }

    fn flag(&mut self, target: FocusTarget) -> Option<&mut bool> {
        match target {
            FocusTarget::Input => None,
            FocusTarget::Explorer => Some(&mut self.explorer),
            FocusTarget::Logs => Some(&mut self.logs),
            FocusTarget::Stats => Some(&mut self.stats),
            FocusTarget::Tokens => Some(&mut self.tokens),
        }
    }

    pub fn set(&mut self, target: FocusTarget, visible: bool) {
        if let Some(f) = self.flag(target) {
            *f = visible;
        }
    }
}

// ── Overlays ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    Shortcuts,
    HistorySearch,
    DiffView,
    Consensus,
    Tasks,
    FileViewer,
}

impl Overlay {
    /// Order in which Escape closes overlays. The file viewer is absent: only
    /// its own key closes it.
    pub const ESCAPE_ORDER: [Overlay; 5] = [
        Overlay::Shortcuts,
        Overlay::HistorySearch,
        Overlay::DiffView,
        Overlay::Consensus,
        Overlay::Tasks,
    ];

    pub fn closes_on_escape(self) -> bool {
        Self::ESCAPE_ORDER.contains(&self)
    }

    pub fn title(self) -> &'static str {
        match self {
            Overlay::Shortcuts => "Shortcuts",
            Overlay::HistorySearch => "History",
            Overlay::DiffView => "Diff",
            Overlay::Consensus => "Consensus",
            Overlay::Tasks => "Tasks",
            Overlay::FileViewer => "File",
        }
    }
}

/// Mutually exclusive overlays. Opening one replaces whatever was visible.
#[derive(Debug, Clone, Default)]
pub struct OverlayStack {
    visible: Option<Overlay>,
}

impl OverlayStack {
    pub fn top(&self) -> Option<Overlay> {
        self.visible
    }

    pub fn is_open(&self, overlay: Overlay) -> bool {
        self.visible == Some(overlay)
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_none()
    }

    pub fn open(&mut self, overlay: Overlay) {
        self.visible = Some(overlay);
    }

    /// Open, or close when it's already the visible one.
    pub fn toggle(&mut self, overlay: Overlay) {
        if self.is_open(overlay) {
            self.visible = None;
        } else {
            self.visible = Some(overlay);
        }
    }

    pub fn close(&mut self) -> Option<Overlay> {
        self.visible.take()
    }

    /// Escape: close the highest-priority escapable overlay, if any.
    pub fn close_on_escape(&mut self) -> Option<Overlay> {
        let top = self.visible?;
        let hit = Overlay::ESCAPE_ORDER.iter().copied().find(|o| *o == top)?;
        self.visible = None;
        Some(hit)
    }
}

// ── Panel-nav sub-mode ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PanelNav {
    active: bool,
    seq: u64,
    deadline: Option<Instant>,
}

impl PanelNav {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Arm with a fresh sequence number. The caller schedules the expiry event
    /// carrying the returned sequence.
    pub fn arm(&mut self, now: Instant) -> u64 {
        self.seq += 1;
        self.active = true;
        self.deadline = Some(now + PANEL_NAV_WINDOW);
        self.seq
    }

    pub fn cancel(&mut self) {
        self.active = false;
        self.deadline = None;
    }

    /// Expiry event. Only honored when `seq` is still the current one.
    pub fn expire(&mut self, seq: u64) -> bool {
        if !self.active || seq != self.seq {
            return false;
        }
        self.cancel();
        true
    }
}

// ── Focus state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FocusState {
    focus: FocusTarget,
    pub visibility: PanelVisibility,
    pub nav: PanelNav,
}

impl FocusState {
    pub fn new(visibility: PanelVisibility) -> Self {
        Self {
            focus: FocusTarget::Input,
            visibility,
            nav: PanelNav::default(),
        }
    }

    pub fn current(&self) -> FocusTarget {
        self.focus
    }

    pub fn input_focused(&self) -> bool {
        self.focus == FocusTarget::Input
    }

    /// Focus a target. Hidden panels can't take focus.
    pub fn set_focus(&mut self, target: FocusTarget) -> bool {
        if !self.visibility.is_visible(target) {
            return false;
        }
        self.focus = target;
        true
    }

    pub fn focus_input(&mut self) {
        self.focus = FocusTarget::Input;
    }

    /// Show/hide a panel. Showing focuses it; hiding a focused panel hands
    /// focus back to input. Returns the new visibility.
    pub fn toggle_panel(&mut self, target: FocusTarget) -> bool {
        if target == FocusTarget::Input {
            return true;
        }
        let visible = !self.visibility.is_visible(target);
        self.visibility.set(target, visible);
        if visible {
            self.focus = target;
        } else if self.focus == target {
            self.focus = FocusTarget::Input;
        }
        visible
    }

    fn first_visible(&self, candidates: [FocusTarget; 2]) -> Option<FocusTarget> {
        candidates.into_iter().find(|t| self.visibility.is_visible(*t))
    }

    /// Arrow key while panel-nav is active.
    fn nav_arrow(&mut self, code: KeyCode) {
        let target = match code {
            KeyCode::Left => self.first_visible([FocusTarget::Explorer, FocusTarget::Tokens]),
            KeyCode::Right => self.first_visible([FocusTarget::Logs, FocusTarget::Stats]),
            KeyCode::Up | KeyCode::Down => self
                .focus
                .sibling()
                .filter(|s| self.visibility.is_visible(*s)),
            _ => None,
        };
        if let Some(t) = target {
            self.focus = t;
        }
    }
}

// ── Routing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalAction {
    Quit,
    Cancel,
    TogglePanel(FocusTarget),
    ToggleOverlay(Overlay),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The visible overlay keeps the key for its own navigation.
    Overlay(Overlay, KeyEvent),
    OverlayClosed(Overlay),
    /// Panel-nav consumed the key; focus may have moved.
    PanelNav,
    /// Panel-nav was armed; schedule its expiry with this sequence number.
    PanelNavArmed { seq: u64 },
    Global(GlobalAction),
    /// A side panel consumes a navigation key.
    Panel(FocusTarget, KeyEvent),
    /// Focus went back to the input line; the key is spent.
    FocusReturned,
    Input(KeyEvent),
}

fn ctrl(key: &KeyEvent, c: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char(c)
}

fn is_panel_nav_key(code: KeyCode) -> bool {
    matches!(
        code,
        KeyCode::Up
            | KeyCode::Down
            | KeyCode::Left
            | KeyCode::Right
            | KeyCode::PageUp
            | KeyCode::PageDown
            | KeyCode::Home
            | KeyCode::End
            | KeyCode::Enter
            | KeyCode::Backspace
    )
}

fn global_action(key: &KeyEvent) -> Option<GlobalAction> {
    if key.code == KeyCode::F(1) {
        return Some(GlobalAction::ToggleOverlay(Overlay::Shortcuts));
    }
    if !key.modifiers.contains(KeyModifiers::CONTROL) {
        return None;
    }
    let KeyCode::Char(c) = key.code else {
        return None;
    };
    Some(match c {
        'c' => GlobalAction::Quit,
        'x' => GlobalAction::Cancel,
        'e' => GlobalAction::TogglePanel(FocusTarget::Explorer),
        'l' => GlobalAction::TogglePanel(FocusTarget::Logs),
        'r' => GlobalAction::TogglePanel(FocusTarget::Stats),
        't' => GlobalAction::TogglePanel(FocusTarget::Tokens),
        'h' => GlobalAction::ToggleOverlay(Overlay::HistorySearch),
        'd' => GlobalAction::ToggleOverlay(Overlay::DiffView),
        'k' | 'q' => GlobalAction::ToggleOverlay(Overlay::Consensus),
        _ => return None,
    })
}

/// Decide who consumes `key`, applying focus and overlay-close side effects.
pub fn route_key(focus: &mut FocusState, overlays: &mut OverlayStack, key: KeyEvent, now: Instant) -> Route {
    // 1. overlays own everything
    if let Some(top) = overlays.top() {
        if key.code == KeyCode::Esc {
            if let Some(closed) = overlays.close_on_escape() {
                return Route::OverlayClosed(closed);
            }
        }
        if top == Overlay::FileViewer && key.code == KeyCode::Char('q') && key.modifiers.is_empty() {
            overlays.close();
            return Route::OverlayClosed(top);
        }
        return Route::Overlay(top, key);
    }

    // 2. panel-nav mode
    if focus.nav.is_active() {
        match key.code {
            KeyCode::Left | KeyCode::Right | KeyCode::Up | KeyCode::Down if key.modifiers.is_empty() => {
                focus.nav_arrow(key.code);
                focus.nav.cancel();
                return Route::PanelNav;
            }
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char(' ') => {
                focus.nav.cancel();
                return Route::PanelNav;
            }
            _ => focus.nav.cancel(),
        }
    }

    // 3. prefix
    if ctrl(&key, 'z') {
        let seq = focus.nav.arm(now);
        return Route::PanelNavArmed { seq };
    }

    // 4. global chords
    if let Some(action) = global_action(&key) {
        if let GlobalAction::TogglePanel(target) = action {
            focus.toggle_panel(target);
        }
        return Route::Global(action);
    }

    // 5. focused side panel
    let current = focus.current();
    if current != FocusTarget::Input {
        if !focus.visibility.is_visible(current) {
            focus.focus_input();
        } else if matches!(key.code, KeyCode::Tab | KeyCode::Esc) {
            focus.focus_input();
            return Route::FocusReturned;
        } else if is_panel_nav_key(key.code) {
            return Route::Panel(current, key);
        } else {
            // typing while a panel is focused goes to the input line
            focus.focus_input();
        }
    }

    // 6. input
    Route::Input(key)
}

/// Mouse click on a panel (or the center column for `Input`). Overlays swallow
/// clicks. Returns whether focus changed.
pub fn route_click(focus: &mut FocusState, overlays: &OverlayStack, target: FocusTarget) -> bool {
    if !overlays.is_empty() {
        return false;
    }
    focus.nav.cancel();
    let before = focus.current();
    focus.set_focus(target) && before != target
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl_key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn all_visible() -> FocusState {
        FocusState::new(PanelVisibility {
            explorer: true,
            logs: true,
            stats: true,
            tokens: true,
        })
    }

    #[test]
    fn test_overlay_swallows_navigation_even_with_panel_focus() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        f.set_focus(FocusTarget::Explorer);
        o.open(Overlay::Shortcuts);
        for code in [KeyCode::Up, KeyCode::Down] {
            let r = route_key(&mut f, &mut o, key(code), Instant::now());
            assert_eq!(r, Route::Overlay(Overlay::Shortcuts, key(code)));
        }
        // Ctrl+C is the overlay's too
        let r = route_key(&mut f, &mut o, ctrl_key('c'), Instant::now());
        assert!(matches!(r, Route::Overlay(Overlay::Shortcuts, _)));
        assert_eq!(f.current(), FocusTarget::Explorer);
    }

    #[test]
    fn test_escape_closes_overlay_but_not_file_viewer() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        o.open(Overlay::DiffView);
        assert_eq!(
            route_key(&mut f, &mut o, key(KeyCode::Esc), Instant::now()),
            Route::OverlayClosed(Overlay::DiffView)
        );
        assert!(o.is_empty());

        o.open(Overlay::FileViewer);
        let r = route_key(&mut f, &mut o, key(KeyCode::Esc), Instant::now());
        assert!(matches!(r, Route::Overlay(Overlay::FileViewer, _)));
        assert!(o.is_open(Overlay::FileViewer));
        assert_eq!(
            route_key(&mut f, &mut o, key(KeyCode::Char('q')), Instant::now()),
            Route::OverlayClosed(Overlay::FileViewer)
        );
    }

    #[test]
    fn test_opening_overlay_replaces_previous() {
        let mut o = OverlayStack::default();
        o.open(Overlay::Tasks);
        o.open(Overlay::Consensus);
        assert_eq!(o.top(), Some(Overlay::Consensus));
        o.toggle(Overlay::Consensus);
        assert!(o.is_empty());
    }

    #[test]
    fn test_panel_nav_left_focuses_explorer() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        let now = Instant::now();
        assert_eq!(route_key(&mut f, &mut o, ctrl_key('z'), now), Route::PanelNavArmed { seq: 1 });
        assert!(f.nav.is_active());
        assert_eq!(f.nav.deadline(), Some(now + PANEL_NAV_WINDOW));
        assert_eq!(route_key(&mut f, &mut o, key(KeyCode::Left), now), Route::PanelNav);
        assert_eq!(f.current(), FocusTarget::Explorer);
        assert!(!f.nav.is_active());
    }

    #[test]
    fn test_panel_nav_falls_back_and_toggles_side() {
        let mut f = FocusState::new(PanelVisibility {
            explorer: false,
            logs: true,
            stats: true,
            tokens: true,
        });
        let mut o = OverlayStack::default();
        let now = Instant::now();
        route_key(&mut f, &mut o, ctrl_key('z'), now);
        route_key(&mut f, &mut o, key(KeyCode::Left), now);
        assert_eq!(f.current(), FocusTarget::Tokens);

        route_key(&mut f, &mut o, ctrl_key('z'), now);
        route_key(&mut f, &mut o, key(KeyCode::Right), now);
        assert_eq!(f.current(), FocusTarget::Logs);

        route_key(&mut f, &mut o, ctrl_key('z'), now);
        route_key(&mut f, &mut o, key(KeyCode::Down), now);
        assert_eq!(f.current(), FocusTarget::Stats);
    }

    #[test]
    fn test_panel_nav_cancel_keys_keep_focus() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        for code in [KeyCode::Esc, KeyCode::Enter, KeyCode::Char(' ')] {
            route_key(&mut f, &mut o, ctrl_key('z'), Instant::now());
            assert_eq!(route_key(&mut f, &mut o, key(code), Instant::now()), Route::PanelNav);
            assert!(!f.nav.is_active());
            assert_eq!(f.current(), FocusTarget::Input);
        }
    }

    #[test]
    fn test_panel_nav_other_key_cancels_then_falls_through() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        route_key(&mut f, &mut o, ctrl_key('z'), Instant::now());
        let r = route_key(&mut f, &mut o, key(KeyCode::Char('a')), Instant::now());
        assert_eq!(r, Route::Input(key(KeyCode::Char('a'))));
        assert!(!f.nav.is_active());

        // a global chord during nav mode still fires
        route_key(&mut f, &mut o, ctrl_key('z'), Instant::now());
        let r = route_key(&mut f, &mut o, ctrl_key('x'), Instant::now());
        assert_eq!(r, Route::Global(GlobalAction::Cancel));
    }

    #[test]
    fn test_stale_expiry_is_ignored() {
        let mut nav = PanelNav::default();
        let first = nav.arm(Instant::now());
        let second = nav.arm(Instant::now());
        assert!(!nav.expire(first));
        assert!(nav.is_active());
        assert!(nav.expire(second));
        assert!(!nav.is_active());
        // expiring twice is a no-op
        assert!(!nav.expire(second));
    }

    #[test]
    fn test_focused_panel_takes_nav_keys_and_tab_returns() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        f.set_focus(FocusTarget::Logs);
        assert_eq!(
            route_key(&mut f, &mut o, key(KeyCode::Down), Instant::now()),
            Route::Panel(FocusTarget::Logs, key(KeyCode::Down))
        );
        assert_eq!(route_key(&mut f, &mut o, key(KeyCode::Tab), Instant::now()), Route::FocusReturned);
        assert!(f.input_focused());
    }

    #[test]
    fn test_typing_in_panel_moves_to_input() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        f.set_focus(FocusTarget::Stats);
        let r = route_key(&mut f, &mut o, key(KeyCode::Char('h')), Instant::now());
        assert_eq!(r, Route::Input(key(KeyCode::Char('h'))));
        assert!(f.input_focused());
    }

    #[test]
    fn test_toggle_panel_focus_rules() {
        let mut f = FocusState::new(PanelVisibility::default());
        let mut o = OverlayStack::default();
        let r = route_key(&mut f, &mut o, ctrl_key('e'), Instant::now());
        assert_eq!(r, Route::Global(GlobalAction::TogglePanel(FocusTarget::Explorer)));
        assert_eq!(f.current(), FocusTarget::Explorer);
        route_key(&mut f, &mut o, ctrl_key('e'), Instant::now());
        assert!(!f.visibility.explorer);
        assert!(f.input_focused());
    }

    #[test]
    fn test_hidden_panel_cannot_take_focus() {
        let mut f = FocusState::new(PanelVisibility::default());
        let o = OverlayStack::default();
        assert!(!route_click(&mut f, &o, FocusTarget::Explorer));
        assert!(route_click(&mut f, &o, FocusTarget::Logs));
        assert_eq!(f.current(), FocusTarget::Logs);
    }

    #[test]
    fn test_clicks_ignored_under_overlay() {
        let mut f = all_visible();
        let mut o = OverlayStack::default();
        o.open(Overlay::Tasks);
        assert!(!route_click(&mut f, &o, FocusTarget::Explorer));
        assert!(f.input_focused());
    }
}
