//! Color palettes. A `Theme` is a plain value handed to every render call;
//! switching themes swaps the value, nothing is mutated in place.
use ratatui::style::{Color, Modifier, Style};

use crate::conversation::{LogLevel, Role};
use crate::status::{AgentStatus, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThemeKind {
    Dark,
    Light,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub kind: ThemeKind,
    pub bg: Color,
    pub panel_bg: Color,
    pub fg: Color,
    pub dim: Color,
    pub accent: Color,
    pub border: Color,
    pub border_focused: Color,
    pub user: Color,
    pub agent: Color,
    pub system: Color,
    pub ok: Color,
    pub warn: Color,
    pub error: Color,
    pub selection_bg: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            kind: ThemeKind::Dark,
            bg: Color::Black,
            panel_bg: Color::Rgb(10, 10, 18),
            fg: Color::White,
            dim: Color::DarkGray,
            accent: Color::Cyan,
            border: Color::Rgb(60, 55, 90),
            border_focused: Color::Cyan,
            user: Color::Rgb(140, 120, 220),
            agent: Color::Rgb(100, 180, 220),
            system: Color::Rgb(200, 160, 50),
            ok: Color::Green,
            warn: Color::Yellow,
            error: Color::Red,
            selection_bg: Color::Rgb(30, 30, 55),
        }
    }

    pub fn light() -> Self {
        Self {
            kind: ThemeKind::Light,
            bg: Color::Rgb(250, 250, 245),
            panel_bg: Color::Rgb(238, 238, 232),
            fg: Color::Rgb(30, 30, 30),
            dim: Color::Rgb(120, 120, 120),
            accent: Color::Rgb(0, 110, 160),
            border: Color::Rgb(190, 190, 200),
            border_focused: Color::Rgb(0, 110, 160),
            user: Color::Rgb(90, 60, 170),
            agent: Color::Rgb(20, 100, 150),
            system: Color::Rgb(150, 100, 0),
            ok: Color::Rgb(0, 130, 60),
            warn: Color::Rgb(170, 120, 0),
            error: Color::Rgb(190, 30, 30),
            selection_bg: Color::Rgb(215, 220, 240),
        }
    }

    pub fn by_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "light" => Self::light(),
            _ => Self::dark(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            ThemeKind::Dark => "dark",
            ThemeKind::Light => "light",
        }
    }

    /// The other palette.
    pub fn toggled(&self) -> Self {
        match self.kind {
            ThemeKind::Dark => Self::light(),
            ThemeKind::Light => Self::dark(),
        }
    }

    pub fn text(&self) -> Style {
        Style::default().fg(self.fg)
    }

    pub fn muted(&self) -> Style {
        Style::default().fg(self.dim)
    }

    pub fn title(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    pub fn border_style(&self, focused: bool) -> Style {
        if focused {
            Style::default().fg(self.border_focused).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(self.border)
        }
    }

    pub fn selected(&self) -> Style {
        Style::default().bg(self.selection_bg).add_modifier(Modifier::BOLD)
    }

    pub fn role(&self, role: Role) -> Color {
        match role {
            Role::User => self.user,
            Role::Agent => self.agent,
            Role::System => self.system,
        }
    }

    pub fn log_level(&self, level: LogLevel) -> Color {
        match level {
            LogLevel::Debug => self.dim,
            LogLevel::Info => self.fg,
            LogLevel::Warn => self.warn,
            LogLevel::Error => self.error,
        }
    }

    pub fn agent_status(&self, status: AgentStatus) -> Color {
        match status {
            AgentStatus::Disabled => self.dim,
            AgentStatus::Idle => self.fg,
            AgentStatus::Running => self.accent,
            AgentStatus::Done => self.ok,
            AgentStatus::Error => self.error,
        }
    }

    pub fn task_status(&self, status: TaskStatus) -> Color {
        match status {
            TaskStatus::Pending => self.dim,
            TaskStatus::Running => self.accent,
            TaskStatus::Completed => self.ok,
            TaskStatus::Failed => self.error,
            TaskStatus::Skipped => self.warn,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

/// Parse a configured agent color name; unknown names fall back to cyan.
pub fn parse_color(name: &str) -> Color {
    match name.trim().to_ascii_lowercase().as_str() {
        "red" => Color::Red,
        "green" => Color::Green,
        "yellow" => Color::Yellow,
        "blue" => Color::Blue,
        "magenta" | "purple" => Color::Magenta,
        "white" => Color::White,
        "gray" | "grey" => Color::Gray,
        hex if hex.starts_with('#') && hex.len() == 7 => {
            let c = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
            match (c(1), c(3), c(5)) {
                (Some(r), Some(g), Some(b)) => Color::Rgb(r, g, b),
                _ => Color::Cyan,
            }
        }
        _ => Color::Cyan,
    }
}
