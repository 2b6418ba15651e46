//! Slash commands, parsed into a typed `Command` before the controller sees them.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Empty task means "plan the active workflow".
    Plan(String),
    Run(String),
    Analyze(String),
    Execute,
    Replan(String),
    UsePlan(String),
    Resume,
    Status,
    Workflows,
    Load(String),
    New,
    Delete(String),
    Archive,
    Purge,
    Cancel,
    Model(Option<String>),
    Agent(Option<String>),
    Theme,
    Clear,
    Quit,
    Copy,
    CopyAll,
    Logs,
    ClearLogs,
    CopyLogs,
    Explorer,
}

#[derive(Debug, Clone, Copy)]
pub struct PaletteCommand {
    pub key: &'static str,
    pub label: &'static str,
}

pub const PALETTE: &[PaletteCommand] = &[
    PaletteCommand { key: "/help",      label: "Show commands and key bindings" },
    PaletteCommand { key: "/plan",      label: "Plan a task with the quorum (/plan <task>)" },
    PaletteCommand { key: "/run",       label: "Analyze, plan and execute a task" },
    PaletteCommand { key: "/analyze",   label: "Ask every agent for an analysis and score consensus" },
    PaletteCommand { key: "/execute",   label: "Execute the active plan" },
    PaletteCommand { key: "/replan",    label: "Revise the active plan with feedback" },
    PaletteCommand { key: "/useplan",   label: "Execute a stored plan (/useplan <id>)" },
    PaletteCommand { key: "/resume",    label: "Continue the active workflow" },
    PaletteCommand { key: "/status",    label: "Show workflow and agent status" },
    PaletteCommand { key: "/workflows", label: "List stored workflows" },
    PaletteCommand { key: "/load",      label: "Load a stored workflow (/load <id>)" },
    PaletteCommand { key: "/new",       label: "Start fresh: clear conversation and workflow" },
    PaletteCommand { key: "/delete",    label: "Delete a stored workflow (/delete <id>)" },
    PaletteCommand { key: "/archive",   label: "Archive every inactive workflow" },
    PaletteCommand { key: "/purge",     label: "Delete every stored workflow" },
    PaletteCommand { key: "/cancel",    label: "Cancel the running request or workflow" },
    PaletteCommand { key: "/model",     label: "Show or set the chat model" },
    PaletteCommand { key: "/agent",     label: "Show or set the chat agent" },
    PaletteCommand { key: "/theme",     label: "Switch between dark and light themes" },
    PaletteCommand { key: "/clear",     label: "Clear the conversation" },
    PaletteCommand { key: "/quit",      label: "Quit" },
    PaletteCommand { key: "/copy",      label: "Copy the last agent reply" },
    PaletteCommand { key: "/copyall",   label: "Copy the whole conversation" },
    PaletteCommand { key: "/logs",      label: "Toggle the logs panel" },
    PaletteCommand { key: "/clearlogs", label: "Clear the log buffer" },
    PaletteCommand { key: "/copylogs",  label: "Copy the log buffer" },
    PaletteCommand { key: "/explorer",  label: "Toggle the file explorer" },
];

/// `None` when `input` isn't a slash command at all (plain chat text).
pub fn parse(input: &str) -> Option<Result<Command, String>> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }
    let (head, arg) = match input.split_once(char::is_whitespace) {
        Some((h, a)) => (h, a.trim()),
        None => (input, ""),
    };
    let opt_arg = || (!arg.is_empty()).then(|| arg.to_string());
    let required = |usage: &str| {
        if arg.is_empty() {
            Err(format!("usage: {usage}"))
        } else {
            Ok(arg.to_string())
        }
    };

    let cmd = match head {
        "/help" | "/h" => Ok(Command::Help),
        "/plan" => Ok(Command::Plan(arg.to_string())),
        "/run" => required("/run <task>").map(Command::Run),
        "/analyze" => required("/analyze <task>").map(Command::Analyze),
        "/execute" => Ok(Command::Execute),
        "/replan" => required("/replan <feedback>").map(Command::Replan),
        "/useplan" => required("/useplan <workflow id>").map(Command::UsePlan),
        "/resume" => Ok(Command::Resume),
        "/status" => Ok(Command::Status),
        "/workflows" => Ok(Command::Workflows),
        "/load" => required("/load <workflow id>").map(Command::Load),
        "/new" => Ok(Command::New),
        "/delete" => required("/delete <workflow id>").map(Command::Delete),
        "/archive" => Ok(Command::Archive),
        "/purge" => Ok(Command::Purge),
        "/cancel" => Ok(Command::Cancel),
        "/model" => Ok(Command::Model(opt_arg())),
        "/agent" => Ok(Command::Agent(opt_arg())),
        "/theme" => Ok(Command::Theme),
        "/clear" => Ok(Command::Clear),
        "/quit" | "/exit" | "/q" => Ok(Command::Quit),
        "/copy" => Ok(Command::Copy),
        "/copyall" => Ok(Command::CopyAll),
        "/logs" => Ok(Command::Logs),
        "/clearlogs" => Ok(Command::ClearLogs),
        "/copylogs" => Ok(Command::CopyLogs),
        "/explorer" => Ok(Command::Explorer),
        other => Err(format!("unknown command {other} (try /help)")),
    };
    Some(cmd)
}

/// Palette entries whose key starts with `prefix`.
pub fn matching(prefix: &str) -> Vec<PaletteCommand> {
    let q = prefix.to_lowercase();
    PALETTE.iter().copied().filter(|c| c.key.starts_with(q.as_str())).collect()
}

/// Tab completion: the single command `prefix` can only be, if any.
/// An exact match completes to itself even when longer commands share it.
pub fn complete(prefix: &str) -> Option<&'static str> {
    if !prefix.starts_with('/') || prefix.contains(char::is_whitespace) {
        return None;
    }
    let hits = matching(prefix);
    if let Some(exact) = hits.iter().find(|c| c.key == prefix) {
        return Some(exact.key);
    }
    match hits.as_slice() {
        [only] => Some(only.key),
        _ => None,
    }
}

pub fn help_text() -> String {
    let width = PALETTE.iter().map(|c| c.key.len()).max().unwrap_or(0);
    let mut out = String::from("Commands:\n");
    for c in PALETTE {
        out.push_str(&format!("  {:<width$}  {}\n", c.key, c.label));
    }
    out.push_str(
        "Keys: Ctrl+Z then ←→↑↓ move between panels · Ctrl+E/L/R/T toggle panels · \
         Ctrl+X cancel · Ctrl+H history · Ctrl+D diff · Ctrl+K consensus · F1 or ? shortcuts",
    );
    out
}
