//! Slash commands for the chat REPL

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Re-send the query behind an assistant message (the last one if no id)
    Retry(Option<String>),
    /// Load the next page of older history
    More,
    /// Start a new conversation
    New,
    /// Switch to another session
    Switch(String),
    /// List sessions
    Sessions,
    /// Search all messages
    Search(String),
    /// Jump to a hit of the last search (1-based)
    Open(usize),
    /// Rename the active session
    Rename(String),
    Help,
    Quit,
    /// Known command with missing or bad arguments
    Usage(&'static str),
    Unknown(String),
}

/// Parse a slash command; `None` for ordinary input
pub fn parse(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "retry" | "r" => ChatCommand::Retry((!args.is_empty()).then(|| args.to_string())),
        "more" | "m" => ChatCommand::More,
        "new" | "n" => ChatCommand::New,
        "switch" | "s" if args.is_empty() => ChatCommand::Usage("/switch <session-id>"),
        "switch" | "s" => ChatCommand::Switch(args.to_string()),
        "sessions" | "ls" => ChatCommand::Sessions,
        "search" | "f" if args.is_empty() => ChatCommand::Usage("/search <text>"),
        "search" | "f" => ChatCommand::Search(args.to_string()),
        "open" | "o" => match args.parse::<usize>() {
            Ok(n) if n > 0 => ChatCommand::Open(n),
            _ => ChatCommand::Usage("/open <hit-number>"),
        },
        "rename" if args.is_empty() => ChatCommand::Usage("/rename <name>"),
        "rename" => ChatCommand::Rename(args.to_string()),
        "help" | "h" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Unknown(command),
    })
}

pub fn help_message() -> &'static str {
    r#"Available commands:
  /retry, /r [id]      Re-send the query behind an assistant message (default: last reply)
  /more, /m            Load older history
  /new, /n             Start a new conversation
  /switch, /s <id>     Switch to another session
  /sessions, /ls       List sessions
  /search, /f <text>   Search all messages
  /open, /o <n>        Jump to hit n of the last search
  /rename <name>       Rename the current session
  /help, /h, /?        Show this help message
  /quit, /exit, /q     Exit parley"#
}
