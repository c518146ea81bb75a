//! Interactive commands typed at the device-scan prompt.

use crate::session::SessionCommand;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Session(SessionCommand),
    Help,
    /// Known command, bad arguments. Carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

impl Input {
    /// Parse one line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let cmd = words.next()?.trim_start_matches('/').to_ascii_lowercase();
        let arg = words.next();

        let input = match cmd.as_str() {
            "pair" | "connect" => Self::Session(SessionCommand::Pair),
            "unlink" | "disconnect" => Self::Session(SessionCommand::Unlink),
            "remove" | "rm" => match arg {
                Some(id) => Self::Session(SessionCommand::Remove(id.to_string())),
                None => Self::Usage("remove <device-id>"),
            },
            "refresh" => Self::Session(SessionCommand::Refresh),
            "devices" | "status" | "show" => Self::Session(SessionCommand::Show),
            "reconnect" => Self::Session(SessionCommand::Reconnect),
            "user" => match arg {
                Some(id) => Self::Session(SessionCommand::SwitchUser(id.to_string())),
                None => Self::Usage("user <user-id>"),
            },
            "quit" | "exit" | "q" => Self::Session(SessionCommand::Quit),
            "help" | "?" => Self::Help,
            other => Self::Unknown(other.to_string()),
        };
        Some(input)
    }
}

pub const HELP: &str = "\
Commands
pair           Start pairing a new WhatsApp device
unlink         Drop the current link or cancel pairing
remove <id>    Delete a device from your account
refresh        Reload the device list now
devices        Show link status and devices
reconnect      Re-open the realtime connection
user <id>      Switch to another user id
help           This message
quit           Leave";
