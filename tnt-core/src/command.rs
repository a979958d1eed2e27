//! Parsing and content generation for `:`-prefixed commands typed in
//! COMMAND mode. Dispatch text content only; the escape sequences and
//! borders around it are the renderer's job.

use crate::room::Room;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Help,
    Clear,
    Empty,
    Unknown(String),
}

/// Trims leading/trailing ASCII spaces and recognizes the fixed,
/// case-sensitive command set.
pub fn parse(input: &str) -> Command {
    let trimmed = input.trim_matches(' ');
    match trimmed {
        "" => Command::Empty,
        "list" | "users" | "who" => Command::List,
        "help" | "commands" => Command::Help,
        "clear" | "cls" => Command::Clear,
        other => Command::Unknown(other.to_string()),
    }
}

const FOOTER: &str = "\npress any key to continue";

/// Builds the overlay body for a non-empty command dispatch. Returns
/// `None` for [`Command::Empty`], which silently returns to NORMAL without
/// opening an overlay.
pub fn render_output(cmd: &Command, room: &Room, invoking: &Session) -> Option<String> {
    let invoking_name = invoking.display_name();
    let body = match cmd {
        Command::Empty => return None,
        Command::List => {
            let names = room.roster_names();
            let mut out = format!("Online ({}):\n", names.len());
            for name in names {
                if name == invoking_name {
                    out.push_str(&format!("  * {name} (you)\n"));
                } else {
                    out.push_str(&format!("    {name}\n"));
                }
            }
            out
        }
        Command::Help => {
            "Commands:\n  list, users, who   list online users\n  help, commands     this message\n  clear, cls         dismiss this overlay\n"
                .to_string()
        }
        Command::Clear => "Cleared.".to_string(),
        Command::Unknown(cmd) => format!("Unknown command: {cmd}"),
    };
    Some(format!("{body}{FOOTER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognized_commands() {
        assert_eq!(parse("  list  "), Command::List);
        assert_eq!(parse("who"), Command::List);
        assert_eq!(parse("cls"), Command::Clear);
        assert_eq!(parse(""), Command::Empty);
        assert_eq!(parse("   "), Command::Empty);
        assert_eq!(parse("xyz"), Command::Unknown("xyz".to_string()));
    }

    #[test]
    fn is_case_sensitive() {
        assert_eq!(parse("List"), Command::Unknown("List".to_string()));
    }
}
