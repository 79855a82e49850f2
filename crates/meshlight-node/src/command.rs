//! Console commands read line by line from stdin.

use std::str::FromStr;

/// One console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Empty line or `press`: the button
    Trigger,
    /// `get`: ask every node for its state
    Get,
    /// `attention on|off`
    Attention(bool),
    /// `provision`
    Provision,
    /// `status`: print this node's state as JSON
    Status,
    /// `quit` / `exit`
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let cmd = match words.next() {
            None | Some("press") | Some("toggle") => Command::Trigger,
            Some("get") => Command::Get,
            Some("provision") => Command::Provision,
            Some("status") => Command::Status,
            Some("quit") | Some("exit") => Command::Quit,
            Some("attention") => match words.next() {
                Some("on") => Command::Attention(true),
                Some("off") => Command::Attention(false),
                other => return Err(format!("attention takes on|off, got {:?}", other)),
            },
            Some(other) => return Err(format!("unknown command: {}", other)),
        };
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("".parse(), Ok(Command::Trigger));
        assert_eq!("  press ".parse(), Ok(Command::Trigger));
        assert_eq!("get".parse(), Ok(Command::Get));
        assert_eq!("attention on".parse(), Ok(Command::Attention(true)));
        assert_eq!("attention off".parse(), Ok(Command::Attention(false)));
        assert_eq!("exit".parse(), Ok(Command::Quit));
        assert!("attention".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }
}
