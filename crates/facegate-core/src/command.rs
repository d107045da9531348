//! Operator commands: the whole control surface of the kiosk.
//!
//! One command per line:
//!
//! ```text
//! q | quit                          stop (or end the cool-down early)
//! c | cancel                        stop an enrollment / cool-down early
//! 1 | 2 | 3                         switch security profile
//! profile <level>                   same, by name
//! enroll <external_id> <name...>    enroll a new identity
//! ```

use crate::policy::{ProfileLevel, UnknownProfile};
use std::collections::VecDeque;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Quit,
    Cancel,
    SwitchProfile(ProfileLevel),
    Enroll {
        external_id: String,
        display_name: String,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("usage: enroll <external_id> <display name>")]
    EnrollUsage,
    #[error(transparent)]
    Profile(#[from] UnknownProfile),
    #[error("unknown command '{0}'")]
    Unknown(String),
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head.to_ascii_lowercase().as_str() {
            "" => Err(CommandParseError::Empty),
            "q" | "quit" => Ok(OperatorCommand::Quit),
            "c" | "cancel" => Ok(OperatorCommand::Cancel),
            "1" | "2" | "3" if rest.is_empty() => {
                Ok(OperatorCommand::SwitchProfile(head.parse()?))
            }
            "profile" => Ok(OperatorCommand::SwitchProfile(rest.parse()?)),
            "enroll" | "r" => {
                let (external_id, display_name) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(CommandParseError::EnrollUsage)?;
                let display_name = display_name.trim();
                if display_name.is_empty() {
                    return Err(CommandParseError::EnrollUsage);
                }
                Ok(OperatorCommand::Enroll {
                    external_id: external_id.to_string(),
                    display_name: display_name.to_string(),
                })
            }
            _ => Err(CommandParseError::Unknown(line.to_string())),
        }
    }
}

/// Non-blocking source of operator commands, polled once per loop cycle.
pub trait CommandSource {
    fn poll_command(&mut self) -> Option<OperatorCommand>;
}

impl CommandSource for VecDeque<OperatorCommand> {
    fn poll_command(&mut self) -> Option<OperatorCommand> {
        self.pop_front()
    }
}
