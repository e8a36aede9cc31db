//! Line commands typed on the terminal running `autopoint`.
//!
//! ```text
//! add                 toggle Add mode (left clicks place markers)
//! remove              toggle Remove mode (left click on a marker deletes it)
//! run                 start / stop playback (same as the hotkey)
//! clear               delete every marker
//! order <from> <to>   give the marker at order <from> the order <to>
//! duration <order> <ms>
//! action <order> <button> <single|double>
//! list                print the markers in playback order
//! save <path> / load <path>
//! help / quit
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use autopoint_core::{ClickKind, MouseButton};
use thiserror::Error;

use super::modes::{InteractionMode, UiCommand};

pub const HELP: &str = "\
commands:
  add | remove          toggle Add / Remove mode
  run                   start or stop playback
  clear                 delete every marker
  order <from> <to>     change a marker's playback order
  duration <order> <ms> change a marker's dwell time
  action <order> <button> <single|double>
  list                  show markers in playback order
  save <path>           write markers to a point file
  load <path>           replace markers from a point file
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Ui(UiCommand),
    Reorder { from: u32, to: u32 },
    SetDuration { order: u32, duration_ms: u32 },
    SetAction {
        order: u32,
        button: MouseButton,
        click_kind: ClickKind,
    },
    List,
    Save(PathBuf),
    Load(PathBuf),
    Help,
    Quit,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}; type `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = ConsoleParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));
        if word.is_empty() {
            return Err(ConsoleParseError::Empty);
        }
        let args: Vec<&str> = rest.split_whitespace().collect();

        match word.to_ascii_lowercase().as_str() {
            "add" => Ok(ConsoleCommand::Ui(UiCommand::EnterMode(InteractionMode::Add))),
            "remove" => Ok(ConsoleCommand::Ui(UiCommand::EnterMode(InteractionMode::Remove))),
            "run" | "start" | "stop" => Ok(ConsoleCommand::Ui(UiCommand::TogglePlayback)),
            "clear" => Ok(ConsoleCommand::Ui(UiCommand::Clear)),
            "order" => match args.as_slice() {
                [from, to] => Ok(ConsoleCommand::Reorder {
                    from: number(from, "order <from> <to>")?,
                    to: number(to, "order <from> <to>")?,
                }),
                _ => Err(ConsoleParseError::Usage("order <from> <to>")),
            },
            "duration" => match args.as_slice() {
                [order, ms] => Ok(ConsoleCommand::SetDuration {
                    order: number(order, "duration <order> <ms>")?,
                    duration_ms: number(ms, "duration <order> <ms>")?,
                }),
                _ => Err(ConsoleParseError::Usage("duration <order> <ms>")),
            },
            "action" => {
                const USAGE: &str = "action <order> <left|right|middle|default> <single|double>";
                match args.as_slice() {
                    [order, button, kind] => Ok(ConsoleCommand::SetAction {
                        order: number(order, USAGE)?,
                        button: MouseButton::from_name(button)
                            .ok_or(ConsoleParseError::Usage(USAGE))?,
                        click_kind: ClickKind::from_name(kind)
                            .ok_or(ConsoleParseError::Usage(USAGE))?,
                    }),
                    _ => Err(ConsoleParseError::Usage(USAGE)),
                }
            }
            "list" | "ls" => Ok(ConsoleCommand::List),
            // Paths may contain spaces, so take the rest of the line verbatim.
            "save" if !rest.is_empty() => Ok(ConsoleCommand::Save(PathBuf::from(rest))),
            "save" => Err(ConsoleParseError::Usage("save <path>")),
            "load" if !rest.is_empty() => Ok(ConsoleCommand::Load(PathBuf::from(rest))),
            "load" => Err(ConsoleParseError::Usage("load <path>")),
            "help" | "?" => Ok(ConsoleCommand::Help),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            _ => Err(ConsoleParseError::Unknown(word.to_string())),
        }
    }
}

fn number(text: &str, usage: &'static str) -> Result<u32, ConsoleParseError> {
    text.parse().map_err(|_| ConsoleParseError::Usage(usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_words_map_to_ui_commands() {
        assert_eq!(
            "add".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Ui(UiCommand::EnterMode(InteractionMode::Add)))
        );
        assert_eq!(
            " Remove ".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Ui(UiCommand::EnterMode(InteractionMode::Remove)))
        );
        assert_eq!("run".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Ui(UiCommand::TogglePlayback)));
        assert_eq!("clear".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Ui(UiCommand::Clear)));
    }

    #[test]
    fn test_reorder_parses_two_numbers() {
        assert_eq!(
            "order 3 0".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Reorder { from: 3, to: 0 })
        );
        assert_eq!(
            "order 3".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::Usage("order <from> <to>"))
        );
    }

    #[test]
    fn test_action_parses_button_and_kind() {
        assert_eq!(
            "action 1 right double".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::SetAction {
                order: 1,
                button: MouseButton::Right,
                click_kind: ClickKind::Double,
            })
        );
        assert!("action 1 thumb single".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn test_duration_rejects_non_numeric() {
        assert!(matches!(
            "duration 0 fast".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::Usage(_))
        ));
    }

    #[test]
    fn test_save_keeps_path_with_spaces() {
        assert_eq!(
            "save My Points/set 1.json".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Save(PathBuf::from("My Points/set 1.json")))
        );
        assert_eq!(
            "load".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::Usage("load <path>"))
        );
    }

    #[test]
    fn test_empty_and_unknown_lines() {
        assert_eq!("   ".parse::<ConsoleCommand>(), Err(ConsoleParseError::Empty));
        assert_eq!(
            "jump".parse::<ConsoleCommand>(),
            Err(ConsoleParseError::Unknown("jump".to_string()))
        );
    }
}
