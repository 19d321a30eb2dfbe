// Line-oriented command parsing for the headless client.

use lucky7_core::app::UserCommand;
use thiserror::Error;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Forwarded to the event loop.
    Command(UserCommand),
    /// Force the connection channel to reconnect.
    Reconnect,
    Markets,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("no preset {index}; presets are {presets:?}")]
    NoSuchPreset { index: String, presets: Vec<u64> },
}

pub const HELP: &str = "\
commands:
  select <market>   open the bet slip for a market (e.g. `select 7 UP`)
  bet <amount>      place the open selection with a stake
  preset <n>        place the open selection with quick stake n (1-based)
  cancel            close the bet slip
  markets           list markets and odds
  reconnect         drop and re-open the server connection
  help              show this text
  quit              exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, presets: &[u64]) -> Result<Option<Input>, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match word.to_ascii_lowercase().as_str() {
        "select" | "s" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument("select"));
            }
            // Market labels are upper case on the board.
            Input::Command(UserCommand::SelectMarket(rest.to_ascii_uppercase()))
        }
        "bet" | "b" => {
            if rest.is_empty() {
                return Err(InputError::MissingArgument("bet"));
            }
            Input::Command(UserCommand::PlaceBet(rest.to_string()))
        }
        "preset" | "p" => {
            let amount = rest
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| presets.get(i))
                .ok_or_else(|| InputError::NoSuchPreset {
                    index: rest.to_string(),
                    presets: presets.to_vec(),
                })?;
            Input::Command(UserCommand::PlaceBet(amount.to_string()))
        }
        "cancel" | "clear" => Input::Command(UserCommand::ClearSelection),
        "quit" | "exit" | "q" => Input::Command(UserCommand::Quit),
        "markets" | "m" => Input::Markets,
        "reconnect" => Input::Reconnect,
        "help" | "?" => Input::Help,
        other => return Err(InputError::Unknown(other.to_string())),
    };

    Ok(Some(input))
}
