//! Line commands read from stdin by `zapd`.

use thiserror::Error;

use zap_proto::protocol::{Command, Direction};

/// Volume change for the `+` / `-` shortcuts.
pub const VOLUME_STEP: i32 = 5;

pub const HELP: &str = "\
commands:
  load [url]        fetch the configured playlist, or url
  cat <name>        show one category (\"All\" for everything)
  search [text]     filter by name, empty clears
  play <n>          tune to entry n of the current view
  next | prev       zap (also n / p)
  retry             reconnect the current channel
  vol <delta>       change volume, or + / -
  mute | pause      toggle
  state             print session and view
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleInput {
    Command(Command),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };

    let cmd = match word {
        "help" | "?" => return Ok(Some(ConsoleInput::Help)),
        "quit" | "q" | "exit" => return Ok(Some(ConsoleInput::Quit)),
        "load" => Command::LoadPlaylist {
            url: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "cat" => {
            if rest.is_empty() {
                return Err(ConsoleError::Usage("cat <name>"));
            }
            Command::SelectCategory {
                name: rest.to_string(),
            }
        }
        "search" | "/" => Command::Search {
            term: rest.to_string(),
        },
        "play" => {
            let position = rest
                .parse()
                .map_err(|_| ConsoleError::Usage("play <n>"))?;
            Command::Select { position }
        }
        "next" | "n" => Command::Zap {
            direction: Direction::Next,
        },
        "prev" | "p" => Command::Zap {
            direction: Direction::Prev,
        },
        "retry" => Command::Retry,
        "+" => Command::Volume { delta: VOLUME_STEP },
        "-" => Command::Volume {
            delta: -VOLUME_STEP,
        },
        "vol" => {
            let delta = rest
                .parse()
                .map_err(|_| ConsoleError::Usage("vol <delta>, e.g. vol -10"))?;
            Command::Volume { delta }
        }
        "mute" => Command::ToggleMute,
        "pause" => Command::TogglePause,
        "state" => Command::GetState,
        other => return Err(ConsoleError::Unknown(other.to_string())),
    };
    Ok(Some(ConsoleInput::Command(cmd)))
}
