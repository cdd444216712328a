//! Line-oriented keyboard controls.

use player_engine::Command;

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Engine(Command),
    List,
    Help,
    Quit,
}

pub const HELP: &str = "p|space play/pause, r restart, n next, b previous, v <0-120> volume, \
s <index> select, l list, h help, q quit";

/// Parse one line of input. `Ok(None)` for an empty line.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.is_empty() && line.trim().is_empty() {
        return Ok(Some(Input::Engine(Command::PlayPause)));
    }
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();

    let input = match word.to_ascii_lowercase().as_str() {
        "p" | "space" => Input::Engine(Command::PlayPause),
        "r" => Input::Engine(Command::Restart),
        "n" => Input::Engine(Command::Next),
        "b" => Input::Engine(Command::Previous),
        "v" => {
            let raw = arg.ok_or("usage: v <0-120>")?;
            let volume: f64 = raw.parse().map_err(|_| format!("bad volume {raw:?}"))?;
            Input::Engine(Command::SetVolume(volume))
        }
        "s" => {
            let raw = arg.ok_or("usage: s <index>")?;
            let index: usize = raw.parse().map_err(|_| format!("bad index {raw:?}"))?;
            Input::Engine(Command::SelectTrack(index))
        }
        "l" => Input::List,
        "h" | "?" => Input::Help,
        "q" => Input::Quit,
        other => return Err(format!("unknown command {other:?} ({HELP})")),
    };
    Ok(Some(input))
}
