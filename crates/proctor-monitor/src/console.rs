//! Line-oriented command front-end.

use proctor_core::models::{AlertId, CaptureMode, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Mode(CaptureMode),
    Source(SourceKind, SourceAction),
    /// Simulate the OS ending a source.
    Revoke(SourceKind),
    Start,
    Stop,
    Clear,
    Export(AlertId),
    Interval(u64),
    Status,
    Alerts,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  mode <camera|screen|both>     switch capture mode
  camera on|off|toggle          control the webcam
  screen on|off|toggle          control the screen share
  revoke <camera|screen>        end a source as if from outside
  start | stop                  start or stop monitoring
  interval <1-10>               seconds between samples
  clear                         clear all alerts
  export <id>                   write an alert image to the export directory
  status | alerts               show session state / recent alerts
  quit                          exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    let command = match (head.to_ascii_lowercase().as_str(), arg) {
        ("mode", Some(mode)) => ConsoleCommand::Mode(mode.parse()?),
        ("mode", None) => return Err("usage: mode <camera|screen|both>".to_string()),
        (name @ ("camera" | "webcam" | "screen"), action) => {
            let kind: SourceKind = name.parse()?;
            ConsoleCommand::Source(kind, parse_action(action)?)
        }
        ("revoke", Some(kind)) => ConsoleCommand::Revoke(kind.parse()?),
        ("revoke", None) => return Err("usage: revoke <camera|screen>".to_string()),
        ("start", None) => ConsoleCommand::Start,
        ("stop", None) => ConsoleCommand::Stop,
        ("clear", None) => ConsoleCommand::Clear,
        ("export", Some(id)) => ConsoleCommand::Export(
            id.parse()
                .map_err(|_| format!("invalid alert id '{id}'"))?,
        ),
        ("export", None) => return Err("usage: export <id>".to_string()),
        ("interval", Some(secs)) => ConsoleCommand::Interval(
            secs.parse()
                .map_err(|_| format!("invalid interval '{secs}'"))?,
        ),
        ("interval", None) => return Err("usage: interval <1-10>".to_string()),
        ("status", None) => ConsoleCommand::Status,
        ("alerts", None) => ConsoleCommand::Alerts,
        ("help" | "?", None) => ConsoleCommand::Help,
        ("quit" | "exit" | "q", None) => ConsoleCommand::Quit,
        (name, Some(extra))
            if matches!(
                name,
                "start" | "stop" | "clear" | "status" | "alerts" | "help" | "?" | "quit" | "exit" | "q"
            ) =>
        {
            return Err(format!("unexpected argument '{extra}'"));
        }
        (other, _) => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}

fn parse_action(action: Option<&str>) -> Result<SourceAction, String> {
    match action.map(str::to_ascii_lowercase).as_deref() {
        None | Some("toggle") => Ok(SourceAction::Toggle),
        Some("on" | "start") => Ok(SourceAction::On),
        Some("off" | "stop") => Ok(SourceAction::Off),
        Some(other) => Err(format!("unknown action '{other}' (use on, off or toggle)")),
    }
}
