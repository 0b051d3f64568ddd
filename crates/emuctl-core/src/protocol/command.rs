//! Monitor command vocabulary and its line-oriented wire encoding.
//!
//! # Wire format
//!
//! Each command is one line of ASCII text terminated by `\n`.  There is no
//! other framing, no request identifier, and no acknowledgement: the monitor
//! may print a prompt, an error, or nothing at all.
//!
//! | Command                | Line                                   |
//! |------------------------|----------------------------------------|
//! | `SelectMachine("SoC")` | `mach set "SoC"`                       |
//! | `Pause` / `Start`      | `pause` / `start`                      |
//! | `Press(Down)`          | `sysbus.keyboard Press Down`           |
//! | `Release(Down)`        | `sysbus.keyboard Release Down`         |
//! | `RunFor(1 ms)`         | `emulation RunFor "0:0:0.001"`         |
//! | `InjectLine("a")`      | `sysbus.keyboard InjectLine "a"`       |
//! | `InjectString("a")`    | `sysbus.keyboard InjectString "a"`     |
//! | `InjectKey('+')`       | `sysbus.keyboard InjectKey 43`         |
//! | `TakeScreenshot`       | `sysbus.memlcd TakeScreenshot`         |
//! | `Quit`                 | `quit`                                 |

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::input::InjectionPayload;
use crate::keymap::KeyName;

/// Errors produced while encoding a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The text cannot be carried inside a quoted monitor argument.
    #[error("text {text:?} contains a quote or line break and cannot be sent")]
    UnencodableText { text: String },
    /// The character has no single-byte code for the keyboard queue.
    #[error("character {0:?} is outside the ASCII range accepted by InjectKey")]
    UnencodableChar(char),
}

/// A single command understood by the emulator monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorCommand {
    /// Selects the machine every following command addresses.
    SelectMachine(String),
    /// Halts the emulated clock.
    Pause,
    /// Restarts the emulated clock.
    Start,
    /// Key-down on the emulated keyboard.
    Press(KeyName),
    /// Key-up on the emulated keyboard.
    Release(KeyName),
    /// Steps the paused emulation forward by exactly this much emulated time.
    RunFor(Duration),
    /// Pushes text plus a carriage return into the keyboard queue.
    InjectLine(String),
    /// Pushes text without a terminator into the keyboard queue.
    InjectString(String),
    /// Pushes one character code into the keyboard queue.
    InjectKey(char),
    /// Asks the display peripheral for an inline PNG of the framebuffer.
    TakeScreenshot,
    /// Shuts the monitor (and the emulator) down.
    Quit,
}

impl MonitorCommand {
    /// Builds the bypass command for an injection payload.
    pub fn inject(payload: InjectionPayload) -> Self {
        match payload {
            InjectionPayload::Line(text) => MonitorCommand::InjectLine(text),
            InjectionPayload::Text(text) => MonitorCommand::InjectString(text),
            InjectionPayload::Char(c) => MonitorCommand::InjectKey(c),
        }
    }

    /// Encodes the command as one line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] when a text argument contains `"`, `\r` or
    /// `\n`, or an injected character is not ASCII.  Nothing should be written
    /// to the channel in that case.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let line = match self {
            MonitorCommand::SelectMachine(name) => format!("mach set {}", quoted(name)?),
            MonitorCommand::Pause => "pause".to_string(),
            MonitorCommand::Start => "start".to_string(),
            MonitorCommand::Press(key) => format!("sysbus.keyboard Press {key}"),
            MonitorCommand::Release(key) => format!("sysbus.keyboard Release {key}"),
            MonitorCommand::RunFor(d) => format!("emulation RunFor \"{}\"", format_emulated(*d)),
            MonitorCommand::InjectLine(text) => {
                format!("sysbus.keyboard InjectLine {}", quoted(text)?)
            }
            MonitorCommand::InjectString(text) => {
                format!("sysbus.keyboard InjectString {}", quoted(text)?)
            }
            MonitorCommand::InjectKey(c) => {
                if !c.is_ascii() {
                    return Err(ProtocolError::UnencodableChar(*c));
                }
                format!("sysbus.keyboard InjectKey {}", *c as u32)
            }
            MonitorCommand::TakeScreenshot => "sysbus.memlcd TakeScreenshot".to_string(),
            MonitorCommand::Quit => "quit".to_string(),
        };
        Ok(line)
    }

    /// Encodes the command including the terminating `\n`.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        let mut line = self.encode()?;
        line.push('\n');
        Ok(line)
    }

    /// `true` for commands that feed the guest keyboard.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            MonitorCommand::Press(_)
                | MonitorCommand::Release(_)
                | MonitorCommand::InjectLine(_)
                | MonitorCommand::InjectString(_)
                | MonitorCommand::InjectKey(_)
        )
    }
}

impl fmt::Display for MonitorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(line) => f.write_str(&line),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

fn quoted(text: &str) -> Result<String, ProtocolError> {
    if text.contains(['"', '\r', '\n']) {
        return Err(ProtocolError::UnencodableText {
            text: text.to_string(),
        });
    }
    Ok(format!("\"{text}\""))
}

/// Renders an emulated duration as the monitor's `H:M:S.mmm` time literal.
fn format_emulated(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}:{}:{}.{:03}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        d.subsec_millis()
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_machine_quotes_name() {
        let line = MonitorCommand::SelectMachine("SoC".into()).encode().unwrap();
        assert_eq!(line, "mach set \"SoC\"");
    }

    #[test]
    fn test_press_and_release_use_scancode_names() {
        assert_eq!(
            MonitorCommand::Press(KeyName::Down).encode().unwrap(),
            "sysbus.keyboard Press Down"
        );
        assert_eq!(
            MonitorCommand::Release(KeyName::Backspace).encode().unwrap(),
            "sysbus.keyboard Release BackSpace"
        );
    }

    #[test]
    fn test_run_for_one_millisecond() {
        let line = MonitorCommand::RunFor(Duration::from_millis(1)).encode().unwrap();
        assert_eq!(line, "emulation RunFor \"0:0:0.001\"");
    }

    #[test]
    fn test_run_for_spans_hours_minutes_seconds() {
        // Arrange: 1h 2m 3.045s
        let d = Duration::from_millis(3_723_045);

        // Act
        let line = MonitorCommand::RunFor(d).encode().unwrap();

        // Assert
        assert_eq!(line, "emulation RunFor \"1:2:3.045\"");
    }

    #[test]
    fn test_inject_line_with_empty_text_sends_bare_terminator_request() {
        let line = MonitorCommand::InjectLine(String::new()).encode().unwrap();
        assert_eq!(line, "sysbus.keyboard InjectLine \"\"");
    }

    #[test]
    fn test_inject_key_sends_character_code() {
        let line = MonitorCommand::InjectKey('+').encode().unwrap();
        assert_eq!(line, "sysbus.keyboard InjectKey 43");
    }

    #[test]
    fn test_inject_key_rejects_non_ascii() {
        let result = MonitorCommand::InjectKey('é').encode();
        assert_eq!(result, Err(ProtocolError::UnencodableChar('é')));
    }

    #[test]
    fn test_quote_in_text_is_rejected() {
        let result = MonitorCommand::InjectString("say \"hi\"".into()).encode();
        assert!(matches!(result, Err(ProtocolError::UnencodableText { .. })));
    }

    #[test]
    fn test_newline_in_text_is_rejected() {
        let result = MonitorCommand::InjectLine("a\nquit".into()).encode();
        assert!(matches!(result, Err(ProtocolError::UnencodableText { .. })));
    }

    #[test]
    fn test_to_line_appends_newline() {
        assert_eq!(MonitorCommand::Pause.to_line().unwrap(), "pause\n");
    }

    #[test]
    fn test_inject_maps_each_payload_kind() {
        assert_eq!(
            MonitorCommand::inject(InjectionPayload::Line("a".into())),
            MonitorCommand::InjectLine("a".into())
        );
        assert_eq!(
            MonitorCommand::inject(InjectionPayload::Text("2+3".into())),
            MonitorCommand::InjectString("2+3".into())
        );
        assert_eq!(
            MonitorCommand::inject(InjectionPayload::Char('m')),
            MonitorCommand::InjectKey('m')
        );
    }

    #[test]
    fn test_is_input_classification() {
        assert!(MonitorCommand::Press(KeyName::A).is_input());
        assert!(MonitorCommand::InjectKey('x').is_input());
        assert!(!MonitorCommand::Pause.is_input());
        assert!(!MonitorCommand::TakeScreenshot.is_input());
    }
}
