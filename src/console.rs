//! Line commands read from stdin.

use crate::daemon::Handles;
use protocol_ganymede::{AtmosphericMeasurements, AuthClient};
use std::io::{self, BufRead, Write};

const HELP: &str = "\
commands:
  register          authorize this device with a user account
  poll              poll the device config now
  refresh           refresh the access token now
  push <t> <h>      report a reading (degrees C, %RH)
  help              show this text
  quit              stop the daemon";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Register,
    Poll,
    Refresh,
    Push(AtmosphericMeasurements),
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name {
        "register" => Command::Register,
        "poll" => Command::Poll,
        "refresh" => Command::Refresh,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "push" => {
            let mut number = |what: &str| -> Result<f32, String> {
                let word = words
                    .next()
                    .ok_or_else(|| format!("push: missing {what}"))?;
                word.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("push: invalid {what} {word:?}"))
            };
            let temperature = number("temperature")?;
            let humidity = number("humidity")?;
            Command::Push(AtmosphericMeasurements {
                temperature,
                humidity,
            })
        }
        other => return Err(format!("unknown command {other:?}, try help")),
    };

    if words.next().is_some() {
        return Err(format!("{name}: too many arguments"));
    }
    Ok(Some(command))
}

pub struct Console {
    handles: Handles,
    auth: AuthClient,
}

impl Console {
    pub fn new(handles: Handles, auth: AuthClient) -> Self {
        Self { handles, auth }
    }

    /// Serve commands until `quit` or end of input. Only `quit` stops the
    /// daemon.
    pub fn run<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            match parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => {
                    writeln!(output, "stopping")?;
                    self.handles.stop_all();
                    return Ok(());
                }
                Ok(Some(command)) => self.execute(command, &mut output)?,
                Err(message) => writeln!(output, "{message}")?,
            }
            output.flush()?;
        }
        tracing::debug!("console input closed");
        Ok(())
    }

    fn execute<W: Write>(&self, command: Command, output: &mut W) -> io::Result<()> {
        match command {
            Command::Register => {
                let host = self.auth.config().endpoint.authority.clone();
                let result = self.auth.register(|code| {
                    let _ = writeln!(
                        output,
                        "visit {} and enter code {}",
                        code.activation_url(&host),
                        code.user_code
                    );
                    let _ = output.flush();
                });
                match result {
                    Ok(()) => {
                        writeln!(output, "registered")?;
                        self.handles.wake_poll();
                    }
                    Err(e) => writeln!(output, "registration failed: {e}")?,
                }
            }
            Command::Poll => self.handles.wake_poll(),
            Command::Refresh => self.handles.wake_refresh(),
            Command::Push(reading) => {
                if !self.handles.push(reading) {
                    writeln!(output, "measurements are disabled")?;
                }
            }
            Command::Help => writeln!(output, "{HELP}")?,
            Command::Quit => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("register"), Ok(Some(Command::Register)));
        assert_eq!(parse("  poll  "), Ok(Some(Command::Poll)));
        assert_eq!(parse("refresh"), Ok(Some(Command::Refresh)));
        assert_eq!(parse("help"), Ok(Some(Command::Help)));
        assert_eq!(parse("quit"), Ok(Some(Command::Quit)));
        assert_eq!(parse(""), Ok(None));
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_push() {
        assert_eq!(
            parse("push 21.5 40"),
            Ok(Some(Command::Push(AtmosphericMeasurements {
                temperature: 21.5,
                humidity: 40.0,
            })))
        );
        assert_eq!(
            parse("push -3 99.5"),
            Ok(Some(Command::Push(AtmosphericMeasurements {
                temperature: -3.0,
                humidity: 99.5,
            })))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("push 21.5").is_err());
        assert!(parse("push warm 40").is_err());
        assert!(parse("push NaN 40").is_err());
        assert!(parse("push 1 2 3").is_err());
        assert!(parse("poll now").is_err());
        assert!(parse("memory").is_err());
    }
}
