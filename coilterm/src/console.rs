//! Interactive operator console.
//!
//! Prompts for input, drives a [`CoilSession`] and renders its results.
//! All text lives here; the session only returns values and typed errors.

use std::fmt::Display;
use std::io::{self, Write};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::address::{CoilAddress, CoilValue, MAX_READ_COUNT};
use crate::session::{CoilSession, SessionError, WriteOutcome};
use crate::transport::CoilTransport;

/// Input that ends the write loop.
pub const WRITE_EXIT: i64 = -1;

/// Pause after leaving the write loop before the menu is shown again.
pub const DEFAULT_MENU_PAUSE: Duration = Duration::from_millis(200);

const MENU: &str = "\n=== MODBUS MENU ===\n1. Read coils\n2. Write a coil\n3. Exit";

/// Main menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    ReadCoils,
    WriteCoil,
    Exit,
}

impl TryFrom<i64> for MenuChoice {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MenuChoice::ReadCoils),
            2 => Ok(MenuChoice::WriteCoil),
            3 => Ok(MenuChoice::Exit),
            other => Err(other),
        }
    }
}

/// Whether the console keeps going after a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Input ended.
    Quit,
}

/// Text console over any line source and pair of output streams.
pub struct Console<R, O, E> {
    input: R,
    out: O,
    err: E,
    menu_pause: Duration,
}

impl<R, O, E> Console<R, O, E>
where
    R: AsyncBufRead + Unpin,
    O: Write,
    E: Write,
{
    pub fn new(input: R, out: O, err: E) -> Self {
        Self {
            input,
            out,
            err,
            menu_pause: DEFAULT_MENU_PAUSE,
        }
    }

    pub fn with_menu_pause(mut self, menu_pause: Duration) -> Self {
        self.menu_pause = menu_pause;
        self
    }

    /// Give back the input and output streams.
    pub fn into_parts(self) -> (R, O, E) {
        (self.input, self.out, self.err)
    }

    /// Print an informational line.
    pub fn info(&mut self, message: impl Display) -> io::Result<()> {
        writeln!(self.out, "{}", message)?;
        self.out.flush()
    }

    /// Print an error line.
    pub fn error(&mut self, message: impl Display) -> io::Result<()> {
        writeln!(self.err, "error: {}", message)?;
        self.err.flush()
    }

    /// Next non-empty trimmed line, `None` at end of input.
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    fn show_prompt(&mut self, prompt: &str) -> io::Result<()> {
        write!(self.out, "{}", prompt)?;
        self.out.flush()
    }

    /// Prompt until an integer is entered.
    pub async fn prompt_int(&mut self, prompt: &str) -> io::Result<Option<i64>> {
        self.show_prompt(prompt)?;
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            match line.parse::<i64>() {
                Ok(value) => return Ok(Some(value)),
                Err(_) => self.show_prompt(&format!("Invalid input. {}", prompt))?,
            }
        }
    }

    /// Prompt for a single word.
    pub async fn prompt_string(&mut self, prompt: &str) -> io::Result<Option<String>> {
        self.show_prompt(prompt)?;
        Ok(self
            .next_line()
            .await?
            .and_then(|line| line.split_whitespace().next().map(str::to_string)))
    }

    /// Fill in whichever of host and port is missing.
    pub async fn prompt_endpoint(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
    ) -> io::Result<Option<(String, u16)>> {
        let host = match host {
            Some(host) => host,
            None => match self.prompt_string("Enter device IP (e.g. 127.0.0.1): ").await? {
                Some(host) => host,
                None => return Ok(None),
            },
        };

        if let Some(port) = port {
            return Ok(Some((host, port)));
        }

        loop {
            let Some(port) = self.prompt_int("Enter TCP port (e.g. 502): ").await? else {
                return Ok(None);
            };
            match u16::try_from(port) {
                Ok(port) if port != 0 => return Ok(Some((host, port))),
                _ => self.error(format!("Invalid port {}: use 1-65535", port))?,
            }
        }
    }

    /// Run the menu until the operator exits or input ends.
    pub async fn run<T: CoilTransport>(&mut self, session: &mut CoilSession<T>) -> io::Result<()> {
        loop {
            self.info(MENU)?;
            let Some(choice) = self.prompt_int("Choose an option: ").await? else {
                debug!("Input ended at menu");
                return Ok(());
            };

            let flow = match MenuChoice::try_from(choice) {
                Ok(MenuChoice::ReadCoils) => self.read_coils(session).await?,
                Ok(MenuChoice::WriteCoil) => {
                    let flow = self.write_coil(session).await?;
                    if !self.menu_pause.is_zero() {
                        tokio::time::sleep(self.menu_pause).await;
                    }
                    flow
                }
                Ok(MenuChoice::Exit) => {
                    self.info("Closing the program...")?;
                    return Ok(());
                }
                Err(_) => {
                    self.error("Invalid option!")?;
                    Flow::Continue
                }
            };

            if flow == Flow::Quit {
                debug!("Input ended");
                return Ok(());
            }
        }
    }

    async fn read_coils<T: CoilTransport>(
        &mut self,
        session: &mut CoilSession<T>,
    ) -> io::Result<Flow> {
        let Some(start) = self
            .prompt_int("Enter the start coil address (1-9999): ")
            .await?
        else {
            return Ok(Flow::Quit);
        };
        let count_prompt = format!("Enter how many coils to read (1-{}): ", MAX_READ_COUNT);
        let Some(count) = self.prompt_int(&count_prompt).await? else {
            return Ok(Flow::Quit);
        };

        match session.read_coils(start, count).await {
            Ok(values) => self.info(render_read(start, &values))?,
            Err(SessionError::Transport(e)) => self.error(format!("Coil read failed: {}", e))?,
            Err(e) => self.error(e)?,
        }

        Ok(Flow::Continue)
    }

    async fn write_coil<T: CoilTransport>(
        &mut self,
        session: &mut CoilSession<T>,
    ) -> io::Result<Flow> {
        let Some(address) = self.prompt_int("Enter the coil address (1-9999): ").await? else {
            return Ok(Flow::Quit);
        };
        if let Err(e) = CoilAddress::new(address) {
            self.error(e)?;
            return Ok(Flow::Continue);
        }

        loop {
            let Some(value) = self.prompt_write_value().await? else {
                return Ok(Flow::Quit);
            };
            let Some(value) = value else {
                self.info("Leaving coil write...")?;
                return Ok(Flow::Continue);
            };

            match session.write_coil(address, value).await {
                Ok(outcome) => self.info(render_write(&outcome))?,
                Err(e) => self.error(format!("Coil write failed: {}", e))?,
            }
        }
    }

    /// `Some(None)` for the exit sentinel; other invalid values re-prompt.
    async fn prompt_write_value(&mut self) -> io::Result<Option<Option<CoilValue>>> {
        loop {
            let Some(value) = self
                .prompt_int("Enter value (0 or 1) or -1 to exit: ")
                .await?
            else {
                return Ok(None);
            };
            if value == WRITE_EXIT {
                return Ok(Some(None));
            }
            if let Ok(value) = CoilValue::try_from(value) {
                return Ok(Some(Some(value)));
            }
        }
    }
}

/// One `Coil <address>: <value>` line per coil read from `start`.
pub fn render_read(start: i64, values: &[CoilValue]) -> String {
    values
        .iter()
        .enumerate()
        .map(|(offset, value)| format!("Coil {}: {}", start + offset as i64, value))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The write acknowledgement and, when available, the confirmed value.
pub fn render_write(outcome: &WriteOutcome) -> String {
    let mut text = format!("Coil {} set to: {}", outcome.address, outcome.written);
    if let Some(confirmed) = outcome.confirmed {
        text.push_str(&format!(
            "\nCurrent value of coil {}: {}",
            outcome.address, confirmed
        ));
    }
    text
}
