//! Line-oriented console for driving device nodes from a terminal.
//!
//! One command per line:
//!
//! ```text
//! open <node>          -> fd
//! write <fd> <text>    -> bytes written
//! read <fd> <count>    -> bytes read, escaped
//! close <fd>
//! status
//! help
//! ```
//!
//! Failures are reported as `error: <message> (<ERRNO>)`, using the errno the
//! driver would have returned.

use crate::error::{Error, Result};
use crate::file::OpenFile;
use crate::host::Registry;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

const HELP: &str = "commands: open <node> | write <fd> <text> | read <fd> <count> | close <fd> | status | help";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open(String),
    Write { fd: u32, data: Vec<u8> },
    Read { fd: u32, count: usize },
    Close(u32),
    Status,
    Help,
}

fn parse_num<T: FromStr>(word: Option<&str>, what: &str) -> Result<T> {
    word.and_then(|w| w.parse().ok())
        .ok_or_else(|| Error::Usage(format!("expected {what}")))
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_start();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb.trim_end() {
            "open" => match rest.trim() {
                "" => Err(Error::Usage("open <node>".to_string())),
                node => Ok(Command::Open(node.to_string())),
            },
            "write" => {
                // Everything after the fd is data, spaces included.
                let (fd, data) = rest.split_once(' ').unwrap_or((rest, ""));
                Ok(Command::Write {
                    fd: parse_num(Some(fd), "write <fd> <text>")?,
                    data: data.as_bytes().to_vec(),
                })
            }
            "read" => {
                let mut words = rest.split_whitespace();
                Ok(Command::Read {
                    fd: parse_num(words.next(), "read <fd> <count>")?,
                    count: parse_num(words.next(), "read <fd> <count>")?,
                })
            }
            "close" => Ok(Command::Close(parse_num(
                rest.split_whitespace().next(),
                "close <fd>",
            )?)),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            other => Err(Error::Usage(format!("unknown command {other:?}; try help"))),
        }
    }
}

/// Open files of one console session.
pub struct Console {
    registry: Arc<Registry>,
    files: BTreeMap<u32, OpenFile>,
    next_fd: u32,
}

impl Console {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            files: BTreeMap::new(),
            next_fd: 3,
        }
    }

    fn file(&mut self, fd: u32) -> Result<&mut OpenFile> {
        self.files.get_mut(&fd).ok_or(Error::BadHandle(fd))
    }

    pub fn execute(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Open(node) => {
                let file = self.registry.open(&node)?;
                let fd = self.next_fd;
                self.next_fd += 1;
                self.files.insert(fd, file);
                Ok(fd.to_string())
            }
            Command::Write { fd, data } => {
                let written = self.file(fd)?.write(&data)?;
                Ok(written.to_string())
            }
            Command::Read { fd, count } => {
                let data = self.file(fd)?.read(count)?;
                Ok(format!("{} \"{}\"", data.len(), data.escape_ascii()))
            }
            Command::Close(fd) => {
                self.files.remove(&fd).ok_or(Error::BadHandle(fd))?;
                Ok("closed".to_string())
            }
            Command::Status => Ok(self.status()),
            Command::Help => Ok(HELP.to_string()),
        }
    }

    fn status(&self) -> String {
        let mut lines = Vec::new();
        for (name, class, dev) in self.registry.nodes() {
            lines.push(format!("node {name} class {class} dev {dev}"));
        }
        for (fd, file) in &self.files {
            lines.push(format!("fd {fd} {} pos {}", file.node(), file.position()));
        }
        if lines.is_empty() {
            lines.push("no devices".to_string());
        }
        lines.join("\n")
    }

    /// Run one input line and format the reply. Blank lines reply nothing.
    pub fn handle_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }
        let reply = line.parse::<Command>().and_then(|cmd| self.execute(cmd));
        Some(match reply {
            Ok(text) => text,
            Err(e) => format!("error: {e} ({:?})", e.errno()),
        })
    }

    pub fn open_count(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::driver::LedDriver;
    use crate::gpio::LineSpec;
    use crate::host::SimChip;
    use test_case::test_case;

    #[test_case("open led", Command::Open("led".into()) ; "open")]
    #[test_case("write 3 1", Command::Write { fd: 3, data: b"1".to_vec() } ; "write")]
    #[test_case("write 3 1 on", Command::Write { fd: 3, data: b"1 on".to_vec() } ; "write keeps spaces")]
    #[test_case("write 4", Command::Write { fd: 4, data: Vec::new() } ; "empty write")]
    #[test_case("read 3 20", Command::Read { fd: 3, count: 20 } ; "read")]
    #[test_case("close 3", Command::Close(3) ; "close")]
    #[test_case("  status", Command::Status ; "leading space")]
    fn test_parse(line: &str, expected: Command) {
        assert_eq!(line.parse::<Command>().unwrap(), expected);
    }

    #[test_case("open" ; "open without node")]
    #[test_case("read 3" ; "read without count")]
    #[test_case("write x 1" ; "bad fd")]
    #[test_case("blink" ; "unknown")]
    fn test_parse_errors(line: &str) {
        assert!(matches!(line.parse::<Command>(), Err(Error::Usage(_))));
    }

    fn session() -> (Console, Arc<SimChip>, LedDriver) {
        let registry = Arc::new(Registry::new());
        let chip = Arc::new(SimChip::new(32).with_name(17, "led"));
        let driver = LedDriver::load(
            registry.clone(),
            chip.clone(),
            &DeviceConfig::default(),
            &LineSpec::default(),
        )
        .unwrap();
        (Console::new(registry), chip, driver)
    }

    #[test]
    fn test_session() {
        let (mut console, chip, _driver) = session();
        assert_eq!(console.handle_line("open led").unwrap(), "3");
        assert_eq!(console.handle_line("write 3 1").unwrap(), "1");
        assert_eq!(chip.value(17), Some(true));
        assert_eq!(console.handle_line("close 3").unwrap(), "closed");

        assert_eq!(console.handle_line("open led").unwrap(), "4");
        assert_eq!(console.handle_line("read 4 3").unwrap(), "3 \"1\\x00\\x00\"");
        assert_eq!(console.open_count(), 1);
    }

    #[test]
    fn test_errors_carry_errno() {
        let (mut console, _chip, _driver) = session();
        assert_eq!(
            console.handle_line("open nope").unwrap(),
            "error: no such device: nope (ENODEV)"
        );
        assert_eq!(
            console.handle_line("read 9 1").unwrap(),
            "error: bad file handle 9 (EBADF)"
        );

        console.handle_line("open led");
        assert_eq!(console.handle_line("read 3 15").unwrap().split(' ').next(), Some("15"));
        assert_eq!(
            console.handle_line("write 3 x").unwrap(),
            "error: no space left on device (ENOSPC)"
        );
    }

    #[test]
    fn test_status_and_blank() {
        let (mut console, _chip, _driver) = session();
        assert!(console.handle_line("   ").is_none());
        console.handle_line("open led");
        let status = console.handle_line("status").unwrap();
        assert!(status.contains("node led class led_class dev 254:0"));
        assert!(status.contains("fd 3 led pos 0"));
    }
}
