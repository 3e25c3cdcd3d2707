//! GPIO controller capability and a simulated chip.
//!
//! The driver never toggles hardware itself. It consumes a [`GpioController`]
//! supplied by the host, which on a real board is the Linux GPIO character
//! device (see `host::cdev`) and in tests is [`SimChip`].

use crate::error::{Error, Result};
use crate::tracing::prelude::*;
use parking_lot::Mutex;

/// Line-level operations offered by the host platform.
///
/// Levels are logical: `true` is the active (LED on) level.
pub trait GpioController: Send + Sync {
    /// Whether `line` names a line this controller has.
    fn is_valid(&self, line: u32) -> bool;

    /// Take exclusive ownership of `line` on behalf of `consumer`.
    fn request(&self, line: u32, consumer: &str) -> Result<()>;

    /// Configure an owned line as output, driving `active` immediately.
    fn direction_output(&self, line: u32, active: bool) -> Result<()>;

    /// Find the line named `label`, own it and drive it as output at
    /// `active`, in one step.
    fn get_by_label(&self, label: &str, consumer: &str, active: bool) -> Result<u32>;

    /// Drive an owned output line.
    fn set_value(&self, line: u32, active: bool);

    /// Give up ownership of `line`.
    fn free(&self, line: u32);
}

/// Something that happened on a [`SimChip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpioEvent {
    Requested { line: u32, consumer: String },
    DirectionOutput { line: u32, active: bool },
    Set { line: u32, active: bool },
    Freed { line: u32 },
}

#[derive(Debug, Default)]
struct SimLine {
    name: Option<String>,
    owner: Option<String>,
    output: bool,
    active: bool,
    input_only: bool,
}

#[derive(Debug, Default)]
struct ChipState {
    lines: Vec<SimLine>,
    events: Vec<GpioEvent>,
}

impl ChipState {
    fn line(&mut self, line: u32) -> Result<&mut SimLine> {
        self.lines
            .get_mut(line as usize)
            .ok_or_else(|| Error::GpioInvalid(line.to_string()))
    }
}

/// In-memory GPIO chip.
///
/// Records every request, direction change, set and free so tests can check
/// the exact sequence the driver produced.
#[derive(Debug)]
pub struct SimChip {
    state: Mutex<ChipState>,
}

impl SimChip {
    /// A chip with `num_lines` unnamed, free lines.
    pub fn new(num_lines: u32) -> Self {
        let lines = (0..num_lines).map(|_| SimLine::default()).collect();
        Self {
            state: Mutex::new(ChipState {
                lines,
                events: Vec::new(),
            }),
        }
    }

    /// Give `line` a name that label lookups can find.
    pub fn with_name(self, line: u32, name: &str) -> Self {
        if let Some(l) = self.state.lock().lines.get_mut(line as usize) {
            l.name = Some(name.to_string());
        }
        self
    }

    /// Make `line` refuse output direction.
    pub fn with_input_only(self, line: u32) -> Self {
        if let Some(l) = self.state.lock().lines.get_mut(line as usize) {
            l.input_only = true;
        }
        self
    }

    /// Mark `line` as owned by another consumer.
    pub fn claim(&self, line: u32, consumer: &str) {
        if let Some(l) = self.state.lock().lines.get_mut(line as usize) {
            l.owner = Some(consumer.to_string());
        }
    }

    /// Current logical level of `line`, or `None` if it does not exist.
    pub fn value(&self, line: u32) -> Option<bool> {
        self.state.lock().lines.get(line as usize).map(|l| l.active)
    }

    pub fn owner(&self, line: u32) -> Option<String> {
        self.state
            .lock()
            .lines
            .get(line as usize)
            .and_then(|l| l.owner.clone())
    }

    /// Number of lines currently owned by anyone.
    pub fn owned_count(&self) -> usize {
        self.state.lock().lines.iter().filter(|l| l.owner.is_some()).count()
    }

    pub fn events(&self) -> Vec<GpioEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }
}

impl GpioController for SimChip {
    fn is_valid(&self, line: u32) -> bool {
        (line as usize) < self.state.lock().lines.len()
    }

    fn request(&self, line: u32, consumer: &str) -> Result<()> {
        let mut state = self.state.lock();
        let l = state.line(line)?;
        if let Some(owner) = &l.owner {
            return Err(Error::GpioRequestFailed(format!("{line} owned by {owner}")));
        }
        l.owner = Some(consumer.to_string());
        state.events.push(GpioEvent::Requested {
            line,
            consumer: consumer.to_string(),
        });
        Ok(())
    }

    fn direction_output(&self, line: u32, active: bool) -> Result<()> {
        let mut state = self.state.lock();
        let l = state.line(line)?;
        if l.input_only {
            return Err(Error::GpioDirectionSetFailed(format!("{line} is input only")));
        }
        l.output = true;
        l.active = active;
        state.events.push(GpioEvent::DirectionOutput { line, active });
        Ok(())
    }

    fn get_by_label(&self, label: &str, consumer: &str, active: bool) -> Result<u32> {
        let line = {
            let state = self.state.lock();
            state
                .lines
                .iter()
                .position(|l| l.name.as_deref() == Some(label))
                .ok_or_else(|| Error::GpioInvalid(format!("no line labelled {label}")))?
                as u32
        };

        self.request(line, consumer)?;
        if let Err(e) = self.direction_output(line, active) {
            self.free(line);
            return Err(e);
        }
        Ok(line)
    }

    fn set_value(&self, line: u32, active: bool) {
        let mut state = self.state.lock();
        match state.lines.get_mut(line as usize) {
            Some(l) if l.owner.is_some() && l.output => {
                l.active = active;
                state.events.push(GpioEvent::Set { line, active });
            }
            _ => warn!(line, "Set on a line that is not an owned output, ignoring."),
        }
    }

    fn free(&self, line: u32) {
        let mut state = self.state.lock();
        if let Some(l) = state.lines.get_mut(line as usize) {
            l.owner = None;
            l.output = false;
            state.events.push(GpioEvent::Freed { line });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_exclusive() {
        let chip = SimChip::new(4);
        chip.request(2, "a").unwrap();
        let err = chip.request(2, "b").unwrap_err();
        assert!(matches!(err, Error::GpioRequestFailed(_)));
        assert_eq!(chip.owner(2).as_deref(), Some("a"));
    }

    #[test]
    fn test_invalid_line() {
        let chip = SimChip::new(4);
        assert!(!chip.is_valid(4));
        assert!(matches!(chip.request(9, "a"), Err(Error::GpioInvalid(_))));
        assert_eq!(chip.value(9), None);
    }

    #[test]
    fn test_label_lookup_drives_initial_level() {
        let chip = SimChip::new(8).with_name(5, "led");
        let line = chip.get_by_label("led", "drv", false).unwrap();
        assert_eq!(line, 5);
        assert_eq!(chip.value(5), Some(false));
        assert_eq!(
            chip.events(),
            vec![
                GpioEvent::Requested { line: 5, consumer: "drv".into() },
                GpioEvent::DirectionOutput { line: 5, active: false },
            ]
        );
    }

    #[test]
    fn test_label_lookup_releases_on_direction_failure() {
        let chip = SimChip::new(8).with_name(1, "led").with_input_only(1);
        let err = chip.get_by_label("led", "drv", false).unwrap_err();
        assert!(matches!(err, Error::GpioDirectionSetFailed(_)));
        assert_eq!(chip.owned_count(), 0);
    }

    #[test]
    fn test_set_ignored_on_unowned_line() {
        let chip = SimChip::new(2);
        chip.set_value(0, true);
        assert_eq!(chip.value(0), Some(false));
        assert!(chip.events().is_empty());
    }
}
