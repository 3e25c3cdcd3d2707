//! GPIO actuator adapter.
//!
//! Three ways of locating the LED line are folded into one capability set:
//! acquire a [`LineHandle`] from a [`LineSpec`], set it, release it. The
//! strategy is chosen once, at acquire; `set` goes straight to the resolved
//! line number and never looks at the spec again.

use crate::error::{Error, Result};
use crate::host::GpioController;
use crate::of::DeviceNode;
use crate::tracing::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default property holding the LED line on a bound hardware node.
pub const DEFAULT_PROPERTY: &str = "led-gpios";

/// How to find the line to drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum LineSpec {
    /// Line carrying this name, owned and driven in a single lookup.
    Label { name: String },

    /// Fixed line number.
    Number { line: u32 },

    /// Line number stored in cell `index` of `property` on the hardware node
    /// the driver is bound to.
    Property {
        #[serde(default = "default_property")]
        property: String,
        #[serde(default)]
        index: usize,
    },
}

fn default_property() -> String {
    DEFAULT_PROPERTY.to_string()
}

impl Default for LineSpec {
    fn default() -> Self {
        LineSpec::Label {
            name: "led".to_string(),
        }
    }
}

impl fmt::Display for LineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineSpec::Label { name } => write!(f, "label {name}"),
            LineSpec::Number { line } => write!(f, "line {line}"),
            LineSpec::Property { property, index } => write!(f, "{property}[{index}]"),
        }
    }
}

/// Exclusive ownership of one GPIO line configured as output.
///
/// Dropping the handle drives the line inactive and frees it, so every exit
/// path leaves the LED off and the line available.
pub struct LineHandle {
    gpio: Arc<dyn GpioController>,
    line: u32,
}

impl LineHandle {
    /// Resolve `spec`, own the line and drive it inactive.
    ///
    /// `node` is the hardware node the driver is bound to; only
    /// [`LineSpec::Property`] needs it.
    pub fn acquire(
        gpio: Arc<dyn GpioController>,
        spec: &LineSpec,
        node: Option<&DeviceNode>,
        consumer: &str,
    ) -> Result<Self> {
        let line = match spec {
            LineSpec::Label { name } => gpio.get_by_label(name, consumer, false)?,
            LineSpec::Number { line } => request_output(gpio.as_ref(), *line, consumer)?,
            LineSpec::Property { property, index } => {
                let node = node.ok_or_else(|| {
                    Error::GpioInvalid(format!("{spec} needs a bound hardware node"))
                })?;
                let line = node.property_u32(property, *index).ok_or_else(|| {
                    Error::GpioInvalid(format!("{spec} missing on node {}", node.name))
                })?;
                request_output(gpio.as_ref(), line, consumer)?
            }
        };

        debug!(%spec, line, consumer, "Acquired GPIO line.");
        Ok(Self { gpio, line })
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn set(&self, active: bool) {
        self.gpio.set_value(self.line, active);
    }

    /// Drive the line inactive and give it up.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for LineHandle {
    fn drop(&mut self) {
        self.gpio.set_value(self.line, false);
        self.gpio.free(self.line);
        debug!(line = self.line, "Released GPIO line.");
    }
}

impl fmt::Debug for LineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineHandle").field("line", &self.line).finish()
    }
}

// Validate, own, then switch to output at the inactive level.
fn request_output(gpio: &dyn GpioController, line: u32, consumer: &str) -> Result<u32> {
    if !gpio.is_valid(line) {
        return Err(Error::GpioInvalid(line.to_string()));
    }
    gpio.request(line, consumer)?;
    if let Err(e) = gpio.direction_output(line, false) {
        gpio.free(line);
        return Err(e);
    }
    Ok(line)
}
