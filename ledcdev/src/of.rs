//! Hardware description tree.
//!
//! A small device-tree-like hierarchy of named nodes, each carrying a list of
//! `compatible` strings, a status, integer-cell properties and child nodes.
//! The platform bus walks it to find nodes a driver can bind to, and the GPIO
//! adapter reads line numbers out of node properties.
//!
//! Trees are written as JSON:
//!
//! ```json
//! {
//!   "name": "",
//!   "children": [
//!     { "name": "led", "compatible": ["ledcdev,gpio-led"],
//!       "properties": { "led-gpios": [17] } }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_status() -> String {
    "okay".to_string()
}

/// One node of the hardware description.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceNode {
    pub name: String,

    #[serde(default)]
    pub compatible: Vec<String>,

    /// "okay" or "disabled"
    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default)]
    pub properties: BTreeMap<String, Vec<u32>>,

    #[serde(default)]
    pub children: Vec<DeviceNode>,
}

impl DeviceNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compatible: Vec::new(),
            status: default_status(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_compatible(mut self, compatible: &str) -> Self {
        self.compatible.push(compatible.to_string());
        self
    }

    pub fn with_property(mut self, name: &str, cells: &[u32]) -> Self {
        self.properties.insert(name.to_string(), cells.to_vec());
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn with_child(mut self, child: DeviceNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("device tree: {e}")))
    }

    pub fn is_compatible(&self, compatible: &str) -> bool {
        self.compatible.iter().any(|c| c == compatible)
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status.as_str(), "okay" | "ok")
    }

    pub fn property(&self, name: &str) -> Option<&[u32]> {
        self.properties.get(name).map(Vec::as_slice)
    }

    /// Cell `index` of property `name`.
    pub fn property_u32(&self, name: &str, index: usize) -> Option<u32> {
        self.property(name).and_then(|cells| cells.get(index).copied())
    }

    /// Look up a descendant by slash-separated path, e.g. `/leds/status`.
    pub fn find(&self, path: &str) -> Option<&DeviceNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| {
                node.children.iter().find(|c| c.name == segment)
            })
    }

    /// Every node below this one, depth first, with its path.
    pub fn descendants(&self) -> Vec<(String, &DeviceNode)> {
        let mut out = Vec::new();
        self.collect_into("", &mut out);
        out
    }

    fn collect_into<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a DeviceNode)>) {
        for child in &self.children {
            let path = format!("{prefix}/{}", child.name);
            out.push((path.clone(), child));
            child.collect_into(&path, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceNode {
        DeviceNode::new("").with_child(
            DeviceNode::new("leds")
                .with_child(
                    DeviceNode::new("status")
                        .with_compatible("ledcdev,gpio-led")
                        .with_property("led-gpios", &[17, 27]),
                )
                .with_child(DeviceNode::new("spare").with_status("disabled")),
        )
    }

    #[test]
    fn test_find_by_path() {
        let root = sample();
        let node = root.find("/leds/status").unwrap();
        assert!(node.is_compatible("ledcdev,gpio-led"));
        assert!(root.find("/leds/missing").is_none());
        assert_eq!(root.find("/").map(|n| n.name.as_str()), Some(""));
    }

    #[test]
    fn test_property_cells() {
        let root = sample();
        let node = root.find("/leds/status").unwrap();
        assert_eq!(node.property_u32("led-gpios", 0), Some(17));
        assert_eq!(node.property_u32("led-gpios", 1), Some(27));
        assert_eq!(node.property_u32("led-gpios", 2), None);
        assert_eq!(node.property_u32("reset-gpios", 0), None);
    }

    #[test]
    fn test_descendants_are_depth_first() {
        let root = sample();
        let paths: Vec<String> = root.descendants().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["/leds", "/leds/status", "/leds/spare"]);
    }

    #[test]
    fn test_from_json_defaults() {
        let root = DeviceNode::from_json(
            r#"{"name": "", "children": [{"name": "led", "properties": {"led-gpios": [4]}}]}"#,
        )
        .unwrap();
        let led = root.find("/led").unwrap();
        assert!(led.is_available());
        assert!(led.compatible.is_empty());
        assert_eq!(led.property("led-gpios"), Some(&[4][..]));
    }

    #[test]
    fn test_disabled_node() {
        let root = sample();
        assert!(!root.find("/leds/spare").unwrap().is_available());
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(DeviceNode::from_json("{"), Err(Error::Config(_))));
    }
}
