//! Record envelopes: the unit of data flowing through a stream graph.
//!
//! An envelope pairs a value with its event timestamp, the windows it is
//! assigned to and the pane it was emitted in. Values are `Element` trees in
//! their native shape; the wire shape of the same value is an `Element::Bytes`
//! produced by the coder bridge.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Event time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Smallest representable event time.
    pub const MIN: Timestamp = Timestamp(-9_223_372_036_854_775);
    /// Largest representable event time.
    pub const MAX: Timestamp = Timestamp(9_223_372_036_854_775);
    /// Maximum timestamp of the global window (one day before `MAX`).
    pub const END_OF_GLOBAL_WINDOW: Timestamp = Timestamp(9_223_372_036_854_775 - 86_400_000);

    pub fn millis(self) -> i64 {
        self.0
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Timestamp(millis)
    }
}

/// A window an envelope is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// The single window spanning all of event time.
    Global,
    /// Half-open interval `[start, end)`.
    Interval { start: Timestamp, end: Timestamp },
}

impl Window {
    /// Latest timestamp an element in this window may carry.
    pub fn max_timestamp(&self) -> Timestamp {
        match self {
            Window::Global => Timestamp::END_OF_GLOBAL_WINDOW,
            Window::Interval { end, .. } => Timestamp(end.0.saturating_sub(1)),
        }
    }
}

/// When a pane fired relative to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneTiming {
    Early,
    OnTime,
    Late,
    Unknown,
}

impl PaneTiming {
    pub(crate) fn tag(self) -> u8 {
        match self {
            PaneTiming::Early => 0,
            PaneTiming::OnTime => 1,
            PaneTiming::Late => 2,
            PaneTiming::Unknown => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PaneTiming::Early),
            1 => Some(PaneTiming::OnTime),
            2 => Some(PaneTiming::Late),
            3 => Some(PaneTiming::Unknown),
            _ => None,
        }
    }
}

/// Trigger firing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneInfo {
    pub is_first: bool,
    pub is_last: bool,
    pub timing: PaneTiming,
    pub index: i64,
    pub non_speculative_index: i64,
}

impl PaneInfo {
    /// Pane of an element that was never produced by a trigger firing.
    pub const NO_FIRING: PaneInfo = PaneInfo {
        is_first: true,
        is_last: true,
        timing: PaneTiming::Unknown,
        index: 0,
        non_speculative_index: 0,
    };
}

impl Default for PaneInfo {
    fn default() -> Self {
        PaneInfo::NO_FIRING
    }
}

/// A native, in-process value.
///
/// Serialized with serde's externally tagged layout so that every variant
/// survives a trip through a self-describing format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Kv(Box<Element>, Box<Element>),
    Iterable(Vec<Element>),
    Row(IndexMap<String, Element>),
}

impl Element {
    pub fn kv(key: impl Into<Element>, value: impl Into<Element>) -> Self {
        Element::Kv(Box::new(key.into()), Box::new(value.into()))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Element::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Element::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Element::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Short name of the variant, used in coder error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Element::Null => "null",
            Element::Bool(_) => "bool",
            Element::Int(_) => "int",
            Element::Double(_) => "double",
            Element::String(_) => "string",
            Element::Bytes(_) => "bytes",
            Element::Kv(..) => "kv",
            Element::Iterable(_) => "iterable",
            Element::Row(_) => "row",
        }
    }
}

impl From<bool> for Element {
    fn from(b: bool) -> Self {
        Element::Bool(b)
    }
}

impl From<i64> for Element {
    fn from(n: i64) -> Self {
        Element::Int(n)
    }
}

impl From<f64> for Element {
    fn from(n: f64) -> Self {
        Element::Double(n)
    }
}

impl From<&str> for Element {
    fn from(s: &str) -> Self {
        Element::String(s.to_string())
    }
}

impl From<String> for Element {
    fn from(s: String) -> Self {
        Element::String(s)
    }
}

impl From<Vec<u8>> for Element {
    fn from(b: Vec<u8>) -> Self {
        Element::Bytes(b)
    }
}

/// A value plus its timestamp and windowing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub value: Element,
    pub timestamp: Timestamp,
    pub windows: Vec<Window>,
    #[serde(default)]
    pub pane: PaneInfo,
}

impl Envelope {
    pub fn new(value: Element, timestamp: Timestamp, windows: Vec<Window>, pane: PaneInfo) -> Self {
        Self {
            value,
            timestamp,
            windows,
            pane,
        }
    }

    /// Envelope in the global window with no pane firing.
    pub fn in_global_window(value: impl Into<Element>, timestamp: Timestamp) -> Self {
        Self::new(value.into(), timestamp, vec![Window::Global], PaneInfo::NO_FIRING)
    }

    /// Replace the value, keeping timestamp, windows and pane.
    pub fn with_value(self, value: Element) -> Self {
        Self { value, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_window_max_timestamp() {
        assert_eq!(Window::Global.max_timestamp(), Timestamp::END_OF_GLOBAL_WINDOW);
        assert!(Timestamp::END_OF_GLOBAL_WINDOW < Timestamp::MAX);
    }

    #[test]
    fn test_interval_window_max_timestamp() {
        let window = Window::Interval {
            start: Timestamp(0),
            end: Timestamp(1000),
        };
        assert_eq!(window.max_timestamp(), Timestamp(999));
    }

    #[test]
    fn test_with_value_keeps_metadata() {
        let envelope = Envelope::new(
            Element::from("a"),
            Timestamp(42),
            vec![Window::Interval {
                start: Timestamp(0),
                end: Timestamp(100),
            }],
            PaneInfo {
                timing: PaneTiming::OnTime,
                ..PaneInfo::NO_FIRING
            },
        );

        let replaced = envelope.clone().with_value(Element::Bytes(vec![1, 2]));
        assert_eq!(replaced.timestamp, envelope.timestamp);
        assert_eq!(replaced.windows, envelope.windows);
        assert_eq!(replaced.pane, envelope.pane);
        assert_eq!(replaced.value.as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_element_serde_keeps_variant() {
        let element = Element::kv("k", Element::Iterable(vec![Element::Bytes(vec![7])]));
        let json = serde_json::to_string(&element).unwrap();
        let back: Element = serde_json::from_str(&json).unwrap();
        assert_eq!(back, element);
    }
}
