//! Field extraction from raw reply text.
//!
//! Replies are loosely formatted `Label: value\r\n` text. Each known reply
//! shape has a fixed list of [FieldRule]s; a rule that does not match simply
//! yields nothing, so the caller keeps whatever value it had before.

use parse_display::Display;
use regex::{Regex, RegexBuilder};

/// An attribute slot of the device snapshot that a rule can fill.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
#[display(style = "snake_case")]
pub enum Field {
    /// e.g. `Flashforge Adventurer 4`.
    MachineType,
    /// User-assigned printer name.
    MachineName,
    /// Firmware version string.
    Firmware,
    /// Serial number.
    SerialNumber,
    /// Build volume width.
    MaxX,
    /// Build volume depth.
    MaxY,
    /// Build volume height.
    MaxZ,
    /// Number of extruders.
    ExtruderCount,
    /// Network MAC address.
    MacAddress,
    /// e.g. `READY`, `BUILDING_FROM_SD`.
    MachineStatus,
    /// e.g. `READY`, `MOVING`.
    MoveMode,
    /// Raw status code string, e.g. `S:1 L:0 J:0 F:0`.
    Status,
    /// Chamber light state.
    Led,
    /// File of the current job, empty when idle.
    CurrentFile,
    /// Print progress in percent.
    PrintPercent,
    /// Layer being printed.
    PrintLayer,
    /// Total layers of the job.
    TotalLayers,
    /// Head X position.
    PositionX,
    /// Head Y position.
    PositionY,
    /// Head Z position.
    PositionZ,
}

impl Field {
    /// Whether the captured text must parse as a number.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::MaxX
                | Field::MaxY
                | Field::MaxZ
                | Field::ExtruderCount
                | Field::PrintPercent
                | Field::PrintLayer
                | Field::TotalLayers
                | Field::PositionX
                | Field::PositionY
                | Field::PositionZ
        )
    }
}

/// A named extraction rule. Immutable and shared by every session.
#[derive(Debug)]
pub struct FieldRule {
    /// Slot filled by this rule.
    pub field: Field,
    /// Pattern searched for anywhere in the reply.
    pub pattern: Regex,
    /// Capture group holding the value.
    pub group: usize,
}

impl FieldRule {
    fn new(field: Field, pattern: &str, group: usize) -> Self {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|err| panic!("invalid pattern for {field}: {err}"));

        Self { field, pattern, group }
    }

    /// The captured value, if the rule matches `reply`.
    pub fn capture<'a>(&self, reply: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(reply)
            .and_then(|caps| caps.get(self.group))
            .map(|m| m.as_str())
    }
}

// Labels are anchored with `\b` so that e.g. `Status` does not match inside
// `MachineStatus`.
lazy_static::lazy_static! {
    /// Rules for the `~M115` reply.
    pub static ref INFO_RULES: Vec<FieldRule> = vec![
        FieldRule::new(Field::MachineType, r"\bMachine Type\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::MachineName, r"\bMachine Name\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::Firmware, r"\bFirmware\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::SerialNumber, r"\bSN\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::MaxX, r"\bX\s?:\s?(\d+)(?:\s|\r\n)", 1),
        FieldRule::new(Field::MaxY, r"\bY\s?:\s?(\d+)(?:\s|\r\n)", 1),
        FieldRule::new(Field::MaxZ, r"\bZ\s?:\s?(\d+)(?:\s|\r\n)", 1),
        FieldRule::new(Field::ExtruderCount, r"\bTool Count\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::MacAddress, r"\bMac Address\s?:\s?([0-9a-f:]+)", 1),
    ];

    /// Rules for the `~M119` reply.
    pub static ref STATUS_RULES: Vec<FieldRule> = vec![
        FieldRule::new(Field::MachineStatus, r"\bMachineStatus\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::MoveMode, r"\bMoveMode\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::Status, r"\bStatus\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::Led, r"\bLED\s?:\s?(.*?)\r\n", 1),
        FieldRule::new(Field::CurrentFile, r"\bCurrentFile\s?:\s?(.*?)\r\n", 1),
    ];

    /// Rules for the `~M27` reply.
    pub static ref PROGRESS_RULES: Vec<FieldRule> = vec![
        FieldRule::new(Field::PrintPercent, r"\bbyte\s?(\d+)\s?/\s?\d+", 1),
        FieldRule::new(Field::PrintLayer, r"\bLayer\s?:\s?(\d+)\s?/\s?(\d+)", 1),
        FieldRule::new(Field::TotalLayers, r"\bLayer\s?:\s?(\d+)\s?/\s?(\d+)", 2),
    ];

    /// Rules for the `~M114` reply.
    pub static ref POSITION_RULES: Vec<FieldRule> = vec![
        FieldRule::new(Field::PositionX, r"\bX\s?:\s?(-?\d+(?:\.\d+)?)", 1),
        FieldRule::new(Field::PositionY, r"\bY\s?:\s?(-?\d+(?:\.\d+)?)", 1),
        FieldRule::new(Field::PositionZ, r"\bZ\s?:\s?(-?\d+(?:\.\d+)?)", 1),
    ];

    static ref TEMPERATURE: Regex = RegexBuilder::new(r"\b([TB]\d*)\s?:\s?(\d+(?:\.\d+)?)\s?/\s?(\d+(?:\.\d+)?)")
        .case_insensitive(true)
        .build()
        .expect("temperature pattern");
}

/// Run `rules` over `reply` in order, returning one `(field, value)` per rule
/// that matched. Rules that do not match are absent from the result.
pub fn extract<'a>(reply: &'a str, rules: &[FieldRule]) -> Vec<(Field, &'a str)> {
    rules
        .iter()
        .filter_map(|rule| rule.capture(reply).map(|value| (rule.field, value)))
        .collect()
}

/// Which registry a temperature label belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ToolKind {
    /// `T0`, `T1`, ...
    Extruder,
    /// `B`.
    Bed,
}

/// One `label:current/target` token from a temperature reply.
#[derive(Clone, Debug, PartialEq)]
pub struct TemperatureTriple {
    /// Lower-cased label, e.g. `t0` or `b`.
    pub label: String,
    /// Measured temperature.
    pub current: f64,
    /// Target temperature.
    pub target: f64,
}

impl TemperatureTriple {
    /// Extruder or bed, decided by the first letter of the label.
    pub fn kind(&self) -> ToolKind {
        if self.label.starts_with('b') {
            ToolKind::Bed
        } else {
            ToolKind::Extruder
        }
    }
}

/// Every temperature token in a `~M105` reply, e.g.
/// `T0:104.5/225.0 T1:0.0/0.0 B:51.3/50.0`.
pub fn temperatures(reply: &str) -> Vec<TemperatureTriple> {
    TEMPERATURE
        .captures_iter(reply)
        .filter_map(|caps| {
            Some(TemperatureTriple {
                label: caps.get(1)?.as_str().to_lowercase(),
                current: caps.get(2)?.as_str().parse().ok()?,
                target: caps.get(3)?.as_str().parse().ok()?,
            })
        })
        .collect()
}

/// Separator between entries of the `~M661` listing.
pub const FILE_SEPARATOR: &[u8] = b"::\xa3\xa3\x00\x00\x00";

/// Decode a raw `~M661` reply into file names.
///
/// The first segment is the command echo and is dropped. A leading prefix up
/// to the first `/` is stripped from each name, unless the name starts with
/// `/` or has none.
pub fn parse_file_list(raw: &[u8]) -> Vec<String> {
    split_bytes(raw, FILE_SEPARATOR)
        .skip(1)
        .map(|segment| {
            let name = String::from_utf8_lossy(segment);
            match name.find('/') {
                Some(idx) if idx > 0 => name[idx..].to_owned(),
                _ => name.into_owned(),
            }
        })
        .collect()
}

fn split_bytes<'a>(haystack: &'a [u8], sep: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
    let mut rest = Some(haystack);
    std::iter::from_fn(move || {
        let current = rest?;
        match current.windows(sep.len()).position(|w| w == sep) {
            Some(idx) => {
                rest = Some(&current[idx + sep.len()..]);
                Some(&current[..idx])
            }
            None => {
                rest = None;
                Some(current)
            }
        }
    })
}
