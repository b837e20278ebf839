use std::fmt;

use serde::{Serialize, Serializer};

/// Hazard classes the detector can report for a box or a whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HazardLabel {
    Fire,
    Fall,
    NotFall,
    None,
}

impl HazardLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            HazardLabel::Fire => "FIRE",
            HazardLabel::Fall => "FALL",
            HazardLabel::NotFall => "NOT FALL",
            HazardLabel::None => "NONE",
        }
    }

    /// Single-letter code used when logging a user's window.
    pub fn code(self) -> char {
        match self {
            HazardLabel::Fire => 'F',
            HazardLabel::Fall => 'L',
            HazardLabel::NotFall => 'N',
            HazardLabel::None => '-',
        }
    }

    /// Maps a model class name onto a label. Unknown names become `None`.
    pub fn from_class_name(raw: &str) -> Self {
        match normalize_class_name(raw).as_str() {
            "FIRE" => HazardLabel::Fire,
            "FALL" => HazardLabel::Fall,
            "NOT FALL" => HazardLabel::NotFall,
            _ => HazardLabel::None,
        }
    }
}

impl fmt::Display for HazardLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for HazardLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Upper-cases, turns `-` and `_` into spaces and collapses runs of whitespace.
pub fn normalize_class_name(raw: &str) -> String {
    raw.to_uppercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
