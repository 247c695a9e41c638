use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical keys that pitched material is normalized to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyTarget {
    #[serde(rename = "C major")]
    CMajor,
    #[serde(rename = "A minor")]
    AMinor,
}

impl KeyTarget {
    /// Pitch class of the target tonic (C = 0).
    pub fn tonic_pitch_class(&self) -> u8 {
        match self {
            KeyTarget::CMajor => 0,
            KeyTarget::AMinor => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyTarget::CMajor => "C major",
            KeyTarget::AMinor => "A minor",
        }
    }
}

impl fmt::Display for KeyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of key detection and normalization.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct KeyInfo {
    pub detected_tonic: Option<String>,
    pub detected_mode: Option<String>,
    pub normalized: bool,
    /// Applied shift, always within `[-6, 6]`.
    pub transpose_semitones: i8,
    pub target: Option<KeyTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl KeyInfo {
    pub fn disabled() -> Self {
        Self {
            reason: Some("key normalization disabled".to_string()),
            ..Self::default()
        }
    }
}
