//! Closed status enumerations for server/client communication
//!
//! The wire carries these as strings (`"ready"`, `"already_running"`, ...);
//! both sides parse them back into the enums so neither treats them as free
//! text.

/// Run phase as reported by the `Status` RPC
///
/// - `Ready`: no run is active, `Start` will be accepted
/// - `Training`: a run is active and emitting metrics
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RunPhase {
    #[default]
    Ready,
    Training,
}

impl RunPhase {
    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Result of a `Start` request
///
/// None of these are errors: a busy server or a missing confirmation are
/// expected conditions for polling clients.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StartStatus {
    /// The run was launched
    Started,
    /// A run is already active; nothing changed
    AlreadyRunning,
    /// `confirmed` was false; nothing changed
    NotConfirmed,
}

impl StartStatus {
    /// Parse from string, returning None for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Whether this reply means a run is now (or was already) in progress
    pub fn is_running(self) -> bool {
        matches!(self, Self::Started | Self::AlreadyRunning)
    }
}
