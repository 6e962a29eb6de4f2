pub mod client;

/// What a relay command asks the switch to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    On,
    Off,
    /// Anything else is forwarded to the switch as the raw `state` value.
    Other(String),
}

impl RelayAction {
    pub fn parse(action: &str) -> Self {
        match action {
            "on" => Self::On,
            "off" => Self::Off,
            other => Self::Other(other.to_string()),
        }
    }

    /// Value for the switch's `/relay?state=` parameter.
    pub fn state_token(&self) -> &str {
        match self {
            Self::On => "1",
            Self::Off => "0",
            Self::Other(raw) => raw,
        }
    }
}
