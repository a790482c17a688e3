//! Named commands and their payload coercion.
//!
//! Front ends send a command name plus a loosely typed JSON payload. This
//! module turns that pair into a [`Command`], applying the host's lenient
//! conventions: booleans are read by truthiness, missing strings fall back to
//! defaults, and enum-like strings are normalized rather than rejected.

use std::fmt;

use serde_json::Value;

use crate::error::CommandError;
use crate::state::{PrepType, ProxySettings};

/// Origin recorded on bets placed without an explicit one.
pub const DEFAULT_ORIGIN: &str = "popup";

/// Origin recorded on bets placed through the `do-bet` shortcut.
pub const SHORTCUT_ORIGIN: &str = "shortcut";

/// A parsed, validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetState,
    ToggleApp { active: bool },
    PlaceBet { origin: String },
    SetPrepareBet { enabled: bool },
    SetPrepType { prep_type: PrepType },
    UpdateProxy { proxy: ProxySettings },
}

impl Command {
    /// Parse a command name and its payload.
    ///
    /// # Arguments
    ///
    /// * `name` - Wire name, e.g. `"toggle-app"`.
    /// * `payload` - JSON object carrying the arguments, or `null` when the
    ///   command takes none.
    ///
    /// # Errors
    ///
    /// * [`CommandError::UnknownCommand`] if `name` is not recognised.
    /// * [`CommandError::InvalidPayload`] if `payload` is neither an object
    ///   nor `null`.
    pub fn parse(name: &str, payload: &Value) -> Result<Self, CommandError> {
        if !(payload.is_object() || payload.is_null()) {
            return Err(CommandError::InvalidPayload(format!(
                "{name}: payload must be a JSON object"
            )));
        }

        let cmd = match name {
            "get-state" => Command::GetState,
            "toggle-app" => Command::ToggleApp {
                active: truthy(payload.get("active")),
            },
            "place-bet" => Command::PlaceBet {
                origin: payload
                    .get("origin")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_ORIGIN)
                    .to_owned(),
            },
            "set-prepare-bet" => Command::SetPrepareBet {
                enabled: truthy(payload.get("enabled")),
            },
            "set-prep-type" => Command::SetPrepType {
                prep_type: PrepType::from(payload.get("type").cloned().unwrap_or(Value::Null)),
            },
            "update-proxy" => Command::UpdateProxy {
                proxy: ProxySettings::from_payload(payload),
            },
            other => return Err(CommandError::UnknownCommand(other.to_owned())),
        };
        Ok(cmd)
    }

    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::GetState => "get-state",
            Command::ToggleApp { .. } => "toggle-app",
            Command::PlaceBet { .. } => "place-bet",
            Command::SetPrepareBet { .. } => "set-prepare-bet",
            Command::SetPrepType { .. } => "set-prep-type",
            Command::UpdateProxy { .. } => "update-proxy",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Global keyboard shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    /// Place a bet with origin `"shortcut"`.
    DoBet,
    /// Raise the manual danger signal.
    DangerMoment,
}

impl Shortcut {
    /// Parse a shortcut name. Accepts the kebab-case and the snake_case
    /// spellings used by browser command manifests.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "do-bet" | "do_bet" => Some(Shortcut::DoBet),
            "danger-moment" | "danger_moment" => Some(Shortcut::DangerMoment),
            _ => None,
        }
    }
}

/// Host-style truthiness: `null`, `false`, `0`, `""` and missing are false.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}
