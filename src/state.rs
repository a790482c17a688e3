//! The shared state record, its parts, and the persisted subset.
//!
//! Everything here serializes with camelCase field names, which is the shape
//! front ends render and the shape written to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum number of bets kept in [`SharedState::bet_history`] by default.
pub const DEFAULT_HISTORY_CAP: usize = 10;

/// Preparation mode selected by the user.
///
/// Deserialization is lenient: anything other than the exact string
/// `"danger"` becomes [`PrepType::Instant`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum PrepType {
    #[default]
    Instant,
    Danger,
}

impl PrepType {
    /// Normalize free-form input.
    pub fn parse(raw: &str) -> Self {
        if raw == "danger" {
            PrepType::Danger
        } else {
            PrepType::Instant
        }
    }
}

impl From<Value> for PrepType {
    fn from(value: Value) -> Self {
        value.as_str().map(PrepType::parse).unwrap_or_default()
    }
}

/// Connection indicator shown to the user. Always mirrors `appActive`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    #[default]
    Disconnected,
}

impl From<bool> for ConnectionStatus {
    fn from(active: bool) -> Self {
        if active {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }
}

/// Proxy protocol. Anything other than `"socks"` is treated as HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "Value")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Socks,
}

impl From<Value> for ProxyProtocol {
    fn from(value: Value) -> Self {
        match value.as_str() {
            Some("socks") => ProxyProtocol::Socks,
            _ => ProxyProtocol::Http,
        }
    }
}

/// Free-form proxy settings.
///
/// Only the protocol is validated. Missing fields fall back to their
/// defaults when deserialized, which is how a partial stored proxy is merged
/// over the default one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub protocol: ProxyProtocol,
    pub ip: String,
    pub port: String,
    pub user: String,
    pub password: String,
}

impl ProxySettings {
    /// Build normalized settings from an arbitrary JSON payload.
    ///
    /// Each text field is stringified and trimmed; falsy values (missing,
    /// `null`, `false`, `0`, `""`) become the empty string.
    pub fn from_payload(payload: &Value) -> Self {
        let text = |key: &str| field_text(payload.get(key));
        Self {
            protocol: ProxyProtocol::from(payload.get("protocol").cloned().unwrap_or(Value::Null)),
            ip: text("ip"),
            port: text("port"),
            user: text("user"),
            password: text("password"),
        }
    }
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_owned(),
        Some(v @ (Value::Array(_) | Value::Object(_))) => v.to_string(),
        _ => String::new(),
    }
}

/// One row of the risk table, or the idle sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerLevel {
    pub label: String,
    pub command: String,
    pub safe: bool,
}

impl DangerLevel {
    pub fn new(label: &str, command: &str, safe: bool) -> Self {
        Self {
            label: label.to_owned(),
            command: command.to_owned(),
            safe,
        }
    }

    /// The value shown while automation is stopped.
    pub fn idle() -> Self {
        Self::new("Idle", "Awaiting activation", false)
    }

    /// The value written by the `danger-moment` shortcut.
    pub fn manual_signal() -> Self {
        Self::new("Manual danger signal", "Hold positions", false)
    }
}

impl Default for DangerLevel {
    fn default() -> Self {
        Self::idle()
    }
}

/// Static license information derived from the host at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub id: String,
    pub expires_at: String,
}

impl Default for License {
    fn default() -> Self {
        Self {
            id: "offline-mode".to_owned(),
            expires_at: "Unlimited".to_owned(),
        }
    }
}

/// A placed bet. Created only by the `place-bet` command and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub event: String,
    pub market: String,
    pub price: f64,
    pub stake: f64,
    pub currency: String,
    pub prepared: bool,
    pub mode: PrepType,
    pub status: String,
    pub origin: String,
}

/// The single process-wide record.
///
/// Handed out only as clones; the store actor owns the live copy and
/// mutates it exclusively inside `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedState {
    pub app_active: bool,
    pub prep_type: PrepType,
    pub prepare_bet: bool,
    pub connection_status: ConnectionStatus,
    pub is_processing: bool,
    pub bet_history: Vec<Bet>,
    pub proxy: ProxySettings,
    pub danger: DangerLevel,
    pub license: License,
    /// Held by exactly one placement from the gate until it resolves.
    /// Unlike `is_processing`, deactivation does not clear it.
    #[serde(skip)]
    pub(crate) placement_in_flight: bool,
}

impl SharedState {
    /// Default state carrying the given license.
    pub fn new(license: License) -> Self {
        Self {
            app_active: false,
            prep_type: PrepType::Instant,
            prepare_bet: false,
            connection_status: ConnectionStatus::Disconnected,
            is_processing: false,
            bet_history: Vec::new(),
            proxy: ProxySettings::default(),
            danger: DangerLevel::idle(),
            license,
            placement_in_flight: false,
        }
    }

    /// Set `appActive` and keep `connectionStatus` in step with it.
    pub fn set_app_active(&mut self, active: bool) {
        self.app_active = active;
        self.connection_status = ConnectionStatus::from(active);
    }

    /// Prepend a bet, evicting the oldest entries beyond `cap`.
    pub fn record_bet(&mut self, bet: Bet, cap: usize) {
        self.bet_history.insert(0, bet);
        self.bet_history.truncate(cap);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(License::default())
    }
}

/// A point-in-time copy of the state as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(flatten)]
    pub state: SharedState,
    /// Engine version string.
    pub version: String,
    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub timestamp: i64,
}

impl StateSnapshot {
    pub fn capture(state: &SharedState, version: &str) -> Self {
        Self {
            state: state.clone(),
            version: version.to_owned(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// The durable subset of [`SharedState`].
///
/// Every field is optional on the way in so a partial record only overrides
/// what it carries. `danger`, `connectionStatus`, `isProcessing` and
/// `license` are never part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prep_type: Option<PrepType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepare_bet: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bet_history: Option<Vec<Bet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

impl PersistedRecord {
    /// Capture the durable fields of `state`.
    pub fn from_state(state: &SharedState) -> Self {
        Self {
            app_active: Some(state.app_active),
            prep_type: Some(state.prep_type),
            prepare_bet: Some(state.prepare_bet),
            bet_history: Some(state.bet_history.clone()),
            proxy: Some(state.proxy.clone()),
        }
    }

    /// Overlay the restored fields onto `state`.
    ///
    /// Derived fields are recomputed; the history is trimmed to `cap`.
    pub fn restore_into(self, state: &mut SharedState, cap: usize) {
        if let Some(active) = self.app_active {
            state.set_app_active(active);
        }
        if let Some(prep_type) = self.prep_type {
            state.prep_type = prep_type;
        }
        if let Some(prepare) = self.prepare_bet {
            state.prepare_bet = prepare;
        }
        if let Some(mut history) = self.bet_history {
            history.truncate(cap);
            state.bet_history = history;
        }
        if let Some(proxy) = self.proxy {
            state.proxy = proxy;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use chrono::TimeZone as _;

    use super::*;

    pub(crate) fn bet(id: &str) -> Bet {
        Bet {
            id: id.to_owned(),
            created_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            event: "Primary market".into(),
            market: "Back — Value bet".into(),
            price: 2.1,
            stake: 5.0,
            currency: "USD".into(),
            prepared: false,
            mode: PrepType::Instant,
            status: "Sent".into(),
            origin: "popup".into(),
        }
    }
}
