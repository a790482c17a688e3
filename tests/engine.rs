//! End-to-end behaviour of the engine through its public API.

use std::time::Duration;

use betflow::{
    CommandError, ConnectionStatus, DangerLevel, Dice, Engine, EngineConfig, FileStorage,
    MemoryStorage, PrepType, Push, RISK_TABLE, RecordingNotifier, StateStorage,
};
use serde_json::{Value, json};

const KEY: &str = "betState";

fn fast_config() -> EngineConfig {
    EngineConfig {
        placement_latency: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

async fn start(storage: MemoryStorage) -> Engine {
    Engine::builder()
        .config(fast_config())
        .storage(storage)
        .notifier(RecordingNotifier::new())
        .dice(Dice::seeded(42))
        .start()
        .await
}

fn is_table_level(level: &DangerLevel) -> bool {
    RISK_TABLE
        .iter()
        .any(|(label, command, safe)| level.label == *label && level.command == *command && level.safe == *safe)
}

#[tokio::test(start_paused = true)]
async fn late_subscriber_gets_exactly_current_state() {
    let engine = start(MemoryStorage::new()).await;
    engine.set_prep_type(PrepType::Danger).await.unwrap();

    let mut sub = engine.subscribe().await.unwrap();
    let first = sub.recv().await.expect("initial push");
    assert_eq!(first.snapshot().state.prep_type, PrepType::Danger);
    assert!(sub.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn push_wire_form_is_state_update() {
    let engine = start(MemoryStorage::new()).await;
    let mut sub = engine.subscribe().await.unwrap();
    let push = sub.recv().await.unwrap();

    let wire = serde_json::to_value(&push).unwrap();
    assert_eq!(wire["type"], json!("stateUpdate"));
    assert_eq!(wire["state"]["appActive"], json!(false));
    assert_eq!(wire["state"]["connectionStatus"], json!("disconnected"));
    assert_eq!(wire["state"]["danger"]["label"], json!("Idle"));
    assert!(wire["state"]["version"].is_string());
}

#[tokio::test(start_paused = true)]
async fn every_mutation_is_broadcast_to_all_subscribers() {
    let engine = start(MemoryStorage::new()).await;
    let mut a = engine.subscribe().await.unwrap();
    let mut b = engine.subscribe().await.unwrap();
    a.recv().await.unwrap();
    b.recv().await.unwrap();

    engine.set_prepare_bet(true).await.unwrap();

    for sub in [&mut a, &mut b] {
        let Push::StateUpdate { state } = sub.recv().await.unwrap();
        assert!(state.state.prepare_bet);
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_subscriber_does_not_block_others() {
    let engine = start(MemoryStorage::new()).await;
    let dropped = engine.subscribe().await.unwrap();
    let mut kept = engine.subscribe().await.unwrap();
    kept.recv().await.unwrap();
    drop(dropped);

    engine.set_prep_type(PrepType::Danger).await.unwrap();
    let push = kept.recv().await.unwrap();
    assert_eq!(push.snapshot().state.prep_type, PrepType::Danger);
}

#[tokio::test(start_paused = true)]
async fn mutations_are_persisted_without_ephemeral_fields() {
    let storage = MemoryStorage::new();
    let engine = start(storage.clone()).await;

    engine.toggle_app(true).await.unwrap();
    engine.place_bet("popup").await.unwrap();
    engine
        .execute("update-proxy", json!({"protocol": "socks", "ip": "10.0.0.1", "port": 1080}))
        .await
        .unwrap();

    let record = storage.get(KEY).expect("record saved");
    assert_eq!(record["appActive"], json!(true));
    assert_eq!(record["betHistory"].as_array().map(Vec::len), Some(1));
    assert_eq!(record["proxy"]["protocol"], json!("socks"));
    assert_eq!(record["proxy"]["port"], json!("1080"));
    for ephemeral in ["danger", "connectionStatus", "isProcessing", "license"] {
        assert!(record.get(ephemeral).is_none(), "{ephemeral} must not be persisted");
    }
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn partial_record_overrides_only_its_fields() {
    let storage = MemoryStorage::with_entry(KEY, json!({"prepType": "danger"}));
    let engine = start(storage).await;

    let state = engine.get_state().await.unwrap().state;
    assert_eq!(state.prep_type, PrepType::Danger);
    assert!(!state.app_active);
    assert!(!state.prepare_bet);
    assert!(state.bet_history.is_empty());
    assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
    assert_eq!(state.danger, DangerLevel::idle());
}

#[tokio::test(start_paused = true)]
async fn malformed_record_falls_back_to_defaults() {
    let storage = MemoryStorage::with_entry(KEY, json!("garbage"));
    let engine = start(storage).await;
    let state = engine.get_state().await.unwrap().state;
    assert!(!state.app_active);
    assert_eq!(state.prep_type, PrepType::Instant);
}

#[tokio::test(start_paused = true)]
async fn restored_active_state_rearms_risk_simulator() {
    let storage = MemoryStorage::with_entry(KEY, json!({"appActive": true}));
    let engine = start(storage).await;

    let mut sub = engine.subscribe().await.unwrap();
    let mut saw_draw = false;
    for _ in 0..3 {
        let push = sub.recv().await.unwrap();
        let state = &push.snapshot().state;
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        if is_table_level(&state.danger) {
            saw_draw = true;
            break;
        }
    }
    assert!(saw_draw, "risk simulator should draw after restart");

    engine.toggle_app(false).await.unwrap();
    assert_eq!(engine.get_state().await.unwrap().state.danger, DangerLevel::idle());
}

#[tokio::test(start_paused = true)]
async fn deactivation_stops_risk_updates() {
    let engine = start(MemoryStorage::new()).await;
    engine.toggle_app(true).await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    engine.toggle_app(false).await.unwrap();

    let mut sub = engine.subscribe().await.unwrap();
    let initial = sub.recv().await.unwrap();
    assert_eq!(initial.snapshot().state.danger, DangerLevel::idle());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn file_storage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = Engine::builder()
        .config(fast_config())
        .storage(FileStorage::new(dir.path()))
        .notifier(RecordingNotifier::new())
        .start()
        .await;
    first.set_prepare_bet(true).await.unwrap();
    first.set_prep_type(PrepType::Danger).await.unwrap();
    first.toggle_app(true).await.unwrap();
    let bet = first.place_bet("popup").await.unwrap();
    first.toggle_app(false).await.unwrap();
    first.shutdown().await;
    drop(first);

    let on_disk = FileStorage::new(dir.path()).load(KEY).unwrap().expect("record on disk");
    assert_eq!(on_disk["prepType"], json!("danger"));

    let second = Engine::builder()
        .config(fast_config())
        .storage(FileStorage::new(dir.path()))
        .notifier(RecordingNotifier::new())
        .start()
        .await;
    let state = second.get_state().await.unwrap().state;
    assert!(state.prepare_bet);
    assert_eq!(state.prep_type, PrepType::Danger);
    assert!(!state.app_active);
    assert_eq!(state.bet_history.len(), 1);
    assert_eq!(state.bet_history[0].id, bet.id);
    assert_eq!(state.bet_history[0].mode, PrepType::Danger);
    assert!(state.bet_history[0].prepared);
}

#[tokio::test(start_paused = true)]
async fn execute_reports_error_codes() {
    let engine = start(MemoryStorage::new()).await;

    let err = engine.execute("place-bet", Value::Null).await.unwrap_err();
    assert!(matches!(err, CommandError::NotActive));
    assert_eq!(err.code(), "not_active");

    let err = engine.execute("toggle-app", json!("yes")).await.unwrap_err();
    assert_eq!(err.code(), "invalid_payload");

    let err = engine.execute("reload", Value::Null).await.unwrap_err();
    assert_eq!(err.to_string(), "Unknown message type: reload");
}

#[tokio::test(start_paused = true)]
async fn place_bet_returns_bet_in_wire_form() {
    let engine = start(MemoryStorage::new()).await;
    engine.execute("toggle-app", json!({"active": true})).await.unwrap();

    let bet = engine.execute("place-bet", json!({"origin": "popup"})).await.unwrap();
    assert!(bet["id"].as_str().is_some_and(|id| id.starts_with("BET-")));
    assert_eq!(bet["origin"], json!("popup"));
    assert_eq!(bet["currency"], json!("USD"));
    assert_eq!(bet["mode"], json!("instant"));
    assert!(bet["createdAt"].is_string());
    engine.shutdown().await;
}
