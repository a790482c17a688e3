//! Stdio host for the betting engine.
//!
//! Reads one JSON request per line from stdin and writes JSON lines to
//! stdout: responses, `stateUpdate` pushes, and notification events. Logs go
//! to stderr. Set `BETFLOW_DATA_DIR` to persist state to disk; without it,
//! state lives in memory only.

use std::path::PathBuf;

use betflow::protocol::{Request, Response};
use betflow::{
    CommandError, Engine, EngineConfig, FileStorage, MemoryStorage, Notification, Notifier,
    Shortcut, Sound,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::EnvFilter;

/// Notifier that turns notifications into output lines.
struct ChannelNotifier {
    out: mpsc::UnboundedSender<Value>,
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        let _ = self.out.send(json!({
            "type": "notification",
            "title": notification.title,
            "message": notification.message,
            "sound": notification.sound.asset(),
        }));
    }

    fn play(&self, sound: Sound) {
        let _ = self.out.send(json!({"type": "sound", "sound": sound.asset()}));
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("betflow=info,info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

/// Queue `message` for stdout. Returns `false` once the writer is gone.
fn emit<T: Serialize>(out: &mpsc::UnboundedSender<Value>, message: &T) -> bool {
    match serde_json::to_value(message) {
        Ok(value) => out.send(value).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode output line");
            true
        }
    }
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<Value>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let mut line = serde_json::to_vec(&value)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn handle_request(engine: Engine, request: Request) -> Response {
    let Request { kind, payload, id } = request;
    if kind != betflow::protocol::SHORTCUT_REQUEST {
        return Response::from_result(id, engine.execute(&kind, payload).await);
    }

    let name = payload.get("name").and_then(Value::as_str).unwrap_or_default();
    match Shortcut::parse(name) {
        Some(shortcut) => {
            engine.shortcut(shortcut).await;
            Response::success(id, Value::Null)
        }
        None => Response::failure(id, &CommandError::UnknownCommand(format!("shortcut {name}"))),
    }
}

/// Join every request task that has already finished.
fn reap(requests: &mut JoinSet<()>) {
    while let Some(joined) = requests.try_join_next() {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "request task failed");
    }
}

/// Serve requests from `input` until it ends, then shut the engine down.
///
/// Returns once every response and every state update, including the
/// final one from shutdown, has been queued on `out`.
async fn serve(
    engine: Engine,
    input: impl AsyncRead + Unpin,
    out: mpsc::UnboundedSender<Value>,
) -> std::io::Result<()> {
    let forwarder = match engine.subscribe().await {
        Ok(mut subscription) => {
            let out = out.clone();
            tracing::debug!(subscriber = %subscription.id(), "forwarding state updates");
            Some(tokio::spawn(async move {
                while let Some(push) = subscription.recv().await {
                    if !emit(&out, &push) {
                        break;
                    }
                }
            }))
        }
        Err(e) => {
            tracing::error!(error = %e, "could not subscribe to state updates");
            None
        }
    };

    let mut requests = JoinSet::new();
    let mut lines = LinesStream::new(BufReader::new(input).lines());
    while let Some(line) = lines.next().await {
        reap(&mut requests);
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request = match Request::from_line(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "rejected request line");
                emit(&out, &Response::failure(None, &e));
                continue;
            }
        };

        let engine = engine.clone();
        let out = out.clone();
        requests.spawn(async move {
            let response = handle_request(engine, request).await;
            emit(&out, &response);
        });
    }

    while let Some(joined) = requests.join_next().await {
        log_join(joined);
    }

    engine.shutdown().await;
    // Dropping the last engine handle stops the store, which ends the
    // subscription once its queued pushes are drained.
    drop(engine);
    if let Some(forwarder) = forwarder
        && let Err(e) = forwarder.await
    {
        tracing::error!(error = %e, "state forwarder failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(write_lines(out_rx));

    let builder = Engine::builder()
        .config(EngineConfig::from_env())
        .notifier(ChannelNotifier {
            out: out_tx.clone(),
        });
    let builder = match std::env::var_os("BETFLOW_DATA_DIR") {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            tracing::info!(dir = %dir.display(), "persisting state to disk");
            builder.storage(FileStorage::new(dir))
        }
        None => {
            tracing::info!("BETFLOW_DATA_DIR not set; state will not survive restarts");
            builder.storage(MemoryStorage::new())
        }
    };
    let engine = builder.start().await;

    let served = serve(engine, tokio::io::stdin(), out_tx).await;

    let written = match writer.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    };
    served.and(written)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn run_session(input: &'static [u8]) -> Vec<Value> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let engine = Engine::builder()
            .config(EngineConfig {
                placement_latency: Duration::from_millis(5),
                ..EngineConfig::default()
            })
            .notifier(ChannelNotifier {
                out: out_tx.clone(),
            })
            .start()
            .await;

        serve(engine, input, out_tx).await.unwrap();

        // Every sender is gone once `serve` returns, so this drains and ends.
        let mut lines = Vec::new();
        while let Some(value) = out_rx.recv().await {
            lines.push(value);
        }
        lines
    }

    #[tokio::test]
    async fn shutdown_update_is_delivered_before_exit() {
        let lines =
            run_session(b"{\"type\":\"toggle-app\",\"payload\":{\"active\":true},\"id\":1}\n").await;

        let response = lines
            .iter()
            .find(|v| v["id"] == json!(1))
            .expect("response for request 1");
        assert_eq!(response["success"], json!(true));
        assert_eq!(response["data"], json!(true));

        let last_update = lines
            .iter()
            .rev()
            .find(|v| v["type"] == json!("stateUpdate"))
            .expect("state updates were forwarded");
        assert_eq!(last_update["state"]["appActive"], json!(true));
        assert_eq!(last_update["state"]["danger"]["label"], json!("Idle"));
    }

    #[tokio::test]
    async fn every_request_gets_a_response() {
        let lines = run_session(
            b"{\"type\":\"get-state\",\"id\":\"a\"}\n\
              \n\
              not json\n\
              {\"type\":\"shortcut\",\"payload\":{\"name\":\"danger-moment\"},\"id\":\"b\"}\n\
              {\"type\":\"place-bet\",\"id\":\"c\"}\n",
        )
        .await;

        let by_id = |id: &str| {
            lines
                .iter()
                .find(|v| v["id"] == json!(id))
                .unwrap_or_else(|| panic!("no response for {id}"))
        };
        assert_eq!(by_id("a")["success"], json!(true));
        assert_eq!(by_id("b")["success"], json!(true));
        assert_eq!(by_id("c")["code"], json!("not_active"));

        let malformed = lines
            .iter()
            .filter(|v| v["code"] == json!("invalid_payload") && v.get("id").is_none())
            .count();
        assert_eq!(malformed, 1);
        assert!(lines.iter().any(|v| v["type"] == json!("notification")));
    }

    #[tokio::test]
    async fn reap_joins_finished_request_tasks() {
        let mut requests = JoinSet::new();
        for _ in 0..50 {
            requests.spawn(async {});
        }
        while !requests.is_empty() {
            tokio::task::yield_now().await;
            reap(&mut requests);
        }
        assert!(requests.is_empty());
    }
}
