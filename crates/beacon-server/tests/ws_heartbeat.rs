use beacon_db::{create_pool, run_migrations, DbRuntimeSettings};
use beacon_server::{app, config::Config, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

fn fast_heartbeat_config() -> Config {
    let mut config = Config::default();
    config.session.heartbeat_interval_secs = 1;
    config.session.max_missed_heartbeats = 1;
    config
}

async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        run_migrations(&conn).unwrap();
    }

    let state = AppState::new(pool, config);
    let app = app(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn silent_session_is_disconnected_after_missed_heartbeats() {
    let (addr, state) = start_server(fast_heartbeat_config()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    let subscribe = json!({"op": "subscribe", "channel": "incidents"});
    ws.send(Message::Text(subscribe.to_string().into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.session_count().await, 1);

    // Never answer anything. The server sends a heartbeat at ~1s and closes
    // the session at ~2s when it is still unanswered.
    let mut saw_heartbeat = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let next = tokio::time::timeout_at(deadline, ws.next()).await;
        match next {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                if frame["type"] == "heartbeat" {
                    saw_heartbeat = true;
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) => break,
            Err(_) => panic!("server did not disconnect a silent session in time"),
        }
    }

    assert!(saw_heartbeat, "server should probe before disconnecting");

    // Disconnect must clear the session and its subscriptions.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(state.registry.session_count().await, 0);
    assert_eq!(state.registry.subscriber_count("incidents").await, 0);
}

#[tokio::test]
async fn acked_heartbeats_keep_the_session_alive() {
    let (addr, state) = start_server(fast_heartbeat_config()).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Answer three heartbeats in a row; the session must outlive several
    // heartbeat windows.
    for _ in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("expected a heartbeat frame")
            .expect("connection closed unexpectedly")
            .expect("transport error");
        if let Message::Text(text) = msg {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "heartbeat");
            let ack = json!({"op": "heartbeat_ack"});
            ws.send(Message::Text(ack.to_string().into())).await.unwrap();
        }
    }

    assert_eq!(
        state.registry.session_count().await,
        1,
        "an acking session must stay registered"
    );
}
