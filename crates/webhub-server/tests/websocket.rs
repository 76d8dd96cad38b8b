mod common;

use common::hub;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use webhub_core::HandlerError;
use webhub_server::Hub;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve(hub: &Hub) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(hub.clone().serve(listener));
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, response) = connect_async(format!("ws://{addr}/things/lamp")).await.unwrap();
    assert_eq!(response.status(), 101);
    client
}

async fn recv(client: &mut Client) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .unwrap();
    match message {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

async fn send(client: &mut Client, text: &str) {
    client.send(Message::Text(text.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_state_on_connect_and_fan_out() {
    let (hub, thing) = hub();
    let addr = serve(&hub).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    let state = json!({"state": {"on": false, "brightness": 50, "serial": "L-1"}});
    assert_eq!(recv(&mut first).await, state);
    assert_eq!(recv(&mut second).await, state);

    send(&mut first, r#"{"id": "w1", "property": "brightness", "data": 75}"#).await;
    assert_eq!(recv(&mut first).await, json!({"property": "brightness", "data": 75}));
    assert_eq!(recv(&mut first).await, json!({"id": "w1", "status": 200}));
    assert_eq!(recv(&mut second).await, json!({"property": "brightness", "data": 75}));

    send(&mut second, r#"{"id": "w2", "state": {"on": true, "brightness": 5}}"#).await;
    let push = json!({"state": {"on": true, "brightness": 5}});
    assert_eq!(recv(&mut second).await, push);
    assert_eq!(recv(&mut second).await, json!({"id": "w2", "status": 200}));
    assert_eq!(recv(&mut first).await, push);

    assert_eq!(thing.read("on").unwrap(), json!(true));
}

#[tokio::test]
async fn test_rejections_stay_with_sender() {
    let (hub, _thing) = hub();
    let addr = serve(&hub).await;

    let mut client = connect(addr).await;
    let mut watcher = connect(addr).await;
    recv(&mut client).await;
    recv(&mut watcher).await;

    send(&mut client, "this is not json").await;
    assert_eq!(
        recv(&mut client).await,
        json!({"id": "unknown", "status": 444, "description": "badly formed client message"})
    );

    send(&mut client, r#"{"id": "r1", "property": "serial", "data": "L-9"}"#).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["id"], "r1");
    assert_eq!(reply["status"], 405);

    send(&mut client, r#"{"id": "r2", "property": "brightness", "data": 500}"#).await;
    assert_eq!(recv(&mut client).await["status"], 400);

    // The connection survives; the watcher only sees the successful write.
    send(&mut client, r#"{"id": "r3", "property": "on", "data": true}"#).await;
    assert_eq!(recv(&mut client).await, json!({"property": "on", "data": true}));
    assert_eq!(recv(&mut client).await["status"], 200);
    assert_eq!(recv(&mut watcher).await, json!({"property": "on", "data": true}));
}

#[tokio::test]
async fn test_action_and_event() {
    let (hub, thing) = hub();
    thing
        .set_action_handler("fade", |input: Option<Value>| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let steps = input.and_then(|v| v.as_u64()).unwrap_or(0);
            Ok::<_, HandlerError>(Some(json!(format!("faded in {steps} steps"))))
        })
        .unwrap();
    let addr = serve(&hub).await;

    let mut client = connect(addr).await;
    recv(&mut client).await;

    send(&mut client, r#"{"id": "a1", "action": "fade", "input": 4}"#).await;
    assert_eq!(
        recv(&mut client).await,
        json!({"id": "a1", "status": 200, "output": "faded in 4 steps"})
    );

    send(&mut client, r#"{"id": "a2", "action": "reset"}"#).await;
    assert_eq!(recv(&mut client).await, json!({"id": "a2", "status": 200}));

    send(&mut client, r#"{"id": "a3", "action": "fly"}"#).await;
    assert_eq!(recv(&mut client).await["status"], 404);

    thing.emit("overheated", Some(json!(90.5))).unwrap();
    assert_eq!(recv(&mut client).await, json!({"event": "overheated", "data": 90.5}));
}

#[tokio::test]
async fn test_withdraw_closes_connections() {
    let (hub, thing) = hub();
    let addr = serve(&hub).await;

    let mut client = connect(addr).await;
    recv(&mut client).await;

    hub.withdraw("lamp");
    let next = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out");
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));
    assert_eq!(thing.channel_count(webhub_core::ChannelKind::WebSocket), 0);

    let refused = connect_async(format!("ws://{addr}/things/lamp")).await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn test_client_close() {
    let (hub, thing) = hub();
    let addr = serve(&hub).await;

    let mut client = connect(addr).await;
    recv(&mut client).await;
    client.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while thing.channel_count(webhub_core::ChannelKind::WebSocket) != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("channel never detached");
}

#[tokio::test]
async fn test_events_reach_every_client_in_order() {
    let (hub, thing) = hub();
    let addr = serve(&hub).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    recv(&mut first).await;
    recv(&mut second).await;

    thing.emit("overheated", Some(json!(80))).unwrap();
    thing.emit("overheated", Some(json!(95))).unwrap();
    let expected = [
        json!({"event": "overheated", "data": 80}),
        json!({"event": "overheated", "data": 95}),
    ];
    for client in [&mut first, &mut second] {
        assert_eq!(recv(client).await, expected[0]);
        assert_eq!(recv(client).await, expected[1]);
    }
}
