//! Shared harness: a real websocket server on an ephemeral port.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use price_oracle::{
    AggregationPolicy, Catalog, Dispatcher, DispatcherConfig, InstrumentRegistry, TransportState,
    serve,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn catalog() -> Catalog {
    serde_json::from_value(json!({
        "products": [
            {
                "account": "prod-ltc",
                "attr_dict": { "symbol": "LTC/USD", "asset_type": "Crypto" },
                "price": [{
                    "account": "px-ltc",
                    "price_exponent": -5,
                    "publishers": ["pub-a", "pub-b"]
                }]
            },
            {
                "account": "prod-btc",
                "attr_dict": { "symbol": "BTC/USD", "asset_type": "Crypto" },
                "price": [{
                    "account": "px-btc",
                    "price_exponent": -8,
                    "publishers": ["pub-a"]
                }]
            }
        ]
    }))
    .unwrap()
}

pub async fn start(config: DispatcherConfig, default_publisher: Option<&str>) -> TestServer {
    let registry = Arc::new(InstrumentRegistry::from_catalog(&catalog()).unwrap());
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        AggregationPolicy::default(),
        config,
    ));
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let state = TransportState::new(
        Arc::clone(&dispatcher),
        default_publisher.map(str::to_string),
        shutdown.clone(),
    );
    tokio::spawn(async move {
        serve(listener, state).await.unwrap();
    });

    TestServer {
        addr,
        dispatcher,
        shutdown,
    }
}

pub async fn start_default() -> TestServer {
    start(DispatcherConfig::default(), None).await
}

pub async fn connect(server: &TestServer, publisher: Option<&str>) -> Socket {
    let url = match publisher {
        Some(key) => format!("ws://{}/?publisher={key}", server.addr),
        None => format!("ws://{}/", server.addr),
    };
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

pub async fn connect_with_header(server: &TestServer, key: &str) -> Socket {
    let mut request = format!("ws://{}/", server.addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-publisher-key", key.parse().unwrap());
    let (socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    socket
}

pub async fn send(socket: &mut Socket, payload: &Value) {
    send_text(socket, &payload.to_string()).await;
}

pub async fn send_text(socket: &mut Socket, text: &str) {
    socket.send(Message::Text(text.into())).await.unwrap();
}

/// Next text message as JSON, skipping control frames.
pub async fn recv(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Whether a message arrives within `wait`.
pub async fn quiet_for(socket: &mut Socket, wait: Duration) -> bool {
    tokio::time::timeout(wait, socket.next()).await.is_err()
}

pub fn request(id: i64, method: &str, params: &Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

pub fn update(id: i64, account: &str, price: i64, conf: u64, status: &str) -> Value {
    request(
        id,
        "update_price",
        &json!({"account": account, "price": price, "conf": conf, "status": status}),
    )
}

/// Subscribe to `price` and consume the reply and snapshot.
pub async fn subscribe_price(socket: &mut Socket, id: i64, account: &str) -> (u64, Value) {
    send(socket, &request(id, "subscribe_price", &json!({"account": account}))).await;
    let reply = recv(socket).await;
    assert_eq!(reply["id"], id);
    let subscription = reply["result"]["subscription"].as_u64().unwrap();

    let snapshot = recv(socket).await;
    assert_eq!(snapshot["method"], "notify_price");
    assert_eq!(snapshot["params"]["subscription"], subscription);
    (subscription, snapshot["params"]["result"].clone())
}

/// Wait until the dispatcher reports `count` open sessions.
pub async fn wait_for_sessions(server: &TestServer, count: usize) {
    tokio::time::timeout(RECV_TIMEOUT, async {
        while server.dispatcher.session_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session count not reached");
}
