//! JSON-RPC Protocol Integration Tests
//!
//! Drives a real websocket server and checks reply shapes, error codes
//! and batch handling.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use futures_util::SinkExt;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

use common::{connect, recv, request, send, send_text, start_default, update};

#[tokio::test]
async fn get_product_list_returns_catalog() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    send(&mut socket, &json!({"jsonrpc": "2.0", "id": 1, "method": "get_product_list"})).await;
    let reply = recv(&mut socket).await;

    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 1);
    assert_eq!(
        reply["result"],
        json!([
            {
                "account": "prod-ltc",
                "attr_dict": {"asset_type": "Crypto", "symbol": "LTC/USD"},
                "price": [{"account": "px-ltc", "price_exponent": -5, "price_type": "price"}]
            },
            {
                "account": "prod-btc",
                "attr_dict": {"asset_type": "Crypto", "symbol": "BTC/USD"},
                "price": [{"account": "px-btc", "price_exponent": -8, "price_type": "price"}]
            }
        ])
    );
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    send_text(&mut socket, "{\"jsonrpc\": \"2.0\", \"id\": ").await;
    let reply = recv(&mut socket).await;

    assert_eq!(reply["error"]["code"], -32700);
    assert_eq!(reply["error"]["message"], "parse error");
    assert_eq!(reply["id"], Value::Null);
}

#[tokio::test]
async fn invalid_utf8_binary_is_parse_error() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    socket
        .send(Message::Binary(vec![0xff, 0xfe, 0x7b].into()))
        .await
        .unwrap();

    assert_eq!(recv(&mut socket).await["error"]["code"], -32700);
}

#[tokio::test]
async fn binary_frame_is_decoded_as_text() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    let payload = json!({"jsonrpc": "2.0", "id": "b", "method": "get_product_list"});
    socket
        .send(Message::Binary(payload.to_string().into_bytes().into()))
        .await
        .unwrap();

    let reply = recv(&mut socket).await;
    assert_eq!(reply["id"], "b");
    assert!(reply["result"].is_array());
}

#[tokio::test]
async fn structural_errors() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    // Scalar top level
    send_text(&mut socket, "42").await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["id"], Value::Null);

    // Missing method echoes the id
    send(&mut socket, &json!({"jsonrpc": "2.0", "id": 7})).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["error"]["code"], -32600);
    assert_eq!(reply["id"], 7);

    // Unknown method
    send(&mut socket, &request(8, "get_prices", &json!({}))).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["error"]["code"], -32601);
    assert_eq!(reply["error"]["message"], "method not found");
    assert_eq!(reply["id"], 8);

    // Params of the wrong shape
    send(&mut socket, &request(9, "subscribe_price", &json!(["px-ltc"]))).await;
    let reply = recv(&mut socket).await;
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["error"]["message"], "invalid params");
}

#[tokio::test]
async fn string_ids_are_echoed() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    send(
        &mut socket,
        &json!({"jsonrpc": "2.0", "id": "req-1", "method": "subscribe_price",
                "params": {"account": "XRP/USD"}}),
    )
    .await;
    let reply = recv(&mut socket).await;

    assert_eq!(reply["id"], "req-1");
    assert_eq!(reply["error"]["code"], -32000);
    assert_eq!(reply["error"]["message"], "unknown symbol");
}

#[tokio::test]
async fn batch_yields_positional_array() {
    let server = start_default().await;
    let mut socket = connect(&server, Some("pub-a")).await;

    let batch = json!([
        update(1, "px-ltc", 15_000, 70, "trading"),
        {"jsonrpc": "2.0", "id": 2, "method": "bogus"},
        "not an object",
        update(4, "DOGE/USD", 1, 0, "trading"),
        {"jsonrpc": "2.0", "id": 5, "method": "get_product_list"}
    ]);
    send(&mut socket, &batch).await;

    let reply = recv(&mut socket).await;
    let items = reply.as_array().unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[0]["result"], 0);
    assert_eq!(items[0]["id"], 1);
    assert_eq!(items[1]["error"]["code"], -32601);
    assert_eq!(items[2]["error"]["code"], -32600);
    assert_eq!(items[2]["id"], Value::Null);
    assert_eq!(items[3]["error"]["code"], -32000);
    assert_eq!(items[3]["id"], 4);
    assert!(items[4]["result"].is_array());
}

#[tokio::test]
async fn empty_batch_is_single_error() {
    let server = start_default().await;
    let mut socket = connect(&server, None).await;

    send_text(&mut socket, "[]").await;
    let reply = recv(&mut socket).await;

    assert!(reply.is_object());
    assert_eq!(reply["error"]["code"], -32600);
}

#[tokio::test]
async fn publish_requires_identity() {
    let server = start_default().await;

    let mut anonymous = connect(&server, None).await;
    send(&mut anonymous, &update(1, "px-ltc", 15_000, 70, "trading")).await;
    let reply = recv(&mut anonymous).await;
    assert_eq!(reply["error"]["code"], -32001);
    assert_eq!(reply["error"]["message"], "missing publish permission");

    // Authorized for px-ltc only
    let mut publisher = common::connect_with_header(&server, "pub-b").await;
    send(&mut publisher, &update(2, "BTC/USD", 3_000_000, 100, "trading")).await;
    assert_eq!(recv(&mut publisher).await["error"]["code"], -32001);

    send(&mut publisher, &update(3, "LTC/USD", 15_000, 70, "trading")).await;
    assert_eq!(recv(&mut publisher).await["result"], 0);
}

#[tokio::test]
async fn default_publisher_applies_to_anonymous_sessions() {
    let server = common::start(price_oracle::DispatcherConfig::default(), Some("pub-a")).await;
    let mut socket = connect(&server, None).await;

    send(&mut socket, &update(1, "px-btc", 3_000_000, 100, "trading")).await;
    assert_eq!(recv(&mut socket).await["result"], 0);
    assert_eq!(
        server.dispatcher.aggregator().read("px-btc").unwrap().price,
        3_000_000
    );
}
