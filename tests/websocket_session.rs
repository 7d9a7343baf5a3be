//! Runs the subscriber against an in-process router speaking WAMP over
//! WebSocket.

use std::sync::{Arc, Mutex};
use std::thread;

use async_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use async_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use async_tungstenite::tungstenite::http::HeaderValue;
use async_tungstenite::tungstenite::Message;
use async_tungstenite::WebSocketStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use smol::net::{TcpListener, TcpStream};

use wamp_subscribe::runner::ApplicationRunner;
use wamp_subscribe::subscriber::SubscribeComponent;

mod common;

use common::SharedBuffer;

struct RouterConn {
    socket: WebSocketStream<TcpStream>,
}

impl RouterConn {
    /// Accepts one client and returns the subprotocols it asked for.
    async fn accept(listener: &TcpListener) -> (RouterConn, Option<String>) {
        let (stream, _) = listener.accept().await.unwrap();

        let requested = Arc::new(Mutex::new(None));
        let seen = requested.clone();
        let callback = move |request: &Request,
                             mut response: Response|
              -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = request
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("wamp.2.json"));
            Ok(response)
        };
        let socket = async_tungstenite::accept_hdr_async(stream, callback).await.unwrap();

        let protocol = requested.lock().unwrap().take();
        (RouterConn { socket }, protocol)
    }

    async fn recv(&mut self) -> Value {
        loop {
            match self.socket.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Binary(bytes) => return serde_json::from_slice(&bytes).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_text(&mut self, message: Value) {
        self.socket.send(Message::text(message.to_string())).await.unwrap();
    }

    async fn send_binary(&mut self, message: Value) {
        let payload = serde_json::to_vec(&message).unwrap();
        self.socket.send(Message::binary(payload)).await.unwrap();
    }
}

#[test]
fn subscriber_over_websocket_accepts_text_and_binary_frames() {
    let (listener, url) = common::bind("ws", "/ws");

    let router = thread::spawn(move || {
        smol::block_on(async {
            let (mut conn, protocol) = RouterConn::accept(&listener).await;
            assert!(protocol.unwrap().contains("wamp.2.json"));

            let hello = conn.recv().await;
            assert_eq!(hello[0], json!(1));
            assert_eq!(hello[1], json!("realm1"));
            conn.send_text(json!([2, 4321, { "roles": { "broker": {} } }])).await;

            let subscribe = conn.recv().await;
            assert_eq!(subscribe[0], json!(32));
            assert_eq!(subscribe[3], json!("com.myapp.topic1"));
            conn.send_binary(json!([33, subscribe[1].clone(), 7001])).await;

            conn.send_text(json!([36, 7001, 1, {}, ["text"], { "n": 1 }])).await;
            conn.send_binary(json!([36, 7001, 2, {}, ["binary"]])).await;

            conn.send_text(json!([6, {}, "wamp.close.system_shutdown"])).await;
            conn.recv().await
        })
    });

    let out = SharedBuffer::default();
    ApplicationRunner::new(url, "realm1")
        .run(SubscribeComponent::with_output(out.clone()))
        .unwrap();

    assert_eq!(router.join().unwrap(), json!([6, {}, "wamp.close.goodbye_and_out"]));
    assert_eq!(
        out.contents(),
        "args: [\"text\"]\nkwargs: {\"n\":1}\n\nargs: [\"binary\"]\nkwargs: {}\n\n"
    );
}

#[test]
fn close_frame_from_router_ends_the_run() {
    let (listener, url) = common::bind("ws", "/ws");

    let router = thread::spawn(move || {
        smol::block_on(async {
            let (mut conn, _) = RouterConn::accept(&listener).await;
            conn.recv().await;
            conn.send_text(json!([2, 4322, {}])).await;

            let subscribe = conn.recv().await;
            conn.send_text(json!([33, subscribe[1].clone(), 7002])).await;
            conn.send_text(json!([36, 7002, 1, {}, ["last"]])).await;

            conn.socket.close(None).await.unwrap();
        })
    });

    let out = SharedBuffer::default();
    ApplicationRunner::new(url, "realm1")
        .run(SubscribeComponent::with_output(out.clone()))
        .unwrap();
    router.join().unwrap();

    assert_eq!(out.contents(), "args: [\"last\"]\nkwargs: {}\n\n");
}
