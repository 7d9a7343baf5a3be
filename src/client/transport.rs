use async_tungstenite::tungstenite::client::IntoClientRequest;
use async_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use async_tungstenite::tungstenite::http::{HeaderValue, Uri};
use async_tungstenite::tungstenite::{self, Message as WsMessage};
use async_tungstenite::WebSocketStream;
use bytes::{Buf, BufMut, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use smol::io::{AsyncReadExt, AsyncWriteExt};
use smol::net;
use tracing::{debug, trace};

use super::error::{WampError, WampResult};

/**************************************************************************/
/**************************************************************************/

const MAGIC: u8 = 0x7f;
const MAX_LENGTH_EXPONENT: u8 = 0xf0; // 2^24 bytes = 16M
const SERIALIZER: u8 = 0x01; // JSON serializer

const RAWSOCKET_MESSAGE_TYPE_REGULAR: u8 = 0;
const RAWSOCKET_MESSAGE_TYPE_PING: u8 = 1;
const RAWSOCKET_MESSAGE_TYPE_PONG: u8 = 2;

const RAWSOCKET_HEADER_LEN: usize = 4;
const RAWSOCKET_MAX_FRAME: usize = 0x00ff_ffff;

// Sent by the client to open a rawsocket connection: magic byte, then the
// largest message we accept and the serializer we speak.
const HANDSHAKE: [u8; 4] = [MAGIC, MAX_LENGTH_EXPONENT | SERIALIZER, 0, 0];

/// Subprotocol requested during the websocket upgrade.
pub const WEBSOCKET_PROTOCOL: &str = "wamp.2.json";

const READ_CHUNK: usize = 4096;

type WsStream = WebSocketStream<net::TcpStream>;

/// Where and how to reach the router, derived from its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    WebSocket { url: String, address: String },
    RawSocket { address: String },
}

impl Endpoint {
    pub fn parse(url: &str) -> WampResult<Endpoint> {
        let uri: Uri = url
            .parse()
            .map_err(|_| WampError::InvalidUrl(url.to_string()))?;
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| WampError::InvalidUrl(url.to_string()))?;
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| WampError::InvalidUrl(url.to_string()))?;

        match scheme {
            "ws" => {
                let port = uri.port_u16().unwrap_or(80);
                Ok(Endpoint::WebSocket {
                    url: url.to_string(),
                    address: format!("{host}:{port}"),
                })
            }
            "rs" | "tcp" => {
                let port = uri
                    .port_u16()
                    .ok_or_else(|| WampError::InvalidUrl(format!("{url} has no port")))?;
                Ok(Endpoint::RawSocket {
                    address: format!("{host}:{port}"),
                })
            }
            other => Err(WampError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(Vec<u8>),
    /// A rawsocket ping; the payload has to be echoed back in a pong.
    Ping(Vec<u8>),
}

/// Write half of a connection to the router.
pub enum TransportSender {
    WebSocket(SplitSink<WsStream, WsMessage>),
    RawSocket {
        stream: net::TcpStream,
        max_length: usize,
    },
}

/// Read half of a connection to the router.
pub enum TransportReceiver {
    WebSocket(SplitStream<WsStream>),
    RawSocket {
        stream: net::TcpStream,
        buffer: BytesMut,
    },
}

pub struct Transport {
    pub sender: TransportSender,
    pub receiver: TransportReceiver,
}

impl Transport {
    pub async fn connect(url: &str) -> WampResult<Transport> {
        match Endpoint::parse(url)? {
            Endpoint::WebSocket { url, address } => Self::connect_websocket(&url, &address).await,
            Endpoint::RawSocket { address } => Self::connect_rawsocket(&address).await,
        }
    }

    async fn connect_websocket(url: &str, address: &str) -> WampResult<Transport> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(WEBSOCKET_PROTOCOL),
        );

        debug!(address, "opening websocket");
        let stream = net::TcpStream::connect(address).await?;
        let (socket, _response) = async_tungstenite::client_async(request, stream).await?;
        let (sink, stream) = socket.split();

        Ok(Transport {
            sender: TransportSender::WebSocket(sink),
            receiver: TransportReceiver::WebSocket(stream),
        })
    }

    async fn connect_rawsocket(address: &str) -> WampResult<Transport> {
        debug!(address, "opening rawsocket");
        let mut stream = net::TcpStream::connect(address).await?;
        let max_length = negotiate(&mut stream).await?;
        debug!(max_length, "rawsocket handshake complete");

        Ok(Transport {
            sender: TransportSender::RawSocket {
                stream: stream.clone(),
                max_length,
            },
            receiver: TransportReceiver::RawSocket {
                stream,
                buffer: BytesMut::with_capacity(READ_CHUNK),
            },
        })
    }

    pub fn split(self) -> (TransportSender, TransportReceiver) {
        (self.sender, self.receiver)
    }
}

// We start things off by doing the rawsocket handshake, which tells us
// whether the peer is a router, agrees on the serializer and gives us the
// largest message the router accepts.
async fn negotiate(stream: &mut net::TcpStream) -> WampResult<usize> {
    stream.write_all(&HANDSHAKE).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    check_handshake_reply(reply)
}

/// Validates the router's handshake reply and returns the largest message
/// it accepts.
pub fn check_handshake_reply(reply: [u8; 4]) -> WampResult<usize> {
    if reply[0] != MAGIC {
        return Err(WampError::Handshake("peer is not a rawsocket router".into()));
    }

    // Success is LLLL SSSS; failure is EEEE 0000 with the error code on top.
    let upper = reply[1] >> 4;
    let serializer = reply[1] & 0x0f;
    if serializer == 0 {
        let reason = match upper {
            1 => "serializer unsupported",
            2 => "maximum message length unacceptable",
            3 => "use of reserved bits",
            4 => "maximum connection count reached",
            _ => "unknown error",
        };
        return Err(WampError::Handshake(reason.into()));
    }
    if serializer != SERIALIZER {
        return Err(WampError::Handshake("router did not agree to use JSON".into()));
    }

    Ok(1usize << (9 + upper as usize))
}

pub fn encode_frame(kind: u8, payload: &[u8], max_length: usize) -> WampResult<BytesMut> {
    let limit = max_length.min(RAWSOCKET_MAX_FRAME);
    if payload.len() > limit {
        return Err(WampError::MessageTooLarge {
            size: payload.len(),
            limit,
        });
    }

    let mut frame = BytesMut::with_capacity(RAWSOCKET_HEADER_LEN + payload.len());
    frame.put_u8(kind);
    frame.put_uint(payload.len() as u64, 3);
    frame.put_slice(payload);
    Ok(frame)
}

/// Pulls one complete frame out of `buffer`, leaving partial data in place.
/// Pongs are consumed silently.
pub fn decode_frame(buffer: &mut BytesMut) -> WampResult<Option<Incoming>> {
    loop {
        if buffer.len() < RAWSOCKET_HEADER_LEN {
            return Ok(None);
        }
        let kind = buffer[0];
        let length = (&buffer[1..RAWSOCKET_HEADER_LEN]).get_uint(3) as usize;
        if buffer.len() < RAWSOCKET_HEADER_LEN + length {
            return Ok(None);
        }

        buffer.advance(RAWSOCKET_HEADER_LEN);
        let payload = buffer.split_to(length).to_vec();

        match kind {
            RAWSOCKET_MESSAGE_TYPE_REGULAR => return Ok(Some(Incoming::Message(payload))),
            RAWSOCKET_MESSAGE_TYPE_PING => return Ok(Some(Incoming::Ping(payload))),
            RAWSOCKET_MESSAGE_TYPE_PONG => continue,
            other => {
                return Err(WampError::Protocol(format!(
                    "unknown rawsocket frame type {other}"
                )))
            }
        }
    }
}

impl TransportSender {
    pub async fn message_send(&mut self, message: &Value) -> WampResult<()> {
        trace!(%message, "sending");
        match self {
            TransportSender::WebSocket(sink) => {
                let text = serde_json::to_string(message)?;
                sink.send(WsMessage::text(text)).await?;
            }
            TransportSender::RawSocket { stream, max_length } => {
                let buf = serde_json::to_vec(message)?;
                let frame = encode_frame(RAWSOCKET_MESSAGE_TYPE_REGULAR, &buf, *max_length)?;
                stream.write_all(&frame).await?;
            }
        }
        Ok(())
    }

    /// Answers a rawsocket ping. Websocket pings are answered by the
    /// websocket layer itself.
    pub async fn pong(&mut self, payload: &[u8]) -> WampResult<()> {
        if let TransportSender::RawSocket { stream, .. } = self {
            let frame = encode_frame(RAWSOCKET_MESSAGE_TYPE_PONG, payload, RAWSOCKET_MAX_FRAME)?;
            stream.write_all(&frame).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> WampResult<()> {
        match self {
            TransportSender::WebSocket(sink) => match sink.close().await {
                Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
                Err(err) => Err(err.into()),
            },
            TransportSender::RawSocket { stream, .. } => {
                stream.shutdown(std::net::Shutdown::Write)?;
                Ok(())
            }
        }
    }
}

impl TransportReceiver {
    /// Waits for the next message. `None` means the router closed the
    /// connection.
    pub async fn message_get(&mut self) -> WampResult<Option<Incoming>> {
        match self {
            TransportReceiver::WebSocket(stream) => loop {
                match stream.next().await {
                    None => return Ok(None),
                    Some(Ok(WsMessage::Text(text))) => {
                        return Ok(Some(Incoming::Message(text.into_bytes())))
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        return Ok(Some(Incoming::Message(data)))
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "websocket closed by router");
                        return Ok(None);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(None),
                    Some(Err(err)) => return Err(err.into()),
                }
            },
            TransportReceiver::RawSocket { stream, buffer } => loop {
                if let Some(incoming) = decode_frame(buffer)? {
                    return Ok(Some(incoming));
                }

                let mut chunk = [0u8; READ_CHUNK];
                let read_bytes = stream.read(&mut chunk).await?;
                if read_bytes == 0 {
                    if !buffer.is_empty() {
                        debug!(pending = buffer.len(), "connection closed mid-frame");
                    }
                    return Ok(None);
                }
                buffer.extend_from_slice(&chunk[..read_bytes]);
            },
        }
    }
}
