use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_mutex::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

pub mod error;
pub mod message;
pub mod transport;

pub use error::{WampError, WampResult};
pub use message::Event;

use message::{HelloDetails, Message};
use transport::{Incoming, Transport, TransportReceiver, TransportSender};

/// Callback invoked once per event delivered to a subscription.
///
/// An error aborts the handling of that one event; the subscription stays
/// active.
pub type EventHandler = Box<dyn FnMut(Event) -> WampResult<()> + Send>;

type SharedHandler = Arc<StdMutex<EventHandler>>;

/// Ticket credentials, sent when the router challenges the session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub authid: String,
    pub ticket: String,
}

struct ConnectionInfo {
    url: String,
    realm: String,
    credentials: Option<Credentials>,
}

/// What the router told us in WELCOME.
#[derive(Debug, Clone)]
pub struct SessionDetails {
    pub session: u64,
    pub realm: String,
    pub details: Map<String, Value>,
}

/// A live subscription as acknowledged by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: u64,
    pub topic: String,
}

enum PendingKind {
    Subscribe(SharedHandler),
    Unsubscribe(u64),
    Publish,
}

struct Pending {
    kind: PendingKind,
    reply: async_channel::Sender<Message>,
}

#[derive(Default)]
struct Tracker {
    last_request: u64,
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<u64, SharedHandler>,
    goodbye_sent: bool,
    closed: bool,
}

impl Tracker {
    fn next_request_id(&mut self) -> u64 {
        self.last_request += 1;
        self.last_request
    }
}

/// A joined WAMP session.
///
/// Cloning is cheap; every clone talks over the same connection. One clone
/// runs the reader loop ([`Wamp::run`]) while the others issue requests.
#[derive(Clone)]
pub struct Wamp {
    info: Arc<ConnectionInfo>,
    details: Arc<SessionDetails>,
    sender: Arc<Mutex<TransportSender>>,
    tracker: Arc<Mutex<Tracker>>,
}

impl Wamp {
    /// Opens a transport to `url` and joins `realm`.
    ///
    /// Returns the session together with the read half of the connection,
    /// which must be handed to [`Wamp::run`] for replies and events to be
    /// processed.
    pub async fn connect(
        url: &str,
        realm: &str,
        credentials: Option<Credentials>,
    ) -> WampResult<(Wamp, TransportReceiver)> {
        let info = ConnectionInfo {
            url: url.to_string(),
            realm: realm.to_string(),
            credentials,
        };
        let (mut sender, mut receiver) = Transport::connect(&info.url).await?.split();

        let details = authenticate(&info, &mut sender, &mut receiver).await?;
        info!(
            url = %info.url,
            realm = %info.realm,
            session = details.session,
            "joined realm"
        );

        let wamp = Wamp {
            info: Arc::new(info),
            details: Arc::new(details),
            sender: Arc::new(Mutex::new(sender)),
            tracker: Arc::new(Mutex::new(Tracker::default())),
        };
        Ok((wamp, receiver))
    }

    pub fn details(&self) -> &SessionDetails {
        &self.details
    }

    pub fn url(&self) -> &str {
        &self.info.url
    }

    pub async fn subscribe(&self, topic: &str, handler: EventHandler) -> WampResult<Subscription> {
        let handler = Arc::new(StdMutex::new(handler));
        let reply = self
            .request(PendingKind::Subscribe(handler), |request| {
                message::subscribe(request, topic)
            })
            .await?;

        match reply {
            Message::Subscribed { subscription, .. } => {
                info!(topic, subscription, "subscribed");
                Ok(Subscription {
                    id: subscription,
                    topic: topic.to_string(),
                })
            }
            other => Err(request_error(other)),
        }
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> WampResult<()> {
        let reply = self
            .request(PendingKind::Unsubscribe(subscription.id), |request| {
                message::unsubscribe(request, subscription.id)
            })
            .await?;

        match reply {
            Message::Unsubscribed { .. } => {
                info!(topic = %subscription.topic, subscription = subscription.id, "unsubscribed");
                Ok(())
            }
            other => Err(request_error(other)),
        }
    }

    /// Publishes to `topic`. With `acknowledge` set the call waits for the
    /// router and returns the publication id.
    pub async fn publish(
        &self,
        topic: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        acknowledge: bool,
    ) -> WampResult<Option<u64>> {
        if !acknowledge {
            let request = self.tracker.lock().await.next_request_id();
            self.message_send(&message::publish(request, topic, args, kwargs, false))
                .await?;
            return Ok(None);
        }

        let reply = self
            .request(PendingKind::Publish, |request| {
                message::publish(request, topic, args, kwargs, true)
            })
            .await?;

        match reply {
            Message::Published { publication, .. } => Ok(Some(publication)),
            other => Err(request_error(other)),
        }
    }

    /// Starts the closing handshake. The reader loop ends once the router
    /// answers with its own GOODBYE.
    pub async fn leave(&self, reason: &str) -> WampResult<()> {
        self.tracker.lock().await.goodbye_sent = true;
        info!(reason, "leaving realm");
        self.message_send(&message::goodbye(reason)).await
    }

    pub async fn message_send(&self, message: &serde_json::Value) -> WampResult<()> {
        self.sender.lock().await.message_send(message).await
    }

    /// Reads and processes messages until the session ends.
    ///
    /// Outstanding requests fail with [`WampError::ConnectionClosed`] once
    /// this returns.
    pub async fn run(&self, mut receiver: TransportReceiver) -> WampResult<()> {
        let outcome = self.read_loop(&mut receiver).await;

        {
            let mut tracker = self.tracker.lock().await;
            tracker.closed = true;
            tracker.pending.clear();
            tracker.subscriptions.clear();
        }
        if let Err(err) = self.sender.lock().await.close().await {
            debug!(%err, "closing transport");
        }

        outcome
    }

    async fn read_loop(&self, receiver: &mut TransportReceiver) -> WampResult<()> {
        loop {
            let buf = match receiver.message_get().await? {
                None => {
                    info!("router closed the connection");
                    return Ok(());
                }
                Some(Incoming::Ping(payload)) => {
                    self.sender.lock().await.pong(&payload).await?;
                    continue;
                }
                Some(Incoming::Message(buf)) => buf,
            };

            let message = match Message::decode(&buf) {
                Ok(message) => message,
                Err(err) => {
                    warn!(%err, "dropping malformed message");
                    continue;
                }
            };

            if !self.message_process(message).await? {
                return Ok(());
            }
        }
    }

    /// Handles one inbound message; `false` means the session is over.
    async fn message_process(&self, received: Message) -> WampResult<bool> {
        debug!(message = ?received, "received");
        match received {
            Message::Event {
                subscription,
                event,
            } => {
                self.dispatch(subscription, event).await;
            }
            Message::Subscribed { request, .. }
            | Message::Unsubscribed { request }
            | Message::Published { request, .. }
            | Message::Error { request, .. } => {
                self.resolve(request, received).await;
            }
            Message::Goodbye { reason, .. } => {
                let goodbye_sent = self.tracker.lock().await.goodbye_sent;
                if !goodbye_sent {
                    self.message_send(&message::goodbye(message::CLOSE_GOODBYE_AND_OUT))
                        .await?;
                }
                info!(reason = %reason, "session closed");
                return Ok(false);
            }
            Message::Abort { reason, .. } => {
                warn!(reason = %reason, "session aborted by router");
                return Ok(false);
            }
            Message::Welcome { .. } | Message::Challenge { .. } => {
                warn!("ignoring handshake message on an established session");
            }
            Message::Unknown(code) => {
                debug!(code, "ignoring unsupported message");
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, subscription: u64, event: Event) {
        let handler = self.tracker.lock().await.subscriptions.get(&subscription).cloned();
        match handler {
            Some(handler) => {
                let mut handler = handler.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(err) = (*handler)(event) {
                    error!(subscription, %err, "event handler failed");
                }
            }
            None => warn!(subscription, "event for unknown subscription"),
        }
    }

    async fn resolve(&self, request: u64, reply: Message) {
        let pending = {
            let mut tracker = self.tracker.lock().await;
            let pending = tracker.pending.remove(&request);
            // Install or drop the handler before the next message is read so
            // no event can slip past its subscription.
            match (&pending, &reply) {
                (
                    Some(Pending {
                        kind: PendingKind::Subscribe(handler),
                        ..
                    }),
                    Message::Subscribed { subscription, .. },
                ) => {
                    tracker.subscriptions.insert(*subscription, handler.clone());
                }
                (
                    Some(Pending {
                        kind: PendingKind::Unsubscribe(subscription),
                        ..
                    }),
                    Message::Unsubscribed { .. },
                ) => {
                    tracker.subscriptions.remove(subscription);
                }
                _ => {}
            }
            pending
        };

        match pending {
            Some(pending) => {
                let _ = pending.reply.try_send(reply);
            }
            None => warn!(request, "reply for unknown request"),
        }
    }

    async fn request<F>(&self, kind: PendingKind, build: F) -> WampResult<Message>
    where
        F: FnOnce(u64) -> Value,
    {
        let (reply_tx, reply_rx) = async_channel::bounded(1);
        let request = {
            let mut tracker = self.tracker.lock().await;
            if tracker.closed {
                return Err(WampError::ConnectionClosed);
            }
            let request = tracker.next_request_id();
            tracker.pending.insert(
                request,
                Pending {
                    kind,
                    reply: reply_tx,
                },
            );
            request
        };

        if let Err(err) = self.message_send(&build(request)).await {
            self.tracker.lock().await.pending.remove(&request);
            return Err(err);
        }

        reply_rx.recv().await.map_err(|_| WampError::ConnectionClosed)
    }
}

// Sends HELLO and reads until the router welcomes or rejects us, answering
// a ticket challenge on the way if we have credentials.
async fn authenticate(
    info: &ConnectionInfo,
    sender: &mut TransportSender,
    receiver: &mut TransportReceiver,
) -> WampResult<SessionDetails> {
    let authid = info.credentials.as_ref().map(|c| c.authid.as_str());
    sender
        .message_send(&message::hello(&info.realm, &HelloDetails::new(authid))?)
        .await?;

    loop {
        let buf = match receiver.message_get().await? {
            None => return Err(WampError::ConnectionClosed),
            Some(Incoming::Ping(payload)) => {
                sender.pong(&payload).await?;
                continue;
            }
            Some(Incoming::Message(buf)) => buf,
        };

        match Message::decode(&buf)? {
            Message::Welcome { session, details } => {
                return Ok(SessionDetails {
                    session,
                    realm: info.realm.clone(),
                    details,
                })
            }
            Message::Abort { reason, .. } => return Err(WampError::Aborted(reason)),
            Message::Challenge { method, .. } => match &info.credentials {
                Some(credentials) if method == "ticket" => {
                    debug!(authid = %credentials.authid, "answering ticket challenge");
                    sender
                        .message_send(&message::authenticate(&credentials.ticket))
                        .await?;
                }
                _ => {
                    return Err(WampError::Protocol(format!(
                        "cannot answer {method} challenge"
                    )))
                }
            },
            other => {
                return Err(WampError::Protocol(format!(
                    "unexpected {other:?} during handshake"
                )))
            }
        }
    }
}

fn request_error(reply: Message) -> WampError {
    match reply {
        Message::Error {
            error, args, kwargs, ..
        } => WampError::Request {
            uri: error,
            args,
            kwargs,
        },
        other => WampError::Protocol(format!("unexpected reply {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_ids_start_at_one_and_increase() {
        let mut tracker = Tracker::default();
        assert_eq!(tracker.next_request_id(), 1);
        assert_eq!(tracker.next_request_id(), 2);
        assert_eq!(tracker.next_request_id(), 3);
    }

    #[test]
    fn error_replies_become_request_errors() {
        let reply = Message::parse(json!([
            8,
            32,
            1,
            {},
            "wamp.error.not_authorized",
            ["denied"],
            { "topic": "com.myapp.topic1" }
        ]))
        .unwrap();

        match request_error(reply) {
            WampError::Request { uri, args, kwargs } => {
                assert_eq!(uri, "wamp.error.not_authorized");
                assert_eq!(args, vec![json!("denied")]);
                assert_eq!(kwargs["topic"], json!("com.myapp.topic1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mismatched_replies_are_protocol_errors() {
        assert!(matches!(
            request_error(Message::Unsubscribed { request: 4 }),
            WampError::Protocol(_)
        ));
    }
}
