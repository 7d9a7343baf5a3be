//! WAMP v2 message codes, outgoing message builders and parsing of the
//! messages a subscriber/publisher session can receive.
//!
//! Messages travel as JSON arrays whose first element is the message code.

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::error::{WampError, WampResult};

pub const WAMP_HELLO: u64 = 1;
pub const WAMP_WELCOME: u64 = 2;
pub const WAMP_ABORT: u64 = 3;
pub const WAMP_CHALLENGE: u64 = 4;
pub const WAMP_AUTHENTICATE: u64 = 5;
pub const WAMP_GOODBYE: u64 = 6;
pub const WAMP_ERROR: u64 = 8;
pub const WAMP_PUBLISH: u64 = 16;
pub const WAMP_PUBLISHED: u64 = 17;
pub const WAMP_SUBSCRIBE: u64 = 32;
pub const WAMP_SUBSCRIBED: u64 = 33;
pub const WAMP_UNSUBSCRIBE: u64 = 34;
pub const WAMP_UNSUBSCRIBED: u64 = 35;
pub const WAMP_EVENT: u64 = 36;

pub const CLOSE_NORMAL: &str = "wamp.close.normal";
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";

const AGENT: &str = concat!("wamp-subscribe-", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default, Serialize)]
struct Role {}

#[derive(Debug, Default, Serialize)]
struct Roles {
    subscriber: Role,
    publisher: Role,
}

/// Details announced in HELLO.
#[derive(Debug, Serialize)]
pub struct HelloDetails {
    agent: &'static str,
    roles: Roles,
    #[serde(skip_serializing_if = "Option::is_none")]
    authid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    authmethods: Vec<&'static str>,
}

impl HelloDetails {
    pub fn new(authid: Option<&str>) -> Self {
        HelloDetails {
            agent: AGENT,
            roles: Roles::default(),
            authid: authid.map(str::to_string),
            authmethods: if authid.is_some() { vec!["ticket"] } else { Vec::new() },
        }
    }
}

pub fn hello(realm: &str, details: &HelloDetails) -> WampResult<Value> {
    Ok(json!([WAMP_HELLO, realm, serde_json::to_value(details)?]))
}

pub fn authenticate(ticket: &str) -> Value {
    json!([WAMP_AUTHENTICATE, ticket, {}])
}

pub fn goodbye(reason: &str) -> Value {
    json!([WAMP_GOODBYE, {}, reason])
}

pub fn subscribe(request: u64, topic: &str) -> Value {
    json!([WAMP_SUBSCRIBE, request, {}, topic])
}

pub fn unsubscribe(request: u64, subscription: u64) -> Value {
    json!([WAMP_UNSUBSCRIBE, request, subscription])
}

pub fn publish(
    request: u64,
    topic: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    acknowledge: bool,
) -> Value {
    let options = if acknowledge {
        json!({ "acknowledge": true })
    } else {
        json!({})
    };
    json!([WAMP_PUBLISH, request, options, topic, args, kwargs])
}

/// A published event as delivered to a subscription handler.
///
/// The payload carries no schema: positional and keyword arguments are
/// whatever the publisher sent, empty when it sent nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub publication: u64,
    pub details: Map<String, Value>,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// Inbound messages this client understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Welcome {
        session: u64,
        details: Map<String, Value>,
    },
    Abort {
        details: Map<String, Value>,
        reason: String,
    },
    Challenge {
        method: String,
        extra: Map<String, Value>,
    },
    Goodbye {
        details: Map<String, Value>,
        reason: String,
    },
    Error {
        request_type: u64,
        request: u64,
        details: Map<String, Value>,
        error: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    Published {
        request: u64,
        publication: u64,
    },
    Subscribed {
        request: u64,
        subscription: u64,
    },
    Unsubscribed {
        request: u64,
    },
    Event {
        subscription: u64,
        event: Event,
    },
    /// A well-formed message with a code this client has no use for.
    Unknown(u64),
}

impl Message {
    pub fn decode(buf: &[u8]) -> WampResult<Self> {
        let value: Value = serde_json::from_slice(buf)?;
        Self::parse(value)
    }

    pub fn parse(value: Value) -> WampResult<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(WampError::Protocol(format!(
                    "expected a message array, got {other}"
                )))
            }
        };
        let fields = Fields { items };
        let code = fields.id(0)?;

        let message = match code {
            WAMP_WELCOME => Message::Welcome {
                session: fields.id(1)?,
                details: fields.dict(2)?,
            },
            WAMP_ABORT => Message::Abort {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            WAMP_CHALLENGE => Message::Challenge {
                method: fields.string(1)?,
                extra: fields.dict(2)?,
            },
            WAMP_GOODBYE => Message::Goodbye {
                details: fields.dict(1)?,
                reason: fields.string(2)?,
            },
            WAMP_ERROR => Message::Error {
                request_type: fields.id(1)?,
                request: fields.id(2)?,
                details: fields.dict(3)?,
                error: fields.string(4)?,
                args: fields.optional_list(5)?,
                kwargs: fields.optional_dict(6)?,
            },
            WAMP_PUBLISHED => Message::Published {
                request: fields.id(1)?,
                publication: fields.id(2)?,
            },
            WAMP_SUBSCRIBED => Message::Subscribed {
                request: fields.id(1)?,
                subscription: fields.id(2)?,
            },
            WAMP_UNSUBSCRIBED => Message::Unsubscribed {
                request: fields.id(1)?,
            },
            WAMP_EVENT => Message::Event {
                subscription: fields.id(1)?,
                event: Event {
                    publication: fields.id(2)?,
                    details: fields.dict(3)?,
                    args: fields.optional_list(4)?,
                    kwargs: fields.optional_dict(5)?,
                },
            },
            other => Message::Unknown(other),
        };
        Ok(message)
    }
}

struct Fields {
    items: Vec<Value>,
}

impl Fields {
    fn get(&self, index: usize) -> WampResult<&Value> {
        self.items
            .get(index)
            .ok_or_else(|| WampError::Protocol(format!("missing message field {index}")))
    }

    fn id(&self, index: usize) -> WampResult<u64> {
        self.get(index)?
            .as_u64()
            .ok_or_else(|| WampError::Protocol(format!("field {index} is not an id")))
    }

    fn string(&self, index: usize) -> WampResult<String> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WampError::Protocol(format!("field {index} is not a string")))
    }

    fn dict(&self, index: usize) -> WampResult<Map<String, Value>> {
        match self.get(index)? {
            Value::Object(map) => Ok(map.clone()),
            _ => Err(WampError::Protocol(format!("field {index} is not a dict"))),
        }
    }

    fn optional_list(&self, index: usize) -> WampResult<Vec<Value>> {
        match self.items.get(index) {
            None => Ok(Vec::new()),
            Some(Value::Array(list)) => Ok(list.clone()),
            Some(_) => Err(WampError::Protocol(format!("field {index} is not a list"))),
        }
    }

    fn optional_dict(&self, index: usize) -> WampResult<Map<String, Value>> {
        match self.items.get(index) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(WampError::Protocol(format!("field {index} is not a dict"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hello_announces_roles_without_auth() {
        let message = hello("realm1", &HelloDetails::new(None)).unwrap();
        assert_eq!(message[0], json!(WAMP_HELLO));
        assert_eq!(message[1], json!("realm1"));
        assert_eq!(message[2]["roles"], json!({ "subscriber": {}, "publisher": {} }));
        assert!(message[2].get("authid").is_none());
        assert!(message[2].get("authmethods").is_none());
    }

    #[test]
    fn hello_requests_ticket_auth_when_authid_given() {
        let message = hello("realm1", &HelloDetails::new(Some("joe"))).unwrap();
        assert_eq!(message[2]["authid"], json!("joe"));
        assert_eq!(message[2]["authmethods"], json!(["ticket"]));
    }

    #[test]
    fn publish_sets_acknowledge_option_only_when_asked() {
        let plain = publish(7, "com.myapp.topic1", vec![json!(1)], Map::new(), false);
        assert_eq!(plain, json!([16, 7, {}, "com.myapp.topic1", [1], {}]));

        let acked = publish(8, "com.myapp.topic1", Vec::new(), Map::new(), true);
        assert_eq!(acked[2], json!({ "acknowledge": true }));
    }

    #[test]
    fn parses_welcome() {
        let message = Message::parse(json!([2, 9129137332u64, { "roles": { "broker": {} } }])).unwrap();
        match message {
            Message::Welcome { session, details } => {
                assert_eq!(session, 9129137332);
                assert!(details.contains_key("roles"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_event_with_and_without_payload() {
        let bare = Message::parse(json!([36, 5512315355u64, 4429313566u64, {}])).unwrap();
        assert_eq!(
            bare,
            Message::Event {
                subscription: 5512315355,
                event: Event {
                    publication: 4429313566,
                    ..Event::default()
                },
            }
        );

        let full = Message::decode(br#"[36, 1, 2, {}, ["Hello", 23], {"color": "orange"}]"#).unwrap();
        match full {
            Message::Event { subscription, event } => {
                assert_eq!(subscription, 1);
                assert_eq!(event.args, vec![json!("Hello"), json!(23)]);
                assert_eq!(event.kwargs["color"], json!("orange"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_error_reply() {
        let message =
            Message::parse(json!([8, 32, 713845233, {}, "wamp.error.not_authorized"])).unwrap();
        match message {
            Message::Error {
                request_type,
                request,
                error,
                args,
                ..
            } => {
                assert_eq!(request_type, WAMP_SUBSCRIBE);
                assert_eq!(request, 713845233);
                assert_eq!(error, "wamp.error.not_authorized");
                assert!(args.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_codes_are_not_errors() {
        assert_eq!(Message::parse(json!([70, 1, {}])).unwrap(), Message::Unknown(70));
    }

    #[test]
    fn rejects_malformed_messages() {
        assert!(Message::parse(json!({ "type": 2 })).is_err());
        assert!(Message::parse(json!([])).is_err());
        assert!(Message::parse(json!([33, 1])).is_err());
        assert!(Message::parse(json!([36, 1, 2, {}, "not-a-list"])).is_err());
        assert!(Message::decode(b"not json").is_err());
    }
}
