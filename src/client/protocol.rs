//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the text encoding is supported. An Engine.IO packet is a single type digit
//! followed by its payload; a Socket.IO packet rides inside an Engine.IO `MESSAGE`
//! and has the shape `<type>[<namespace>,][<ack id>][<json>]`.

use crate::errors::{ErrorContext, HarnessError, Result};

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "/";

/// Payload of the Engine.IO `OPEN` packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds
    pub ping_interval: u64,
    /// Milliseconds
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenInfo {
    /// How long the session may stay silent before it is considered dead
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

impl SocketPacket {
    /// Connect to the default namespace
    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace that asks the server to acknowledge with `id`
    pub fn event_with_ack(name: impl Into<String>, payload: Value, id: u64) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: Some(id),
            name: name.into(),
            args: vec![payload],
        }
    }

    fn encode(&self) -> String {
        let (kind, namespace, id, json) = match self {
            SocketPacket::Connect { namespace, data } => ('0', namespace, None, data.clone()),
            SocketPacket::Disconnect { namespace } => ('1', namespace, None, None),
            SocketPacket::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                ('2', namespace, *id, Some(Value::Array(array)))
            }
            SocketPacket::Ack {
                namespace,
                id,
                args,
            } => ('3', namespace, Some(*id), Some(Value::Array(args.clone()))),
            SocketPacket::ConnectError { namespace, data } => {
                ('4', namespace, None, Some(data.clone()))
            }
        };

        let mut out = String::new();
        out.push(kind);
        if namespace != DEFAULT_NAMESPACE {
            out.push_str(namespace);
            out.push(',');
        }
        if let Some(id) = id {
            out.push_str(&id.to_string());
        }
        if let Some(json) = json {
            out.push_str(&json.to_string());
        }
        out
    }

    fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .with_protocol_context("Empty Socket.IO packet")?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(HarnessError::protocol(
                "Binary Socket.IO packets are not supported",
            ));
        }

        let namespace = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let namespace = &rest[..end];
            rest = rest.get(end + 1..).unwrap_or("");
            namespace.to_string()
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .with_protocol_context("Invalid Socket.IO ack id")?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let json = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: json,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let mut args = match json {
                    Some(Value::Array(args)) => args,
                    _ => {
                        return Err(HarnessError::protocol(
                            "Socket.IO EVENT payload must be an array",
                        ));
                    }
                };
                if args.is_empty() {
                    return Err(HarnessError::protocol("Socket.IO EVENT without a name"));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(HarnessError::protocol(format!(
                            "Socket.IO EVENT name must be a string, got {}",
                            other
                        )));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => Ok(SocketPacket::Ack {
                namespace,
                id: id.with_protocol_context("Socket.IO ACK without an id")?,
                args: match json {
                    Some(Value::Array(args)) => args,
                    _ => Vec::new(),
                },
            }),
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                data: json.unwrap_or(Value::Null),
            }),
            other => Err(HarnessError::protocol(format!(
                "Unknown Socket.IO packet type '{}'",
                other
            ))),
        }
    }
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "upgrades": info.upgrades,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                    "maxPayload": info.max_payload,
                })
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Decode one text frame
pub fn decode(text: &str) -> Result<EnginePacket> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .with_protocol_context("Empty Engine.IO packet")?;
    let payload = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(
            serde_json::from_str(payload).with_protocol_context("Invalid Engine.IO OPEN payload")?,
        )),
        '1' => Ok(EnginePacket::Close),
        // `2probe` only appears during transport upgrades; the payload is irrelevant here
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => Ok(EnginePacket::Message(SocketPacket::decode(payload)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(HarnessError::protocol(format!(
            "Unknown Engine.IO packet type '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let packet = decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(info) => {
                assert_eq!(info.sid, "lv_VI97HAXpY6yYWAAAC");
                assert_eq!(info.liveness_window(), Duration::from_secs(45));
                assert_eq!(info.max_payload, Some(1_000_000));
            }
            other => panic!("expected OPEN, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeat_packets() {
        assert_eq!(decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(decode("2probe").unwrap(), EnginePacket::Ping);
        assert_eq!(decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(decode("6").unwrap(), EnginePacket::Noop);
    }

    #[test]
    fn test_decode_connect_ack() {
        let packet = decode(r#"40{"sid":"wZX3oN0bSVIhsaknAAAI"}"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".into(),
                data: Some(json!({"sid": "wZX3oN0bSVIhsaknAAAI"})),
            })
        );
    }

    #[test]
    fn test_decode_connect_error() {
        let packet = decode(r#"44{"message":"Not authorized"}"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".into(),
                data: json!({"message": "Not authorized"}),
            })
        );
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let packet = decode(r#"42/admin,13["payment",{"amount":10}]"#).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/admin".into(),
                id: Some(13),
                name: "payment".into(),
                args: vec![json!({"amount": 10})],
            })
        );
    }

    #[test]
    fn test_decode_namespace_disconnect() {
        assert_eq!(
            decode("41").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect {
                namespace: "/".into()
            })
        );
        assert_eq!(
            decode("41/admin,").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect {
                namespace: "/admin".into()
            })
        );
    }

    #[test]
    fn test_decode_rejects_bad_packets() {
        assert!(decode("").is_err());
        assert!(decode("9").is_err());
        assert!(decode("42{\"not\":\"array\"}").is_err());
        assert!(decode("42[]").is_err());
        assert!(decode("42[1,2]").is_err());
        assert!(decode(r#"451-["upload",{"_placeholder":true,"num":0}]"#).is_err());
        assert!(decode("0not-json").is_err());
    }

    #[test]
    fn test_encode_client_packets() {
        assert_eq!(EnginePacket::Message(SocketPacket::connect()).encode(), "40");
        assert_eq!(EnginePacket::Message(SocketPacket::disconnect()).encode(), "41");
        assert_eq!(EnginePacket::Pong.encode(), "3");
    }

    #[test]
    fn test_keepalive_requests_ack() {
        assert_eq!(
            EnginePacket::Message(SocketPacket::event_with_ack("keepalive", json!({}), 12)).encode(),
            r#"4212["keepalive",{}]"#
        );
    }

    #[test]
    fn test_decode_ack() {
        assert_eq!(
            decode("4312[]").unwrap(),
            EnginePacket::Message(SocketPacket::Ack {
                namespace: "/".into(),
                id: 12,
                args: vec![],
            })
        );
        assert_eq!(
            decode(r#"435["ok"]"#).unwrap(),
            EnginePacket::Message(SocketPacket::Ack {
                namespace: "/".into(),
                id: 5,
                args: vec![json!("ok")],
            })
        );
        assert!(decode("43[]").is_err());
    }

    #[test]
    fn test_encode_event_with_namespace_and_id() {
        let packet = EnginePacket::Message(SocketPacket::Event {
            namespace: "/admin".into(),
            id: Some(7),
            name: "hello".into(),
            args: vec![json!(1)],
        });
        let encoded = packet.encode();
        assert_eq!(encoded, r#"42/admin,7["hello",1]"#);
        assert_eq!(decode(&encoded).unwrap(), packet);
    }
}
