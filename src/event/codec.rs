//! Wire codec
//!
//! Frames are newline-delimited JSON objects with a `type` tag:
//!
//! ```text
//! {"type":"hello","topic":"stock","scopeKey":"42"}     subscriber -> hub
//! {"type":"welcome","subscriberId":3}                  hub -> subscriber
//! {"type":"stock","itemId":42,"newStock":2,"version":5}
//! {"type":"change","topic":"orders","scopeKey":"shop-7"}
//! {"type":"ping"}
//! ```
//!
//! Routing only needs `type`, `topic`, `scopeKey` and `itemId`, so
//! [`decode_route`] reads just those and skips the payload.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::change::{ChangeEvent, ItemId, StockChange, TopicChange, STOCK_TOPIC};
use crate::error::{Error, Result};

/// Default maximum frame length (64KB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Every message that can appear on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// First frame from a subscriber, carrying its optional filters
    #[serde(rename_all = "camelCase")]
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope_key: Option<String>,
    },

    /// Hub acknowledgement of a hello
    #[serde(rename_all = "camelCase")]
    Welcome { subscriber_id: u64 },

    /// Stock level change
    #[serde(rename_all = "camelCase")]
    Stock {
        item_id: u64,
        new_stock: u64,
        #[serde(default)]
        version: u64,
    },

    /// Generic topic change
    #[serde(rename_all = "camelCase")]
    Change {
        topic: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },

    /// Liveness probe from the hub
    Ping,
}

impl From<&ChangeEvent> for WireMessage {
    fn from(event: &ChangeEvent) -> Self {
        match event {
            ChangeEvent::Stock(change) => WireMessage::Stock {
                item_id: change.item_id.0,
                new_stock: change.new_stock,
                version: change.version,
            },
            ChangeEvent::Topic(change) => WireMessage::Change {
                topic: change.topic.clone(),
                scope_key: change.scope_key.clone(),
                payload: change.payload.clone(),
            },
        }
    }
}

impl WireMessage {
    /// Convert into a change event; control frames yield `None`
    pub fn into_event(self) -> Option<ChangeEvent> {
        match self {
            WireMessage::Stock {
                item_id,
                new_stock,
                version,
            } => Some(ChangeEvent::Stock(StockChange {
                item_id: ItemId(item_id),
                new_stock,
                version,
            })),
            WireMessage::Change {
                topic,
                scope_key,
                payload,
            } => Some(ChangeEvent::Topic(TopicChange {
                topic,
                scope_key,
                payload,
            })),
            WireMessage::Hello { .. } | WireMessage::Welcome { .. } | WireMessage::Ping => None,
        }
    }
}

/// Routing information peeked from a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Hello, welcome or ping
    Control,
    /// An event with its topic and scope
    Event {
        topic: String,
        scope_key: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    scope_key: Option<String>,
    #[serde(default)]
    item_id: Option<u64>,
}

/// Encode a message into a newline-terminated frame
pub fn encode(message: &WireMessage) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(64).writer();
    serde_json::to_writer(&mut buf, message)?;
    let mut buf = buf.into_inner();
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decode a frame (without its trailing newline)
pub fn decode(frame: &[u8]) -> Result<WireMessage> {
    Ok(serde_json::from_slice(frame)?)
}

/// Read only the routing fields of a frame
pub fn decode_route(frame: &[u8]) -> Result<Route> {
    let envelope: Envelope = serde_json::from_slice(frame)?;

    match envelope.kind.as_str() {
        "stock" => {
            let item_id = envelope
                .item_id
                .ok_or_else(|| Error::Protocol("stock frame without itemId".into()))?;
            Ok(Route::Event {
                topic: STOCK_TOPIC.to_string(),
                scope_key: Some(item_id.to_string()),
            })
        }
        "change" => {
            let topic = envelope
                .topic
                .ok_or_else(|| Error::Protocol("change frame without topic".into()))?;
            Ok(Route::Event {
                topic,
                scope_key: envelope.scope_key,
            })
        }
        "hello" | "welcome" | "ping" => Ok(Route::Control),
        other => Err(Error::Protocol(format!("unknown frame type: {}", other))),
    }
}

/// Reads newline-delimited frames with a length limit
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the given frame limit
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(256),
            max_len,
        }
    }

    /// Read the next non-empty frame
    ///
    /// Returns `Ok(None)` on clean EOF between frames. Partially read bytes
    /// stay buffered, so dropping the future (e.g. in `select!`) loses
    /// nothing.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            // One extra byte so an over-long frame is detectable
            let remaining = (self.max_len + 1).saturating_sub(self.buf.len()) as u64;
            let n = (&mut self.inner)
                .take(remaining)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if self.buf.last() != Some(&b'\n') {
                if n == 0 && self.buf.is_empty() {
                    return Ok(None);
                }

                let oversized = self.buf.len() > self.max_len;
                self.buf.clear();

                if oversized {
                    return Err(Error::FrameTooLarge {
                        limit: self.max_len,
                    });
                }
                return Err(Error::Protocol("connection closed mid-frame".into()));
            }

            let mut end = self.buf.len() - 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }

            let frame = Bytes::copy_from_slice(&self.buf[..end]);
            self.buf.clear();

            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_wire_shape() {
        let frame = ChangeEvent::stock(ItemId(42), 2, 5).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();

        assert_eq!(value["type"], "stock");
        assert_eq!(value["itemId"], 42);
        assert_eq!(value["newStock"], 2);
        assert_eq!(value["version"], 5);
    }

    #[test]
    fn test_change_wire_shape_omits_empty_fields() {
        let frame = ChangeEvent::topic("orders").encode().unwrap();
        let text = std::str::from_utf8(&frame).unwrap();

        assert_eq!(text, "{\"type\":\"change\",\"topic\":\"orders\"}\n");
    }

    #[test]
    fn test_decode_into_event() {
        let message = decode(br#"{"type":"change","topic":"menu","scopeKey":"shop-7","payload":{"n":1}}"#)
            .unwrap();
        let event = message.into_event().unwrap();

        assert_eq!(event.topic_name(), "menu");
        assert_eq!(event.scope_key().as_deref(), Some("shop-7"));
    }

    #[test]
    fn test_control_frames_are_not_events() {
        assert!(decode(br#"{"type":"ping"}"#).unwrap().into_event().is_none());
        assert!(decode(br#"{"type":"welcome","subscriberId":3}"#)
            .unwrap()
            .into_event()
            .is_none());
    }

    #[test]
    fn test_stock_version_defaults() {
        // Producers that only send the documented minimum still decode
        let message = decode(br#"{"type":"stock","itemId":7,"newStock":0}"#).unwrap();
        assert_eq!(
            message,
            WireMessage::Stock {
                item_id: 7,
                new_stock: 0,
                version: 0
            }
        );
    }

    #[test]
    fn test_route_skips_payload() {
        let route = decode_route(
            br#"{"type":"change","topic":"reports","scopeKey":"shop-9","payload":{"rows":[1,2,3]}}"#,
        )
        .unwrap();

        assert_eq!(
            route,
            Route::Event {
                topic: "reports".into(),
                scope_key: Some("shop-9".into())
            }
        );
    }

    #[test]
    fn test_route_stock_scope_is_item_id() {
        let route = decode_route(br#"{"type":"stock","itemId":42,"newStock":1}"#).unwrap();
        assert_eq!(
            route,
            Route::Event {
                topic: "stock".into(),
                scope_key: Some("42".into())
            }
        );
        assert_eq!(decode_route(br#"{"type":"ping"}"#).unwrap(), Route::Control);
    }

    #[test]
    fn test_route_rejects_unknown_type() {
        assert!(matches!(
            decode_route(br#"{"type":"bogus"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            decode_route(br#"{"type":"stock","newStock":1}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_frame_reader_splits_lines() {
        let input: &[u8] = b"{\"type\":\"ping\"}\n\n{\"type\":\"ping\"}\r\n";
        let mut reader = FrameReader::new(input, 1024);

        assert_eq!(
            reader.next_frame().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"type\":\"ping\"}")
        );
        assert_eq!(
            reader.next_frame().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"type\":\"ping\"}")
        );
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_reader_enforces_limit() {
        let input = vec![b'a'; 100];
        let mut reader = FrameReader::new(&input[..], 16);

        assert!(matches!(
            reader.next_frame().await,
            Err(Error::FrameTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn test_frame_reader_truncated_frame() {
        let input: &[u8] = b"{\"type\":";
        let mut reader = FrameReader::new(input, 1024);

        assert!(matches!(reader.next_frame().await, Err(Error::Protocol(_))));
    }
}
