//! Message payload shapes.
//!
//! Outbound: callers give a flat send request; `build_payload` turns it
//! into the protocol-appropriate payload by kind. Inbound: the transport
//! delivers raw protocol frames; `normalize_inbound` flattens whichever of
//! the possible content slots is populated into the single message shape
//! the event stream emits, and filters out traffic that must never
//! surface (self-sent and broadcast/status messages).

use serde::{Deserialize, Serialize};

use super::traits::{TransportError, TransportResult};

/// Message content kind, classified from the populated payload slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
}

/// Flat outbound send request, as callers pass it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub to: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(rename = "mediaUrl", default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Protocol-shaped outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text {
        to: String,
        body: String,
    },
    Media {
        to: String,
        kind: MessageKind,
        url: String,
        caption: Option<String>,
    },
}

/// Build the protocol payload for a send request.
///
/// Media kinds require a `media_url`; the caption falls back to the
/// message body when absent. Kinds outside the sendable set are rejected.
pub fn build_payload(req: &SendMessageRequest) -> TransportResult<OutboundPayload> {
    match req.kind {
        MessageKind::Text => Ok(OutboundPayload::Text {
            to: req.to.clone(),
            body: req.message.clone(),
        }),
        MessageKind::Image | MessageKind::Video | MessageKind::Audio | MessageKind::Document => {
            let url = req.media_url.clone().ok_or_else(|| {
                TransportError::InvalidPayload(format!(
                    "mediaUrl is required for {:?} messages",
                    req.kind
                ))
            })?;
            let caption = req
                .caption
                .clone()
                .or_else(|| (!req.message.is_empty()).then(|| req.message.clone()));
            Ok(OutboundPayload::Media {
                to: req.to.clone(),
                kind: req.kind,
                url,
                caption,
            })
        }
        other => Err(TransportError::InvalidPayload(format!(
            "{:?} messages cannot be sent through this API",
            other
        ))),
    }
}

/// Addressing triple on every raw frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}

/// A media slot in a raw frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContent {
    pub url: Option<String>,
    pub caption: Option<String>,
    pub mime_type: Option<String>,
}

/// Raw frame content; exactly the slots the protocol can populate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawContent {
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
    pub image: Option<MediaContent>,
    pub video: Option<MediaContent>,
    pub audio: Option<MediaContent>,
    pub document: Option<MediaContent>,
    pub sticker: Option<MediaContent>,
    pub location: Option<MediaContent>,
    pub contact: Option<MediaContent>,
}

/// An inbound frame as the transport hands it over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub timestamp: u64,
    pub content: RawContent,
}

/// The normalized inbound message emitted on the event stream.
///
/// Field names follow the consumer contract; `text`/`content`/`body` carry
/// the same extracted text for downstream compatibility.
#[derive(Debug, Clone, Serialize)]
pub struct InboundMessage {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub from: String,
    #[serde(rename = "fromJid")]
    pub from_jid: String,
    pub push_name: String,
    pub text: String,
    pub content: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: u64,
    pub message_id: String,
    #[serde(rename = "isGroup")]
    pub is_group: bool,
    #[serde(rename = "rawMessage")]
    pub raw_message: serde_json::Value,
}

/// Extract the bare phone number from a full network jid such as
/// `"5511999999999:1@s.messaging.net"`.
pub fn phone_from_jid(jid: &str) -> String {
    jid.split('@')
        .next()
        .unwrap_or(jid)
        .split(':')
        .next()
        .unwrap_or(jid)
        .to_string()
}

/// Normalize a raw inbound frame.
///
/// Returns `None` for traffic that must never surface: anything self-sent
/// and anything on a broadcast/status jid.
pub fn normalize_inbound(session_id: &str, raw: &RawMessage) -> Option<InboundMessage> {
    if raw.key.from_me {
        return None;
    }
    if raw.key.remote_jid.ends_with("@broadcast") {
        return None;
    }

    let content = &raw.content;
    let (kind, media) = if let Some(m) = &content.image {
        (MessageKind::Image, Some(m))
    } else if let Some(m) = &content.video {
        (MessageKind::Video, Some(m))
    } else if let Some(m) = &content.audio {
        (MessageKind::Audio, Some(m))
    } else if let Some(m) = &content.document {
        (MessageKind::Document, Some(m))
    } else if let Some(m) = &content.sticker {
        (MessageKind::Sticker, Some(m))
    } else if let Some(m) = &content.location {
        (MessageKind::Location, Some(m))
    } else if let Some(m) = &content.contact {
        (MessageKind::Contact, Some(m))
    } else {
        (MessageKind::Text, None)
    };

    let text = content
        .conversation
        .clone()
        .or_else(|| content.extended_text.clone())
        .or_else(|| media.and_then(|m| m.caption.clone()))
        .unwrap_or_default();

    Some(InboundMessage {
        session_id: session_id.to_string(),
        from: phone_from_jid(&raw.key.remote_jid),
        from_jid: raw.key.remote_jid.clone(),
        push_name: raw.push_name.clone().unwrap_or_default(),
        content: text.clone(),
        body: text.clone(),
        text,
        kind,
        timestamp: raw.timestamp,
        message_id: raw.key.id.clone(),
        is_group: raw.key.remote_jid.ends_with("@g.us"),
        raw_message: serde_json::to_value(raw).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: MessageKind) -> SendMessageRequest {
        SendMessageRequest {
            session_id: "s1".to_string(),
            to: "5511888888888".to_string(),
            message: "hello".to_string(),
            kind,
            media_url: None,
            caption: None,
        }
    }

    fn raw_text(jid: &str, text: &str) -> RawMessage {
        RawMessage {
            key: MessageKey {
                remote_jid: jid.to_string(),
                from_me: false,
                id: "MSG-1".to_string(),
            },
            push_name: Some("Alice".to_string()),
            timestamp: 1_700_000_000,
            content: RawContent {
                conversation: Some(text.to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_text_payload_is_default() {
        let payload = build_payload(&request(MessageKind::Text)).unwrap();
        assert_eq!(
            payload,
            OutboundPayload::Text {
                to: "5511888888888".to_string(),
                body: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_media_payload_requires_url() {
        let err = build_payload(&request(MessageKind::Image)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidPayload(_)));

        let mut req = request(MessageKind::Image);
        req.media_url = Some("https://cdn.example/pic.jpg".to_string());
        let payload = build_payload(&req).unwrap();
        assert_eq!(
            payload,
            OutboundPayload::Media {
                to: "5511888888888".to_string(),
                kind: MessageKind::Image,
                url: "https://cdn.example/pic.jpg".to_string(),
                caption: Some("hello".to_string()),
            }
        );
    }

    #[test]
    fn test_sticker_not_sendable() {
        assert!(build_payload(&request(MessageKind::Sticker)).is_err());
    }

    #[test]
    fn test_phone_from_jid() {
        assert_eq!(
            phone_from_jid("5511999999999:1@s.messaging.net"),
            "5511999999999"
        );
        assert_eq!(phone_from_jid("5511999999999@s.messaging.net"), "5511999999999");
        assert_eq!(phone_from_jid("bare"), "bare");
    }

    #[test]
    fn test_normalize_plain_text() {
        let raw = raw_text("5511777777777@s.messaging.net", "oi");
        let msg = normalize_inbound("s1", &raw).unwrap();
        assert_eq!(msg.session_id, "s1");
        assert_eq!(msg.from, "5511777777777");
        assert_eq!(msg.from_jid, "5511777777777@s.messaging.net");
        assert_eq!(msg.push_name, "Alice");
        assert_eq!(msg.text, "oi");
        assert_eq!(msg.content, "oi");
        assert_eq!(msg.body, "oi");
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.message_id, "MSG-1");
        assert!(!msg.is_group);
    }

    #[test]
    fn test_normalize_extended_text() {
        let mut raw = raw_text("5511777777777@s.messaging.net", "");
        raw.content.conversation = None;
        raw.content.extended_text = Some("link preview text".to_string());
        let msg = normalize_inbound("s1", &raw).unwrap();
        assert_eq!(msg.text, "link preview text");
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn test_normalize_media_caption() {
        let mut raw = raw_text("5511777777777@s.messaging.net", "");
        raw.content.conversation = None;
        raw.content.video = Some(MediaContent {
            url: Some("https://cdn.example/v.mp4".to_string()),
            caption: Some("watch this".to_string()),
            mime_type: Some("video/mp4".to_string()),
        });
        let msg = normalize_inbound("s1", &raw).unwrap();
        assert_eq!(msg.kind, MessageKind::Video);
        assert_eq!(msg.text, "watch this");
    }

    #[test]
    fn test_normalize_group_detection() {
        let raw = raw_text("1203630XXXX@g.us", "group chatter");
        let msg = normalize_inbound("s1", &raw).unwrap();
        assert!(msg.is_group);
    }

    #[test]
    fn test_self_sent_skipped() {
        let mut raw = raw_text("5511777777777@s.messaging.net", "echo");
        raw.key.from_me = true;
        assert!(normalize_inbound("s1", &raw).is_none());
    }

    #[test]
    fn test_broadcast_skipped() {
        let raw = raw_text("status@broadcast", "story");
        assert!(normalize_inbound("s1", &raw).is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let raw = raw_text("5511777777777@s.messaging.net", "oi");
        let msg = normalize_inbound("s1", &raw).unwrap();
        let value = serde_json::to_value(&msg).unwrap();
        for field in [
            "sessionId",
            "from",
            "fromJid",
            "push_name",
            "text",
            "content",
            "body",
            "type",
            "timestamp",
            "message_id",
            "isGroup",
            "rawMessage",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["type"], "text");
    }
}
