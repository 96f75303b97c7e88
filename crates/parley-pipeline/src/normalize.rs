// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel payload normalization.
//!
//! Turns whatever a channel adapter hands over into the canonical message
//! shape. Pure: no storage, no clock beyond defaulting a missing timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parley_core::envelope::ChannelPayload;
use parley_core::types::{Attachment, ContentType, Message, MessageStatus, SenderType};
use parley_core::ParleyError;

/// A validated inbound payload, not yet bound to a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedInbound {
    pub channel_id: String,
    pub external_id: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub content_type: ContentType,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedInbound {
    /// Builds the persisted message. Inbound messages are stored already
    /// `received`.
    pub fn into_message(self, id: String, conversation_id: String) -> Message {
        Message {
            id,
            conversation_id,
            sender_type: SenderType::Contact,
            sender_id: Some(self.sender_id),
            content_type: self.content_type,
            content: self.content,
            metadata: self.metadata,
            attachments: self.attachments,
            status: MessageStatus::Received,
            external_id: Some(self.external_id),
            error: None,
            created_at: self.timestamp,
            sent_at: None,
            delivered_at: None,
            read_at: None,
        }
    }
}

/// Validates and canonicalizes a channel payload.
///
/// Fails with `InvalidPayload` when the upstream event id or the sender is
/// missing, since neither dedup nor conversation lookup work without them.
pub fn normalize(payload: ChannelPayload) -> Result<NormalizedInbound, ParleyError> {
    let external_id = required(payload.external_id, "external_id")?;
    let sender_id = required(payload.sender_id, "sender_id")?;

    let content_type = canonical_content_type(&payload.content_type);
    let content = normalize_content(&payload.content, content_type);

    let mut metadata = payload.metadata;
    if let Some(name) = payload.sender_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        metadata
            .entry("sender_name".to_string())
            .or_insert_with(|| name.to_string());
    }

    let attachments = payload
        .attachments
        .into_iter()
        .map(|mut attachment| {
            if attachment.id.trim().is_empty() {
                attachment.id = uuid::Uuid::new_v4().to_string();
            }
            attachment
        })
        .collect();

    Ok(NormalizedInbound {
        channel_id: payload.channel_id,
        external_id,
        sender_id,
        sender_name: payload.sender_name,
        content_type,
        content,
        attachments,
        metadata,
        timestamp: payload.timestamp.unwrap_or_else(Utc::now),
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, ParleyError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParleyError::InvalidPayload(format!("missing {field}")))
}

/// Maps the channel's content type vocabulary onto [`ContentType`].
/// Unknown types fall back to text.
pub fn canonical_content_type(raw: &str) -> ContentType {
    let raw = raw.trim().to_ascii_lowercase();
    match raw.as_str() {
        "text" | "text/plain" | "plain" => ContentType::Text,
        "image" => ContentType::Image,
        "video" => ContentType::Video,
        "audio" | "ptt" | "voice" => ContentType::Audio,
        "document" | "file" | "application/pdf" => ContentType::Document,
        "location" | "geo" => ContentType::Location,
        "contact" | "vcard" | "contacts" => ContentType::Contact,
        "template" | "hsm" => ContentType::Template,
        "interactive" | "button" | "list" | "buttons" | "list_reply" => ContentType::Interactive,
        other if other.starts_with("image/") => ContentType::Image,
        other if other.starts_with("video/") => ContentType::Video,
        other if other.starts_with("audio/") => ContentType::Audio,
        _ => ContentType::Text,
    }
}

fn normalize_content(content: &str, content_type: ContentType) -> String {
    let trimmed = content.trim();
    if content_type == ContentType::Text {
        trimmed.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ChannelPayload {
        ChannelPayload {
            channel_id: "ch1".into(),
            external_id: Some("wamid.1".into()),
            sender_id: Some("5511999".into()),
            content_type: "text".into(),
            content: "  oi\r\ntudo bem?\r ".into(),
            ..Default::default()
        }
    }

    #[test]
    fn trims_and_normalizes_line_breaks() {
        let normalized = normalize(payload()).unwrap();
        assert_eq!(normalized.content, "oi\ntudo bem?");
        assert_eq!(normalized.content_type, ContentType::Text);
        assert!(normalized.metadata.is_empty());
    }

    #[test]
    fn missing_external_id_is_invalid() {
        let mut p = payload();
        p.external_id = None;
        let err = normalize(p).unwrap_err();
        assert!(matches!(err, ParleyError::InvalidPayload(ref m) if m.contains("external_id")));
    }

    #[test]
    fn blank_sender_is_invalid() {
        let mut p = payload();
        p.sender_id = Some("   ".into());
        assert!(matches!(normalize(p), Err(ParleyError::InvalidPayload(_))));
    }

    #[test]
    fn content_type_vocabulary() {
        let cases = [
            ("TEXT/PLAIN", ContentType::Text),
            ("image/webp", ContentType::Image),
            ("video/3gpp", ContentType::Video),
            ("ptt", ContentType::Audio),
            ("audio/ogg", ContentType::Audio),
            ("application/pdf", ContentType::Document),
            ("geo", ContentType::Location),
            ("vcard", ContentType::Contact),
            ("hsm", ContentType::Template),
            ("list_reply", ContentType::Interactive),
            ("sticker", ContentType::Text),
            ("", ContentType::Text),
        ];
        for (raw, expected) in cases {
            assert_eq!(canonical_content_type(raw), expected, "{raw}");
        }
    }

    #[test]
    fn attachments_get_ids_and_media_keeps_line_breaks() {
        let mut p = payload();
        p.content_type = "document".into();
        p.content = " line1\r\nline2 ".into();
        p.attachments = vec![
            Attachment {
                kind: "document".into(),
                url: "https://cdn.example/a.pdf".into(),
                ..Default::default()
            },
            Attachment {
                id: "keep-me".into(),
                kind: "image".into(),
                url: "https://cdn.example/b.png".into(),
                ..Default::default()
            },
        ];
        let normalized = normalize(p).unwrap();
        assert_eq!(normalized.content, "line1\r\nline2");
        assert!(!normalized.attachments[0].id.is_empty());
        assert_eq!(normalized.attachments[1].id, "keep-me");
    }

    #[test]
    fn sender_name_lands_in_metadata() {
        let mut p = payload();
        p.sender_name = Some("Ana".into());
        let message = normalize(p).unwrap().into_message("m1".into(), "c1".into());
        assert_eq!(message.metadata.get("sender_name").map(String::as_str), Some("Ana"));
        assert_eq!(message.status, MessageStatus::Received);
        assert_eq!(message.sender_type, SenderType::Contact);
        assert_eq!(message.external_id.as_deref(), Some("wamid.1"));
    }
}
