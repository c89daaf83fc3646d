//! Extract a [`MediaItem`] reference from an inbound Telegram message, the
//! way the admin settings/broadcast wizards capture `media_file_id` when
//! the operator forwards a photo/video/etc. to configure a funnel step or
//! mass broadcast.
//!
//! Ported from `utils/media_handler.py`'s `extract_media_from_message`:
//! the original builds a `MediaItem` dataclass capturing `file_id` plus
//! size/mime metadata for later re-send; this crate keeps only what the
//! data model actually stores (the `BroadcastMessage`/`MassBroadcast`
//! media fields) and drops the size-limit table, which governed upload
//! acceptance in the original's own ingestion path and has no counterpart
//! here since this platform only ever re-sends a `file_id` Telegram
//! already accepted.

use teloxide::types::Message;

use crate::store::models::MediaType;

/// The media reference extracted from an inbound message, ready to persist
/// onto a `BroadcastMessage` or `MassBroadcast` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Which typed send this came from.
    pub media_type: MediaType,
    /// Telegram's re-sendable file reference.
    pub file_id: String,
    /// Telegram's stable dedup identifier for the file.
    pub file_unique_id: String,
    /// Size in bytes, when Telegram reports it.
    pub file_size: Option<u32>,
    /// Original filename, for documents.
    pub file_name: Option<String>,
}

/// Pick the largest [`teloxide::types::PhotoSize`] from a photo message
/// (Telegram convention: sizes are ascending; the caller is free to choose,
/// the platform always wants maximum quality for funnel/broadcast media).
#[must_use]
pub fn extract_media_item(message: &Message) -> Option<MediaItem> {
    if let Some(sizes) = message.photo() {
        let largest = sizes.iter().max_by_key(|p| p.file.size)?;
        return Some(MediaItem {
            media_type: MediaType::Photo,
            file_id: largest.file.id.clone(),
            file_unique_id: largest.file.unique_id.clone(),
            file_size: Some(largest.file.size),
            file_name: None,
        });
    }

    if let Some(video) = message.video() {
        return Some(MediaItem {
            media_type: MediaType::Video,
            file_id: video.file.id.clone(),
            file_unique_id: video.file.unique_id.clone(),
            file_size: Some(video.file.size),
            file_name: video.file_name.clone(),
        });
    }

    if let Some(document) = message.document() {
        return Some(MediaItem {
            media_type: MediaType::Document,
            file_id: document.file.id.clone(),
            file_unique_id: document.file.unique_id.clone(),
            file_size: Some(document.file.size),
            file_name: document.file_name.clone(),
        });
    }

    if let Some(audio) = message.audio() {
        return Some(MediaItem {
            media_type: MediaType::Audio,
            file_id: audio.file.id.clone(),
            file_unique_id: audio.file.unique_id.clone(),
            file_size: Some(audio.file.size),
            file_name: audio.file_name.clone(),
        });
    }

    if let Some(voice) = message.voice() {
        return Some(MediaItem {
            media_type: MediaType::Voice,
            file_id: voice.file.id.clone(),
            file_unique_id: voice.file.unique_id.clone(),
            file_size: Some(voice.file.size),
            file_name: None,
        });
    }

    if let Some(note) = message.video_note() {
        return Some(MediaItem {
            media_type: MediaType::VideoNote,
            file_id: note.file.id.clone(),
            file_unique_id: note.file.unique_id.clone(),
            file_size: Some(note.file.size),
            file_name: None,
        });
    }

    if let Some(animation) = message.animation() {
        return Some(MediaItem {
            media_type: MediaType::Animation,
            file_id: animation.file.id.clone(),
            file_unique_id: animation.file.unique_id.clone(),
            file_size: Some(animation.file.size),
            file_name: animation.file_name.clone(),
        });
    }

    if let Some(sticker) = message.sticker() {
        return Some(MediaItem {
            media_type: MediaType::Sticker,
            file_id: sticker.file.id.clone(),
            file_unique_id: sticker.file.unique_id.clone(),
            file_size: Some(sticker.file.size),
            file_name: None,
        });
    }

    None
}
