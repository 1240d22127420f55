use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const MAX_CONVERTERS_PER_PLATFORM: usize = 64;

pub type PlatformId = String;
pub type RequestId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformMetadata {
    pub title: String,
    /// Icon identifier as understood by the client's icon resolver (e.g. "x", "bluesky").
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformSource {
    pub platform: PlatformId,
    pub metadata: PlatformMetadata,
    pub enabled: bool,
    #[serde(default)]
    pub converters: Vec<String>,
    /// `None` means no converter is selected. An empty string on the wire reads as `None`.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub selected: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AppConfig {
    pub sources: Vec<PlatformSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionEvent {
    pub original: String,
    pub converted: String,
}

/// A fix applied by [`AppConfig::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    DuplicatePlatform(PlatformId),
    ConvertersTruncated {
        platform: PlatformId,
        dropped: usize,
    },
    SelectionCleared {
        platform: PlatformId,
        converter: String,
    },
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigIssue::DuplicatePlatform(platform) => {
                write!(f, "duplicate platform entry {platform} dropped")
            }
            ConfigIssue::ConvertersTruncated { platform, dropped } => write!(
                f,
                "{dropped} converters beyond {MAX_CONVERTERS_PER_PLATFORM} dropped for {platform}"
            ),
            ConfigIssue::SelectionCleared {
                platform,
                converter,
            } => write!(
                f,
                "selected converter {converter} is not offered for {platform}; selection cleared"
            ),
        }
    }
}

/// Platforms the client has static content for. Anything else is still valid config data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownPlatform {
    Twitter,
    Bluesky,
    Tiktok,
    Instagram,
    Reddit,
}

impl KnownPlatform {
    pub const ALL: [KnownPlatform; 5] = [
        KnownPlatform::Twitter,
        KnownPlatform::Bluesky,
        KnownPlatform::Tiktok,
        KnownPlatform::Instagram,
        KnownPlatform::Reddit,
    ];

    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "twitter" => Some(KnownPlatform::Twitter),
            "bluesky" => Some(KnownPlatform::Bluesky),
            "tiktok" => Some(KnownPlatform::Tiktok),
            "instagram" => Some(KnownPlatform::Instagram),
            "reddit" => Some(KnownPlatform::Reddit),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            KnownPlatform::Twitter => "twitter",
            KnownPlatform::Bluesky => "bluesky",
            KnownPlatform::Tiktok => "tiktok",
            KnownPlatform::Instagram => "instagram",
            KnownPlatform::Reddit => "reddit",
        }
    }
}

impl PlatformSource {
    pub fn has_converter(&self, name: &str) -> bool {
        self.converters.iter().any(|converter| converter == name)
    }

    /// Clears `selected` when it no longer names one of `converters`.
    pub fn normalize(&mut self) -> bool {
        match &self.selected {
            Some(name) if !self.has_converter(name) => {
                self.selected = None;
                true
            }
            _ => false,
        }
    }
}

impl AppConfig {
    pub fn find(&self, platform: &str) -> Option<&PlatformSource> {
        self.sources.iter().find(|source| source.platform == platform)
    }

    pub fn find_mut(&mut self, platform: &str) -> Option<&mut PlatformSource> {
        self.sources
            .iter_mut()
            .find(|source| source.platform == platform)
    }

    /// Enforces unique platform keys (first entry wins), the converter cap and valid selections.
    pub fn normalize(&mut self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut seen: Vec<PlatformId> = Vec::with_capacity(self.sources.len());

        self.sources.retain(|source| {
            if seen.contains(&source.platform) {
                issues.push(ConfigIssue::DuplicatePlatform(source.platform.clone()));
                false
            } else {
                seen.push(source.platform.clone());
                true
            }
        });

        for source in &mut self.sources {
            let dropped = source
                .converters
                .len()
                .saturating_sub(MAX_CONVERTERS_PER_PLATFORM);
            if dropped > 0 {
                source.converters.truncate(MAX_CONVERTERS_PER_PLATFORM);
                issues.push(ConfigIssue::ConvertersTruncated {
                    platform: source.platform.clone(),
                    dropped,
                });
            }

            let previous = source.selected.clone();
            if source.normalize() {
                issues.push(ConfigIssue::SelectionCleared {
                    platform: source.platform.clone(),
                    converter: previous.unwrap_or_default(),
                });
            }
        }

        issues
    }
}

pub fn validate_converter_choice(source: &PlatformSource, name: &str) -> Result<(), CoreError> {
    if source.has_converter(name) {
        Ok(())
    } else {
        Err(CoreError::UnknownConverter {
            platform: source.platform.clone(),
            converter: name.to_owned(),
        })
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|name| !name.trim().is_empty()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    GetState,
    TogglePlatform {
        platform: PlatformId,
        enabled: bool,
    },
    SelectConverter {
        platform: PlatformId,
        converter_name: String,
    },
    StartClipboardMonitor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum Outcome {
    State(AppConfig),
    Done,
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum BackendEvent {
    StateChanged(AppConfig),
    LinkConverted(ConversionEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcMessage {
    Request(Request),
    Response(Response),
    Event(BackendEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Event = 2,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid frame length")]
    InvalidFrameLength,
    #[error("frame of {0} bytes exceeds 1 MiB")]
    FrameTooLarge(usize),
    #[error("unsupported message type {0}")]
    UnsupportedMessageType(u8),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("converter {converter} is not available for {platform}")]
    UnknownConverter { platform: String, converter: String },
}

pub fn encode_frame(message: &IpcMessage) -> Result<Vec<u8>, CoreError> {
    let (message_type, payload) = match message {
        IpcMessage::Request(request) => (MessageType::Request as u8, to_json(request)?),
        IpcMessage::Response(response) => (MessageType::Response as u8, to_json(response)?),
        IpcMessage::Event(event) => (MessageType::Event as u8, to_json(event)?),
    };

    let frame_len = 1usize
        .checked_add(payload.len())
        .ok_or(CoreError::InvalidFrameLength)?;
    if frame_len + 4 > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge(frame_len + 4));
    }
    let frame_len_u32 = u32::try_from(frame_len).map_err(|_| CoreError::InvalidFrameLength)?;

    let mut out = BytesMut::with_capacity(4 + frame_len);
    out.put_u32_le(frame_len_u32);
    out.put_u8(message_type);
    out.extend_from_slice(&payload);
    Ok(out.to_vec())
}

pub fn decode_frame(frame: &[u8]) -> Result<IpcMessage, CoreError> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge(frame.len()));
    }
    if frame.len() < 5 {
        return Err(CoreError::InvalidFrameLength);
    }

    let mut cursor = frame;
    let expected_len = cursor.get_u32_le() as usize;
    if expected_len + 4 != frame.len() {
        return Err(CoreError::InvalidFrameLength);
    }

    let message_type = cursor.get_u8();
    let payload = cursor;

    match message_type {
        x if x == MessageType::Request as u8 => Ok(IpcMessage::Request(from_json(payload)?)),
        x if x == MessageType::Response as u8 => Ok(IpcMessage::Response(from_json(payload)?)),
        x if x == MessageType::Event as u8 => Ok(IpcMessage::Event(from_json(payload)?)),
        other => Err(CoreError::UnsupportedMessageType(other)),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|err| CoreError::Serialization(err.to_string()))
}

fn from_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, CoreError> {
    serde_json::from_slice(payload).map_err(|err| CoreError::Serialization(err.to_string()))
}
