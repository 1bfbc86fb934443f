//! Page → worker control messages

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A control message posted by a page, `{type, data}` on the wire
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawControlMessage")]
pub enum ControlMessage {
    /// Delete every partition and take over immediately
    ForceUpdate,
    /// Delete one partition, or all of them
    ClearCache { cache_name: Option<String> },
    /// Report partition sizes
    GetCacheInfo,
    /// Fetch and store the given URLs
    PrefetchResources { urls: Vec<String> },
}

#[derive(Deserialize)]
struct RawControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ClearCacheData {
    #[serde(default)]
    cache_name: Option<String>,
}

#[derive(Deserialize)]
struct PrefetchData {
    urls: Vec<String>,
}

impl TryFrom<RawControlMessage> for ControlMessage {
    type Error = String;

    fn try_from(raw: RawControlMessage) -> Result<Self, Self::Error> {
        let data = raw.data.unwrap_or(serde_json::Value::Null);

        match raw.kind.as_str() {
            "FORCE_UPDATE" => Ok(ControlMessage::ForceUpdate),
            "CLEAR_CACHE" => {
                let data: ClearCacheData = if data.is_null() {
                    ClearCacheData::default()
                } else {
                    serde_json::from_value(data).map_err(|e| e.to_string())?
                };
                Ok(ControlMessage::ClearCache {
                    cache_name: data.cache_name,
                })
            }
            "GET_CACHE_INFO" => Ok(ControlMessage::GetCacheInfo),
            "PREFETCH_RESOURCES" => {
                let data: PrefetchData =
                    serde_json::from_value(data).map_err(|e| e.to_string())?;
                Ok(ControlMessage::PrefetchResources { urls: data.urls })
            }
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

impl ControlMessage {
    /// Decode a message from its JSON text
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text)
            .map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ForceUpdate => "FORCE_UPDATE",
            ControlMessage::ClearCache { .. } => "CLEAR_CACHE",
            ControlMessage::GetCacheInfo => "GET_CACHE_INFO",
            ControlMessage::PrefetchResources { .. } => "PREFETCH_RESOURCES",
        }
    }
}

/// Summary of one partition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub name: String,
    pub count: usize,
    /// First few entry URLs, oldest first
    pub urls: Vec<String>,
}

/// Reply sent back on a message's reply channel
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageReply {
    CacheInfo(Vec<PartitionInfo>),
}

/// Outcome of a prefetch run
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PrefetchSummary {
    pub requested: usize,
    pub cached: usize,
    pub failed: usize,
}
