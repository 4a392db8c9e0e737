//! Rack file format.
//!
//! A rack persists as one envelope
//! `{signature, timestamp, encoding, hash, payload}`, packed as MessagePack
//! and Brotli-compressed. `hash` is the hex SHA-256 of the canonical JSON
//! text of `payload`: `serde_json` output of the payload as a `Value`,
//! object keys sorted, no whitespace. The envelope carries the payload as
//! that same `Value`, so the hash can be recomputed from the decoded
//! payload regardless of how the binary layer encoded it.
//!
//! Files that fail the binary path are read as plain UTF-8 JSON (older
//! format): either a whole envelope or a bare payload object.

use crate::config::EngineConfig;
use crate::document::{self, Document};
use crate::error::{OpenDbsError, Result};
use crate::schema::{RackKind, RackSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};

pub const SIGNATURE: &str = "OPENDBS_V1";
pub const ENCODING: &str = "msgpack+brotli";
pub const RACK_FILE_EXTENSION: &str = "odbs";

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Persisted logical state of one rack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RackPayload {
    #[serde(default)]
    pub documents: BTreeMap<String, Document>,
    #[serde(default = "default_next_id")]
    pub next_id: u64,
    #[serde(default)]
    pub indexed_fields: Vec<String>,
    #[serde(default, alias = "type")]
    pub kind: RackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<RackSchema>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

fn default_next_id() -> u64 {
    1
}

/// On-disk wrapper around a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub signature: String,
    pub timestamp: i64,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(alias = "data")]
    pub payload: Value,
}

/// Encodes and decodes rack files. Holds the compression settings.
#[derive(Debug, Clone, Copy)]
pub struct RackCodec {
    quality: u32,
    window: u32,
}

impl Default for RackCodec {
    fn default() -> Self {
        RackCodec::from_config(&EngineConfig::default())
    }
}

impl RackCodec {
    pub fn from_config(config: &EngineConfig) -> Self {
        RackCodec {
            quality: config.compression_quality,
            window: config.compression_window,
        }
    }

    /// Payload -> hashed envelope -> MessagePack -> Brotli
    pub fn encode(&self, payload: &RackPayload) -> Result<Vec<u8>> {
        let payload = serde_json::to_value(payload)?;
        let envelope = Envelope {
            signature: SIGNATURE.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            encoding: ENCODING.to_string(),
            hash: Some(hash_payload(&payload)?),
            payload,
        };
        self.seal(&envelope)
    }

    /// Inverse of `encode`, with the plain JSON fallback. Never returns a
    /// payload whose stored hash disagrees with its content.
    pub fn decode(&self, bytes: &[u8]) -> Result<RackPayload> {
        match self.unseal(bytes) {
            Ok(envelope) => {
                if envelope.signature != SIGNATURE {
                    return Err(OpenDbsError::Decode(format!(
                        "unexpected signature '{}'",
                        envelope.signature
                    )));
                }
                if envelope.hash.is_none() {
                    return Err(OpenDbsError::Decode("binary envelope carries no hash".into()));
                }
                open_envelope(envelope)
            }
            Err(binary_err) => {
                let value: Value = serde_json::from_slice(bytes).map_err(|json_err| {
                    OpenDbsError::Decode(format!(
                        "unknown format (binary: {binary_err}; json: {json_err})"
                    ))
                })?;
                decode_json(value)
            }
        }
    }

    pub(crate) fn seal(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let packed = rmp_serde::to_vec_named(envelope)?;
        let mut writer = brotli::CompressorWriter::new(
            Vec::new(),
            BROTLI_BUFFER_SIZE,
            self.quality,
            self.window,
        );
        writer.write_all(&packed)?;
        Ok(writer.into_inner())
    }

    fn unseal(&self, bytes: &[u8]) -> Result<Envelope> {
        let mut reader = brotli::Decompressor::new(bytes, BROTLI_BUFFER_SIZE);
        let mut packed = Vec::new();
        reader.read_to_end(&mut packed)?;
        Ok(rmp_serde::from_slice(&packed)?)
    }
}

/// Hex SHA-256 of the canonical JSON text of a payload value.
pub fn hash_payload(payload: &Value) -> Result<String> {
    let canonical = serde_json::to_string(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn decode_json(value: Value) -> Result<RackPayload> {
    let is_envelope = value
        .as_object()
        .map(|m| m.contains_key("signature") || m.contains_key("payload"))
        .unwrap_or(false);

    if is_envelope {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| OpenDbsError::Decode(format!("malformed envelope: {e}")))?;
        open_envelope(envelope)
    } else {
        payload_from_value(value)
    }
}

fn open_envelope(envelope: Envelope) -> Result<RackPayload> {
    if let Some(stored) = &envelope.hash {
        let computed = hash_payload(&envelope.payload)?;
        if *stored != computed {
            return Err(OpenDbsError::Corruption {
                stored: stored.clone(),
                computed,
            });
        }
    }
    payload_from_value(envelope.payload)
}

fn payload_from_value(value: Value) -> Result<RackPayload> {
    let mut payload: RackPayload = serde_json::from_value(value)
        .map_err(|e| OpenDbsError::Decode(format!("malformed payload: {e}")))?;
    if payload.created_at == DateTime::<Utc>::default() {
        payload.created_at = document::now();
    }
    Ok(payload)
}
