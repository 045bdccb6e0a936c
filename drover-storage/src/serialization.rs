//! Serializer variants and the stored frame format
//!
//! Frame layout:
//!
//! ```text
//! +-------+---------+------------+---------------------------+------+
//! | magic | version | serializer | [u16 len | entity type]  | body |
//! +-------+---------+------------+---------------------------+------+
//! ```
//!
//! The entity type is present only when the serializer cannot recover it
//! from the body itself.

use drover_config::{SerializationConfig, SerializerKind};
use drover_core::Entity;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

const FRAME_MAGIC: u8 = 0xD7;
const FRAME_VERSION: u8 = 1;
const XML_ROOT: &str = "entity";

/// Entity type name used for task payloads
pub const PAYLOAD_ENTITY: &str = "task_payload";

/// Entity type name used for job settings
pub const SETTINGS_ENTITY: &str = "task_job_settings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSerializer {
    Json,
    Binary,
    Xml,
}

impl From<SerializerKind> for PayloadSerializer {
    fn from(kind: SerializerKind) -> Self {
        match kind {
            SerializerKind::Json => PayloadSerializer::Json,
            SerializerKind::Binary => PayloadSerializer::Binary,
            SerializerKind::Xml => PayloadSerializer::Xml,
        }
    }
}

impl PayloadSerializer {
    /// JSON bodies are self-describing enough to be checked structurally;
    /// binary and XML bodies carry no reliable type information.
    pub fn can_determine_entity_type_from_content(self) -> bool {
        matches!(self, PayloadSerializer::Json)
    }

    fn tag(self) -> u8 {
        match self {
            PayloadSerializer::Json => 1,
            PayloadSerializer::Binary => 2,
            PayloadSerializer::Xml => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PayloadSerializer::Json),
            2 => Some(PayloadSerializer::Binary),
            3 => Some(PayloadSerializer::Xml),
            _ => None,
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> StorageResult<Vec<u8>> {
        match self {
            PayloadSerializer::Json => {
                serde_json::to_vec(value).map_err(StorageError::serialization)
            }
            PayloadSerializer::Binary => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map_err(StorageError::serialization)
            }
            PayloadSerializer::Xml => {
                let mut tree = serde_json::to_value(value).map_err(StorageError::serialization)?;
                drop_nulls(&mut tree);
                quick_xml::se::to_string_with_root(XML_ROOT, &tree)
                    .map(String::into_bytes)
                    .map_err(StorageError::serialization)
            }
        }
    }

    pub fn deserialize<T: DeserializeOwned>(self, bytes: &[u8]) -> StorageResult<T> {
        match self {
            PayloadSerializer::Json => {
                serde_json::from_slice(bytes).map_err(StorageError::serialization)
            }
            PayloadSerializer::Binary => {
                let (value, _read): (T, usize) =
                    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                        .map_err(StorageError::serialization)?;
                Ok(value)
            }
            PayloadSerializer::Xml => {
                let text = std::str::from_utf8(bytes).map_err(StorageError::serialization)?;
                quick_xml::de::from_str(text).map_err(StorageError::serialization)
            }
        }
    }
}

/// XML writes `None` as an empty element that reads back as `Some`, so absent
/// members are left out of the document instead.
fn drop_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(members) => {
            members.retain(|_, member| !member.is_null());
            members.values_mut().for_each(drop_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

/// Encodes and decodes stored values, choosing the serializer per entity type
#[derive(Debug, Clone, Default)]
pub struct EntityCodec {
    config: SerializationConfig,
}

impl EntityCodec {
    pub fn new(config: SerializationConfig) -> Self {
        Self { config }
    }

    pub fn serializer_for(&self, entity_type: &str) -> PayloadSerializer {
        self.config.serializer_for(entity_type).into()
    }

    pub fn encode<E: Entity>(&self, entity: &E) -> StorageResult<Vec<u8>> {
        self.encode_as(E::ENTITY_TYPE, entity)
    }

    pub fn decode<E: Entity>(&self, bytes: &[u8]) -> StorageResult<E> {
        self.decode_as(E::ENTITY_TYPE, bytes)
    }

    pub fn encode_payload<T: Serialize>(&self, payload: &T) -> StorageResult<Vec<u8>> {
        self.encode_as(PAYLOAD_ENTITY, payload)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self, bytes: &[u8]) -> StorageResult<T> {
        self.decode_as(PAYLOAD_ENTITY, bytes)
    }

    pub fn encode_settings<T: Serialize>(&self, settings: &T) -> StorageResult<Vec<u8>> {
        self.encode_as(SETTINGS_ENTITY, settings)
    }

    pub fn decode_settings<T: DeserializeOwned>(&self, bytes: &[u8]) -> StorageResult<T> {
        self.decode_as(SETTINGS_ENTITY, bytes)
    }

    /// Serialize with the serializer configured for `entity_type` and frame it
    pub fn encode_as<T: Serialize>(&self, entity_type: &str, value: &T) -> StorageResult<Vec<u8>> {
        let serializer = self.serializer_for(entity_type);
        let body = serializer.serialize(value)?;

        let mut frame = Vec::with_capacity(body.len() + entity_type.len() + 5);
        frame.extend_from_slice(&[FRAME_MAGIC, FRAME_VERSION, serializer.tag()]);
        if !serializer.can_determine_entity_type_from_content() {
            let len = u16::try_from(entity_type.len()).map_err(|_| {
                StorageError::serialization(format!("entity type name too long: {}", entity_type))
            })?;
            frame.extend_from_slice(&len.to_be_bytes());
            frame.extend_from_slice(entity_type.as_bytes());
        }
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a frame written by any serializer, checking the recorded
    /// entity type when the frame carries one
    pub fn decode_as<T: DeserializeOwned>(
        &self,
        entity_type: &str,
        bytes: &[u8],
    ) -> StorageResult<T> {
        let (serializer, body) = read_frame(entity_type, bytes)?;
        serializer.deserialize(body)
    }
}

fn read_frame<'a>(
    expected_type: &str,
    bytes: &'a [u8],
) -> StorageResult<(PayloadSerializer, &'a [u8])> {
    let [magic, version, tag, rest @ ..] = bytes else {
        return Err(StorageError::serialization("frame too short"));
    };
    if *magic != FRAME_MAGIC {
        return Err(StorageError::serialization("not a drover frame"));
    }
    if *version != FRAME_VERSION {
        return Err(StorageError::serialization(format!(
            "unsupported frame version {}",
            version
        )));
    }
    let serializer = PayloadSerializer::from_tag(*tag).ok_or_else(|| {
        StorageError::serialization(format!("unknown serializer tag {}", tag))
    })?;

    if serializer.can_determine_entity_type_from_content() {
        return Ok((serializer, rest));
    }

    let [hi, lo, rest @ ..] = rest else {
        return Err(StorageError::serialization("missing entity type"));
    };
    let len = u16::from_be_bytes([*hi, *lo]) as usize;
    if rest.len() < len {
        return Err(StorageError::serialization("truncated entity type"));
    }
    let (name, body) = rest.split_at(len);
    if name != expected_type.as_bytes() {
        return Err(StorageError::serialization(format!(
            "stored entity type '{}' does not match '{}'",
            String::from_utf8_lossy(name),
            expected_type
        )));
    }
    Ok((serializer, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::{HostInfo, RuntimeInfo, Task, TaskOutput, TaskSummary};
    use std::collections::BTreeSet;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ReportRequest {
        region: String,
        year: u32,
        include_drafts: bool,
    }

    fn codec(kind: SerializerKind) -> EntityCodec {
        EntityCodec::new(SerializationConfig {
            default: kind,
            ..SerializationConfig::default()
        })
    }

    fn request() -> ReportRequest {
        ReportRequest {
            region: "emea".to_string(),
            year: 2024,
            include_drafts: true,
        }
    }

    #[test]
    fn test_payload_round_trip_for_each_serializer() {
        for kind in [SerializerKind::Json, SerializerKind::Binary, SerializerKind::Xml] {
            let codec = codec(kind);
            let bytes = codec.encode_payload(&request()).unwrap();
            let decoded: ReportRequest = codec.decode_payload(&bytes).unwrap();
            assert_eq!(decoded, request(), "{} round trip", kind);
        }
    }

    fn round_trip<T>(codec: &EntityCodec, value: &T, kind: SerializerKind)
    where
        T: Entity + PartialEq + std::fmt::Debug,
    {
        let decoded: T = codec.decode(&codec.encode(value).unwrap()).unwrap();
        assert_eq!(&decoded, value, "{} round trip of {}", kind, T::ENTITY_TYPE);
    }

    #[test]
    fn test_entities_round_trip_for_each_serializer() {
        let bare = Task::new("report", vec![0, 1, 2, 255]);
        let full = Task::new("report", vec![7])
            .with_tenant("acme")
            .with_job_settings(vec![9]);

        let running = TaskSummary::running(&bare, "p1", bare.submitted_at);
        let mut finished = TaskSummary::running(&full, "p1", full.submitted_at);
        finished.complete(
            TaskOutput::new()
                .with_message("done")
                .with_value("rows", "12"),
            full.submitted_at,
        );

        let idle = RuntimeInfo {
            processor_id: "p1".to_string(),
            host: HostInfo {
                hostname: "worker-01".to_string(),
                pid: 4242,
                version: "1.0.0".to_string(),
            },
            heartbeat_at: bare.submitted_at,
            executing: BTreeSet::new(),
        };
        let mut busy = idle.clone();
        busy.executing.extend([bare.id, full.id]);

        for kind in [SerializerKind::Json, SerializerKind::Binary, SerializerKind::Xml] {
            let codec = codec(kind);
            round_trip(&codec, &bare, kind);
            round_trip(&codec, &full, kind);
            round_trip(&codec, &running, kind);
            round_trip(&codec, &finished, kind);
            round_trip(&codec, &idle, kind);
            round_trip(&codec, &busy, kind);
        }
    }

    #[test]
    fn test_xml_leaves_out_absent_members() {
        let task = Task::new("report", vec![1]);
        let bytes = codec(SerializerKind::Xml).encode(&task).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("job_settings"), "{}", text);
    }

    #[test]
    fn test_frame_records_type_only_when_needed() {
        let json = codec(SerializerKind::Json).encode_payload(&request()).unwrap();
        assert_eq!(json[2], PayloadSerializer::Json.tag());
        assert_eq!(json[3], b'{');

        let binary = codec(SerializerKind::Binary).encode_payload(&request()).unwrap();
        let len = u16::from_be_bytes([binary[3], binary[4]]) as usize;
        assert_eq!(&binary[5..5 + len], PAYLOAD_ENTITY.as_bytes());
    }

    #[test]
    fn test_decoding_follows_frame_not_config() {
        let written = codec(SerializerKind::Binary).encode_payload(&request()).unwrap();
        let decoded: ReportRequest = codec(SerializerKind::Json).decode_payload(&written).unwrap();
        assert_eq!(decoded, request());
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let codec = codec(SerializerKind::Binary);
        let settings = codec.encode_settings(&request()).unwrap();
        let err = codec.decode_payload::<ReportRequest>(&settings).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(msg) if msg.contains("does not match")));
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let codec = EntityCodec::default();
        assert!(codec.decode_payload::<ReportRequest>(b"").is_err());
        assert!(codec.decode_payload::<ReportRequest>(b"{\"a\":1}").is_err());
        let mut frame = codec.encode_payload(&request()).unwrap();
        frame[1] = 99;
        assert!(codec.decode_payload::<ReportRequest>(&frame).is_err());
    }
}
