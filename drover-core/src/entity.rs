//! Persisted entity marker and serde helpers for opaque byte fields

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record that can be written to the shared store.
///
/// `ENTITY_TYPE` is the stable name used to look up the serializer in
/// configuration and, for serializers that cannot infer it from content, the
/// name written next to the encoded bytes.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const ENTITY_TYPE: &'static str;
}

/// Serialize `Vec<u8>` as a base64 string so text serializers stay compact.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`base64_bytes`].
pub mod base64_bytes_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|value| STANDARD.decode(value.as_bytes()))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
