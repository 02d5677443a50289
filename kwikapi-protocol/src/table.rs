//! Codec table used for protocol negotiation.

use crate::codec::{Codec, JsonCodec};
use crate::error::ProtocolError;
use crate::msgpack::MessagePackCodec;
use crate::numeric::NumericArrayCodec;
use crate::raw::RawCodec;
use crate::yaml::YamlCodec;
use std::collections::HashMap;
use std::sync::Arc;

/// Codecs keyed by name, exactly one of which is the default.
///
/// The table is filled during startup and shared read-only afterwards.
#[derive(Clone)]
pub struct CodecTable {
    codecs: HashMap<String, Arc<dyn Codec>>,
    default: String,
}

impl CodecTable {
    /// Creates a table holding the built-in codecs with `json` as default.
    pub fn new() -> Self {
        let mut table = Self::with_default(Arc::new(JsonCodec));
        let builtins: [Arc<dyn Codec>; 4] = [
            Arc::new(MessagePackCodec),
            Arc::new(YamlCodec),
            Arc::new(NumericArrayCodec),
            Arc::new(RawCodec),
        ];
        for codec in builtins {
            table.codecs.insert(codec.name().to_string(), codec);
        }
        table
    }

    /// Creates a table holding only `default`.
    pub fn with_default(default: Arc<dyn Codec>) -> Self {
        let name = default.name().to_string();
        let mut codecs = HashMap::new();
        codecs.insert(name.clone(), default);
        Self {
            codecs,
            default: name,
        }
    }

    /// Adds a codec. Names are unique.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), ProtocolError> {
        let name = codec.name().to_string();
        if self.codecs.contains_key(&name) {
            return Err(ProtocolError::ProtocolAlreadyExists(name));
        }
        tracing::info!(protocol = %name, mime = codec.mime_type(), "Registered protocol");
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>, ProtocolError> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownProtocol(name.to_string()))
    }

    pub fn default_codec(&self) -> Result<Arc<dyn Codec>, ProtocolError> {
        self.get(&self.default)
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Marks an already registered codec as the default.
    pub fn set_default(&mut self, name: &str) -> Result<(), ProtocolError> {
        if !self.codecs.contains_key(name) {
            return Err(ProtocolError::UnknownProtocol(name.to_string()));
        }
        self.default = name.to_string();
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecTable")
            .field("codecs", &self.names())
            .field("default", &self.default)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::Value;

    struct UpperCodec;

    impl Codec for UpperCodec {
        fn name(&self) -> &str {
            "upper"
        }

        fn mime_type(&self) -> &str {
            "text/plain"
        }

        fn record_separator(&self) -> &[u8] {
            b"\n"
        }

        fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
            Ok(Bytes::from(value.to_string().to_uppercase()))
        }

        fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
            Ok(serde_json::from_slice(data)?)
        }

        fn record_decoder(
            &self,
        ) -> Result<Box<dyn crate::codec::RecordDecoder>, ProtocolError> {
            JsonCodec.record_decoder()
        }
    }

    #[test]
    fn test_builtins_present() {
        let table = CodecTable::new();
        assert_eq!(
            table.names(),
            vec!["json", "messagepack", "numpy", "raw", "yaml"]
        );
        assert_eq!(table.default_codec().unwrap().name(), crate::DEFAULT_PROTOCOL);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = CodecTable::new();
        let err = table.register(Arc::new(JsonCodec)).unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolAlreadyExists(ref n) if n == "json"));
    }

    #[test]
    fn test_custom_codec_selected_by_name() {
        let mut table = CodecTable::new();
        table.register(Arc::new(UpperCodec)).unwrap();
        let codec = table.get("upper").unwrap();
        assert_eq!(
            codec.serialize(&Value::from("abc")).unwrap().as_ref(),
            b"\"ABC\""
        );
        assert_eq!(codec.encode_record(&Value::from(1)).unwrap().as_ref(), b"1\n");
    }

    #[test]
    fn test_unknown_protocol() {
        let table = CodecTable::new();
        assert!(matches!(
            table.get("xml"),
            Err(ProtocolError::UnknownProtocol(ref n)) if n == "xml"
        ));
    }

    #[test]
    fn test_set_default() {
        let mut table = CodecTable::new();
        table.set_default("messagepack").unwrap();
        assert_eq!(table.default_codec().unwrap().name(), "messagepack");
        assert!(table.set_default("xml").is_err());
        assert_eq!(table.default_name(), "messagepack");
    }

    #[test]
    fn test_minimal_table_default_is_registered() {
        let mut table = CodecTable::with_default(Arc::new(UpperCodec));
        assert_eq!(table.names(), vec!["upper"]);
        assert_eq!(table.default_name(), "upper");
        assert_eq!(table.default_codec().unwrap().name(), "upper");

        assert!(table.set_default("json").is_err());
        table.register(Arc::new(JsonCodec)).unwrap();
        table.set_default("json").unwrap();
        assert_eq!(table.default_codec().unwrap().name(), "json");
    }
}
