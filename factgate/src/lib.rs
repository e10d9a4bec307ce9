pub mod cli;
pub mod error;
pub mod execution;
pub mod fri;
pub mod fs;
pub mod job;
pub mod pipeline;
pub mod prover;
pub mod registry;
pub mod risk;
pub mod rpc;
pub mod store;
pub mod submit;
pub mod tracing;

/// Common information for the `--version` CLI flags.
pub fn version() -> String {
    let pkg_name = env!("CARGO_PKG_NAME");
    let git_describe = env!("VERGEN_GIT_DESCRIBE");
    let timestamp = env!("VERGEN_BUILD_TIMESTAMP");
    format!("{pkg_name} ({git_describe}) [built: {timestamp}]")
}

/// Serde adapters for byte blobs represented as hex strings on disk, with
/// or without an `0x` prefix.
mod hex {
    use std::borrow::Cow;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", ::hex::encode(data)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = Cow::<str>::deserialize(deserializer)?;
        parse(&text).map_err(D::Error::custom)
    }

    fn parse(text: &str) -> Result<Vec<u8>, ::hex::FromHexError> {
        ::hex::decode(text.strip_prefix("0x").unwrap_or(text))
    }

    pub mod opt {
        use super::*;

        pub fn serialize<S: Serializer>(
            data: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match data {
                Some(data) => super::serialize(data, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            Option::<Cow<str>>::deserialize(deserializer)?
                .map(|text| parse(&text).map_err(D::Error::custom))
                .transpose()
        }
    }
}
