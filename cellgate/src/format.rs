//! Encoding of cached data into backend bytes.
//!
//! Only the data is encoded; timestamps travel alongside in [`CacheValue`]
//! so backends can schedule reclamation without decoding anything.

use bytes::Bytes;
use cellgate_core::{CacheValue, Raw};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::FormatError;

/// Encodes the data of `value` with bincode, keeping its timestamps.
pub fn encode<T: Serialize>(value: &CacheValue<T>) -> Result<CacheValue<Raw>, FormatError> {
    let bytes = bincode::serde::encode_to_vec(value.data(), bincode::config::standard())
        .map_err(FormatError::Serialize)?;
    Ok(CacheValue::new(
        Bytes::from(bytes),
        value.stored_at(),
        value.fresh_until(),
        value.stale_until(),
        value.retain_until(),
    ))
}

/// Decodes a stored value back into `T`.
pub fn decode<T: DeserializeOwned>(value: CacheValue<Raw>) -> Result<CacheValue<T>, FormatError> {
    value.try_map(|raw| {
        bincode::serde::decode_from_slice::<T, _>(&raw, bincode::config::standard())
            .map(|(data, _)| data)
            .map_err(FormatError::Deserialize)
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        status: u16,
        body: Bytes,
    }

    #[test]
    fn timestamps_survive_encoding() {
        let now = Utc::now();
        let value = CacheValue::new(
            Entry {
                status: 404,
                body: Bytes::from_static(b"{}"),
            },
            now,
            now + chrono::Duration::seconds(60),
            now + chrono::Duration::seconds(90),
            now + chrono::Duration::seconds(120),
        );
        let raw = encode(&value).unwrap();
        assert_eq!(raw.retain_until(), value.retain_until());

        let decoded: CacheValue<Entry> = decode(raw).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let now = Utc::now();
        let raw = CacheValue::new(Bytes::from_static(&[0xff; 3]), now, now, now, now);
        assert!(decode::<Entry>(raw).is_err());
    }
}
