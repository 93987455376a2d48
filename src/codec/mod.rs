//! Encoding/decoding model for persisted keys and values.
//!
//! The resolution pipeline never interprets user types. It compares a requested key against
//! the encoded key bytes of a record and decodes the value of the matching record, both
//! through the codec selected by the key/value types.

mod bytes;

pub use bytes::{BlittableCodec, RawBytes, RawBytesCodec};

use crate::status::Status;

/// Trait binding a key type to its default persistence codec.
pub trait PersistKey: Clone + Send + Sync + 'static {
    /// Default codec for this key type.
    type Codec: KeyCodec<Self>;
}

/// Trait binding a value type to its default persistence codec.
pub trait PersistValue: Clone + Send + Sync + 'static {
    /// Default codec for this value type.
    type Codec: ValueCodec<Self>;
}

/// Encode/decode and comparison contract for keys.
pub trait KeyCodec<K>: Send + Sync + 'static {
    /// Encoded length for the given key.
    fn encoded_len(key: &K) -> Result<usize, Status>;
    /// Encode the key into the provided buffer.
    ///
    /// Implementations must write exactly `encoded_len(key)` bytes.
    fn encode_into(key: &K, dst: &mut [u8]) -> Result<(), Status>;
    /// Compare an encoded key (from the log) to a typed key.
    ///
    /// This should avoid allocations when possible.
    fn equals_encoded(encoded: &[u8], key: &K) -> Result<bool, Status>;
    /// Decode an encoded key into an owned value.
    fn decode(encoded: &[u8]) -> Result<K, Status>;
}

/// Encode/decode contract for values.
pub trait ValueCodec<V>: Send + Sync + 'static {
    /// Encoded length for the given value.
    fn encoded_len(value: &V) -> Result<usize, Status>;
    /// Encode the value into the provided buffer.
    ///
    /// Implementations must write exactly `encoded_len(value)` bytes.
    fn encode_into(value: &V, dst: &mut [u8]) -> Result<(), Status>;
    /// Decode an encoded value into an owned value.
    fn decode(encoded: &[u8]) -> Result<V, Status>;
}

/// Encode a key with its default codec into a fresh buffer.
pub fn encode_key<K: PersistKey>(key: &K) -> Result<Vec<u8>, Status> {
    let mut buf = vec![0u8; K::Codec::encoded_len(key)?];
    K::Codec::encode_into(key, &mut buf)?;
    Ok(buf)
}

/// Encode a value with its default codec into a fresh buffer.
pub fn encode_value<V: PersistValue>(value: &V) -> Result<Vec<u8>, Status> {
    let mut buf = vec![0u8; V::Codec::encoded_len(value)?];
    V::Codec::encode_into(value, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blittable_codec_u64_roundtrip() {
        let key: u64 = 12345678901234567890u64;
        let buf = encode_key(&key).unwrap();
        assert_eq!(buf.len(), 8);
        assert_eq!(<BlittableCodec<u64> as KeyCodec<u64>>::decode(&buf).unwrap(), key);
    }

    #[test]
    fn test_blittable_codec_equals_encoded() {
        let buf = encode_key(&42u64).unwrap();
        assert!(<BlittableCodec<u64> as KeyCodec<u64>>::equals_encoded(&buf, &42).unwrap());
        assert!(!<BlittableCodec<u64> as KeyCodec<u64>>::equals_encoded(&buf, &43).unwrap());
    }

    #[test]
    fn test_blittable_codec_decode_wrong_size() {
        let buf = [0u8; 4];
        let result = <BlittableCodec<u64> as KeyCodec<u64>>::decode(&buf);
        assert_eq!(result.unwrap_err(), Status::Corruption);
    }

    #[test]
    fn test_rawbytes_codec_roundtrip() {
        let key = RawBytes::from(b"hello world".to_vec());
        let buf = encode_key(&key).unwrap();
        assert_eq!(buf.len(), 11);
        assert_eq!(<RawBytesCodec as KeyCodec<RawBytes>>::decode(&buf).unwrap(), key);
    }

    #[test]
    fn test_encode_into_rejects_wrong_buffer_size() {
        let mut short = [0u8; 3];
        assert_eq!(
            <BlittableCodec<u64> as ValueCodec<u64>>::encode_into(&7, &mut short).unwrap_err(),
            Status::InvalidArgument
        );
        let key = RawBytes::from(&b"abcd"[..]);
        assert_eq!(
            <RawBytesCodec as KeyCodec<RawBytes>>::encode_into(&key, &mut short).unwrap_err(),
            Status::InvalidArgument
        );
    }

    #[test]
    fn test_rawbytes_equals_encoded() {
        let key = RawBytes::from(b"key-1".to_vec());
        assert!(<RawBytesCodec as KeyCodec<RawBytes>>::equals_encoded(b"key-1", &key).unwrap());
        assert!(!<RawBytesCodec as KeyCodec<RawBytes>>::equals_encoded(b"key-2", &key).unwrap());
        assert_eq!(encode_value(&key).unwrap(), b"key-1");
    }
}
