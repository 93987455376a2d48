//! Codecs for fixed-layout `Pod` types and raw byte strings.

use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;
use bytes::Bytes;

use crate::codec::{KeyCodec, PersistKey, PersistValue, ValueCodec};
use crate::status::Status;

/// Copy `src` into a destination sized by `encoded_len`.
#[inline]
fn copy_exact(src: &[u8], dst: &mut [u8]) -> Result<(), Status> {
    if dst.len() != src.len() {
        return Err(Status::InvalidArgument);
    }
    dst.copy_from_slice(src);
    Ok(())
}

/// Codec storing a `Pod` value as its in-memory bytes.
///
/// Records written on a machine of different endianness decode to different values; the
/// log is not portable across architectures.
pub struct BlittableCodec<T>(PhantomData<T>);

impl<T: Pod> BlittableCodec<T> {
    #[inline]
    fn read(encoded: &[u8]) -> Result<T, Status> {
        if encoded.len() != mem::size_of::<T>() {
            return Err(Status::Corruption);
        }
        Ok(bytemuck::pod_read_unaligned(encoded))
    }
}

impl<T: Pod + Send + Sync> KeyCodec<T> for BlittableCodec<T> {
    #[inline]
    fn encoded_len(_key: &T) -> Result<usize, Status> {
        Ok(mem::size_of::<T>())
    }

    #[inline]
    fn encode_into(key: &T, dst: &mut [u8]) -> Result<(), Status> {
        copy_exact(bytemuck::bytes_of(key), dst)
    }

    #[inline]
    fn equals_encoded(encoded: &[u8], key: &T) -> Result<bool, Status> {
        Ok(encoded == bytemuck::bytes_of(key))
    }

    #[inline]
    fn decode(encoded: &[u8]) -> Result<T, Status> {
        Self::read(encoded)
    }
}

impl<T: Pod + Send + Sync> ValueCodec<T> for BlittableCodec<T> {
    #[inline]
    fn encoded_len(_value: &T) -> Result<usize, Status> {
        Ok(mem::size_of::<T>())
    }

    #[inline]
    fn encode_into(value: &T, dst: &mut [u8]) -> Result<(), Status> {
        copy_exact(bytemuck::bytes_of(value), dst)
    }

    #[inline]
    fn decode(encoded: &[u8]) -> Result<T, Status> {
        Self::read(encoded)
    }
}

impl<T: Pod + Send + Sync + 'static> PersistKey for T {
    type Codec = BlittableCodec<T>;
}

impl<T: Pod + Send + Sync + 'static> PersistValue for T {
    type Codec = BlittableCodec<T>;
}

/// Opaque byte string stored without an envelope.
///
/// Used for object-log payloads and values whose length varies per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawBytes(pub Bytes);

impl RawBytes {
    /// The stored bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for RawBytes {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for RawBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&'static [u8]> for RawBytes {
    fn from(value: &'static [u8]) -> Self {
        Self(Bytes::from_static(value))
    }
}

/// Codec for [`RawBytes`]
pub struct RawBytesCodec;

impl KeyCodec<RawBytes> for RawBytesCodec {
    #[inline]
    fn encoded_len(key: &RawBytes) -> Result<usize, Status> {
        Ok(key.0.len())
    }

    #[inline]
    fn encode_into(key: &RawBytes, dst: &mut [u8]) -> Result<(), Status> {
        copy_exact(&key.0, dst)
    }

    #[inline]
    fn equals_encoded(encoded: &[u8], key: &RawBytes) -> Result<bool, Status> {
        Ok(encoded == key.as_slice())
    }

    #[inline]
    fn decode(encoded: &[u8]) -> Result<RawBytes, Status> {
        Ok(RawBytes(Bytes::copy_from_slice(encoded)))
    }
}

impl ValueCodec<RawBytes> for RawBytesCodec {
    #[inline]
    fn encoded_len(value: &RawBytes) -> Result<usize, Status> {
        Ok(value.0.len())
    }

    #[inline]
    fn encode_into(value: &RawBytes, dst: &mut [u8]) -> Result<(), Status> {
        copy_exact(&value.0, dst)
    }

    #[inline]
    fn decode(encoded: &[u8]) -> Result<RawBytes, Status> {
        Ok(RawBytes(Bytes::copy_from_slice(encoded)))
    }
}

impl PersistKey for RawBytes {
    type Codec = RawBytesCodec;
}

impl PersistValue for RawBytes {
    type Codec = RawBytesCodec;
}
