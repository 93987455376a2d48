//! On-disk record layout.
//!
//! Every record starts with a fixed 16-byte header:
//!
//! ```text
//! [0..8)    RecordInfo (little endian)
//! [8..12)   key length  (u32, little endian)
//! [12..16)  value length (u32, little endian)
//! ```
//!
//! A plain record continues with the key bytes followed by the value bytes. A record whose
//! key/value live out of line (the `HAS_OBJECTS` flag) continues with a 16-byte
//! [`ObjectAddress`] locating `key ++ value` in the object log.
//!
//! Records are parsed through [`RecordView`], a bounds-checked view over an owned buffer.

use crate::address::Address;
use crate::status::Status;

/// Size of the packed `RecordInfo` word.
pub const RECORD_INFO_SIZE: usize = 8;
/// Size of the fixed record header (`RecordInfo` + key length + value length).
pub const RECORD_HEADER_SIZE: usize = RECORD_INFO_SIZE + 2 * std::mem::size_of::<u32>();
/// Size of an encoded [`ObjectAddress`].
pub const OBJECT_ADDRESS_SIZE: usize = 16;
/// Largest record the resolution path will allocate a buffer for.
pub const MAX_RECORD_SIZE: usize = 1 << 30;
/// Largest out-of-line key/value payload.
pub const MAX_OBJECT_SIZE: u64 = i32::MAX as u64;

const KEY_LEN_OFFSET: usize = RECORD_INFO_SIZE;
const VALUE_LEN_OFFSET: usize = RECORD_INFO_SIZE + 4;

/// Record header word.
///
/// - Previous address (48 bits): next-older record in the same hash chain
/// - Has-objects bit (bit 60): key/value are stored in the object log
/// - Invalid bit (bit 61): record was abandoned and must be skipped
/// - Tombstone bit (bit 62): record is a delete marker
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordInfo(u64);

impl RecordInfo {
    const PREV_ADDR_MASK: u64 = (1 << Address::ADDRESS_BITS) - 1;
    const HAS_OBJECTS_BIT: u64 = 1 << 60;
    const INVALID_BIT: u64 = 1 << 61;
    const TOMBSTONE_BIT: u64 = 1 << 62;

    /// Create a header pointing at `previous_address`.
    pub fn new(previous_address: Address) -> Self {
        Self(previous_address.control() & Self::PREV_ADDR_MASK)
    }

    /// Create a header from its raw control word.
    #[inline]
    pub const fn from_control(control: u64) -> Self {
        Self(control)
    }

    /// Raw control word.
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Previous address in the hash chain.
    #[inline]
    pub fn previous_address(&self) -> Address {
        Address::from_control(self.0 & Self::PREV_ADDR_MASK)
    }

    /// Whether key/value are stored in the object log.
    #[inline]
    pub fn has_objects(&self) -> bool {
        self.0 & Self::HAS_OBJECTS_BIT != 0
    }

    /// Whether the record is invalid.
    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.0 & Self::INVALID_BIT != 0
    }

    /// Whether the record is a tombstone.
    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.0 & Self::TOMBSTONE_BIT != 0
    }

    /// Builder-style setter for the tombstone flag.
    pub fn with_tombstone(mut self, tombstone: bool) -> Self {
        self.set_bit(Self::TOMBSTONE_BIT, tombstone);
        self
    }

    /// Builder-style setter for the invalid flag.
    pub fn with_invalid(mut self, invalid: bool) -> Self {
        self.set_bit(Self::INVALID_BIT, invalid);
        self
    }

    fn with_objects(mut self, has_objects: bool) -> Self {
        self.set_bit(Self::HAS_OBJECTS_BIT, has_objects);
        self
    }

    fn set_bit(&mut self, bit: u64, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl std::fmt::Debug for RecordInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordInfo")
            .field("previous_address", &self.previous_address())
            .field("has_objects", &self.has_objects())
            .field("invalid", &self.is_invalid())
            .field("tombstone", &self.is_tombstone())
            .finish()
    }
}

/// Location of an out-of-line key/value payload in the object log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAddress {
    /// Object-log address of the first payload byte.
    pub address: Address,
    /// Payload length in bytes.
    pub size: u64,
}

/// Result of parsing a (possibly partial) record buffer.
#[derive(Debug)]
pub enum RecordParse<'a> {
    /// The buffer holds the whole record.
    Complete(RecordView<'a>),
    /// The buffer is short; `required` bytes are needed.
    Incomplete {
        /// Total bytes needed to hold the record (or its header).
        required: usize,
    },
}

/// Bounds-checked view of one record.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
    info: RecordInfo,
    key_len: usize,
    value_len: usize,
}

impl<'a> RecordView<'a> {
    /// Parse a record from the start of `bytes`.
    ///
    /// Fails with `ResourceExhausted` when the header declares a record larger than
    /// [`MAX_RECORD_SIZE`].
    pub fn parse(bytes: &'a [u8]) -> Result<RecordParse<'a>, Status> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Ok(RecordParse::Incomplete {
                required: RECORD_HEADER_SIZE,
            });
        }

        let info = RecordInfo::from_control(read_u64(bytes, 0));
        let key_len = read_u32(bytes, KEY_LEN_OFFSET) as usize;
        let value_len = read_u32(bytes, VALUE_LEN_OFFSET) as usize;

        let total = if info.has_objects() {
            RECORD_HEADER_SIZE + OBJECT_ADDRESS_SIZE
        } else {
            RECORD_HEADER_SIZE
                .checked_add(key_len)
                .and_then(|n| n.checked_add(value_len))
                .ok_or(Status::ResourceExhausted)?
        };
        if total > MAX_RECORD_SIZE {
            return Err(Status::ResourceExhausted);
        }
        if bytes.len() < total {
            return Ok(RecordParse::Incomplete { required: total });
        }

        Ok(RecordParse::Complete(Self {
            bytes: &bytes[..total],
            info,
            key_len,
            value_len,
        }))
    }

    /// Record header.
    #[inline]
    pub fn info(&self) -> RecordInfo {
        self.info
    }

    /// Total encoded size of this record.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }

    /// Key length (inline or inside the object payload).
    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// Value length (inline or inside the object payload).
    #[inline]
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    /// Inline key bytes, or `None` for object records.
    pub fn inline_key(&self) -> Option<&'a [u8]> {
        if self.info.has_objects() {
            return None;
        }
        Some(&self.bytes[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + self.key_len])
    }

    /// Inline value bytes, or `None` for object records.
    pub fn inline_value(&self) -> Option<&'a [u8]> {
        if self.info.has_objects() {
            return None;
        }
        let start = RECORD_HEADER_SIZE + self.key_len;
        Some(&self.bytes[start..start + self.value_len])
    }

    /// Object-log location of `key ++ value`, or `None` for plain records.
    ///
    /// Fails with `Corruption` when the declared payload size disagrees with the key and value
    /// lengths, and with `ResourceExhausted` when it exceeds [`MAX_OBJECT_SIZE`].
    pub fn object_address(&self) -> Result<Option<ObjectAddress>, Status> {
        if !self.info.has_objects() {
            return Ok(None);
        }
        let address = Address::from_control(read_u64(self.bytes, RECORD_HEADER_SIZE));
        let size = read_u64(self.bytes, RECORD_HEADER_SIZE + 8);
        if size > MAX_OBJECT_SIZE {
            return Err(Status::ResourceExhausted);
        }
        if size != (self.key_len + self.value_len) as u64 {
            return Err(Status::Corruption);
        }
        Ok(Some(ObjectAddress { address, size }))
    }
}

/// Encode a record whose key and value are stored inline.
pub fn encode_inline_record(info: RecordInfo, key: &[u8], value: &[u8]) -> Vec<u8> {
    let info = info.with_objects(false);
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + key.len() + value.len());
    write_header(&mut out, info, key.len(), value.len());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

/// Encode a record whose `key ++ value` payload lives at `object` in the object log.
pub fn encode_object_record(
    info: RecordInfo,
    key_len: usize,
    value_len: usize,
    object: ObjectAddress,
) -> Vec<u8> {
    let info = info.with_objects(true);
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + OBJECT_ADDRESS_SIZE);
    write_header(&mut out, info, key_len, value_len);
    out.extend_from_slice(&object.address.control().to_le_bytes());
    out.extend_from_slice(&object.size.to_le_bytes());
    out
}

fn write_header(out: &mut Vec<u8>, info: RecordInfo, key_len: usize, value_len: usize) {
    debug_assert!(key_len <= u32::MAX as usize && value_len <= u32::MAX as usize);
    out.extend_from_slice(&info.control().to_le_bytes());
    out.extend_from_slice(&(key_len as u32).to_le_bytes());
    out.extend_from_slice(&(value_len as u32).to_le_bytes());
}

#[inline]
fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}
