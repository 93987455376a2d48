//! Logical addresses into the hybrid log
//!
//! An address is a 48-bit byte offset into the logical log. On a segmented device the
//! address splits into a segment id (high bits) and an offset within that segment
//! (low `segment_size_bits` bits).

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// A logical address into the hybrid log.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Hash)]
pub struct Address(u64);

impl Address {
    /// An invalid address, used as the hash chain terminator.
    ///
    /// Note: set to 1, not 0, so that a zeroed record header is distinguishable from a
    /// header whose previous address was explicitly cleared.
    pub const INVALID: Self = Self(1);

    /// Total number of address bits used
    pub const ADDRESS_BITS: u32 = 48;

    /// Maximum valid address value
    pub const MAX_ADDRESS: u64 = (1 << Self::ADDRESS_BITS) - 1;

    /// Create an address from a raw control value
    #[inline]
    pub const fn from_control(control: u64) -> Self {
        Self(control)
    }

    /// Build an address from a segment id and an offset inside that segment
    #[inline]
    pub const fn from_segment(segment: u64, offset: u64, segment_size_bits: u32) -> Self {
        debug_assert!(offset < (1 << segment_size_bits));
        Self((segment << segment_size_bits) | offset)
    }

    /// Get the raw control value
    #[inline]
    pub const fn control(&self) -> u64 {
        self.0
    }

    /// Segment id holding this address
    #[inline]
    pub const fn segment(&self, segment_size_bits: u32) -> u64 {
        self.0 >> segment_size_bits
    }

    /// Offset of this address within its segment
    #[inline]
    pub const fn segment_offset(&self, segment_size_bits: u32) -> u64 {
        self.0 & ((1 << segment_size_bits) - 1)
    }

    /// Check if this is an invalid address
    #[inline]
    pub const fn is_invalid(&self) -> bool {
        self.0 == Self::INVALID.0
    }

    /// Check if this is a valid address (not invalid)
    #[inline]
    pub const fn is_valid(&self) -> bool {
        !self.is_invalid()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "Address(INVALID)")
        } else {
            write!(f, "Address({:#x})", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Address {}

impl PartialOrd for Address {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for Address {
    type Output = Self;

    #[inline]
    fn add(self, delta: u64) -> Self::Output {
        Self(self.0 + delta)
    }
}

impl AddAssign<u64> for Address {
    #[inline]
    fn add_assign(&mut self, delta: u64) {
        self.0 += delta;
    }
}

impl Sub for Address {
    type Output = u64;

    #[inline]
    fn sub(self, other: Self) -> Self::Output {
        self.0 - other.0
    }
}

impl From<u64> for Address {
    #[inline]
    fn from(control: u64) -> Self {
        Self(control)
    }
}

impl From<Address> for u64 {
    #[inline]
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// Atomic version of Address for thread-safe operations
#[repr(transparent)]
pub struct AtomicAddress {
    control: AtomicU64,
}

impl AtomicAddress {
    /// Create a new atomic address
    #[inline]
    pub const fn new(address: Address) -> Self {
        Self {
            control: AtomicU64::new(address.0),
        }
    }

    /// Load the address atomically
    #[inline]
    pub fn load(&self, ordering: AtomicOrdering) -> Address {
        Address(self.control.load(ordering))
    }

    /// Store an address atomically
    #[inline]
    pub fn store(&self, address: Address, ordering: AtomicOrdering) {
        self.control.store(address.0, ordering);
    }

    /// Compare and exchange the address atomically
    #[inline]
    pub fn compare_exchange(
        &self,
        current: Address,
        new: Address,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<Address, Address> {
        self.control
            .compare_exchange(current.0, new.0, success, failure)
            .map(Address)
            .map_err(Address)
    }

    /// Raise the address to at least `value`.
    ///
    /// Returns the previous address. Never moves the address backwards.
    pub fn fetch_max(&self, value: Address) -> Address {
        let mut current = self.load(AtomicOrdering::Acquire);
        loop {
            if value <= current {
                return current;
            }
            match self.compare_exchange(
                current,
                value,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Acquire,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for AtomicAddress {
    fn default() -> Self {
        Self::new(Address::default())
    }
}

impl fmt::Debug for AtomicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addr = self.load(AtomicOrdering::Relaxed);
        f.debug_struct("AtomicAddress")
            .field("address", &addr)
            .finish()
    }
}
