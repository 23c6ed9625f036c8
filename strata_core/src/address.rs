//! Raw machine addresses.

use std::fmt;

/// Size of a heap word in bytes.
pub const WORD_SIZE: usize = 8;

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] that returns `None` instead of wrapping.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

/// Check whether `value` is a multiple of `align` (a power of two).
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// An untagged machine address.
///
/// Addresses carry no ownership and are never dereferenced by this type
/// itself; the heap decides what lives behind them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Wrap a raw address.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Build an address from a pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// The raw integer value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Reinterpret as a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Reinterpret as a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Check for the null address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    /// Byte distance from `base` to this address.
    #[inline]
    pub const fn offset_from(self, base: Address) -> usize {
        self.0 - base.0
    }

    /// Round up to `align`.
    #[inline]
    pub const fn align_up(self, align: usize) -> Self {
        Self(align_up(self.0, align))
    }

    /// Round down to `align`.
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Check alignment.
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        is_aligned(self.0, align)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_helpers() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(17, 16), 32);
        assert!(is_aligned(64, 32));
        assert!(!is_aligned(65, 2));
    }

    #[test]
    fn test_checked_align_up() {
        assert_eq!(checked_align_up(17, 16), Some(32));
        assert_eq!(checked_align_up(usize::MAX - 7, 8), Some(usize::MAX - 7));
        assert_eq!(checked_align_up(usize::MAX - 4, 8), None);
    }

    #[test]
    fn test_address_arithmetic() {
        let base = Address::new(0x1000);
        let field = base.offset(24);
        assert_eq!(field.as_usize(), 0x1018);
        assert_eq!(field.offset_from(base), 24);
        assert_eq!(field.align_down(0x1000), base);
        assert_eq!(Address::new(0x1001).align_up(8), Address::new(0x1008));
    }

    #[test]
    fn test_address_formatting() {
        assert_eq!(format!("{:?}", Address::new(255)), "0xff");
        assert!(Address::NULL.is_null());
    }
}
