//! Alignment arithmetic shared by every allocator.
//!
//! All of these work on plain `usize` addresses or offsets. Nothing here
//! wraps around: a value that cannot be aligned without overflowing the
//! address space is reported as [`AllocError::OutOfCapacity`].

use crate::error::AllocError;

/// Returns true iff `n` is a non-zero power of two.
#[inline]
pub const fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Round `value` up to the nearest multiple of `alignment`.
///
/// # Errors
///
/// [`AllocError::Alignment`] if `alignment` is not a power of two, and
/// [`AllocError::OutOfCapacity`] if the result is not representable.
///
/// # Examples
///
/// ```rust
/// use region_alloc::align::align_forward;
///
/// assert_eq!(align_forward(8, 20), Ok(24));
/// assert_eq!(align_forward(8, 24), Ok(24));
/// assert_eq!(align_forward(8, 25), Ok(32));
/// assert!(align_forward(3, 25).is_err());
/// ```
#[inline]
pub fn align_forward(alignment: usize, value: usize) -> Result<usize, AllocError> {
    if !is_power_of_two(alignment) {
        return Err(AllocError::Alignment(alignment));
    }
    let mask = alignment - 1;
    match value.checked_add(mask) {
        Some(bumped) => Ok(bumped & !mask),
        None => Err(AllocError::OutOfCapacity {
            requested: alignment,
            remaining: usize::MAX - value,
        }),
    }
}

/// Round `value` down to the nearest multiple of `alignment`.
#[inline]
pub fn align_backward(alignment: usize, value: usize) -> Result<usize, AllocError> {
    if !is_power_of_two(alignment) {
        return Err(AllocError::Alignment(alignment));
    }
    Ok(value & !(alignment - 1))
}

/// Returns true if `value` is a multiple of `alignment`. Alignments that are
/// not powers of two are never satisfied.
#[inline]
pub const fn is_aligned(alignment: usize, value: usize) -> bool {
    is_power_of_two(alignment) && value & (alignment - 1) == 0
}

/// Number of bytes to skip from `address` to reach the next multiple of
/// `alignment`.
#[inline]
pub fn padding_for(alignment: usize, address: usize) -> Result<usize, AllocError> {
    Ok(align_forward(alignment, address)? - address)
}

/// The largest power of two dividing `address` (the natural alignment of an
/// address). Zero is treated as maximally aligned.
#[inline]
pub const fn alignment_of_address(address: usize) -> usize {
    if address == 0 {
        1 << (usize::BITS - 1)
    } else {
        1 << address.trailing_zeros()
    }
}
