/// Alignment unit of every block and payload, in bytes.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Overflow-checked form of [`align!`], for sizes that come from callers.
pub const fn checked_align(value: usize) -> Option<usize> {
  match value.checked_add(ALIGNMENT - 1) {
    Some(v) => Some(v & !(ALIGNMENT - 1)),
    None => None,
  }
}

pub const fn is_aligned(value: usize) -> bool {
  value & (ALIGNMENT - 1) == 0
}
