/// Reinterprets a slice as a fixed size array without a length check.
///
/// # Safety
///
/// The caller must guarantee `slice.len() == N`.
#[inline]
pub unsafe fn into_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    unsafe { *(slice.as_ptr() as *const [u8; N]) }
}
