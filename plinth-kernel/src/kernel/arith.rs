//! Checked arithmetic on universe offsets and de Bruijn windows

use super::Error;

/// The largest representable universe offset or proven distance
pub const MAX_OFFSET: u32 = i32::MAX as u32 - 1;

/// Return `v + k`, or an error if the result exceeds [`MAX_OFFSET`]
pub fn add_offset(v: u32, k: u32) -> Result<u32, Error> {
    let r = u64::from(v) + u64::from(k);
    if r > u64::from(MAX_OFFSET) {
        return Err(Error::UniverseOverflow("add_offset"));
    }
    Ok(r as u32)
}

/// Return `v + k`, or an error if the result exceeds [`MAX_OFFSET`]
pub fn add_signed(v: i32, k: u32) -> Result<i32, Error> {
    let r = i64::from(v) + i64::from(k);
    if r > i64::from(MAX_OFFSET) {
        return Err(Error::UniverseOverflow("add_signed"));
    }
    Ok(r as i32)
}

/// Return `v - k`, or `None` if the result is below `i32::MIN`
pub fn sub_signed(v: i32, k: u32) -> Option<i32> {
    i32::try_from(i64::from(v) - i64::from(k)).ok()
}

/// Return the exclusive upper end `s + n` of a substitution window
///
/// `None` means the window extends past every representable index.
pub fn window_end(s: u32, n: usize) -> Option<u32> {
    u32::try_from(n).ok().and_then(|n| s.checked_add(n))
}
