//! XOR delta helpers for video frames.
//!
//! A delta frame carries `current[i] ^ previous[i]`; applying it to the receiver's copy of the
//! previous frame reconstructs the current one in place. Both sides must agree on frame size;
//! dimension changes require a key frame.

use crate::error::ProtocolError;

/// Compute the XOR difference between two equal-length frames.
pub fn compute(current: &[u8], previous: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if current.len() != previous.len() {
        return Err(ProtocolError::DeltaLengthMismatch(
            current.len(),
            previous.len(),
        ));
    }
    Ok(current
        .iter()
        .zip(previous)
        .map(|(c, p)| c ^ p)
        .collect())
}

/// Apply a delta in place: `target[i] ^= delta[i]`.
pub fn apply(target: &mut [u8], delta: &[u8]) -> Result<(), ProtocolError> {
    if target.len() != delta.len() {
        return Err(ProtocolError::DeltaLengthMismatch(
            target.len(),
            delta.len(),
        ));
    }
    for (t, d) in target.iter_mut().zip(delta) {
        *t ^= d;
    }
    Ok(())
}
