//! LEB128 integer decoding.
//!
//! Both flavours read little-endian 7-bit groups with the high bit marking
//! continuation. An encoding with more than ⌈n/7⌉ groups for an n-bit
//! integer is rejected as "integer representation too long"; one whose
//! final group carries bits outside the value range is rejected as
//! "integer too large".

use crate::Error;

/// Reads an unsigned LEB128 integer of at most `bits` bits.
pub(super) fn read_unsigned<F>(mut next_byte: F, bits: u32) -> Result<u64, Error>
where
    F: FnMut() -> Result<u8, Error>,
{
    debug_assert!(bits <= 64);
    let max_groups = bits.div_ceil(7);
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        if shift >= max_groups * 7 {
            return Err(Error::malformed("integer representation too long"));
        }
        let byte = next_byte()?;
        let group = byte & 0x7f;
        let remaining = bits - shift;
        if remaining < 7 && u32::from(group) >= 1 << remaining {
            return Err(Error::malformed("integer too large"));
        }
        result |= u64::from(group) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

/// Reads a signed LEB128 integer of at most `bits` bits, sign extending
/// from bit `0x40` of the final group.
pub(super) fn read_signed<F>(mut next_byte: F, bits: u32) -> Result<i64, Error>
where
    F: FnMut() -> Result<u8, Error>,
{
    debug_assert!(bits <= 64);
    let max_groups = bits.div_ceil(7);
    let mut result = 0i64;
    let mut shift = 0u32;
    let byte = loop {
        if shift >= max_groups * 7 {
            return Err(Error::malformed("integer representation too long"));
        }
        let byte = next_byte()?;
        let group = byte & 0x7f;
        let remaining = bits - shift;
        if remaining < 7 {
            // The unused high bits of the final group must agree with the
            // sign bit of the value.
            let mask = (0x7fu8 << (remaining - 1)) & 0x7f;
            let unused = group & mask;
            if unused != 0 && unused != mask {
                return Err(Error::malformed("integer too large"));
            }
        }
        result |= i64::from(group) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break byte;
        }
    };
    if shift < 64 && byte & 0x40 != 0 {
        result |= !0i64 << shift;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(input: &[u8]) -> impl FnMut() -> Result<u8, Error> + '_ {
        let mut pos = 0;
        move || {
            let byte = input
                .get(pos)
                .copied()
                .ok_or_else(|| Error::malformed("unexpected end"))?;
            pos += 1;
            Ok(byte)
        }
    }

    fn u32_of(input: &[u8]) -> Result<u32, Error> {
        read_unsigned(bytes(input), 32).map(|v| v as u32)
    }

    fn s32_of(input: &[u8]) -> Result<i32, Error> {
        read_signed(bytes(input), 32).map(|v| v as i32)
    }

    fn s64_of(input: &[u8]) -> Result<i64, Error> {
        read_signed(bytes(input), 64)
    }

    #[test]
    fn unsigned_values() {
        assert_eq!(u32_of(&[0x00]).unwrap(), 0);
        assert_eq!(u32_of(&[0x7f]).unwrap(), 127);
        assert_eq!(u32_of(&[0x80, 0x01]).unwrap(), 128);
        assert_eq!(u32_of(&[0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap(), u32::MAX);
        // Non-minimal encodings are fine.
        assert_eq!(u32_of(&[0x82, 0x80, 0x80, 0x80, 0x00]).unwrap(), 2);
    }

    #[test]
    fn unsigned_too_long() {
        let err = u32_of(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]).unwrap_err();
        assert_eq!(err.to_string(), "integer representation too long");
    }

    #[test]
    fn unsigned_too_large() {
        let err = u32_of(&[0xff, 0xff, 0xff, 0xff, 0x1f]).unwrap_err();
        assert_eq!(err.to_string(), "integer too large");
    }

    #[test]
    fn signed_values() {
        assert_eq!(s32_of(&[0x7f]).unwrap(), -1);
        assert_eq!(s32_of(&[0x80, 0x7f]).unwrap(), -128);
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0x07]).unwrap(), i32::MAX);
        assert_eq!(s32_of(&[0x80, 0x80, 0x80, 0x80, 0x78]).unwrap(), i32::MIN);
        assert_eq!(
            s64_of(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f]).unwrap(),
            i64::MIN
        );
    }

    #[test]
    fn signed_sign_extension_from_final_group() {
        // -1 at every valid length.
        assert_eq!(s32_of(&[0xff, 0x7f]).unwrap(), -1);
        assert_eq!(s32_of(&[0xff, 0xff, 0xff, 0xff, 0x7f]).unwrap(), -1);
    }

    #[test]
    fn signed_range_checks() {
        // Unused bits disagree with the sign bit.
        let err = s32_of(&[0xff, 0xff, 0xff, 0xff, 0x0f]).unwrap_err();
        assert_eq!(err.to_string(), "integer too large");
        let err = s32_of(&[0x80, 0x80, 0x80, 0x80, 0x70]).unwrap_err();
        assert_eq!(err.to_string(), "integer too large");
        let err = s32_of(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]).unwrap_err();
        assert_eq!(err.to_string(), "integer representation too long");
    }

    #[test]
    fn truncated_input_is_unexpected_end() {
        let err = u32_of(&[0x80, 0x80]).unwrap_err();
        assert_eq!(err.to_string(), "unexpected end");
    }
}
