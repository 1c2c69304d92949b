//! Bit-level helpers for translated arithmetic: rotates, extensions and partial-register access.

/// `rol r32, n`. The count is masked to 5 bits as the hardware does.
#[inline]
pub fn rol32(v: u32, n: u32) -> u32 {
    v.rotate_left(n & 31)
}

/// `ror r32, n`.
#[inline]
pub fn ror32(v: u32, n: u32) -> u32 {
    v.rotate_right(n & 31)
}

#[inline]
pub fn sx8(v: u32) -> u32 {
    v as u8 as i8 as i32 as u32
}

#[inline]
pub fn sx16(v: u32) -> u32 {
    v as u16 as i16 as i32 as u32
}

#[inline]
pub fn zx8(v: u32) -> u32 {
    v & 0xFF
}

#[inline]
pub fn zx16(v: u32) -> u32 {
    v & 0xFFFF
}

/// `al` of `eax`.
#[inline]
pub fn lo8(v: u32) -> u8 {
    v as u8
}

/// `ah` of `eax`.
#[inline]
pub fn hi8(v: u32) -> u8 {
    (v >> 8) as u8
}

/// `ax` of `eax`.
#[inline]
pub fn lo16(v: u32) -> u16 {
    v as u16
}

#[inline]
pub fn set_lo8(v: u32, b: u8) -> u32 {
    (v & !0xFF) | u32::from(b)
}

#[inline]
pub fn set_hi8(v: u32, b: u8) -> u32 {
    (v & !0xFF00) | (u32::from(b) << 8)
}

#[inline]
pub fn set_lo16(v: u32, w: u16) -> u32 {
    (v & !0xFFFF) | u32::from(w)
}

#[inline]
pub fn bswap32(v: u32) -> u32 {
    v.swap_bytes()
}

/// `xchg al, ah`-style swap of the low word; the high word is preserved.
#[inline]
pub fn bswap16(v: u32) -> u32 {
    set_lo16(v, (v as u16).swap_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_masks_count() {
        assert_eq!(rol32(0x8000_0001, 1), 0x0000_0003);
        assert_eq!(ror32(0x0000_0003, 1), 0x8000_0001);
        assert_eq!(rol32(0x1234_5678, 32), 0x1234_5678);
        assert_eq!(rol32(0x1234_5678, 36), rol32(0x1234_5678, 4));
    }

    #[test]
    fn extensions() {
        assert_eq!(sx8(0x80), 0xFFFF_FF80);
        assert_eq!(sx8(0x1234_567F), 0x7F);
        assert_eq!(sx16(0x8000), 0xFFFF_8000);
        assert_eq!(zx8(0xFFFF_FF80), 0x80);
        assert_eq!(zx16(0xFFFF_8000), 0x8000);
    }

    #[test]
    fn partial_registers() {
        let eax = 0x1122_3344;
        assert_eq!(lo8(eax), 0x44);
        assert_eq!(hi8(eax), 0x33);
        assert_eq!(lo16(eax), 0x3344);
        assert_eq!(set_lo8(eax, 0xAA), 0x1122_33AA);
        assert_eq!(set_hi8(eax, 0xAA), 0x1122_AA44);
        assert_eq!(set_lo16(eax, 0xBEEF), 0x1122_BEEF);
        assert_eq!(bswap32(eax), 0x4433_2211);
        assert_eq!(bswap16(eax), 0x1122_4433);
    }
}
