//! Condition-code predicates used by translated compare/branch pairs.
//!
//! Translated code never materialises EFLAGS; a `cmp a, b` followed by `ja` becomes
//! `if cmp_a(a, b)`. The predicates here are the closed forms of evaluating the condition on the
//! flags a real `sub a, b` would produce. [`sub_flags`] and [`Cond::eval`] keep the flag-level
//! reference model around so the two can be checked against each other.

use bitflags::bitflags;

bitflags! {
    /// Arithmetic status flags, laid out as in the low byte and bit 11 of EFLAGS.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Eflags: u32 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const OF = 1 << 11;
    }
}

fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

/// Flags produced by `sub a, b` / `cmp a, b`.
pub fn sub_flags(a: u32, b: u32) -> Eflags {
    let result = a.wrapping_sub(b);
    let mut f = Eflags::empty();
    f.set(Eflags::CF, a < b);
    f.set(Eflags::ZF, result == 0);
    f.set(Eflags::SF, result & 0x8000_0000 != 0);
    f.set(Eflags::OF, (a ^ b) & (a ^ result) & 0x8000_0000 != 0);
    f.set(Eflags::AF, (a ^ b ^ result) & 0x10 != 0);
    f.set(Eflags::PF, parity(result as u8));
    f
}

/// Flags produced by `add a, b`.
pub fn add_flags(a: u32, b: u32) -> Eflags {
    let (result, carry) = a.overflowing_add(b);
    let mut f = Eflags::empty();
    f.set(Eflags::CF, carry);
    f.set(Eflags::ZF, result == 0);
    f.set(Eflags::SF, result & 0x8000_0000 != 0);
    f.set(Eflags::OF, (a ^ result) & (b ^ result) & 0x8000_0000 != 0);
    f.set(Eflags::AF, (a ^ b ^ result) & 0x10 != 0);
    f.set(Eflags::PF, parity(result as u8));
    f
}

/// Flags produced by `test a, b` (and any other logic op with result `a & b`).
pub fn logic_flags(result: u32) -> Eflags {
    let mut f = Eflags::empty();
    f.set(Eflags::ZF, result == 0);
    f.set(Eflags::SF, result & 0x8000_0000 != 0);
    f.set(Eflags::PF, parity(result as u8));
    f
}

/// x86 condition codes as used by `jcc`/`setcc`/`cmovcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    O,
    No,
    B,
    Ae,
    E,
    Ne,
    Be,
    A,
    S,
    Ns,
    P,
    Np,
    L,
    Ge,
    Le,
    G,
}

impl Cond {
    pub const ALL: [Cond; 16] = [
        Cond::O,
        Cond::No,
        Cond::B,
        Cond::Ae,
        Cond::E,
        Cond::Ne,
        Cond::Be,
        Cond::A,
        Cond::S,
        Cond::Ns,
        Cond::P,
        Cond::Np,
        Cond::L,
        Cond::Ge,
        Cond::Le,
        Cond::G,
    ];

    pub fn eval(self, f: Eflags) -> bool {
        let cf = f.contains(Eflags::CF);
        let zf = f.contains(Eflags::ZF);
        let sf = f.contains(Eflags::SF);
        let of = f.contains(Eflags::OF);
        let pf = f.contains(Eflags::PF);
        match self {
            Cond::O => of,
            Cond::No => !of,
            Cond::B => cf,
            Cond::Ae => !cf,
            Cond::E => zf,
            Cond::Ne => !zf,
            Cond::Be => cf || zf,
            Cond::A => !cf && !zf,
            Cond::S => sf,
            Cond::Ns => !sf,
            Cond::P => pf,
            Cond::Np => !pf,
            Cond::L => sf != of,
            Cond::Ge => sf == of,
            Cond::Le => zf || sf != of,
            Cond::G => !zf && sf == of,
        }
    }
}

#[inline]
pub fn cmp_eq(a: u32, b: u32) -> bool {
    a == b
}

#[inline]
pub fn cmp_ne(a: u32, b: u32) -> bool {
    a != b
}

/// Unsigned `a < b` (`jb`/`jc`).
#[inline]
pub fn cmp_b(a: u32, b: u32) -> bool {
    a < b
}

#[inline]
pub fn cmp_be(a: u32, b: u32) -> bool {
    a <= b
}

/// Unsigned `a > b` (`ja`). `cmp_a(0xFFFF_FFFF, 0)` holds.
#[inline]
pub fn cmp_a(a: u32, b: u32) -> bool {
    a > b
}

#[inline]
pub fn cmp_ae(a: u32, b: u32) -> bool {
    a >= b
}

/// Signed `a < b` (`jl`). `cmp_l(0xFFFF_FFFF, 0)` holds.
#[inline]
pub fn cmp_l(a: u32, b: u32) -> bool {
    (a as i32) < (b as i32)
}

#[inline]
pub fn cmp_le(a: u32, b: u32) -> bool {
    (a as i32) <= (b as i32)
}

#[inline]
pub fn cmp_g(a: u32, b: u32) -> bool {
    (a as i32) > (b as i32)
}

#[inline]
pub fn cmp_ge(a: u32, b: u32) -> bool {
    (a as i32) >= (b as i32)
}

/// `test a, b; jz`.
#[inline]
pub fn test_z(a: u32, b: u32) -> bool {
    a & b == 0
}

#[inline]
pub fn test_nz(a: u32, b: u32) -> bool {
    a & b != 0
}

/// `test a, b; js`.
#[inline]
pub fn test_s(a: u32, b: u32) -> bool {
    ((a & b) as i32) < 0
}

/// Carry out of `a + b`, for `add`/`adc` pairs.
#[inline]
pub fn add32_cf(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}

/// Borrow out of `a - b`, for `sub`/`sbb` pairs.
#[inline]
pub fn sub32_cf(a: u32, b: u32) -> bool {
    a < b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ones_is_above_and_less_than_zero() {
        assert!(cmp_a(0xFFFF_FFFF, 0));
        assert!(cmp_l(0xFFFF_FFFF, 0));
        assert!(!cmp_g(0xFFFF_FFFF, 0));
        assert!(!cmp_b(0xFFFF_FFFF, 0));

        let f = sub_flags(0xFFFF_FFFF, 0);
        assert!(Cond::A.eval(f));
        assert!(Cond::L.eval(f));
    }

    #[test]
    fn signed_overflow_boundary() {
        // 0x8000_0000 - 1 overflows: SF=0, OF=1, so "less" still holds.
        let f = sub_flags(0x8000_0000, 1);
        assert!(f.contains(Eflags::OF));
        assert!(!f.contains(Eflags::SF));
        assert!(Cond::L.eval(f));
        assert!(cmp_l(0x8000_0000, 1));
        assert!(cmp_a(0x8000_0000, 1));
    }

    #[test]
    fn test_predicates() {
        assert!(test_z(0xF0, 0x0F));
        assert!(test_nz(0xF1, 0x0F));
        assert!(test_s(0x8000_0000, 0xFFFF_FFFF));
        assert!(!test_s(0x8000_0000, 0x7FFF_FFFF));
        assert!(Cond::E.eval(logic_flags(0)));
    }

    #[test]
    fn carry_helpers() {
        assert!(add32_cf(0xFFFF_FFFF, 1));
        assert!(!add32_cf(0xFFFF_FFFE, 1));
        assert!(add_flags(0xFFFF_FFFF, 1).contains(Eflags::CF | Eflags::ZF));
        assert!(sub32_cf(0, 1));
        assert!(!sub32_cf(1, 1));
    }
}
