#![forbid(unsafe_code)]
//! Execution state and the flag/memory access contracts shared by all translated code.
//!
//! Nothing here has state beyond [`Registers`]; every helper is a pure function so translated
//! functions, kernel bridges and tests compute identical results.

pub mod flags;
pub mod ops;
mod regs;

pub use flags::{
    add32_cf, cmp_a, cmp_ae, cmp_b, cmp_be, cmp_eq, cmp_g, cmp_ge, cmp_l, cmp_le, cmp_ne, sub32_cf,
    test_nz, test_s, test_z, Cond, Eflags,
};
pub use ops::{
    bswap16, bswap32, hi8, lo16, lo8, rol32, ror32, set_hi8, set_lo16, set_lo8, sx16, sx8, zx16,
    zx8,
};
pub use regs::Registers;
