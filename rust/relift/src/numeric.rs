//! Bit-exact integer helpers shared by the materializer and the interpreter.
//!
//! Values are carried in a `u128` together with an explicit width; every
//! helper returns a result already truncated to that width.

/// All-ones mask of `bits` bits.
pub fn mask(bits: u32) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

pub fn truncate(x: u128, bits: u32) -> u128 {
    x & mask(bits)
}

/// Sign-extend the low `from` bits of `x` to `to` bits.
pub fn sign_extend(x: u128, from: u32, to: u32) -> u128 {
    if from == 0 || from >= 128 {
        return truncate(x, to);
    }
    let x = truncate(x, from);
    let sign = 1u128 << (from - 1);
    let extended = if x & sign != 0 { x | !mask(from) } else { x };
    truncate(extended, to)
}

/// Normalize a 64-bit immediate encoding: signed encodings are
/// sign-extended, unsigned ones zero-extended.
pub fn const_bits(value: u64, is_signed: bool) -> u128 {
    if is_signed {
        value as i64 as i128 as u128
    } else {
        u128::from(value)
    }
}

/// `~((~0) << amount)` at `width` bits: the low `amount` bits set.
pub fn low_ones_mask(amount: u32, width: u32) -> u128 {
    truncate(mask(amount), width)
}

/// The opposite shift used when composing a rotate from two shifts:
/// `(-amount) & (width - 1)`.
pub fn rotate_complement(amount: u32, width: u32) -> u32 {
    amount.wrapping_neg() & width.wrapping_sub(1)
}

pub fn shl(x: u128, amount: u32, width: u32) -> u128 {
    if amount >= width {
        0
    } else {
        truncate(x << amount, width)
    }
}

pub fn lshr(x: u128, amount: u32, width: u32) -> u128 {
    if amount >= width {
        0
    } else {
        truncate(x, width) >> amount
    }
}

pub fn ashr(x: u128, amount: u32, width: u32) -> u128 {
    let signed = sign_extend(x, width, 128) as i128;
    truncate((signed >> amount.min(127)) as u128, width)
}

pub fn rotate_left(x: u128, amount: u32, width: u32) -> u128 {
    lshr(x, rotate_complement(amount, width), width) | shl(x, amount, width)
}

pub fn rotate_right(x: u128, amount: u32, width: u32) -> u128 {
    lshr(x, amount, width) | shl(x, rotate_complement(amount, width), width)
}

pub fn left_one_fill(x: u128, amount: u32, width: u32) -> u128 {
    shl(x, amount, width) | low_ones_mask(amount, width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn masks() {
        assert_eq!(mask(0), 0);
        assert_eq!(mask(8), 0xff);
        assert_eq!(mask(128), u128::MAX);
        assert_eq!(low_ones_mask(4, 32), 0xf);
        assert_eq!(low_ones_mask(0, 32), 0);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x80, 8, 32), 0xffff_ff80);
        assert_eq!(sign_extend(0x7f, 8, 32), 0x7f);
        assert_eq!(sign_extend(0xffff_8000, 16, 64), 0xffff_ffff_ffff_8000);
        assert_eq!(const_bits((-1i64) as u64, true), u128::MAX);
        assert_eq!(const_bits((-1i64) as u64, false), u128::from(u64::MAX));
    }

    #[test]
    fn rotates_match_std() {
        let x: u32 = 0x8000_0001;
        assert_eq!(rotate_left(x.into(), 4, 32), x.rotate_left(4).into());
        assert_eq!(rotate_right(x.into(), 4, 32), x.rotate_right(4).into());
        assert_eq!(rotate_left(x.into(), 0, 32), x.into());
    }

    #[test]
    fn arithmetic_shift_keeps_sign() {
        assert_eq!(ashr(0x80, 3, 8), 0xf0);
        assert_eq!(ashr(0x40, 3, 8), 0x08);
        assert_eq!(lshr(0x80, 3, 8), 0x10);
    }

    proptest! {
        #[test]
        fn rotate_right_undoes_rotate_left(x: u64, s in 0u32..64) {
            let x = u128::from(x);
            prop_assert_eq!(rotate_right(rotate_left(x, s, 64), s, 64), x);
        }

        #[test]
        fn rotates_agree_with_std_at_16_bits(x: u16, s in 0u32..16) {
            prop_assert_eq!(rotate_left(x.into(), s, 16), u128::from(x.rotate_left(s)));
            prop_assert_eq!(rotate_right(x.into(), s, 16), u128::from(x.rotate_right(s)));
        }

        #[test]
        fn left_one_fill_sets_low_bits(x: u32, s in 0u32..32) {
            let expected = (u64::from(x) << s) as u32 | ((1u64 << s) - 1) as u32;
            prop_assert_eq!(left_one_fill(x.into(), s, 32), u128::from(expected));
        }
    }
}
