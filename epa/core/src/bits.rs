//! Find-last-set / find-first-set bit scans.
//!
//! Ports with a count-leading-zeros instruction get it through
//! `leading_zeros`; everything else falls back to the compiler's software
//! sequence.

/// Bit scanning over a machine word
pub trait BitScan: Copy {
    /// Index of the most significant set bit, `None` for zero
    fn fls(self) -> Option<u32>;
    /// Index of the least significant set bit, `None` for zero
    fn ffs(self) -> Option<u32>;
}

macro_rules! impl_bit_scan {
    ($($ty:ty),*) => {
        $(
            impl BitScan for $ty {
                #[inline]
                fn fls(self) -> Option<u32> {
                    if self == 0 {
                        None
                    } else {
                        Some(<$ty>::BITS - 1 - self.leading_zeros())
                    }
                }

                #[inline]
                fn ffs(self) -> Option<u32> {
                    if self == 0 {
                        None
                    } else {
                        Some(self.trailing_zeros())
                    }
                }
            }
        )*
    };
}

impl_bit_scan!(u8, u16, u32, u64);

/// Find-last-set on any supported word
#[inline]
pub fn fls<W: BitScan>(word: W) -> Option<u32> {
    word.fls()
}

/// Find-first-set on any supported word
#[inline]
pub fn ffs<W: BitScan>(word: W) -> Option<u32> {
    word.ffs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_u8() {
        assert_eq!(fls(0u8), None);
        assert_eq!(fls(1u8), Some(0));
        assert_eq!(fls(0b1010_0000u8), Some(7));
        assert_eq!(ffs(0b1010_0000u8), Some(5));
    }

    #[test]
    fn scans_u64() {
        assert_eq!(fls(u64::MAX), Some(63));
        assert_eq!(ffs(1u64 << 40), Some(40));
    }
}
