//! Human-readable byte counts for log output.

use core::fmt;

/// Formats a byte count with binary prefixes, keeping up to two decimals.
///
/// ```
/// use vmm::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(4096)), "4KiB");
/// assert_eq!(format!("{}", HumanSize(16 * 1024 + 512)), "16.5KiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl From<usize> for HumanSize {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<u32> for HumanSize {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as usize)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];

        // Work in hundredths to stay clear of floating point in the kernel.
        let mut unit = 0;
        let mut scaled = self.0 as u64 * 100;
        while scaled >= 1024 * 100 && unit < UNITS.len() - 1 {
            scaled /= 1024;
            unit += 1;
        }

        let whole = scaled / 100;
        let fraction = scaled % 100;
        if unit == 0 || fraction == 0 {
            write!(f, "{}{}", whole, UNITS[unit])
        } else if fraction % 10 == 0 {
            write!(f, "{}.{}{}", whole, fraction / 10, UNITS[unit])
        } else {
            write!(f, "{}.{:02}{}", whole, fraction, UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes() {
        assert_eq!(format!("{}", HumanSize(0)), "0B");
        assert_eq!(format!("{}", HumanSize(1023)), "1023B");
    }

    #[test]
    fn formats_whole_units() {
        assert_eq!(format!("{}", HumanSize(4096)), "4KiB");
        assert_eq!(format!("{}", HumanSize(16 * 1024 * 1024)), "16MiB");
        assert_eq!(format!("{}", HumanSize(3 * 1024 * 1024 * 1024)), "3GiB");
    }

    #[test]
    fn trims_trailing_zero() {
        assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
    }

    #[test]
    fn keeps_two_decimals() {
        // 1.25 KiB
        assert_eq!(format!("{}", HumanSize(1280)), "1.25KiB");
    }
}
