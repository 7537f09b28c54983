//! Parser flags

use std::fmt;

/// Individually switchable parser behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParserFlag {
    /// Import InstanceNormalization as a single native normalization layer
    /// instead of decomposing it into reductions and element-wise layers
    NativeInstanceNorm = 0,
    /// Accept `uint8` network inputs (asymmetric quantized models)
    Uint8AsymmetricQuantization = 1,
}

impl ParserFlag {
    /// Every flag, in bit order
    pub const ALL: [ParserFlag; 2] = [
        ParserFlag::NativeInstanceNorm,
        ParserFlag::Uint8AsymmetricQuantization,
    ];

    /// Bit mask of this flag
    pub const fn mask(self) -> u32 {
        1u32 << self as u32
    }
}

/// Bitset of [`ParserFlag`]s
///
/// The default value has exactly [`ParserFlag::NativeInstanceNorm`] set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParserFlags(u32);

impl ParserFlags {
    /// No flag set
    pub const fn empty() -> Self {
        ParserFlags(0)
    }

    /// Wrap a raw bitset. Bits without a named flag are kept but ignored.
    pub const fn from_bits(bits: u32) -> Self {
        ParserFlags(bits)
    }

    /// Raw bitset
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether `flag` is set
    pub const fn contains(&self, flag: ParserFlag) -> bool {
        self.0 & flag.mask() != 0
    }

    /// Set `flag`
    pub fn insert(&mut self, flag: ParserFlag) {
        self.0 |= flag.mask();
    }

    /// Clear `flag`
    pub fn remove(&mut self, flag: ParserFlag) {
        self.0 &= !flag.mask();
    }

    /// Named flags currently set
    pub fn iter(&self) -> impl Iterator<Item = ParserFlag> + '_ {
        ParserFlag::ALL.into_iter().filter(|f| self.contains(*f))
    }
}

impl Default for ParserFlags {
    fn default() -> Self {
        ParserFlags(ParserFlag::NativeInstanceNorm.mask())
    }
}

impl fmt::Debug for ParserFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let flags = ParserFlags::default();
        assert!(flags.contains(ParserFlag::NativeInstanceNorm));
        assert!(!flags.contains(ParserFlag::Uint8AsymmetricQuantization));
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_insert_remove() {
        let mut flags = ParserFlags::empty();
        flags.insert(ParserFlag::Uint8AsymmetricQuantization);
        assert_eq!(flags.bits(), 2);
        flags.remove(ParserFlag::Uint8AsymmetricQuantization);
        assert_eq!(flags, ParserFlags::empty());
    }

    #[test]
    fn test_unknown_bits_are_kept() {
        let flags = ParserFlags::from_bits(0b101);
        assert!(flags.contains(ParserFlag::NativeInstanceNorm));
        assert_eq!(flags.bits(), 0b101);
        assert_eq!(flags.iter().count(), 1);
    }
}
