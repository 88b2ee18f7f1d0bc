//! Chunk header flags.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Flag set carried in the last byte of every chunk header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    /// No flags set.
    pub const NONE: ChunkFlags = ChunkFlags(0x00);

    /// Last chunk of a message.
    pub const FINAL: ChunkFlags = ChunkFlags(0x01);

    /// The device lost a chunk and asks for the whole message again.
    pub const MISSED_CHUNKS: ChunkFlags = ChunkFlags(0x02);

    /// The device could not buffer the message.
    pub const SIZE_OVERFLOW: ChunkFlags = ChunkFlags(0x04);

    /// Build a flag set from raw bits. Unknown bits are preserved.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: ChunkFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChunkFlags {
    type Output = ChunkFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChunkFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChunkFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ChunkFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkFlags({self})")
    }
}

impl fmt::Display for ChunkFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut names = Vec::new();
        for (flag, name) in [
            (Self::FINAL, "FINAL"),
            (Self::MISSED_CHUNKS, "MISSED_CHUNKS"),
            (Self::SIZE_OVERFLOW, "SIZE_OVERFLOW"),
        ] {
            if self.contains(flag) {
                names.push(name.to_string());
            }
        }
        let unknown = self.0 & !0x07;
        if unknown != 0 {
            names.push(format!("0x{unknown:02x}"));
        }
        f.write_str(&names.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_query() {
        let flags = ChunkFlags::MISSED_CHUNKS | ChunkFlags::FINAL;
        assert_eq!(flags.bits(), 0x03);
        assert!(flags.is_final());
        assert!(flags.contains(ChunkFlags::MISSED_CHUNKS));
        assert!(!flags.contains(ChunkFlags::SIZE_OVERFLOW));
    }

    #[test]
    fn display_names() {
        assert_eq!(ChunkFlags::NONE.to_string(), "-");
        assert_eq!(
            (ChunkFlags::SIZE_OVERFLOW | ChunkFlags::FINAL).to_string(),
            "FINAL|SIZE_OVERFLOW"
        );
        assert_eq!(ChunkFlags::from_bits(0x81).to_string(), "FINAL|0x80");
    }
}
