//! Where stage 2 finds the boot parameter list.
//!
//! Stage 1 leaves the physical head address and total byte length of the
//! encoded list in the BIOS inter-application communication area, two
//! little-endian dwords at physical `0x4F0`.

/// Physical address of the BIOS inter-application communication area.
pub const IAC_ADDRESS: u64 = 0x4f0;
pub const IAC_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandoffPointer {
    /// Physical address of the first node, 0 for an empty list.
    pub head: u32,
    /// Bytes from `head` to the end of the last node's padding.
    pub len: u32,
}

impl HandoffPointer {
    pub fn to_bytes(self) -> [u8; IAC_LEN] {
        let mut out = [0u8; IAC_LEN];
        out[..4].copy_from_slice(&self.head.to_le_bytes());
        out[4..].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn from_bytes(raw: [u8; IAC_LEN]) -> Self {
        Self {
            head: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == 0 || self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iac_layout() {
        let ptr = HandoffPointer { head: 0x0000_7f00, len: 0x1c8 };
        assert_eq!(ptr.to_bytes(), [0x00, 0x7f, 0x00, 0x00, 0xc8, 0x01, 0x00, 0x00]);
        assert_eq!(HandoffPointer::from_bytes(ptr.to_bytes()), ptr);
        assert!(HandoffPointer::default().is_empty());
    }
}
