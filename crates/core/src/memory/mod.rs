// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub start_addr: u64,
    pub data: Vec<u8>,
}

use crate::Arch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    pub entry_point: u64,
    pub segments: Vec<Segment>,
    pub arch: Arch,
}

impl ProgramImage {
    pub fn new(entry_point: u64, arch: Arch) -> Self {
        Self {
            entry_point,
            segments: Vec::new(),
            arch,
        }
    }

    pub fn add_segment(&mut self, start_addr: u64, data: Vec<u8>) {
        self.segments.push(Segment { start_addr, data });
    }
}

/// A simple flat memory storage
pub struct LinearMemory {
    pub data: Vec<u8>,
    pub base_addr: u64,
}

impl LinearMemory {
    pub fn new(size: usize, base_addr: u64) -> Self {
        Self {
            data: vec![0; size],
            base_addr,
        }
    }

    /// One past the last byte; saturates for a region touching the top of
    /// the address space.
    pub fn end_addr(&self) -> u64 {
        self.base_addr.saturating_add(self.data.len() as u64)
    }

    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.base_addr
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.end_addr())
    }

    /// Little-endian read of `len` (1..=4) bytes.
    pub fn read_le(&self, addr: u64, len: u64) -> Option<u32> {
        if !self.contains(addr, len) {
            return None;
        }
        let start = (addr - self.base_addr) as usize;
        let value = self.data[start..start + len as usize]
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | *b as u32);
        Some(value)
    }

    /// Little-endian write of the low `len` (1..=4) bytes of `value`.
    pub fn write_le(&mut self, addr: u64, len: u64, value: u32) -> bool {
        if !self.contains(addr, len) {
            return false;
        }
        let start = (addr - self.base_addr) as usize;
        let bytes = value.to_le_bytes();
        self.data[start..start + len as usize].copy_from_slice(&bytes[..len as usize]);
        true
    }

    pub fn load_from_segment(&mut self, segment: &Segment) -> bool {
        if !self.contains(segment.start_addr, segment.data.len() as u64) {
            return false;
        }
        let offset = (segment.start_addr - self.base_addr) as usize;
        self.data[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut mem = LinearMemory::new(1024, 0x1000);

        // Valid write
        assert!(mem.write_le(0x1000, 1, 42));
        assert!(mem.write_le(0x13FF, 1, 99)); // Last byte

        // Invalid write (out of bounds)
        assert!(!mem.write_le(0x0FFF, 1, 1));
        assert!(!mem.write_le(0x1400, 1, 1));
        assert!(!mem.write_le(0x13FE, 4, 1)); // Straddles the end

        // Valid read
        assert_eq!(mem.read_le(0x1000, 1), Some(42));
        assert_eq!(mem.read_le(0x13FF, 1), Some(99));

        // Invalid read
        assert_eq!(mem.read_le(0x0FFF, 1), None);
        assert_eq!(mem.read_le(0x1400, 1), None);
    }

    #[test]
    fn test_region_at_top_of_address_space() {
        let mut mem = LinearMemory::new(16, u64::MAX - 7);
        assert_eq!(mem.end_addr(), u64::MAX);
        assert!(mem.write_le(u64::MAX - 7, 4, 0xAABB_CCDD));
        assert_eq!(mem.read_le(u64::MAX - 7, 4), Some(0xAABB_CCDD));
        assert!(!mem.contains(u64::MAX - 1, 4));
    }

    #[test]
    fn test_little_endian_words() {
        let mut mem = LinearMemory::new(16, 0);
        assert!(mem.write_le(0x4, 4, 0x1234_5678));
        assert_eq!(&mem.data[4..8], &[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_le(0x4, 4), Some(0x1234_5678));
        assert_eq!(mem.read_le(0x4, 2), Some(0x5678));
        assert_eq!(mem.read_le(0x6, 2), Some(0x1234));
    }

    #[test]
    fn test_load_from_segment() {
        let mut mem = LinearMemory::new(1024, 0x1000);

        // Segment 1: Fits inside
        let seg1 = Segment {
            start_addr: 0x1000,
            data: vec![1, 2, 3],
        };
        assert!(mem.load_from_segment(&seg1));
        assert_eq!(mem.read_le(0x1000, 1), Some(1));

        // Segment 2: Overlaps end boundary (should fail)
        let seg2 = Segment {
            start_addr: 0x13FE,
            data: vec![10, 20, 30],
        };
        assert!(!mem.load_from_segment(&seg2));
        assert_eq!(mem.read_le(0x13FF, 1), Some(0));

        // Segment 3: Exact fit at the end
        let seg3 = Segment {
            start_addr: 0x13FE,
            data: vec![0xAA, 0xBB],
        };
        assert!(mem.load_from_segment(&seg3));
        assert_eq!(mem.read_le(0x13FE, 2), Some(0xBBAA));
    }
}
