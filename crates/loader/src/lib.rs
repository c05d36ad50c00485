// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{anyhow, bail, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use halley_core::memory::ProgramImage;
use halley_core::Arch;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// kseg0 (cached) and kseg1 (uncached) both alias the low 512 MiB.
const KSEG_PHYS_MASK: u64 = 0x1FFF_FFFF;

/// Largest segment the board could hold; bigger memory sizes are rejected
/// before anything is allocated.
pub const MAX_SEGMENT_SIZE: u64 = KSEG_PHYS_MASK + 1;

/// Translate a MIPS kernel-segment address to its physical address.
/// kuseg addresses are returned unchanged.
pub fn to_physical(addr: u64) -> u64 {
    // 64-bit images carry sign-extended compatibility-space addresses.
    let addr = if addr >> 32 == 0xFFFF_FFFF {
        addr & 0xFFFF_FFFF
    } else {
        addr
    };
    if (0x8000_0000..0xC000_0000).contains(&addr) {
        addr & KSEG_PHYS_MASK
    } else {
        addr
    }
}

pub fn load_elf(path: &Path) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read ELF file: {:?}", path))?;
    load_elf_bytes(&buffer)
}

pub fn load_elf_bytes(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    let arch = match elf.header.e_machine {
        goblin::elf::header::EM_MIPS => Arch::Mips,
        _ => {
            warn!("Unknown ELF machine type: {}", elf.header.e_machine);
            Arch::Unknown
        }
    };

    let mut program_image = ProgramImage::new(elf.entry, arch);

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        let start_addr = to_physical(ph.p_paddr);
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        debug!(
            "Found Loadable Segment: VAddr={:#x}, Phys={:#x}, Size={} bytes, Offset={:#x}",
            ph.p_vaddr, start_addr, size, offset
        );

        let end = offset
            .checked_add(size)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| anyhow!("Segment at {:#x} out of bounds in ELF file", ph.p_vaddr))?;

        // Zero-fill up to the memory size so .bss starts clean.
        let mut segment_data = buffer[offset..end].to_vec();
        if ph.p_memsz > MAX_SEGMENT_SIZE {
            bail!(
                "Segment at {:#x} declares {} bytes, more than the {} byte limit",
                ph.p_vaddr,
                ph.p_memsz,
                MAX_SEGMENT_SIZE
            );
        }
        let mem_size = usize::try_from(ph.p_memsz)
            .with_context(|| format!("Segment at {:#x} is too large", ph.p_vaddr))?;
        if mem_size > segment_data.len() {
            segment_data.resize(mem_size, 0);
        }
        program_image.add_segment(start_addr, segment_data);
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    Ok(program_image)
}

/// Read a raw binary image to be placed at physical `load_addr`.
/// The entry point is the load address.
pub fn load_raw(path: &Path, load_addr: u64) -> Result<ProgramImage> {
    let data = fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    Ok(load_raw_bytes(data, load_addr))
}

pub fn load_raw_bytes(data: Vec<u8>, load_addr: u64) -> ProgramImage {
    info!("Raw image: {} bytes at {:#x}", data.len(), load_addr);
    let mut image = ProgramImage::new(load_addr, Arch::Mips);
    image.add_segment(load_addr, data);
    image
}

/// Load either an ELF or a raw image, telling them apart by the ELF magic.
pub fn load_firmware(path: &Path, raw_load_addr: u64) -> Result<ProgramImage> {
    let buffer = fs::read(path).with_context(|| format!("Failed to read firmware: {:?}", path))?;
    load_firmware_bytes(buffer, raw_load_addr)
        .with_context(|| format!("Invalid firmware {:?}", path))
}

pub fn load_firmware_bytes(buffer: Vec<u8>, raw_load_addr: u64) -> Result<ProgramImage> {
    if buffer.starts_with(ELF_MAGIC) {
        load_elf_bytes(&buffer)
    } else {
        Ok(load_raw_bytes(buffer, raw_load_addr))
    }
}
