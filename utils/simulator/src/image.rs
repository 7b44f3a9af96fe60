//! Program images: ELF executables or raw binaries.

use camino::Utf8Path;
use elf::ElfBytes;
use elf::abi::{SHF_ALLOC, SHT_PROGBITS};
use elf::endian::AnyEndian;

use crate::config::RamConfig;
use crate::error::{HarnessError, Result};
use crate::model::ArcModel;

const ELF_MAGIC: &[u8] = b"\x7fELF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub addr: u64,
    pub data: Vec<u8>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.addr + self.data.len() as u64
    }
}

/// Loadable contents of a program, sorted by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    segments: Vec<Segment>,
    entry: Option<u64>,
}

impl Image {
    /// A raw binary placed at `base`.
    pub fn from_raw(data: Vec<u8>, base: u64) -> Self {
        Self {
            segments: vec![Segment { addr: base, data }],
            entry: Some(base),
        }
    }

    /// Collects every allocated `PROGBITS` section of an ELF file.
    pub fn from_elf(data: &[u8]) -> Result<Self> {
        let file = ElfBytes::<AnyEndian>::minimal_parse(data)
            .map_err(|e| HarnessError::Image(format!("malformed ELF: {e}")))?;
        let headers = file
            .section_headers()
            .ok_or_else(|| HarnessError::Image("ELF has no section headers".into()))?;

        let mut segments = Vec::new();
        for shdr in headers.iter() {
            if shdr.sh_type != SHT_PROGBITS
                || shdr.sh_flags & SHF_ALLOC as u64 == 0
                || shdr.sh_size == 0
            {
                continue;
            }
            let (bytes, compression) = file
                .section_data(&shdr)
                .map_err(|e| HarnessError::Image(format!("unreadable section: {e}")))?;
            if compression.is_some() {
                return Err(HarnessError::Image(format!(
                    "compressed section at 0x{:x} is not supported",
                    shdr.sh_addr
                )));
            }
            tracing::debug!(
                addr = format_args!("0x{:08x}", shdr.sh_addr),
                len = bytes.len(),
                "image section"
            );
            segments.push(Segment {
                addr: shdr.sh_addr,
                data: bytes.to_vec(),
            });
        }
        if segments.is_empty() {
            return Err(HarnessError::Image("ELF has no loadable sections".into()));
        }
        segments.sort_by_key(|s| s.addr);

        Ok(Self {
            segments,
            entry: Some(file.ehdr.e_entry),
        })
    }

    /// Reads `path`, treating it as ELF when it carries the ELF magic and as a
    /// raw binary at `base` otherwise.
    pub fn load(path: &Utf8Path, base: u64) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| HarnessError::Image(format!("{path}: {e}")))?;
        if data.starts_with(ELF_MAGIC) {
            Self::from_elf(&data).map_err(|e| match e {
                HarnessError::Image(msg) => HarnessError::Image(format!("{path}: {msg}")),
                other => other,
            })
        } else {
            Ok(Self::from_raw(data, base))
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn entry(&self) -> Option<u64> {
        self.entry
    }

    /// One contiguous buffer starting at `base`, gaps zero filled.
    pub fn flatten(&self, base: u64) -> Result<Vec<u8>> {
        let end = self.segments.iter().map(Segment::end).max().unwrap_or(base);
        let len = end.saturating_sub(base);
        let mut flat = vec![0u8; len as usize];
        for segment in &self.segments {
            let Some(offset) = segment.addr.checked_sub(base) else {
                return Err(HarnessError::Image(format!(
                    "segment at 0x{:x} lies below 0x{base:x}",
                    segment.addr
                )));
            };
            let offset = offset as usize;
            flat[offset..offset + segment.data.len()].copy_from_slice(&segment.data);
        }
        Ok(flat)
    }

    /// Writes the image into the model's program memory.
    pub fn write_into(&self, model: &mut ArcModel, ram: &RamConfig) -> Result<()> {
        let flat = self.flatten(ram.base)?;
        model.load_memory(&ram.state, ram.base, ram.base, &flat)?;
        tracing::info!(
            bytes = flat.len(),
            base = format_args!("0x{:08x}", ram.base),
            "loaded program image"
        );
        Ok(())
    }
}
