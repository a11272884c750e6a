//! Guest memory allocator
//!
//! Hands out long-aligned regions of guest RAM, first fit, and keeps an
//! inventory of every live region with the label it was allocated under.
//! The inventory is what lets a caller check that a torn down process
//! left nothing behind.
//!
//! Design:
//! - Live regions live in a slab; `RegionId` is the slab key
//! - Free space is a sorted list of ranges, merged on free
//! - New regions are zero filled

use super::layout::{StructDef, StructError, StructHandle};
use super::memory::{latin1_bytes, Memory, MemoryError};
use slab::Slab;
use std::fmt;

/// Handle to a live region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub usize);

/// What a region was allocated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Raw memory block
    Memory,
    /// Guest struct of the named layout
    Struct(&'static str),
    /// Length prefixed BCPL string
    BStr,
}

/// A live allocation
#[derive(Debug, Clone)]
pub struct Region {
    pub label: String,
    pub addr: u32,
    pub size: u32,
    pub kind: RegionKind,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            RegionKind::Memory => "Memory",
            RegionKind::Struct(name) => name,
            RegionKind::BStr => "BStr",
        };
        write!(
            f,
            "[{}]({:06x}, {:06x}, #{}, '{}')",
            kind,
            self.addr,
            self.addr + self.size,
            self.size,
            self.label
        )
    }
}

/// A raw memory block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    pub region: RegionId,
    pub addr: u32,
    pub size: u32,
    pub label: String,
}

impl fmt::Display for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Memory]({:06x}, {:06x}, #{}, '{}')",
            self.addr,
            self.addr + self.size,
            self.size,
            self.label
        )
    }
}

/// A BCPL string: one length byte, then the characters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BStrHandle {
    pub region: RegionId,
    pub addr: u32,
    pub text: String,
}

impl BStrHandle {
    pub fn b_addr(&self) -> u32 {
        self.addr >> 2
    }
}

impl fmt::Display for BStrHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[BStr]({:06x}, '{}')", self.addr, self.text)
    }
}

/// Allocation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// No free range is large enough
    OutOfMemory { requested: u32, available: u32 },
    /// Zero sized request
    InvalidSize,
    /// Region was already freed or never existed
    UnknownRegion(RegionId),
    /// BCPL strings hold at most 255 characters
    StringTooLong(usize),
    /// Filling the new region failed
    Memory(MemoryError),
    /// Initializing a struct field failed
    Layout(StructError),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {} bytes, largest free block is {}",
                requested, available
            ),
            Self::InvalidSize => write!(f, "invalid allocation size"),
            Self::UnknownRegion(id) => write!(f, "unknown region #{}", id.0),
            Self::StringTooLong(len) => write!(f, "BCPL string too long ({} chars)", len),
            Self::Memory(e) => write!(f, "{}", e),
            Self::Layout(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AllocError {}

impl From<MemoryError> for AllocError {
    fn from(e: MemoryError) -> Self {
        AllocError::Memory(e)
    }
}

impl From<StructError> for AllocError {
    fn from(e: StructError) -> Self {
        match e {
            StructError::Memory(e) => AllocError::Memory(e),
            e => AllocError::Layout(e),
        }
    }
}

pub type AllocResult<T> = Result<T, AllocError>;

/// First fit allocator over `[base, end)`
#[derive(Debug)]
pub struct Allocator {
    regions: Slab<Region>,
    /// Free ranges as (addr, size), sorted by address, never adjacent
    free: Vec<(u32, u32)>,
    allocated: u32,
    peak: u32,
}

impl Allocator {
    pub fn new(base: u32, end: u32) -> Self {
        let base = (base + 3) & !3;
        let free = if end > base {
            vec![(base, end - base)]
        } else {
            Vec::new()
        };
        Self {
            regions: Slab::new(),
            free,
            allocated: 0,
            peak: 0,
        }
    }

    fn reserve(&mut self, size: u32) -> AllocResult<u32> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }
        let size = size.checked_add(3).ok_or(AllocError::InvalidSize)? & !3;

        let idx = self
            .free
            .iter()
            .position(|&(_, len)| len >= size)
            .ok_or(AllocError::OutOfMemory {
                requested: size,
                available: self.largest_free(),
            })?;

        let (addr, len) = self.free[idx];
        if len == size {
            self.free.remove(idx);
        } else {
            self.free[idx] = (addr + size, len - size);
        }
        Ok(addr)
    }

    fn release(&mut self, addr: u32, size: u32) {
        let size = (size + 3) & !3;
        let idx = self.free.partition_point(|&(a, _)| a < addr);
        self.free.insert(idx, (addr, size));

        // merge with the following range
        if idx + 1 < self.free.len() {
            let (a, len) = self.free[idx];
            let (next_a, next_len) = self.free[idx + 1];
            if a + len == next_a {
                self.free[idx] = (a, len + next_len);
                self.free.remove(idx + 1);
            }
        }
        // merge with the preceding range
        if idx > 0 {
            let (prev_a, prev_len) = self.free[idx - 1];
            let (a, len) = self.free[idx];
            if prev_a + prev_len == a {
                self.free[idx - 1] = (prev_a, prev_len + len);
                self.free.remove(idx);
            }
        }
    }

    fn track(&mut self, mem: &mut Memory, label: &str, size: u32, kind: RegionKind) -> AllocResult<(RegionId, u32)> {
        let addr = self.reserve(size)?;
        if let Err(e) = mem.clear(addr, size) {
            self.release(addr, size);
            return Err(e.into());
        }
        let id = RegionId(self.regions.insert(Region {
            label: label.to_string(),
            addr,
            size,
            kind,
        }));
        self.allocated += size;
        self.peak = self.peak.max(self.allocated);
        Ok((id, addr))
    }

    fn untrack(&mut self, id: RegionId) -> AllocResult<Region> {
        let region = self
            .regions
            .try_remove(id.0)
            .ok_or(AllocError::UnknownRegion(id))?;
        self.release(region.addr, region.size);
        self.allocated = self.allocated.saturating_sub(region.size);
        Ok(region)
    }

    pub fn alloc_memory(&mut self, mem: &mut Memory, label: &str, size: u32) -> AllocResult<MemoryHandle> {
        let (region, addr) = self.track(mem, label, size, RegionKind::Memory)?;
        Ok(MemoryHandle {
            region,
            addr,
            size,
            label: label.to_string(),
        })
    }

    pub fn free_memory(&mut self, handle: &MemoryHandle) -> AllocResult<()> {
        self.untrack(handle.region).map(|_| ())
    }

    pub fn alloc_struct(
        &mut self,
        mem: &mut Memory,
        label: &str,
        def: &'static StructDef,
    ) -> AllocResult<StructHandle> {
        let (region, addr) = self.track(mem, label, def.size, RegionKind::Struct(def.name))?;
        Ok(StructHandle {
            region,
            addr,
            def,
            label: label.to_string(),
        })
    }

    pub fn free_struct(&mut self, handle: &StructHandle) -> AllocResult<()> {
        self.untrack(handle.region).map(|_| ())
    }

    pub fn alloc_bstr(&mut self, mem: &mut Memory, label: &str, text: &str) -> AllocResult<BStrHandle> {
        let bytes = latin1_bytes(text);
        if bytes.len() > 255 {
            return Err(AllocError::StringTooLong(bytes.len()));
        }
        let size = bytes.len() as u32 + 1;
        let (region, addr) = self.track(mem, label, size, RegionKind::BStr)?;
        let written = mem
            .w8(addr, bytes.len() as u8)
            .and_then(|_| mem.w_bytes(addr + 1, &bytes));
        if let Err(e) = written {
            self.untrack(region)?;
            return Err(e.into());
        }
        Ok(BStrHandle {
            region,
            addr,
            text: text.to_string(),
        })
    }

    pub fn free_bstr(&mut self, handle: &BStrHandle) -> AllocResult<()> {
        self.untrack(handle.region).map(|_| ())
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0)
    }

    /// Number of live regions
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().map(|(_, r)| r)
    }

    /// Live regions whose label starts with `prefix`
    pub fn regions_labelled<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Region> + 'a {
        self.regions().filter(move |r| r.label.starts_with(prefix))
    }

    /// Bytes currently allocated (as requested, before rounding)
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    pub fn peak(&self) -> u32 {
        self.peak
    }

    pub fn free_bytes(&self) -> u32 {
        self.free.iter().map(|&(_, len)| len).sum()
    }

    pub fn largest_free(&self) -> u32 {
        self.free.iter().map(|&(_, len)| len).max().unwrap_or(0)
    }
}
