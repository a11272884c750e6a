//! Segment loader
//!
//! Loads AmigaDOS hunk executables into guest memory. Each hunk becomes
//! one allocated segment; RELOC32 fixups are applied once every segment
//! has its final address.
//!
//! Supported blocks: HEADER, CODE, DATA, BSS, RELOC32, SYMBOL, DEBUG, END.
//! Overlays and libraries are rejected.

use super::alloc::{AllocError, AllocResult, Allocator, MemoryHandle};
use super::memory::{Memory, MemoryError};
use std::fmt;
use std::path::Path;

pub const HUNK_CODE: u32 = 0x3E9;
pub const HUNK_DATA: u32 = 0x3EA;
pub const HUNK_BSS: u32 = 0x3EB;
pub const HUNK_RELOC32: u32 = 0x3EC;
pub const HUNK_SYMBOL: u32 = 0x3F0;
pub const HUNK_DEBUG: u32 = 0x3F1;
pub const HUNK_END: u32 = 0x3F2;
pub const HUNK_HEADER: u32 = 0x3F3;

/// Upper two bits of a hunk size or type carry memory attributes
const HUNK_FLAGS_MASK: u32 = 0xC000_0000;

/// Result type for loader operations
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors that can occur while loading a binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// Binary does not exist on the host
    NotFound(String),
    /// Host I/O failed
    Io(String),
    /// File is not a valid hunk executable
    InvalidHunk { reason: String },
    /// Not enough guest memory for the segments
    Alloc(AllocError),
    /// Relocation or copy touched memory it should not have
    Memory(MemoryError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "object not found: {}", path),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::InvalidHunk { reason } => write!(f, "invalid hunk file: {}", reason),
            Self::Alloc(e) => write!(f, "{}", e),
            Self::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<AllocError> for LoadError {
    fn from(e: AllocError) -> Self {
        LoadError::Alloc(e)
    }
}

impl From<MemoryError> for LoadError {
    fn from(e: MemoryError) -> Self {
        LoadError::Memory(e)
    }
}

fn invalid(reason: impl Into<String>) -> LoadError {
    LoadError::InvalidHunk {
        reason: reason.into(),
    }
}

/// Kind of a loaded segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    Data,
    Bss,
}

/// One loaded hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub mem: MemoryHandle,
}

impl Segment {
    pub fn addr(&self) -> u32 {
        self.mem.addr
    }

    pub fn size(&self) -> u32 {
        self.mem.size
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.kind, self.mem)
    }
}

/// A loaded binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegList {
    pub name: String,
    pub segments: Vec<Segment>,
    /// Where execution starts: the first byte of the first segment
    pub prog_start: u32,
}

impl fmt::Display for SegList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[SegList:'{}', {} segments, start={:06x}]",
            self.name,
            self.segments.len(),
            self.prog_start
        )
    }
}

/// Loads binaries into guest memory
pub trait SegmentLoader {
    /// Load the binary at `host_path`; `name` is the guest path used for labels
    fn load_seg(
        &mut self,
        mem: &mut Memory,
        alloc: &mut Allocator,
        name: &str,
        host_path: &Path,
    ) -> LoadResult<SegList>;

    /// Free all segments of a previously loaded binary
    fn unload_seg(&mut self, alloc: &mut Allocator, seg_list: &SegList) -> AllocResult<()>;
}

/// Big-endian long reader over the file image
struct HunkReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HunkReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn remaining_longs(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos) / 4
    }

    fn long(&mut self) -> LoadResult<u32> {
        let end = self.pos + 4;
        if end > self.bytes.len() {
            return Err(invalid("unexpected end of file"));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(u32::from_be_bytes(buf))
    }

    fn longs(&mut self, count: u32) -> LoadResult<&'a [u8]> {
        let end = self.pos.saturating_add((count as usize).saturating_mul(4));
        if end > self.bytes.len() {
            return Err(invalid("block extends past end of file"));
        }
        let data = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    fn skip(&mut self, count: u32) -> LoadResult<()> {
        self.longs(count).map(|_| ())
    }
}

/// Loader for AmigaDOS hunk executables
#[derive(Debug, Default)]
pub struct HunkLoader {
    last_error: Option<String>,
    loaded: usize,
}

impl HunkLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostic of the most recent failed load
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Binaries currently loaded through this loader
    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    /// Load a hunk image that is already in host memory
    pub fn load_bytes(
        &mut self,
        mem: &mut Memory,
        alloc: &mut Allocator,
        name: &str,
        bytes: &[u8],
    ) -> LoadResult<SegList> {
        let mut segments = Vec::new();
        match parse_into(mem, alloc, name, bytes, &mut segments) {
            Ok(()) => {
                self.last_error = None;
                self.loaded += 1;
                let prog_start = segments.first().map(|s| s.addr()).unwrap_or(0);
                Ok(SegList {
                    name: name.to_string(),
                    segments,
                    prog_start,
                })
            }
            Err(e) => {
                for seg in &segments {
                    let _ = alloc.free_memory(&seg.mem);
                }
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

impl SegmentLoader for HunkLoader {
    fn load_seg(
        &mut self,
        mem: &mut Memory,
        alloc: &mut Allocator,
        name: &str,
        host_path: &Path,
    ) -> LoadResult<SegList> {
        let bytes = match std::fs::read(host_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = if e.kind() == std::io::ErrorKind::NotFound {
                    LoadError::NotFound(name.to_string())
                } else {
                    LoadError::Io(format!("{}: {}", host_path.display(), e))
                };
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        self.load_bytes(mem, alloc, name, &bytes)
    }

    fn unload_seg(&mut self, alloc: &mut Allocator, seg_list: &SegList) -> AllocResult<()> {
        for seg in &seg_list.segments {
            alloc.free_memory(&seg.mem)?;
        }
        self.loaded = self.loaded.saturating_sub(1);
        Ok(())
    }
}

/// Parse a hunk file, pushing each allocated segment so the caller can
/// free them if anything fails halfway
fn parse_into(
    mem: &mut Memory,
    alloc: &mut Allocator,
    name: &str,
    bytes: &[u8],
    segments: &mut Vec<Segment>,
) -> LoadResult<()> {
    let mut r = HunkReader::new(bytes);

    if r.long()? != HUNK_HEADER {
        return Err(invalid("missing HUNK_HEADER"));
    }

    // resident library names, unsupported but must be skipped
    loop {
        let n = r.long()?;
        if n == 0 {
            break;
        }
        r.skip(n)?;
    }

    let _table_size = r.long()?;
    let first = r.long()?;
    let last = r.long()?;
    let count = last
        .checked_sub(first)
        .and_then(|n| n.checked_add(1))
        .ok_or_else(|| invalid(format!("bad hunk range {}..{}", first, last)))?;
    // every hunk needs at least its size long
    if count as usize > r.remaining_longs() {
        return Err(invalid(format!("{} hunks do not fit the file", count)));
    }

    let mut sizes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = r.long()?;
        if raw & HUNK_FLAGS_MASK == HUNK_FLAGS_MASK {
            // explicit memory attributes follow
            r.long()?;
        }
        sizes.push((raw & !HUNK_FLAGS_MASK) * 4);
    }

    // allocate everything up front so relocations can see every address
    for (i, &size) in sizes.iter().enumerate() {
        let label = format!("{}_seg{}", name, i);
        let handle = alloc.alloc_memory(mem, &label, size.max(4))?;
        segments.push(Segment {
            kind: SegmentKind::Bss,
            mem: handle,
        });
    }

    let mut hunk = 0usize;
    while hunk < segments.len() {
        if r.at_end() {
            return Err(invalid(format!("missing HUNK_END for hunk {}", hunk)));
        }
        let block = r.long()? & !HUNK_FLAGS_MASK;
        match block {
            HUNK_CODE | HUNK_DATA => {
                let n = r.long()?;
                let data = r.longs(n)?;
                let seg = &mut segments[hunk];
                if data.len() as u32 > seg.size() {
                    return Err(invalid(format!("hunk {} data exceeds its size", hunk)));
                }
                mem.w_bytes(seg.addr(), data)?;
                seg.kind = if block == HUNK_CODE {
                    SegmentKind::Code
                } else {
                    SegmentKind::Data
                };
            }
            HUNK_BSS => {
                r.long()?;
                segments[hunk].kind = SegmentKind::Bss;
            }
            HUNK_RELOC32 => loop {
                let n = r.long()?;
                if n == 0 {
                    break;
                }
                let target = r.long()? as usize;
                let target_addr = segments
                    .get(target)
                    .map(|s| s.addr())
                    .ok_or_else(|| invalid(format!("relocation to unknown hunk {}", target)))?;
                let seg = &segments[hunk];
                for _ in 0..n {
                    let offset = r.long()?;
                    if offset.checked_add(4).is_none_or(|end| end > seg.size()) {
                        return Err(invalid(format!("relocation offset {:#x} out of hunk", offset)));
                    }
                    let at = seg.addr() + offset;
                    let value = mem.r32(at)?;
                    mem.w32(at, value.wrapping_add(target_addr))?;
                }
            },
            HUNK_SYMBOL => loop {
                let n = r.long()?;
                if n == 0 {
                    break;
                }
                // name longs plus the symbol value
                r.skip(n + 1)?;
            },
            HUNK_DEBUG => {
                let n = r.long()?;
                r.skip(n)?;
            }
            HUNK_END => hunk += 1,
            other => return Err(invalid(format!("unsupported block type {:#x}", other))),
        }
    }

    Ok(())
}

/// Builds minimal hunk executables, used for fixtures and tooling
#[derive(Debug, Default)]
pub struct HunkWriter {
    hunks: Vec<(u32, Vec<u8>, Vec<(u32, Vec<u32>)>)>,
}

impl HunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a code hunk; `code` is padded to a whole number of longs
    pub fn code(mut self, code: &[u8]) -> Self {
        self.hunks.push((HUNK_CODE, code.to_vec(), Vec::new()));
        self
    }

    pub fn data(mut self, data: &[u8]) -> Self {
        self.hunks.push((HUNK_DATA, data.to_vec(), Vec::new()));
        self
    }

    /// Add a BSS hunk of `size` bytes
    pub fn bss(mut self, size: u32) -> Self {
        self.hunks
            .push((HUNK_BSS, vec![0; size as usize], Vec::new()));
        self
    }

    /// Relocate the given offsets of the last hunk against `target`
    pub fn reloc(mut self, target: u32, offsets: &[u32]) -> Self {
        if let Some(last) = self.hunks.last_mut() {
            last.2.push((target, offsets.to_vec()));
        }
        self
    }

    pub fn build(&self) -> Vec<u8> {
        fn put(out: &mut Vec<u8>, v: u32) {
            out.extend_from_slice(&v.to_be_bytes());
        }

        let mut out = Vec::new();
        put(&mut out, HUNK_HEADER);
        put(&mut out, 0);
        let count = self.hunks.len() as u32;
        put(&mut out, count);
        put(&mut out, 0);
        put(&mut out, count.saturating_sub(1));
        for (_, data, _) in &self.hunks {
            put(&mut out, (data.len() as u32).div_ceil(4));
        }

        for (kind, data, relocs) in &self.hunks {
            let longs = (data.len() as u32).div_ceil(4);
            put(&mut out, *kind);
            put(&mut out, longs);
            if *kind != HUNK_BSS {
                out.extend_from_slice(data);
                out.resize(out.len() + (longs as usize * 4 - data.len()), 0);
            }
            if !relocs.is_empty() {
                put(&mut out, HUNK_RELOC32);
                for (target, offsets) in relocs {
                    put(&mut out, offsets.len() as u32);
                    put(&mut out, *target);
                    for &o in offsets {
                        put(&mut out, o);
                    }
                }
                put(&mut out, 0);
            }
            put(&mut out, HUNK_END);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Memory, Allocator) {
        (Memory::new(0x8000), Allocator::new(0x1000, 0x8000))
    }

    #[test]
    fn test_load_code_hunk() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let image = HunkWriter::new().code(&[0x4e, 0x75]).build();
        let seg_list = loader
            .load_bytes(&mut mem, &mut alloc, "rts", &image)
            .unwrap();
        assert_eq!(seg_list.segments.len(), 1);
        assert_eq!(seg_list.segments[0].kind, SegmentKind::Code);
        assert_eq!(seg_list.prog_start, seg_list.segments[0].addr());
        assert_eq!(mem.r16(seg_list.prog_start).unwrap(), 0x4e75);
        assert_eq!(loader.loaded_count(), 1);

        loader.unload_seg(&mut alloc, &seg_list).unwrap();
        assert_eq!(alloc.region_count(), 0);
        assert_eq!(loader.loaded_count(), 0);
    }

    #[test]
    fn test_reloc32() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        // code: a long holding offset 4 into the data hunk
        let image = HunkWriter::new()
            .code(&[0, 0, 0, 4])
            .reloc(1, &[0])
            .data(&[1, 2, 3, 4, 5, 6, 7, 8])
            .build();
        let seg_list = loader
            .load_bytes(&mut mem, &mut alloc, "rel", &image)
            .unwrap();
        let code = &seg_list.segments[0];
        let data = &seg_list.segments[1];
        assert_eq!(data.kind, SegmentKind::Data);
        assert_eq!(mem.r32(code.addr()).unwrap(), data.addr() + 4);
    }

    #[test]
    fn test_bss_hunk() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let image = HunkWriter::new().code(&[0x4e, 0x75]).bss(64).build();
        let seg_list = loader
            .load_bytes(&mut mem, &mut alloc, "bss", &image)
            .unwrap();
        assert_eq!(seg_list.segments[1].kind, SegmentKind::Bss);
        assert_eq!(seg_list.segments[1].size(), 64);
    }

    #[test]
    fn test_bad_magic() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let err = loader
            .load_bytes(&mut mem, &mut alloc, "junk", b"\x7fELF\0\0\0\0")
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidHunk { .. }));
        assert_eq!(loader.last_error(), Some("invalid hunk file: missing HUNK_HEADER"));
    }

    fn be_longs(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn test_header_range_overflow() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let image = be_longs(&[HUNK_HEADER, 0, 1, 0, 0xffff_ffff]);
        let err = loader
            .load_bytes(&mut mem, &mut alloc, "wrap", &image)
            .unwrap_err();
        assert_eq!(err, invalid("bad hunk range 0..4294967295"));
        assert_eq!(alloc.region_count(), 0);
    }

    #[test]
    fn test_header_count_exceeds_file() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let image = be_longs(&[HUNK_HEADER, 0, 1, 0, 0xffff_fffe, 4]);
        let err = loader
            .load_bytes(&mut mem, &mut alloc, "huge", &image)
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidHunk { .. }));
        assert_eq!(alloc.region_count(), 0);

        let image = be_longs(&[HUNK_HEADER, 0, 1, 5, 3]);
        let err = loader
            .load_bytes(&mut mem, &mut alloc, "backwards", &image)
            .unwrap_err();
        assert_eq!(err, invalid("bad hunk range 5..3"));
    }

    #[test]
    fn test_truncated_frees_segments() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let image = HunkWriter::new().code(&[0; 16]).build();
        let truncated = &image[..image.len() - 8];
        assert!(loader
            .load_bytes(&mut mem, &mut alloc, "trunc", truncated)
            .is_err());
        assert_eq!(alloc.region_count(), 0);
        assert_eq!(loader.loaded_count(), 0);
    }

    #[test]
    fn test_missing_file() {
        let (mut mem, mut alloc) = setup();
        let mut loader = HunkLoader::new();
        let err = loader
            .load_seg(
                &mut mem,
                &mut alloc,
                "c:nothere",
                Path::new("/nonexistent/guestproc/nothere"),
            )
            .unwrap_err();
        assert_eq!(err, LoadError::NotFound("c:nothere".to_string()));
        assert_eq!(loader.last_error(), Some("object not found: c:nothere"));
    }
}
