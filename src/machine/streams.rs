//! Stream registry
//!
//! Every open guest stream is backed by a FileHandle struct in guest
//! memory. Guest code only ever sees the BCPL address of that struct, so
//! the registry indexes streams by it. A stream can hold pending
//! buffered input which the guest's line reader consumes before it
//! touches the real input.

use super::alloc::{AllocResult, Allocator};
use super::layout::{StructHandle, FILE_HANDLE_DEF};
use super::memory::Memory;
use slab::Slab;
use std::collections::HashMap;
use std::fmt;

/// Slab key of a registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub usize);

/// Handle to a registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream {
    pub id: StreamId,
    /// BCPL address of the FileHandle block
    pub b_addr: u32,
}

impl Stream {
    /// Byte address of the FileHandle block
    pub fn addr(&self) -> u32 {
        self.b_addr << 2
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh@{:06x}(b={:06x})", self.addr(), self.b_addr)
    }
}

struct StreamState {
    name: String,
    fh: StructHandle,
    interactive: bool,
    pending: String,
}

/// All open streams of the emulated DOS
pub struct StreamRegistry {
    streams: Slab<StreamState>,
    by_b_addr: HashMap<u32, StreamId>,
    input: Option<Stream>,
    output: Option<Stream>,
}

impl StreamRegistry {
    /// Empty registry without default streams
    pub fn new() -> Self {
        Self {
            streams: Slab::new(),
            by_b_addr: HashMap::new(),
            input: None,
            output: None,
        }
    }

    /// Registry with the console input and output already open
    pub fn with_console(alloc: &mut Allocator, mem: &mut Memory) -> AllocResult<Self> {
        let mut registry = Self::new();
        let input = registry.open(alloc, mem, "stdin", true)?;
        let output = registry.open(alloc, mem, "stdout", true)?;
        registry.input = Some(input);
        registry.output = Some(output);
        Ok(registry)
    }

    /// Open a stream: allocates its FileHandle and registers it
    pub fn open(
        &mut self,
        alloc: &mut Allocator,
        mem: &mut Memory,
        name: &str,
        interactive: bool,
    ) -> AllocResult<Stream> {
        let fh = alloc.alloc_struct(mem, &format!("fh_{}", name), &FILE_HANDLE_DEF)?;
        if interactive {
            // DOSTRUE
            if let Err(e) = fh.write(mem, "fh_Interactive", 0xffff_ffff) {
                alloc.free_struct(&fh)?;
                return Err(e.into());
            }
        }
        let b_addr = fh.b_addr();
        let id = StreamId(self.streams.insert(StreamState {
            name: name.to_string(),
            fh,
            interactive,
            pending: String::new(),
        }));
        self.by_b_addr.insert(b_addr, id);
        Ok(Stream { id, b_addr })
    }

    /// Close a stream and free its FileHandle. Unknown streams are ignored.
    pub fn close(&mut self, alloc: &mut Allocator, stream: Stream) -> AllocResult<()> {
        if self.state(stream).is_none() {
            return Ok(());
        }
        let state = self.streams.remove(stream.id.0);
        self.by_b_addr.remove(&stream.b_addr);
        if self.input == Some(stream) {
            self.input = None;
        }
        if self.output == Some(stream) {
            self.output = None;
        }
        alloc.free_struct(&state.fh)
    }

    /// State of a live stream; stale handles whose slot was reused yield None
    fn state(&self, stream: Stream) -> Option<&StreamState> {
        self.streams
            .get(stream.id.0)
            .filter(|s| s.fh.b_addr() == stream.b_addr)
    }

    fn state_mut(&mut self, stream: Stream) -> Option<&mut StreamState> {
        self.streams
            .get_mut(stream.id.0)
            .filter(|s| s.fh.b_addr() == stream.b_addr)
    }

    pub fn default_input(&self) -> Option<Stream> {
        self.input
    }

    pub fn default_output(&self) -> Option<Stream> {
        self.output
    }

    pub fn get_by_b_addr(&self, b_addr: u32) -> Option<Stream> {
        self.by_b_addr
            .get(&b_addr)
            .map(|&id| Stream { id, b_addr })
    }

    pub fn is_open(&self, stream: Stream) -> bool {
        self.state(stream).is_some()
    }

    pub fn name(&self, stream: Stream) -> Option<&str> {
        self.state(stream).map(|s| s.name.as_str())
    }

    pub fn is_interactive(&self, stream: Stream) -> bool {
        self.state(stream).is_some_and(|s| s.interactive)
    }

    /// Replace the stream's pending buffered input
    pub fn set_buffer(&mut self, stream: Stream, text: &str) {
        if let Some(state) = self.state_mut(stream) {
            state.pending.clear();
            state.pending.push_str(text);
        }
    }

    /// Pending buffered input, if any
    pub fn buffered(&self, stream: Stream) -> Option<&str> {
        self.state(stream)
            .map(|s| s.pending.as_str())
            .filter(|p| !p.is_empty())
    }

    /// Take one line (including its newline) from the pending input
    pub fn read_buffered_line(&mut self, stream: Stream) -> Option<String> {
        let state = self.state_mut(stream)?;
        if state.pending.is_empty() {
            return None;
        }
        let end = state
            .pending
            .find('\n')
            .map(|i| i + 1)
            .unwrap_or(state.pending.len());
        Some(state.pending.drain(..end).collect())
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Memory, Allocator) {
        (Memory::new(0x4000), Allocator::new(0x1000, 0x4000))
    }

    #[test]
    fn test_console_streams() {
        let (mut mem, mut alloc) = setup();
        let reg = StreamRegistry::with_console(&mut alloc, &mut mem).unwrap();
        let input = reg.default_input().unwrap();
        let output = reg.default_output().unwrap();
        assert_ne!(input.b_addr, output.b_addr);
        assert_eq!(input.addr(), 0x1000);
        assert_eq!(input.b_addr, 0x400);
        assert!(reg.is_interactive(input));
        assert_eq!(mem.r32(input.addr() + 4).unwrap(), 0xffff_ffff);
        assert_eq!(alloc.region_count(), 2);
    }

    #[test]
    fn test_lookup_by_b_addr() {
        let (mut mem, mut alloc) = setup();
        let mut reg = StreamRegistry::new();
        let s = reg.open(&mut alloc, &mut mem, "ram:t", false).unwrap();
        assert_eq!(reg.get_by_b_addr(s.b_addr), Some(s));
        assert_eq!(reg.get_by_b_addr(s.b_addr + 1), None);
        assert_eq!(reg.name(s), Some("ram:t"));
    }

    #[test]
    fn test_close() {
        let (mut mem, mut alloc) = setup();
        let mut reg = StreamRegistry::with_console(&mut alloc, &mut mem).unwrap();
        let input = reg.default_input().unwrap();
        reg.close(&mut alloc, input).unwrap();
        assert!(!reg.is_open(input));
        assert_eq!(reg.get_by_b_addr(input.b_addr), None);
        assert_eq!(reg.default_input(), None);
        assert_eq!(alloc.region_count(), 1);
        // closing twice is harmless
        reg.close(&mut alloc, input).unwrap();
    }

    #[test]
    fn test_buffered_input() {
        let (mut mem, mut alloc) = setup();
        let mut reg = StreamRegistry::with_console(&mut alloc, &mut mem).unwrap();
        let input = reg.default_input().unwrap();
        assert_eq!(reg.buffered(input), None);

        reg.set_buffer(input, "a b\nc\n");
        assert_eq!(reg.buffered(input), Some("a b\nc\n"));
        assert_eq!(reg.read_buffered_line(input).as_deref(), Some("a b\n"));
        assert_eq!(reg.read_buffered_line(input).as_deref(), Some("c\n"));
        assert_eq!(reg.read_buffered_line(input), None);

        reg.set_buffer(input, "old");
        reg.set_buffer(input, "new\n");
        assert_eq!(reg.buffered(input), Some("new\n"));
    }
}
