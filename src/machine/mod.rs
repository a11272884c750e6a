//! The emulated machine
//!
//! Everything a guest process image is built from: RAM, the allocator,
//! open streams, path mapping and the segment loader. The context is an
//! explicit handle; nothing here is global.

pub mod alloc;
pub mod layout;
pub mod loader;
pub mod memory;
pub mod paths;
pub mod streams;

pub use alloc::{AllocError, Allocator, BStrHandle, MemoryHandle, RegionId};
pub use layout::{StructDef, StructHandle};
pub use loader::{HunkLoader, LoadError, SegList, SegmentLoader};
pub use memory::{Memory, MemoryError};
pub use paths::{PathError, PathManager};
pub use streams::{Stream, StreamRegistry};

use crate::config::MachineConfig;

/// Execution context shared by everything running on one emulated machine
pub struct Context {
    pub mem: Memory,
    pub alloc: Allocator,
    pub paths: PathManager,
    pub streams: StreamRegistry,
    pub loader: Box<dyn SegmentLoader>,
    verbose: bool,
}

impl Context {
    /// Build a machine with console streams and the hunk loader
    pub fn new(config: &MachineConfig) -> Result<Self, AllocError> {
        Self::with_loader(config, Box::new(HunkLoader::new()))
    }

    pub fn with_loader(
        config: &MachineConfig,
        loader: Box<dyn SegmentLoader>,
    ) -> Result<Self, AllocError> {
        let mut mem = Memory::new(config.ram_size);
        let mut alloc = Allocator::new(config.alloc_base, config.ram_size);
        let streams = StreamRegistry::with_console(&mut alloc, &mut mem)?;
        Ok(Self {
            mem,
            alloc,
            paths: PathManager::from_assigns(&config.assigns),
            streams,
            loader,
            verbose: config.verbose,
        })
    }

    pub fn log_enabled(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Open an extra (non-console) stream
    pub fn open_stream(&mut self, name: &str) -> Result<Stream, AllocError> {
        self.streams
            .open(&mut self.alloc, &mut self.mem, name, false)
    }

    pub fn close_stream(&mut self, stream: Stream) -> Result<(), AllocError> {
        self.streams.close(&mut self.alloc, stream)
    }
}
