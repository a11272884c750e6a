//! Machine and launch configuration
//!
//! Both are plain serde structs so a front end can keep them in JSON:
//!
//! ```json
//! {
//!   "binary": "sys:c/echo",
//!   "args": ["echo", "hello world"],
//!   "stack_size": 8192
//! }
//! ```

use crate::process::LaunchMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default guest stack size in bytes
pub const DEFAULT_STACK_SIZE: u32 = 4096;

/// Default guest RAM size (1 MiB)
pub const DEFAULT_RAM_SIZE: u32 = 0x10_0000;

/// First address handed out by the allocator. Everything below stays
/// unused so that address 0 is never a valid allocation.
pub const DEFAULT_ALLOC_BASE: u32 = 0x1000;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// JSON could not be parsed
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Describes the emulated machine the context is built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Size of guest RAM in bytes
    pub ram_size: u32,
    /// Lowest address the allocator may hand out
    pub alloc_base: u32,
    /// Emit `[proc]`/`[loader]` log lines
    pub verbose: bool,
    /// Guest volume/assign name (without colon) to host directory
    pub assigns: HashMap<String, String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            alloc_base: DEFAULT_ALLOC_BASE,
            verbose: true,
            assigns: HashMap::new(),
        }
    }
}

impl MachineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MachineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alloc_base >= self.ram_size {
            return Err(ConfigError::Invalid(format!(
                "alloc_base {:#x} is beyond ram_size {:#x}",
                self.alloc_base, self.ram_size
            )));
        }
        if self.alloc_base % 4 != 0 {
            return Err(ConfigError::Invalid(format!(
                "alloc_base {:#x} is not long aligned",
                self.alloc_base
            )));
        }
        Ok(())
    }

    /// Add an assign, e.g. `("sys", "/home/me/amiga")`
    pub fn with_assign(mut self, name: &str, host_dir: &str) -> Self {
        self.assigns
            .insert(name.to_ascii_lowercase(), host_dir.to_string());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }
}

/// One guest program launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Guest path of the binary
    pub binary: String,
    /// Argument vector handed to the guest line reader
    #[serde(default)]
    pub args: Vec<String>,
    /// Stack size in bytes, a multiple of 4
    #[serde(default = "default_stack_size")]
    pub stack_size: u32,
    /// Address the program returns to when it exits
    #[serde(default)]
    pub exit_addr: u32,
    /// Launch the binary as the command shell
    #[serde(default)]
    pub shell: bool,
}

fn default_stack_size() -> u32 {
    DEFAULT_STACK_SIZE
}

impl LaunchConfig {
    pub fn new(binary: &str, args: &[&str]) -> Self {
        Self {
            binary: binary.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stack_size: DEFAULT_STACK_SIZE,
            exit_addr: 0,
            shell: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: LaunchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The stack needs room for its two top sentinels and must hold whole longs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size <= 8 || self.stack_size % 4 != 0 {
            return Err(ConfigError::Invalid(format!(
                "stack_size {} must be a multiple of 4 larger than 8",
                self.stack_size
            )));
        }
        Ok(())
    }

    /// Launch mode for this config. Standard streams are left to the registry defaults.
    pub fn launch_mode(&self) -> LaunchMode {
        if self.shell {
            LaunchMode::shell()
        } else {
            LaunchMode::Normal {
                args: self.args.clone(),
                input: None,
                output: None,
            }
        }
    }
}
