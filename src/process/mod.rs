//! Guest process image
//!
//! A `Process` owns everything the guest expects a freshly started
//! program to find in memory:
//!
//! - the loaded binary and its entry point
//! - the call stack with its return sentinels
//! - the argument line (normal launches only)
//! - the CLI block and its command name
//! - the Process (task) block
//!
//! Construction runs in that order and teardown runs in exactly the
//! reverse order, because later structures hold guest addresses of
//! earlier ones. If construction fails partway, whatever was built is
//! torn down before the error is returned.

pub mod args;
pub mod baddr;
pub mod binary;
pub mod cli;
pub mod error;
pub mod stack;
pub mod task;

pub use baddr::CompensatedAddress;
pub use error::{LookupError, ProcError, ProcResult};

use crate::config::LaunchConfig;
use crate::ctx_log;
use crate::machine::{Context, SegList, Stream};
use args::ArgBuffer;
use binary::LoadedBinary;
use cli::CliBlock;
use serde::{Deserialize, Serialize};
use stack::Stack;
use std::fmt;
use task::TaskBlock;

/// How a binary is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// A regular command: gets its argument line and a populated CLI block.
    /// Missing streams fall back to the registry defaults.
    Normal {
        args: Vec<String>,
        input: Option<Stream>,
        output: Option<Stream>,
    },
    /// The command shell: BCPL entry, sets up its own CLI. The streams
    /// only go into the task block.
    Shell {
        input: Option<Stream>,
        output: Option<Stream>,
    },
}

impl LaunchMode {
    pub fn normal<S: AsRef<str>>(args: &[S]) -> Self {
        LaunchMode::Normal {
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            input: None,
            output: None,
        }
    }

    /// Shell launch on the default streams
    pub fn shell() -> Self {
        LaunchMode::Shell {
            input: None,
            output: None,
        }
    }

    pub fn is_shell(&self) -> bool {
        matches!(self, LaunchMode::Shell { .. })
    }
}

/// Serializable snapshot of a process image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub binary: String,
    pub basename: String,
    pub shell: bool,
    pub entry: u32,
    pub stack_base: u32,
    pub stack_end: u32,
    pub stack_pointer: u32,
    pub arg_text: Option<String>,
    pub cli_addr: u32,
    pub task_addr: u32,
    pub current_input: Option<CompensatedAddress>,
    pub current_output: Option<CompensatedAddress>,
}

/// One guest program's process image
#[derive(Debug)]
pub struct Process {
    bin_file: String,
    bin_basename: String,
    shell: bool,
    binary: Option<LoadedBinary>,
    stack: Option<Stack>,
    args: Option<ArgBuffer>,
    cli: Option<CliBlock>,
    task: Option<TaskBlock>,
}

impl Process {
    /// Load `bin_file` and build its process image.
    ///
    /// `stack_size` is in bytes and is expected to be a multiple of 4
    /// larger than 8; `LaunchConfig::validate` checks that, this does not.
    pub fn construct(
        ctx: &mut Context,
        bin_file: &str,
        mode: LaunchMode,
        stack_size: u32,
        exit_addr: u32,
    ) -> ProcResult<Process> {
        let shell = mode.is_shell();
        let (argv, input, output) = match mode {
            LaunchMode::Normal {
                args,
                input,
                output,
            } => (Some(args), input, output),
            LaunchMode::Shell { input, output } => (None, input, output),
        };
        let input = input
            .or(ctx.streams.default_input())
            .ok_or(ProcError::MissingStream("input"))?;
        let output = output
            .or(ctx.streams.default_output())
            .ok_or(ProcError::MissingStream("output"))?;

        let binary = binary::load(ctx, bin_file, shell)?;

        let mut proc = Process {
            bin_file: bin_file.to_string(),
            bin_basename: ctx.paths.ami_name_of_path(bin_file),
            shell,
            binary: Some(binary),
            stack: None,
            args: None,
            cli: None,
            task: None,
        };

        if let Err(e) = proc.build(ctx, argv.as_deref(), stack_size, exit_addr, input, output) {
            ctx_log!(ctx, "[proc] {}: construction failed: {}", proc, e);
            if let Err(free_err) = proc.free(ctx) {
                ctx_log!(ctx, "[proc] {}: cleanup failed: {}", proc, free_err);
            }
            return Err(e);
        }
        Ok(proc)
    }

    /// Construct from a launch config with the registry's default streams
    pub fn launch(ctx: &mut Context, config: &LaunchConfig) -> ProcResult<Process> {
        Self::construct(
            ctx,
            &config.binary,
            config.launch_mode(),
            config.stack_size,
            config.exit_addr,
        )
    }

    fn build(
        &mut self,
        ctx: &mut Context,
        argv: Option<&[String]>,
        stack_size: u32,
        exit_addr: u32,
        input: Stream,
        output: Stream,
    ) -> ProcResult<()> {
        let name = self.bin_basename.clone();
        let stack = self.stack.insert(stack::build(ctx, &name, stack_size, exit_addr)?);
        let stack = stack.clone();

        let cli = match argv {
            Some(argv) => {
                self.args = Some(args::build(ctx, &name, argv)?);
                cli::build(ctx, &name, &self.bin_file, stack_size, input, output)?
            }
            None => cli::build_empty(ctx, &name)?,
        };
        let cli_addr = self.cli.insert(cli).addr();

        self.task = Some(task::build(ctx, &name, cli_addr, &stack, input, output)?);

        // primed last: a rolled back image must not leave input queued
        if let Some(argv) = &self.args {
            args::prime(ctx, argv, input);
        }
        Ok(())
    }

    /// Tear the image down in reverse construction order. Calling it
    /// again is a no-op. Every part is released even if one fails; the
    /// first failure is reported.
    pub fn free(&mut self, ctx: &mut Context) -> ProcResult<()> {
        let mut first_err: Option<ProcError> = None;
        let mut note = |r: ProcResult<()>| {
            if let Err(e) = r
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        };

        if let Some(t) = self.task.take() {
            note(task::free(ctx, &t));
        }
        if let Some(c) = self.cli.take() {
            note(cli::free(ctx, &c));
        }
        if let Some(a) = self.args.take() {
            note(args::free(ctx, &a));
        }
        if let Some(s) = self.stack.take() {
            note(stack::free(ctx, &s));
        }
        if let Some(b) = self.binary.take() {
            note(binary::unload(ctx, &b));
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub fn is_freed(&self) -> bool {
        self.binary.is_none()
    }

    pub fn bin_file(&self) -> &str {
        &self.bin_file
    }

    pub fn bin_basename(&self) -> &str {
        &self.bin_basename
    }

    pub fn is_shell(&self) -> bool {
        self.shell
    }

    pub fn seg_list(&self) -> Option<&SegList> {
        self.binary.as_ref().map(|b| &b.seg_list)
    }

    /// Where the CPU starts executing
    pub fn entry_address(&self) -> Option<u32> {
        self.binary.as_ref().map(|b| b.entry)
    }

    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    /// Initial stack pointer (stack end - 8)
    pub fn stack_pointer(&self) -> Option<u32> {
        self.stack.as_ref().map(|s| s.initial_sp)
    }

    /// The quoted argument line; None for shell launches
    pub fn arg_text(&self) -> Option<&str> {
        self.args.as_ref().map(|a| a.text.as_str())
    }

    pub fn arg_buffer(&self) -> Option<&ArgBuffer> {
        self.args.as_ref()
    }

    /// Address of the CLI block, 0 once freed
    pub fn cli_address(&self) -> u32 {
        self.cli.as_ref().map(|c| c.addr()).unwrap_or(0)
    }

    pub fn cli_block(&self) -> Option<&CliBlock> {
        self.cli.as_ref()
    }

    /// Address of the Process block, 0 once freed
    pub fn task_address(&self) -> u32 {
        self.task.as_ref().map(|t| t.addr()).unwrap_or(0)
    }

    pub fn task_block(&self) -> Option<&TaskBlock> {
        self.task.as_ref()
    }

    fn live_task(&self) -> Result<&TaskBlock, LookupError> {
        self.task.as_ref().ok_or(LookupError::Freed)
    }

    pub fn current_input(&self, ctx: &Context) -> Result<Stream, LookupError> {
        self.live_task()?.current_input(ctx)
    }

    pub fn current_output(&self, ctx: &Context) -> Result<Stream, LookupError> {
        self.live_task()?.current_output(ctx)
    }

    pub fn set_current_input(&self, ctx: &mut Context, stream: Stream) -> Result<(), LookupError> {
        self.live_task()?.set_current_input(ctx, stream)
    }

    pub fn set_current_output(&self, ctx: &mut Context, stream: Stream) -> Result<(), LookupError> {
        self.live_task()?.set_current_output(ctx, stream)
    }

    pub fn info(&self, ctx: &Context) -> ProcessInfo {
        let stack = self.stack.as_ref();
        let task = self.task.as_ref();
        ProcessInfo {
            binary: self.bin_file.clone(),
            basename: self.bin_basename.clone(),
            shell: self.shell,
            entry: self.entry_address().unwrap_or(0),
            stack_base: stack.map(|s| s.base).unwrap_or(0),
            stack_end: stack.map(|s| s.end).unwrap_or(0),
            stack_pointer: stack.map(|s| s.initial_sp).unwrap_or(0),
            arg_text: self.arg_text().map(str::to_string),
            cli_addr: self.cli_address(),
            task_addr: self.task_address(),
            current_input: task.and_then(|t| t.raw_input(&ctx.mem).ok()),
            current_output: task.and_then(|t| t.raw_output(&ctx.mem).ok()),
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[bin='{}']", self.bin_file)
    }
}
