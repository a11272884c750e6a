//! CLI block
//!
//! The CommandLineInterface struct tells dos.library routines which
//! command is running, how big its stack is and where its standard and
//! current streams are. A shell builds its own CLI later through a
//! private dos.library call, so for a shell launch the block is only
//! allocated, never filled in.

use super::error::ProcResult;
use crate::ctx_log;
use crate::machine::layout::CLI_DEF;
use crate::machine::{BStrHandle, Context, Stream, StructHandle};

#[derive(Debug, Clone)]
pub struct CliBlock {
    pub block: StructHandle,
    /// Command name string; None for an unpopulated (shell) block
    pub cmd: Option<BStrHandle>,
}

impl CliBlock {
    pub fn addr(&self) -> u32 {
        self.block.addr
    }
}

/// Allocate and populate the CLI block for a normal launch.
///
/// `stack_size` is in bytes and must be a multiple of 4; the block
/// stores it in longs.
pub fn build(
    ctx: &mut Context,
    basename: &str,
    bin_file: &str,
    stack_size: u32,
    input: Stream,
    output: Stream,
) -> ProcResult<CliBlock> {
    let block = ctx
        .alloc
        .alloc_struct(&mut ctx.mem, &format!("{}_CLI", basename), &CLI_DEF)?;
    let cmd = match ctx
        .alloc
        .alloc_bstr(&mut ctx.mem, &format!("{}_cmd", basename), bin_file)
    {
        Ok(cmd) => cmd,
        Err(e) => {
            if let Err(free_err) = ctx.alloc.free_struct(&block) {
                ctx_log!(ctx, "[proc] {}: cleanup failed: {}", block, free_err);
            }
            return Err(e.into());
        }
    };
    ctx_log!(ctx, "[proc] {}", cmd);

    let cli = CliBlock {
        block,
        cmd: Some(cmd),
    };
    if let Err(e) = populate(ctx, &cli, stack_size, input, output) {
        if let Err(free_err) = free(ctx, &cli) {
            ctx_log!(ctx, "[proc] {}: cleanup failed: {}", cli.block, free_err);
        }
        return Err(e);
    }
    ctx_log!(ctx, "[proc] {}", cli.block);
    Ok(cli)
}

fn populate(
    ctx: &mut Context,
    cli: &CliBlock,
    stack_size: u32,
    input: Stream,
    output: Stream,
) -> ProcResult<()> {
    let mem = &mut ctx.mem;
    let block = &cli.block;
    block.write(mem, "cli_DefaultStack", stack_size / 4)?;
    if let Some(cmd) = &cli.cmd {
        block.write(mem, "cli_CommandName", cmd.addr)?;
    }
    block.write(mem, "cli_StandardInput", input.b_addr)?;
    block.write(mem, "cli_CurrentInput", input.b_addr)?;
    block.write(mem, "cli_StandardOutput", output.b_addr)?;
    block.write(mem, "cli_CurrentOutput", output.b_addr)?;
    Ok(())
}

/// Allocate an empty CLI block for a shell launch
pub fn build_empty(ctx: &mut Context, basename: &str) -> ProcResult<CliBlock> {
    let block = ctx
        .alloc
        .alloc_struct(&mut ctx.mem, &format!("{}_CLI", basename), &CLI_DEF)?;
    ctx_log!(ctx, "[proc] {} (shell initializes it)", block);
    Ok(CliBlock { block, cmd: None })
}

/// Free the command name first, then the block
pub fn free(ctx: &mut Context, cli: &CliBlock) -> ProcResult<()> {
    if let Some(cmd) = &cli.cmd {
        ctx.alloc.free_bstr(cmd)?;
    }
    ctx.alloc.free_struct(&cli.block)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::machine::AllocError;

    fn ctx() -> Context {
        Context::new(&MachineConfig::default().quiet()).unwrap()
    }

    #[test]
    fn test_populated_block() {
        let mut ctx = ctx();
        let input = ctx.streams.default_input().unwrap();
        let output = ctx.streams.default_output().unwrap();
        let cli = build(&mut ctx, "dir", "sys:c/dir", 8192, input, output).unwrap();
        let b = &cli.block;

        assert_eq!(b.read(&ctx.mem, "cli_DefaultStack").unwrap(), 2048);
        let name_addr = b.read(&ctx.mem, "cli_CommandName").unwrap();
        assert_eq!(ctx.mem.r_bstr(name_addr).unwrap(), "sys:c/dir");
        assert_eq!(b.read(&ctx.mem, "cli_StandardInput").unwrap(), input.b_addr);
        assert_eq!(b.read(&ctx.mem, "cli_CurrentInput").unwrap(), input.b_addr);
        assert_eq!(b.read(&ctx.mem, "cli_StandardOutput").unwrap(), output.b_addr);
        assert_eq!(b.read(&ctx.mem, "cli_CurrentOutput").unwrap(), output.b_addr);
    }

    #[test]
    fn test_empty_block() {
        let mut ctx = ctx();
        let cli = build_empty(&mut ctx, "shell").unwrap();
        assert!(cli.cmd.is_none());
        assert_ne!(cli.addr(), 0);
        assert_eq!(cli.block.read(&ctx.mem, "cli_CommandName").unwrap(), 0);
        assert_eq!(cli.block.read(&ctx.mem, "cli_StandardInput").unwrap(), 0);
    }

    #[test]
    fn test_long_command_name_rolls_back() {
        let mut ctx = ctx();
        let before = ctx.alloc.region_count();
        let input = ctx.streams.default_input().unwrap();
        let output = ctx.streams.default_output().unwrap();
        let bin_file = "y".repeat(256);
        let err = build(&mut ctx, "y", &bin_file, 4096, input, output).unwrap_err();
        assert_eq!(
            err,
            crate::process::ProcError::AllocationFailure(AllocError::StringTooLong(256))
        );
        assert_eq!(ctx.alloc.region_count(), before);
    }

    #[test]
    fn test_free_releases_both() {
        let mut ctx = ctx();
        let before = ctx.alloc.region_count();
        let input = ctx.streams.default_input().unwrap();
        let output = ctx.streams.default_output().unwrap();
        let cli = build(&mut ctx, "dir", "c:dir", 4096, input, output).unwrap();
        assert_eq!(ctx.alloc.region_count(), before + 2);
        free(&mut ctx, &cli).unwrap();
        assert_eq!(ctx.alloc.region_count(), before);
    }
}
