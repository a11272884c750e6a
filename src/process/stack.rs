//! Guest call stack
//!
//! The top two longs of the stack are reserved before the program runs:
//!
//! ```text
//! end - 4: stack size in bytes
//! end - 8: return address (where the program goes when it exits)
//! ```
//!
//! The program starts with SP = end - 8, so a final RTS lands on the
//! exit address.

use super::error::ProcResult;
use crate::ctx_log;
use crate::machine::{AllocError, Context, MemoryHandle};

#[derive(Debug, Clone)]
pub struct Stack {
    pub mem: MemoryHandle,
    pub base: u32,
    pub end: u32,
    pub size: u32,
    pub exit_addr: u32,
    /// Initial stack pointer
    pub initial_sp: u32,
}

/// Allocate the stack and write its top sentinels.
///
/// `size` is expected to be a multiple of 4 larger than 8; only sizes too
/// small to hold both sentinels are refused.
pub fn build(ctx: &mut Context, basename: &str, size: u32, exit_addr: u32) -> ProcResult<Stack> {
    if size < 8 {
        return Err(AllocError::InvalidSize.into());
    }
    let mem = ctx
        .alloc
        .alloc_memory(&mut ctx.mem, &format!("{}_stack", basename), size)?;
    let base = mem.addr;
    let end = base + size;
    ctx_log!(ctx, "[proc] stack: base={:06x} end={:06x}", base, end);
    ctx_log!(ctx, "[proc] {}", mem);

    let stack = Stack {
        mem,
        base,
        end,
        size,
        exit_addr,
        initial_sp: end - 8,
    };
    if let Err(e) = write_sentinels(ctx, &stack) {
        if let Err(free_err) = ctx.alloc.free_memory(&stack.mem) {
            ctx_log!(ctx, "[proc] {}: cleanup failed: {}", stack.mem, free_err);
        }
        return Err(e);
    }
    Ok(stack)
}

fn write_sentinels(ctx: &mut Context, stack: &Stack) -> ProcResult<()> {
    ctx.mem.w32(stack.end - 4, stack.size)?;
    ctx.mem.w32(stack.end - 8, stack.exit_addr)?;
    Ok(())
}

pub fn free(ctx: &mut Context, stack: &Stack) -> ProcResult<()> {
    ctx.alloc.free_memory(&stack.mem)?;
    Ok(())
}
