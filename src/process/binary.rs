//! Binary loading for a process

use super::error::{ProcError, ProcResult};
use crate::ctx_log;
use crate::machine::{Context, SegList};

/// The shell's seglist uses BCPL linkage; its BCPL call-in sits 8 bytes
/// past the start of the first segment.
pub const SHELL_ENTRY_OFFSET: u32 = 8;

/// A binary loaded for one process
#[derive(Debug, Clone)]
pub struct LoadedBinary {
    pub seg_list: SegList,
    /// Address the CPU starts executing at
    pub entry: u32,
}

/// Map the guest path, load the segments and record the entry point.
/// Nothing is left allocated on failure.
pub fn load(ctx: &mut Context, bin_file: &str, shell: bool) -> ProcResult<LoadedBinary> {
    let host_path = ctx.paths.ami_to_sys_path(bin_file).map_err(|e| {
        ctx_log!(ctx, "[proc] failed loading binary: {}", e);
        ProcError::LoadFailure(e.to_string())
    })?;

    let seg_list = match ctx
        .loader
        .load_seg(&mut ctx.mem, &mut ctx.alloc, bin_file, &host_path)
    {
        Ok(seg_list) => seg_list,
        Err(e) => {
            ctx_log!(ctx, "[proc] failed loading binary: {}", e);
            return Err(ProcError::LoadFailure(e.to_string()));
        }
    };

    let mut entry = seg_list.prog_start;
    if shell {
        entry += SHELL_ENTRY_OFFSET;
    }

    ctx_log!(ctx, "[proc] loaded binary: {} entry={:06x}", seg_list, entry);
    for seg in &seg_list.segments {
        ctx_log!(ctx, "[proc]   {}", seg);
    }

    Ok(LoadedBinary { seg_list, entry })
}

pub fn unload(ctx: &mut Context, binary: &LoadedBinary) -> ProcResult<()> {
    ctx.loader.unload_seg(&mut ctx.alloc, &binary.seg_list)?;
    Ok(())
}
