//! Process (task) block
//!
//! The DOS Process struct the guest finds via FindTask(NULL). Besides the
//! node type tag and stack bounds it links the CLI block and holds the
//! current input/output streams as compensated addresses. Those two
//! fields are the only ones that change after construction.

use super::baddr::CompensatedAddress;
use super::error::{LookupError, ProcResult};
use super::stack::Stack;
use crate::ctx_log;
use crate::machine::layout::{NT_PROCESS, PROCESS_DEF};
use crate::machine::{Context, Memory, Stream, StreamRegistry, StructHandle};

const CIS: &str = "pr_CIS";
const COS: &str = "pr_COS";

#[derive(Debug, Clone)]
pub struct TaskBlock {
    pub block: StructHandle,
}

impl TaskBlock {
    pub fn addr(&self) -> u32 {
        self.block.addr
    }

    fn read_stream(
        &self,
        mem: &Memory,
        streams: &StreamRegistry,
        field: &str,
    ) -> Result<Stream, LookupError> {
        let stored = CompensatedAddress::from_raw(self.block.read(mem, field)?);
        let b_addr = stored.decode();
        streams
            .get_by_b_addr(b_addr)
            .ok_or(LookupError::NoStream { b_addr })
    }

    fn write_stream(&self, mem: &mut Memory, field: &str, stream: Stream) -> Result<(), LookupError> {
        let value = CompensatedAddress::encode(stream.b_addr);
        self.block.write(mem, field, value.raw())?;
        Ok(())
    }

    /// Raw compensated value of the current input field
    pub fn raw_input(&self, mem: &Memory) -> Result<CompensatedAddress, LookupError> {
        Ok(CompensatedAddress::from_raw(self.block.read(mem, CIS)?))
    }

    /// Raw compensated value of the current output field
    pub fn raw_output(&self, mem: &Memory) -> Result<CompensatedAddress, LookupError> {
        Ok(CompensatedAddress::from_raw(self.block.read(mem, COS)?))
    }

    pub fn current_input(&self, ctx: &Context) -> Result<Stream, LookupError> {
        self.read_stream(&ctx.mem, &ctx.streams, CIS)
    }

    pub fn current_output(&self, ctx: &Context) -> Result<Stream, LookupError> {
        self.read_stream(&ctx.mem, &ctx.streams, COS)
    }

    /// The stream is not checked for being open
    pub fn set_current_input(&self, ctx: &mut Context, stream: Stream) -> Result<(), LookupError> {
        self.write_stream(&mut ctx.mem, CIS, stream)
    }

    pub fn set_current_output(&self, ctx: &mut Context, stream: Stream) -> Result<(), LookupError> {
        self.write_stream(&mut ctx.mem, COS, stream)
    }
}

/// Allocate and fill the Process block
pub fn build(
    ctx: &mut Context,
    basename: &str,
    cli_addr: u32,
    stack: &Stack,
    input: Stream,
    output: Stream,
) -> ProcResult<TaskBlock> {
    let block = ctx
        .alloc
        .alloc_struct(&mut ctx.mem, &format!("{}_ThisTask", basename), &PROCESS_DEF)?;
    let task = TaskBlock { block };

    if let Err(e) = populate(&mut ctx.mem, &task, cli_addr, stack, input, output) {
        if let Err(free_err) = ctx.alloc.free_struct(&task.block) {
            ctx_log!(ctx, "[proc] {}: cleanup failed: {}", task.block, free_err);
        }
        return Err(e);
    }
    ctx_log!(ctx, "[proc] {}", task.block);
    Ok(task)
}

fn populate(
    mem: &mut Memory,
    task: &TaskBlock,
    cli_addr: u32,
    stack: &Stack,
    input: Stream,
    output: Stream,
) -> ProcResult<()> {
    let b = &task.block;
    b.write(mem, "pr_Task.tc_Node.ln_Type", NT_PROCESS as u32)?;
    b.write(mem, "pr_Task.tc_SPLower", stack.base)?;
    b.write(mem, "pr_Task.tc_SPUpper", stack.end)?;
    b.write(mem, "pr_Task.tc_SPReg", stack.initial_sp)?;
    b.write(mem, "pr_StackSize", stack.size)?;
    b.write(mem, "pr_CLI", cli_addr)?;
    b.write(mem, CIS, CompensatedAddress::encode(input.b_addr).raw())?;
    b.write(mem, COS, CompensatedAddress::encode(output.b_addr).raw())?;
    Ok(())
}

pub fn free(ctx: &mut Context, task: &TaskBlock) -> ProcResult<()> {
    ctx.alloc.free_struct(&task.block)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::process::stack;

    fn setup() -> (Context, Stack, TaskBlock) {
        let mut ctx = Context::new(&MachineConfig::default().quiet()).unwrap();
        let input = ctx.streams.default_input().unwrap();
        let output = ctx.streams.default_output().unwrap();
        let stack = stack::build(&mut ctx, "t", 4096, 0).unwrap();
        let task = build(&mut ctx, "t", 0x2000, &stack, input, output).unwrap();
        (ctx, stack, task)
    }

    #[test]
    fn test_fields() {
        let (ctx, stack, task) = setup();
        let b = &task.block;
        assert_eq!(b.read(&ctx.mem, "pr_Task.tc_Node.ln_Type").unwrap(), 13);
        assert_eq!(b.read(&ctx.mem, "pr_CLI").unwrap(), 0x2000);
        assert_eq!(b.read(&ctx.mem, "pr_StackSize").unwrap(), 4096);
        assert_eq!(b.read(&ctx.mem, "pr_Task.tc_SPUpper").unwrap(), stack.end);
        assert_eq!(b.read(&ctx.mem, "pr_Task.tc_SPReg").unwrap(), stack.end - 8);
    }

    #[test]
    fn test_compensated_storage() {
        let (ctx, _, task) = setup();
        let input = ctx.streams.default_input().unwrap();
        let output = ctx.streams.default_output().unwrap();
        assert_eq!(task.raw_input(&ctx.mem).unwrap().raw(), input.b_addr * 4);
        assert_eq!(task.raw_output(&ctx.mem).unwrap().raw(), output.b_addr * 4);
        assert_eq!(task.current_input(&ctx).unwrap(), input);
        assert_eq!(task.current_output(&ctx).unwrap(), output);
    }

    #[test]
    fn test_redirect() {
        let (mut ctx, _, task) = setup();
        let file = ctx.open_stream("ram:log").unwrap();
        task.set_current_output(&mut ctx, file).unwrap();
        assert_eq!(task.current_output(&ctx).unwrap(), file);
        assert_eq!(task.raw_output(&ctx.mem).unwrap().raw(), file.b_addr * 4);
    }

    #[test]
    fn test_lookup_failure_keeps_field() {
        let (mut ctx, _, task) = setup();
        let file = ctx.open_stream("ram:gone").unwrap();
        task.set_current_input(&mut ctx, file).unwrap();
        ctx.close_stream(file).unwrap();

        let err = task.current_input(&ctx).unwrap_err();
        assert_eq!(err, LookupError::NoStream { b_addr: file.b_addr });
        // the stored value is untouched
        assert_eq!(task.raw_input(&ctx.mem).unwrap().decode(), file.b_addr);
    }
}
