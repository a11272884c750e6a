//! Argument line
//!
//! Guest programs read their arguments the way the shell hands them over:
//! as one text line waiting in the input stream. The argument vector is
//! quoted in the shell's dialect, joined with spaces and terminated with
//! a newline. The same text is also copied into guest memory as a C
//! string.
//!
//! Quoting: an argument that is empty or contains a space is wrapped in
//! double quotes, and inside the quotes `*` becomes `**`, ESC becomes
//! `*e`, newline becomes `*n` and `"` becomes `*"`.

use super::error::ProcResult;
use crate::ctx_log;
use crate::machine::memory::latin1_bytes;
use crate::machine::{Context, MemoryHandle, Stream};
use std::borrow::Cow;

const ESC: char = '\x1b';

/// Quote a single argument for the guest shell
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if !arg.is_empty() && !arg.contains(' ') {
        return Cow::Borrowed(arg);
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    // `*` is the escape character itself, so it must be doubled before
    // any of the other escapes are introduced
    let escaped = arg
        .replace('*', "**")
        .replace(ESC, "*e")
        .replace('\n', "*n")
        .replace('"', "*\"");
    out.push_str(&escaped);
    out.push('"');
    Cow::Owned(out)
}

/// The full argument line, newline terminated
pub fn arg_line<S: AsRef<str>>(args: &[S]) -> String {
    let mut text = args
        .iter()
        .map(|a| quote_arg(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ");
    text.push('\n');
    text
}

/// The argument line as stored in guest memory
#[derive(Debug, Clone)]
pub struct ArgBuffer {
    pub mem: MemoryHandle,
    pub text: String,
}

impl ArgBuffer {
    pub fn addr(&self) -> u32 {
        self.mem.addr
    }

    /// Buffer size: text plus NUL terminator
    pub fn size(&self) -> u32 {
        self.mem.size
    }
}

/// Build the argument line and copy it into guest memory.
///
/// The input stream is left alone here; `prime` hands it the line once
/// the rest of the image exists.
pub fn build(ctx: &mut Context, basename: &str, args: &[String]) -> ProcResult<ArgBuffer> {
    let text = arg_line(args);
    let size = latin1_bytes(&text).len() as u32 + 1;
    let mem = ctx
        .alloc
        .alloc_memory(&mut ctx.mem, &format!("{}_args", basename), size)?;
    if let Err(e) = ctx.mem.w_cstr(mem.addr, &text) {
        if let Err(free_err) = ctx.alloc.free_memory(&mem) {
            ctx_log!(ctx, "[proc] {}: cleanup failed: {}", mem, free_err);
        }
        return Err(e.into());
    }

    ctx_log!(ctx, "[proc] args: '{}' ({})", &text[..text.len() - 1], size);
    ctx_log!(ctx, "[proc] {}", mem);
    Ok(ArgBuffer { mem, text })
}

/// Queue the argument line as pending input on `input`
pub fn prime(ctx: &mut Context, args: &ArgBuffer, input: Stream) {
    ctx.streams.set_buffer(input, &args.text);
}

pub fn free(ctx: &mut Context, args: &ArgBuffer) -> ProcResult<()> {
    ctx.alloc.free_memory(&args.mem)?;
    Ok(())
}
