//! Guest struct layouts
//!
//! Each guest ABI structure is described once as a static table of
//! (field name, byte offset, type). Builders never do offset arithmetic
//! themselves: they allocate a struct through the allocator and read or
//! write fields by dotted path, e.g. `pr_Task.tc_Node.ln_Type`.
//!
//! Offsets and sizes follow the AmigaOS 68k ABI (big-endian, word aligned).
//! BPTR/BSTR fields are stored raw; callers decide what goes in them.

use super::alloc::RegionId;
use super::memory::{Memory, MemoryError};
use std::fmt;

/// Node type tag for a DOS process
pub const NT_PROCESS: u8 = 13;

/// Type of a single struct field
#[derive(Debug, Clone, Copy)]
pub enum FieldType {
    Byte,
    Word,
    Long,
    /// Machine pointer (APTR)
    Ptr,
    /// BCPL pointer (address >> 2)
    Bptr,
    /// BCPL pointer to a BCPL string
    Bstr,
    /// Embedded struct
    Struct(&'static StructDef),
}

impl FieldType {
    /// Width in bytes for scalar fields, None for embedded structs
    pub fn width(&self) -> Option<u32> {
        match self {
            FieldType::Byte => Some(1),
            FieldType::Word => Some(2),
            FieldType::Long | FieldType::Ptr | FieldType::Bptr | FieldType::Bstr => Some(4),
            FieldType::Struct(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    pub offset: u32,
    pub ty: FieldType,
}

const fn field(name: &'static str, offset: u32, ty: FieldType) -> Field {
    Field { name, offset, ty }
}

/// Layout of one guest structure
#[derive(Debug)]
pub struct StructDef {
    pub name: &'static str,
    pub size: u32,
    pub fields: &'static [Field],
}

/// A resolved scalar field: absolute offset from the struct start and width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: u32,
    pub width: u32,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a dotted path down to a scalar field
    pub fn resolve(&'static self, path: &str) -> Result<FieldRef, StructError> {
        let mut def: &'static StructDef = self;
        let mut offset = 0;
        let mut parts = path.split('.').peekable();

        while let Some(part) = parts.next() {
            let f = def.field(part).ok_or_else(|| StructError::UnknownField {
                strukt: self.name,
                path: path.to_string(),
            })?;
            offset += f.offset;
            match (f.ty, parts.peek()) {
                (FieldType::Struct(inner), Some(_)) => def = inner,
                (FieldType::Struct(_), None) => {
                    return Err(StructError::NotScalar {
                        strukt: self.name,
                        path: path.to_string(),
                    });
                }
                (ty, None) => {
                    // width() is Some for every non-struct type
                    let width = ty.width().unwrap_or(4);
                    return Ok(FieldRef { offset, width });
                }
                (_, Some(_)) => break,
            }
        }

        Err(StructError::UnknownField {
            strukt: self.name,
            path: path.to_string(),
        })
    }
}

/// Errors from field-path access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructError {
    /// No such field in the layout
    UnknownField { strukt: &'static str, path: String },
    /// Path names an embedded struct, not a scalar
    NotScalar { strukt: &'static str, path: String },
    /// The underlying memory access failed
    Memory(MemoryError),
}

impl fmt::Display for StructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { strukt, path } => {
                write!(f, "struct {} has no field '{}'", strukt, path)
            }
            Self::NotScalar { strukt, path } => {
                write!(f, "field '{}' of struct {} is not a scalar", path, strukt)
            }
            Self::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StructError {}

impl From<MemoryError> for StructError {
    fn from(e: MemoryError) -> Self {
        StructError::Memory(e)
    }
}

/// An allocated guest struct
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructHandle {
    pub region: RegionId,
    pub addr: u32,
    pub def: &'static StructDef,
    pub label: String,
}

impl PartialEq for StructDef {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for StructDef {}

impl StructHandle {
    pub fn size(&self) -> u32 {
        self.def.size
    }

    /// BCPL address of the struct
    pub fn b_addr(&self) -> u32 {
        self.addr >> 2
    }

    pub fn field_addr(&self, path: &str) -> Result<u32, StructError> {
        Ok(self.addr + self.def.resolve(path)?.offset)
    }

    pub fn read(&self, mem: &Memory, path: &str) -> Result<u32, StructError> {
        let f = self.def.resolve(path)?;
        let addr = self.addr + f.offset;
        let value = match f.width {
            1 => mem.r8(addr)? as u32,
            2 => mem.r16(addr)? as u32,
            _ => mem.r32(addr)?,
        };
        Ok(value)
    }

    /// Write a field; values wider than the field are truncated
    pub fn write(&self, mem: &mut Memory, path: &str, value: u32) -> Result<(), StructError> {
        let f = self.def.resolve(path)?;
        let addr = self.addr + f.offset;
        match f.width {
            1 => mem.w8(addr, value as u8)?,
            2 => mem.w16(addr, value as u16)?,
            _ => mem.w32(addr, value)?,
        }
        Ok(())
    }
}

impl fmt::Display for StructHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Struct:{}]({:06x}, {:06x}, #{}, '{}')",
            self.def.name,
            self.addr,
            self.addr + self.def.size,
            self.def.size,
            self.label
        )
    }
}

// ============================================================================
// exec structures
// ============================================================================

pub static NODE_DEF: StructDef = StructDef {
    name: "Node",
    size: 14,
    fields: &[
        field("ln_Succ", 0, FieldType::Ptr),
        field("ln_Pred", 4, FieldType::Ptr),
        field("ln_Type", 8, FieldType::Byte),
        field("ln_Pri", 9, FieldType::Byte),
        field("ln_Name", 10, FieldType::Ptr),
    ],
};

pub static LIST_DEF: StructDef = StructDef {
    name: "List",
    size: 14,
    fields: &[
        field("lh_Head", 0, FieldType::Ptr),
        field("lh_Tail", 4, FieldType::Ptr),
        field("lh_TailPred", 8, FieldType::Ptr),
        field("lh_Type", 12, FieldType::Byte),
        field("l_pad", 13, FieldType::Byte),
    ],
};

pub static MIN_LIST_DEF: StructDef = StructDef {
    name: "MinList",
    size: 12,
    fields: &[
        field("mlh_Head", 0, FieldType::Ptr),
        field("mlh_Tail", 4, FieldType::Ptr),
        field("mlh_TailPred", 8, FieldType::Ptr),
    ],
};

pub static TASK_DEF: StructDef = StructDef {
    name: "Task",
    size: 92,
    fields: &[
        field("tc_Node", 0, FieldType::Struct(&NODE_DEF)),
        field("tc_Flags", 14, FieldType::Byte),
        field("tc_State", 15, FieldType::Byte),
        field("tc_IDNestCnt", 16, FieldType::Byte),
        field("tc_TDNestCnt", 17, FieldType::Byte),
        field("tc_SigAlloc", 18, FieldType::Long),
        field("tc_SigWait", 22, FieldType::Long),
        field("tc_SigRecvd", 26, FieldType::Long),
        field("tc_SigExcept", 30, FieldType::Long),
        field("tc_TrapAlloc", 34, FieldType::Word),
        field("tc_TrapAble", 36, FieldType::Word),
        field("tc_ExceptData", 38, FieldType::Ptr),
        field("tc_ExceptCode", 42, FieldType::Ptr),
        field("tc_TrapData", 46, FieldType::Ptr),
        field("tc_TrapCode", 50, FieldType::Ptr),
        field("tc_SPReg", 54, FieldType::Ptr),
        field("tc_SPLower", 58, FieldType::Ptr),
        field("tc_SPUpper", 62, FieldType::Ptr),
        field("tc_Switch", 66, FieldType::Ptr),
        field("tc_Launch", 70, FieldType::Ptr),
        field("tc_MemEntry", 74, FieldType::Struct(&LIST_DEF)),
        field("tc_UserData", 88, FieldType::Ptr),
    ],
};

pub static MSG_PORT_DEF: StructDef = StructDef {
    name: "MsgPort",
    size: 34,
    fields: &[
        field("mp_Node", 0, FieldType::Struct(&NODE_DEF)),
        field("mp_Flags", 14, FieldType::Byte),
        field("mp_SigBit", 15, FieldType::Byte),
        field("mp_SigTask", 16, FieldType::Ptr),
        field("mp_MsgList", 20, FieldType::Struct(&LIST_DEF)),
    ],
};

// ============================================================================
// dos structures
// ============================================================================

pub static PROCESS_DEF: StructDef = StructDef {
    name: "Process",
    size: 228,
    fields: &[
        field("pr_Task", 0, FieldType::Struct(&TASK_DEF)),
        field("pr_MsgPort", 92, FieldType::Struct(&MSG_PORT_DEF)),
        field("pr_Pad", 126, FieldType::Word),
        field("pr_SegList", 128, FieldType::Bptr),
        field("pr_StackSize", 132, FieldType::Long),
        field("pr_GlobVec", 136, FieldType::Ptr),
        field("pr_TaskNum", 140, FieldType::Long),
        field("pr_StackBase", 144, FieldType::Bptr),
        field("pr_Result2", 148, FieldType::Long),
        field("pr_CurrentDir", 152, FieldType::Bptr),
        field("pr_CIS", 156, FieldType::Bptr),
        field("pr_COS", 160, FieldType::Bptr),
        field("pr_ConsoleTask", 164, FieldType::Ptr),
        field("pr_FileSystemTask", 168, FieldType::Ptr),
        field("pr_CLI", 172, FieldType::Bptr),
        field("pr_ReturnAddr", 176, FieldType::Ptr),
        field("pr_PktWait", 180, FieldType::Ptr),
        field("pr_WindowPtr", 184, FieldType::Ptr),
        field("pr_HomeDir", 188, FieldType::Bptr),
        field("pr_Flags", 192, FieldType::Long),
        field("pr_ExitCode", 196, FieldType::Ptr),
        field("pr_ExitData", 200, FieldType::Long),
        field("pr_Arguments", 204, FieldType::Ptr),
        field("pr_LocalVars", 208, FieldType::Struct(&MIN_LIST_DEF)),
        field("pr_ShellPrivate", 220, FieldType::Long),
        field("pr_CES", 224, FieldType::Bptr),
    ],
};

pub static CLI_DEF: StructDef = StructDef {
    name: "CommandLineInterface",
    size: 64,
    fields: &[
        field("cli_Result2", 0, FieldType::Long),
        field("cli_SetName", 4, FieldType::Bstr),
        field("cli_CommandDir", 8, FieldType::Bptr),
        field("cli_ReturnCode", 12, FieldType::Long),
        field("cli_CommandName", 16, FieldType::Bstr),
        field("cli_FailLevel", 20, FieldType::Long),
        field("cli_Prompt", 24, FieldType::Bstr),
        field("cli_StandardInput", 28, FieldType::Bptr),
        field("cli_CurrentInput", 32, FieldType::Bptr),
        field("cli_CommandFile", 36, FieldType::Bstr),
        field("cli_Interactive", 40, FieldType::Long),
        field("cli_Background", 44, FieldType::Long),
        field("cli_CurrentOutput", 48, FieldType::Bptr),
        field("cli_DefaultStack", 52, FieldType::Long),
        field("cli_StandardOutput", 56, FieldType::Bptr),
        field("cli_Module", 60, FieldType::Bptr),
    ],
};

pub static FILE_HANDLE_DEF: StructDef = StructDef {
    name: "FileHandle",
    size: 44,
    fields: &[
        field("fh_Link", 0, FieldType::Ptr),
        field("fh_Interactive", 4, FieldType::Long),
        field("fh_Type", 8, FieldType::Ptr),
        field("fh_Buf", 12, FieldType::Bptr),
        field("fh_Pos", 16, FieldType::Long),
        field("fh_End", 20, FieldType::Long),
        field("fh_Func1", 24, FieldType::Long),
        field("fh_Func2", 28, FieldType::Long),
        field("fh_Func3", 32, FieldType::Long),
        field("fh_Arg1", 36, FieldType::Long),
        field("fh_Arg2", 40, FieldType::Long),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Every field must fit inside its struct and fields must not overlap
    fn check_layout(def: &'static StructDef) {
        let mut end = 0;
        for f in def.fields {
            assert!(f.offset >= end, "{}.{} overlaps", def.name, f.name);
            let width = match f.ty {
                FieldType::Struct(inner) => inner.size,
                ty => ty.width().unwrap(),
            };
            end = f.offset + width;
        }
        assert_eq!(end, def.size, "{} size mismatch", def.name);
    }

    #[test]
    fn test_layout_sizes() {
        for def in [
            &NODE_DEF,
            &LIST_DEF,
            &MIN_LIST_DEF,
            &TASK_DEF,
            &MSG_PORT_DEF,
            &PROCESS_DEF,
            &CLI_DEF,
            &FILE_HANDLE_DEF,
        ] {
            check_layout(def);
        }
    }

    #[test]
    fn test_resolve_nested() {
        let f = PROCESS_DEF.resolve("pr_Task.tc_Node.ln_Type").unwrap();
        assert_eq!(f, FieldRef { offset: 8, width: 1 });

        let f = PROCESS_DEF.resolve("pr_MsgPort.mp_SigBit").unwrap();
        assert_eq!(f, FieldRef { offset: 107, width: 1 });

        let f = PROCESS_DEF.resolve("pr_CIS").unwrap();
        assert_eq!(f, FieldRef { offset: 156, width: 4 });

        let f = CLI_DEF.resolve("cli_DefaultStack").unwrap();
        assert_eq!(f, FieldRef { offset: 52, width: 4 });
    }

    #[test]
    fn test_resolve_errors() {
        assert!(matches!(
            PROCESS_DEF.resolve("pr_Nope"),
            Err(StructError::UnknownField { .. })
        ));
        assert!(matches!(
            PROCESS_DEF.resolve("pr_Task"),
            Err(StructError::NotScalar { .. })
        ));
        assert!(matches!(
            PROCESS_DEF.resolve("pr_CIS.foo"),
            Err(StructError::UnknownField { .. })
        ));
        assert!(matches!(
            PROCESS_DEF.resolve("pr_Task.tc_Node.ln_Bogus"),
            Err(StructError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_handle_read_write() {
        let mut mem = Memory::new(0x400);
        let handle = StructHandle {
            region: RegionId(0),
            addr: 0x100,
            def: &PROCESS_DEF,
            label: "test".to_string(),
        };
        handle
            .write(&mut mem, "pr_Task.tc_Node.ln_Type", NT_PROCESS as u32)
            .unwrap();
        handle.write(&mut mem, "pr_CLI", 0xdead_beef).unwrap();
        assert_eq!(mem.r8(0x108).unwrap(), NT_PROCESS);
        assert_eq!(mem.r32(0x100 + 172).unwrap(), 0xdead_beef);
        assert_eq!(handle.read(&mem, "pr_CLI").unwrap(), 0xdead_beef);
        assert_eq!(handle.b_addr(), 0x40);
    }
}
