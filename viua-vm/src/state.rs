//! # Process state
//!
//! The register file, call frames, and the per-process bookkeeping the
//! executors mutate: the staged argument file built by FRAME, the stack
//! break advanced by AA, and the pointers AA hands out.

use viua_arch::{RegisterAccess, RegisterSet, Tag, Value, REGISTER_COUNT};

use crate::error::{Result, RuntimeError};

/// Upper bound on call depth; exceeding it is a stack overflow.
pub const MAX_FRAME_DEPTH: usize = 1024;

/// An ordered sequence of value slots.
#[derive(Debug, Default)]
pub struct RegisterFile {
    slots: Vec<Value>,
}

impl RegisterFile {
    pub fn new(count: usize) -> RegisterFile {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, Value::void);
        RegisterFile { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Value> {
        self.slots.get(index).ok_or(RuntimeError::RegisterOutOfRange {
            index,
            size: self.slots.len(),
        })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Value> {
        let size = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(RuntimeError::RegisterOutOfRange { index, size })
    }

    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        *self.get_mut(index)? = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.slots.iter().enumerate()
    }
}

/// One call frame.
#[derive(Debug)]
pub struct Frame {
    /// The frame's local registers.
    pub registers: RegisterFile,
    /// The argument file the caller staged, visible to this function as
    /// parameters.
    pub parameters: RegisterFile,
    /// Word index to resume the caller at; the entry frame has none.
    pub return_address: Option<u64>,
    /// Caller register that receives the value passed to RETURN.
    pub result: RegisterAccess,
    /// Stack-break watermark to restore bookkeeping against.
    pub saved_break: u64,
}

impl Frame {
    pub fn new(
        parameters: RegisterFile,
        return_address: Option<u64>,
        result: RegisterAccess,
        saved_break: u64,
    ) -> Frame {
        Frame {
            registers: RegisterFile::new(REGISTER_COUNT),
            parameters,
            return_address,
            result,
            saved_break,
        }
    }
}

/// A single interpreted process.
#[derive(Debug)]
pub struct Process {
    pub frames: Vec<Frame>,
    /// Argument file under construction; FRAME creates it, CALL consumes
    /// it.
    pub staged_arguments: Option<RegisterFile>,
    /// Watermark for in-process arena allocations.
    pub stack_break: u64,
    /// Pointers handed out by AA.
    pub pointers: Vec<u64>,
}

impl Process {
    pub fn new() -> Process {
        Process {
            frames: vec![Frame::new(
                RegisterFile::new(0),
                None,
                RegisterAccess::void(),
                0,
            )],
            staged_arguments: None,
            stack_break: 0,
            pointers: Vec::new(),
        }
    }

    pub fn frame(&self) -> &Frame {
        self.frames.last().expect("a process always has a frame")
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        self.frames.mut_last()
    }

    fn file_for(&self, access: RegisterAccess) -> Result<&RegisterFile> {
        match access.set {
            RegisterSet::Local => Ok(&self.frame().registers),
            RegisterSet::Parameter => Ok(&self.frame().parameters),
            RegisterSet::Argument => self.staged_arguments.as_ref().ok_or_else(|| {
                RuntimeError::InvalidOperand {
                    offset: 0,
                    detail: "argument access without a staged frame".to_string(),
                }
            }),
            RegisterSet::Void => Err(RuntimeError::InvalidOperand {
                offset: 0,
                detail: "cannot read through a void access".to_string(),
            }),
        }
    }

    fn file_for_mut(&mut self, access: RegisterAccess) -> Result<&mut RegisterFile> {
        match access.set {
            RegisterSet::Local => Ok(&mut self.frames.mut_last().registers),
            RegisterSet::Parameter => Ok(&mut self.frames.mut_last().parameters),
            RegisterSet::Argument => self.staged_arguments.as_mut().ok_or_else(|| {
                RuntimeError::InvalidOperand {
                    offset: 0,
                    detail: "argument access without a staged frame".to_string(),
                }
            }),
            RegisterSet::Void => Err(RuntimeError::InvalidOperand {
                offset: 0,
                detail: "cannot write through a void access".to_string(),
            }),
        }
    }

    fn require_direct(access: RegisterAccess) -> Result<()> {
        if !access.direct {
            return Err(RuntimeError::InvalidOperand {
                offset: 0,
                detail: "indirect register accesses are not supported here".to_string(),
            });
        }
        Ok(())
    }

    /// Tag and raw payload of a slot. A void access reads as a void
    /// value; a boxed slot is an error for payload consumers.
    pub fn tagged(&self, access: RegisterAccess) -> Result<(Tag, u64)> {
        if access.is_void() {
            return Ok((Tag::Void, 0));
        }
        Self::require_direct(access)?;
        let value = self.file_for(access)?.get(access.index as usize)?;
        match (value.tag(), value.payload()) {
            (Some(tag), Some(payload)) => Ok((tag, payload)),
            _ => Err(RuntimeError::InvalidOperand {
                offset: 0,
                detail: format!("{} holds a boxed value where an unboxed one is needed", access),
            }),
        }
    }

    /// Boolean projection of a slot, boxed values included.
    pub fn boolean(&self, access: RegisterAccess) -> Result<bool> {
        if access.is_void() {
            return Ok(false);
        }
        Self::require_direct(access)?;
        Ok(self.file_for(access)?.get(access.index as usize)?.as_boolean())
    }

    /// Borrow a slot mutably. Void accesses are an error here.
    pub fn slot_mut(&mut self, access: RegisterAccess) -> Result<&mut Value> {
        Self::require_direct(access)?;
        self.file_for_mut(access)?.get_mut(access.index as usize)
    }

    /// Store into a slot. Writing through the void access discards the
    /// value.
    pub fn set(&mut self, access: RegisterAccess, value: Value) -> Result<()> {
        if access.is_void() {
            return Ok(());
        }
        Self::require_direct(access)?;
        self.file_for_mut(access)?.set(access.index as usize, value)
    }
}

impl Default for Process {
    fn default() -> Process {
        Process::new()
    }
}

// Convenience over Vec<Frame> to keep the "frames are never empty"
// invariant in one place.
trait MutLast {
    fn mut_last(&mut self) -> &mut Frame;
}

impl MutLast for Vec<Frame> {
    fn mut_last(&mut self) -> &mut Frame {
        self.last_mut().expect("a process always has a frame")
    }
}
