//! # Register accesses
//!
//! A register access names one slot of a register file: which set the
//! slot belongs to, whether the access is direct or goes through a
//! pointer, and the 8-bit slot index. A distinguished encoding stands
//! for "void", the absence of a register.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Register set selector.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterSet {
    /// No register at all.
    Void = 0,
    /// The current frame's local registers.
    Local = 1,
    /// Argument registers being prepared for a callee.
    Argument = 2,
    /// Parameter registers received from the caller.
    Parameter = 3,
}

impl RegisterSet {
    pub fn from_u8(value: u8) -> Option<RegisterSet> {
        match value {
            0 => Some(RegisterSet::Void),
            1 => Some(RegisterSet::Local),
            2 => Some(RegisterSet::Argument),
            3 => Some(RegisterSet::Parameter),
            _ => None,
        }
    }

    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Access to a single register slot.
///
/// Encodes in 11 bits: index in bits 0-7, the direct bit at bit 8, the
/// set selector in bits 9-10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAccess {
    pub set: RegisterSet,
    pub direct: bool,
    pub index: u8,
}

impl RegisterAccess {
    /// A direct access to a local register.
    pub const fn local(index: u8) -> RegisterAccess {
        RegisterAccess {
            set: RegisterSet::Local,
            direct: true,
            index,
        }
    }

    /// An indirect (through-pointer) access to a local register.
    pub const fn local_indirect(index: u8) -> RegisterAccess {
        RegisterAccess {
            set: RegisterSet::Local,
            direct: false,
            index,
        }
    }

    /// A direct access to an argument register.
    pub const fn argument(index: u8) -> RegisterAccess {
        RegisterAccess {
            set: RegisterSet::Argument,
            direct: true,
            index,
        }
    }

    /// A direct access to a parameter register.
    pub const fn parameter(index: u8) -> RegisterAccess {
        RegisterAccess {
            set: RegisterSet::Parameter,
            direct: true,
            index,
        }
    }

    /// The void access: no register.
    pub const fn void() -> RegisterAccess {
        RegisterAccess {
            set: RegisterSet::Void,
            direct: true,
            index: 0,
        }
    }

    #[inline]
    pub fn is_void(self) -> bool {
        self.set == RegisterSet::Void
    }

    /// Pack into the low 11 bits of a u16.
    pub fn encode(self) -> u16 {
        (self.index as u16) | ((self.direct as u16) << 8) | ((self.set.to_u8() as u16) << 9)
    }

    /// Unpack from a slot value. Total: bits outside the encoding are
    /// ignored, so decoding a garbage slot yields a defined access.
    pub fn decode(raw: u16) -> RegisterAccess {
        let set = RegisterSet::from_u8(((raw >> 9) & 0b11) as u8)
            .unwrap_or(RegisterSet::Void);
        RegisterAccess {
            set,
            direct: (raw >> 8) & 1 == 1,
            index: (raw & 0xff) as u8,
        }
    }
}

impl fmt::Display for RegisterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_void() {
            return write!(f, "void");
        }
        let sigil = if self.direct { '$' } else { '*' };
        match self.set {
            RegisterSet::Local => write!(f, "{}{}", sigil, self.index),
            RegisterSet::Argument => write!(f, "{}{}.a", sigil, self.index),
            RegisterSet::Parameter => write!(f, "{}{}.p", sigil, self.index),
            RegisterSet::Void => unreachable!(),
        }
    }
}
