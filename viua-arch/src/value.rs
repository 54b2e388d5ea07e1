//! # Value model
//!
//! A register slot is either void or holds a value. Unboxed values are a
//! type tag plus a raw 64-bit payload; the payload is always stored as an
//! unsigned word and the tag tells later operations how to interpret it.
//! Boxed values hold an opaque owner whose lifetime is the slot's
//! lifetime unless explicitly promoted to shared ownership.
//!
//! Boxed values expose a small capability set instead of a class
//! hierarchy: copy, string representation, boolean projection, and
//! destruction (which is just `Drop`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Type tag of an unboxed value.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    Void = 0,
    Byte = 1,
    Signed = 2,
    Unsigned = 3,
    Float32 = 4,
    Float64 = 5,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Void => "vd",
            Tag::Byte => "by",
            Tag::Signed => "is",
            Tag::Unsigned => "iu",
            Tag::Float32 => "fl",
            Tag::Float64 => "db",
        };
        write!(f, "{}", name)
    }
}

/// Capability set of a boxed value.
pub trait BoxedObject {
    /// Produce an independent copy of the object.
    fn boxed_copy(&self) -> Box<dyn BoxedObject>;

    /// Human-readable representation, used by register dumps.
    fn string_repr(&self) -> String;

    /// Projection onto a boolean, used by the logical operations.
    fn as_boolean(&self) -> bool;
}

/// A boxed text string.
pub struct Str(pub String);

impl BoxedObject for Str {
    fn boxed_copy(&self) -> Box<dyn BoxedObject> {
        Box::new(Str(self.0.clone()))
    }

    fn string_repr(&self) -> String {
        format!("{:?}", self.0)
    }

    fn as_boolean(&self) -> bool {
        !self.0.is_empty()
    }
}

/// A boxed atom: an interned, comparable piece of text.
pub struct Atom(pub String);

impl BoxedObject for Atom {
    fn boxed_copy(&self) -> Box<dyn BoxedObject> {
        Box::new(Atom(self.0.clone()))
    }

    fn string_repr(&self) -> String {
        self.0.clone()
    }

    fn as_boolean(&self) -> bool {
        true
    }
}

/// Owner handle of a boxed slot.
///
/// A slot starts out as the sole owner. Capturing the value (eg, into a
/// closure environment) promotes the handle to shared ownership so both
/// the environment and the originating frame observe the same object
/// until the last holder is destroyed.
pub enum BoxedValue {
    Owned(Box<dyn BoxedObject>),
    Shared(Rc<dyn BoxedObject>),
}

impl BoxedValue {
    /// Promote this handle to shared ownership and return a second
    /// handle to the same object.
    pub fn promote_shared(&mut self) -> BoxedValue {
        if let BoxedValue::Owned(_) = self {
            let owned = std::mem::replace(self, BoxedValue::Shared(Rc::new(Str(String::new()))));
            if let BoxedValue::Owned(object) = owned {
                *self = BoxedValue::Shared(Rc::from(object));
            }
        }
        match self {
            BoxedValue::Shared(rc) => BoxedValue::Shared(Rc::clone(rc)),
            BoxedValue::Owned(_) => unreachable!(),
        }
    }

    pub fn object(&self) -> &dyn BoxedObject {
        match self {
            BoxedValue::Owned(object) => object.as_ref(),
            BoxedValue::Shared(rc) => rc.as_ref(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, BoxedValue::Shared(_))
    }
}

impl Clone for BoxedValue {
    fn clone(&self) -> BoxedValue {
        match self {
            // Copy capability: an owned handle clones the object itself.
            BoxedValue::Owned(object) => BoxedValue::Owned(object.boxed_copy()),
            BoxedValue::Shared(rc) => BoxedValue::Shared(Rc::clone(rc)),
        }
    }
}

impl fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<boxed {}>", self.object().string_repr())
    }
}

/// Contents of a register slot.
#[derive(Clone, Debug)]
pub enum Value {
    Unboxed { tag: Tag, payload: u64 },
    Boxed(BoxedValue),
}

impl Value {
    pub const fn void() -> Value {
        Value::Unboxed {
            tag: Tag::Void,
            payload: 0,
        }
    }

    pub const fn byte(value: u8) -> Value {
        Value::Unboxed {
            tag: Tag::Byte,
            payload: value as u64,
        }
    }

    pub const fn signed(value: i64) -> Value {
        Value::Unboxed {
            tag: Tag::Signed,
            payload: value as u64,
        }
    }

    pub const fn unsigned(value: u64) -> Value {
        Value::Unboxed {
            tag: Tag::Unsigned,
            payload: value,
        }
    }

    pub fn float32(value: f32) -> Value {
        Value::Unboxed {
            tag: Tag::Float32,
            payload: value.to_bits() as u64,
        }
    }

    pub fn float64(value: f64) -> Value {
        Value::Unboxed {
            tag: Tag::Float64,
            payload: value.to_bits(),
        }
    }

    pub const fn unboxed(tag: Tag, payload: u64) -> Value {
        Value::Unboxed { tag, payload }
    }

    pub fn boxed(object: Box<dyn BoxedObject>) -> Value {
        Value::Boxed(BoxedValue::Owned(object))
    }

    pub fn is_void(&self) -> bool {
        matches!(
            self,
            Value::Unboxed {
                tag: Tag::Void,
                ..
            }
        )
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self, Value::Boxed(_))
    }

    /// The type tag; boxed values have none.
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Value::Unboxed { tag, .. } => Some(*tag),
            Value::Boxed(_) => None,
        }
    }

    /// Raw 64-bit payload of an unboxed value.
    pub fn payload(&self) -> Option<u64> {
        match self {
            Value::Unboxed { payload, .. } => Some(*payload),
            Value::Boxed(_) => None,
        }
    }

    /// Boolean projection: void is false, other unboxed values are true
    /// when their payload is non-zero, boxed values project through
    /// their capability.
    pub fn as_boolean(&self) -> bool {
        match self {
            Value::Unboxed { tag: Tag::Void, .. } => false,
            Value::Unboxed { payload, .. } => *payload != 0,
            Value::Boxed(handle) => handle.object().as_boolean(),
        }
    }

    /// Rendering used by register dumps and the trace stream.
    pub fn string_repr(&self) -> String {
        match self {
            Value::Unboxed { tag: Tag::Void, .. } => "void".to_string(),
            Value::Unboxed {
                tag: Tag::Byte,
                payload,
            } => format!("by {:02x}", *payload as u8),
            Value::Unboxed {
                tag: Tag::Signed,
                payload,
            } => format!("is {:016x} {}", payload, *payload as i64),
            Value::Unboxed {
                tag: Tag::Unsigned,
                payload,
            } => format!("iu {:016x} {}", payload, payload),
            Value::Unboxed {
                tag: Tag::Float32,
                payload,
            } => format!("fl {:08x} {}", *payload as u32, f32::from_bits(*payload as u32)),
            Value::Unboxed {
                tag: Tag::Float64,
                payload,
            } => format!("db {:016x} {}", payload, f64::from_bits(*payload)),
            Value::Boxed(handle) => format!("<boxed> {}", handle.object().string_repr()),
        }
    }
}

impl Default for Value {
    fn default() -> Value {
        Value::void()
    }
}
