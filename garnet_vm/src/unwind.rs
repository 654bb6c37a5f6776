//! Unwind sites: the per-handler objects linking protected regions to their
//! handlers.
//!
//! `setup_unwind` installs a site during preparation; at runtime the opcode
//! pushes it (with the current stack depth) onto the frame's unwind stack,
//! and the `unwind` opcode pops it. Exception propagation walks that stack:
//! `rescue` sites recover, `ensure` sites run and re-raise.

use garnet_core::{PrepareError, Value};
use garnet_runtime::NativeObject;
use std::any::Any;
use std::sync::Arc;

/// Disposition of an unwind site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnwindType {
    None = 0,
    Rescue = 1,
    Ensure = 2,
}

impl UnwindType {
    /// Decode the `setup_unwind` type operand.
    pub fn from_word(word: u64, ip: usize) -> Result<UnwindType, PrepareError> {
        match word {
            0 => Ok(UnwindType::None),
            1 => Ok(UnwindType::Rescue),
            2 => Ok(UnwindType::Ensure),
            _ => Err(PrepareError::InvalidUnwindType { word, ip }),
        }
    }
}

/// One exception-handler entry: where to resume, and how.
#[derive(Debug)]
pub struct UnwindSite {
    /// Handler instruction pointer.
    pub ip: u32,
    pub unwind_type: UnwindType,
}

impl UnwindSite {
    pub fn new(ip: u32, unwind_type: UnwindType) -> UnwindSite {
        UnwindSite { ip, unwind_type }
    }
}

impl NativeObject for UnwindSite {
    fn type_name(&self) -> &'static str {
        "UnwindSite"
    }

    fn mark(&self, _tracer: &mut dyn FnMut(Value)) {}

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_decoding() {
        assert_eq!(UnwindType::from_word(0, 0).unwrap(), UnwindType::None);
        assert_eq!(UnwindType::from_word(1, 0).unwrap(), UnwindType::Rescue);
        assert_eq!(UnwindType::from_word(2, 0).unwrap(), UnwindType::Ensure);
        assert!(matches!(
            UnwindType::from_word(3, 8),
            Err(PrepareError::InvalidUnwindType { word: 3, ip: 8 })
        ));
    }
}
