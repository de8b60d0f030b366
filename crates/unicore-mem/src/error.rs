use thiserror::Error;

use crate::Access;

pub type MemResult<T> = std::result::Result<T, MemError>;

/// Errors reported by [`crate::AddressSpace`].
///
/// Mapping errors (`Alignment`, `EmptyRange`, `AddressOverflow`, `Overlap`,
/// `NotMapped`) leave the address space unchanged. Access errors (`Unmapped`,
/// `Protection`) are detected before any byte is read or written; `addr` is the
/// first offending byte and `len` the length of the whole access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemError {
    #[error("range base=0x{base:x} size=0x{size:x} is not aligned to page size 0x{page_size:x}")]
    Alignment { base: u64, size: u64, page_size: u64 },

    #[error("range base=0x{base:x} has zero size")]
    EmptyRange { base: u64 },

    #[error("range base=0x{base:x} size=0x{size:x} overflows the address space")]
    AddressOverflow { base: u64, size: u64 },

    #[error("range base=0x{base:x} size=0x{size:x} overlaps an existing mapping")]
    Overlap { base: u64, size: u64 },

    #[error("range base=0x{base:x} size=0x{size:x} is not fully mapped")]
    NotMapped { base: u64, size: u64 },

    #[error("{len}-byte {access} faults on unmapped address 0x{addr:x}")]
    Unmapped { addr: u64, len: usize, access: Access },

    #[error("{len}-byte {access} faults on protected address 0x{addr:x}")]
    Protection { addr: u64, len: usize, access: Access },

    #[error("page size 0x{0:x} must be a power of two of at least 0x100")]
    InvalidPageSize(u64),
}
