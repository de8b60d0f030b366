//! Guest address space for the emulation core.
//!
//! [`AddressSpace`] is a flat 64-bit address space made of page-aligned,
//! non-overlapping regions. Each region carries [`Prot`] bits that guest
//! accesses are checked against. Every access is validated over its whole
//! range before any byte is touched, so a failing access never leaves a
//! partial result behind.
//!
//! Region backing is sparse: a page is only allocated the first time it is
//! written, so mapping multi-gigabyte ranges is cheap.

#![forbid(unsafe_code)]

mod error;
mod prot;
mod space;

pub use error::{MemError, MemResult};
pub use prot::{Access, Prot};
pub use space::{AddressSpace, RegionInfo, DEFAULT_PAGE_SIZE};
