//! Executable page management and instruction encoders for the weft
//! function threader.
//!
//! A [`JitPage`] owns one mmap'd region with a write cursor. Chunks of
//! machine code are appended to it, released, and then committed: whole
//! OS pages flip from writable to executable, at which point any [`Hook`]
//! staged against the committed range is published to reader threads.
//!
//! The encoders in [`x86_64`] and [`aarch64`] cover the six instruction
//! shapes threading needs: load-immediate, register move, call, jump,
//! prologue and epilogue. Both back-ends are compiled everywhere so their
//! encodings can be tested on any host; only the one matching the target
//! is wired into the [`JitPage`] emission methods.

pub mod aarch64;
mod emit;
mod hook;
mod page;
pub mod x86_64;

pub use emit::{Reg, epilogue, prologue};
pub use hook::Hook;
pub use page::{JitPage, os_page_size};

/// Size of one jit memory region. A power of two, at least one OS page,
/// and small enough that chunk-to-chunk branches stay within the AArch64
/// displacement budget.
pub const JIT_PAGE_SIZE: usize = 65536;

/// Alignment of chunk starts within a page.
pub const JIT_PAGE_ALIGN: usize = 16;

/// When fewer than this many bytes remain after a release, the page is
/// retired as full rather than handed out again.
pub const JIT_PAGE_FIT: usize = 600;

/// True when the host ISA has an emitter back-end. On other
/// architectures every emission op reports failure and the engine is
/// born disabled.
pub const SUPPORTED: bool = cfg!(any(target_arch = "x86_64", target_arch = "aarch64"));
