//! Just-in-time function threader.
//!
//! Virtual machine dispatch through loops and indirect branches leaves
//! a lot of speed on the table. This crate assembles short straight-line
//! stubs at runtime that call statically compiled functions back to
//! back, then installs each stub's address in a caller-owned [`Hook`]
//! once its bytes are executable, so reader threads can jump straight
//! into the threaded pathway.
//!
//! ```ignore
//! let jit = Jit::new();
//! let hook = Arc::new(Hook::new(interpret as usize));
//! if let Some(mut jp) = jit.start() {
//!     jp.set_arg(1, 42);
//!     jp.call(op_push as usize);
//!     jp.call(op_add as usize);
//!     jit.finish(jp, Some(hook.clone()), interpret as usize);
//! }
//! jit.flush();
//! // hook.get() now names the threaded function
//! ```

mod engine;

pub use engine::Jit;
pub use weft_codegen::{
    Hook, JIT_PAGE_ALIGN, JIT_PAGE_FIT, JIT_PAGE_SIZE, JitPage, Reg, SUPPORTED, epilogue,
    os_page_size, prologue,
};
