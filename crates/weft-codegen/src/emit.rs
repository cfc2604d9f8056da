//! Emission operations shared by the ISA back-ends.
//!
//! The per-ISA modules know how to encode; this module knows the
//! calling convention of threaded chunks. Argument 0 of every chunk is
//! the VM state pointer, parked in a callee-saved register by the
//! prologue. A call whose chunk has not explicitly set argument 0
//! first copies it back out of that register, so every callee sees the
//! state pointer by default.

use crate::page::JitPage;

#[cfg(target_arch = "x86_64")]
use crate::x86_64 as host;

#[cfg(target_arch = "aarch64")]
use crate::aarch64 as host;

#[cfg(target_arch = "x86_64")]
pub use crate::x86_64::Reg;

#[cfg(target_arch = "aarch64")]
pub use crate::aarch64::Reg;

/// Register placeholder on architectures without a back-end.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg(pub u8);

/// Canonical chunk prologue for the host ISA: saves a frame pointer and
/// one callee-saved register, then parks argument 0 in the latter.
pub fn prologue() -> &'static [u8] {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        &host::PROLOGUE
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        &[]
    }
}

/// Canonical chunk epilogue: restores what the prologue saved and
/// returns.
pub fn epilogue() -> &'static [u8] {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        &host::EPILOGUE
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        &[]
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
impl JitPage {
    /// Loads a 64-bit immediate into `reg`.
    pub fn set_reg(&mut self, reg: Reg, value: u64) -> bool {
        host::set_reg(self, reg, value)
    }

    /// Emits a register-to-register move.
    pub fn mov_reg(&mut self, dst: Reg, src: Reg) -> bool {
        host::mov_reg(self, dst, src)
    }

    /// Loads a constant into the `param`-th function argument register.
    pub fn set_arg(&mut self, param: usize, value: u64) -> bool {
        assert!(param < 6);
        self.setargs |= 1 << param;
        host::set_reg(self, host::ARG_REGS[param], value)
    }

    /// Emits a call to `func`.
    ///
    /// Unless `set_arg(0, _)` was issued since the last call, argument 0
    /// reverts to the state pointer saved by the prologue.
    pub fn call(&mut self, func: usize) -> bool {
        if self.setargs & 1 == 0 {
            host::mov_reg(self, host::ARG_REGS[0], host::STATE);
        }
        self.setargs = 0;
        host::call(self, func)
    }

    /// Emits an unconditional jump to `code`.
    pub fn jmp(&mut self, code: usize) -> bool {
        host::jmp(self, code)
    }
}

/// Stub emitters: without a back-end nothing can be encoded, so every
/// operation reports failure.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
impl JitPage {
    pub fn set_reg(&mut self, _reg: Reg, _value: u64) -> bool {
        false
    }

    pub fn mov_reg(&mut self, _dst: Reg, _src: Reg) -> bool {
        false
    }

    pub fn set_arg(&mut self, _param: usize, _value: u64) -> bool {
        false
    }

    pub fn call(&mut self, _func: usize) -> bool {
        false
    }

    pub fn jmp(&mut self, _code: usize) -> bool {
        false
    }
}
