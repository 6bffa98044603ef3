//! Host-visible error types
//!
//! Guest faults (MIPS exceptions) are not host errors; they are handled
//! entirely inside [`crate::cpu::Cpu::step`] and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Ps1Error {
    #[error("Incorrect BIOS ROM size; expected 512KB, was {bios_len}")]
    IncorrectBiosSize { bios_len: usize },
    #[error("PS-EXE format is invalid")]
    InvalidExeFormat,
}

pub type Ps1Result<T> = Result<T, Ps1Error>;

/// A physical address that routed to no known region.
///
/// Per spec this is fatal: the caller is expected to panic with this
/// error's message rather than attempt to continue emulation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no memory region claims physical address {address:08X}")]
pub struct BusError {
    pub address: u32,
}
