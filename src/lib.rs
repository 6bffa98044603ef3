//! Core PSX emulation engine: CPU, GTE, bus, DMA, interrupts, timers, scheduler.
//!
//! This crate stops at the MMIO boundary. Rasterizing GPU commands, decoding
//! CD-ROM sectors, mixing SPU audio, and talking to real controllers are all
//! someone else's problem; the stand-ins here only make this crate's own
//! contract observable in isolation.

pub mod api;
pub mod bus;
pub mod cd;
pub mod cpu;
pub mod debug;
pub mod dma;
pub mod error;
pub mod gpu;
pub mod interrupts;
pub mod joypad;
pub mod memory;
mod num;
pub mod scheduler;
pub mod spu;
pub mod timers;

pub use api::{Ps1Emulator, Ps1EmulatorBuilder, StepEffect};
pub use error::{Ps1Error, Ps1Result};
