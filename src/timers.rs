//! The three programmable timers
//!
//! Timer 0 (dot timer) and Timer 1 (hblank timer) can synchronize to GPU
//! blanking via [`Timer::update_blank`]; Timer 2 (system timer) additionally
//! supports a SysClock/8 clock source with a carried remainder.

use crate::interrupts::{InterruptController, IrqSource};
use crate::num::U32Ext;
use crate::scheduler::SchedulerComponent;

pub const MAX_COUNTER: u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    AtMax,
    AtTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    SysClock,
    /// Timer 0: GPU dot clock. Timer 1: GPU hblank pulse. Timer 2: SysClock/8.
    Alternate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerId {
    Timer0,
    Timer1,
    Timer2,
}

impl TimerId {
    const fn irq_source(self) -> IrqSource {
        match self {
            Self::Timer0 => IrqSource::Timer0,
            Self::Timer1 => IrqSource::Timer1,
            Self::Timer2 => IrqSource::Timer2,
        }
    }
}

/// One of the three programmable timers.
#[derive(Debug, Clone)]
pub struct Timer {
    id: TimerId,
    counter: u32,
    target: u16,
    sync_enabled: bool,
    sync_mode: u8,
    reset_mode: ResetMode,
    irq_on_target: bool,
    irq_on_max_value: bool,
    irq_repeat_mode: bool,
    irq_toggle_mode: bool,
    clock_source: ClockSource,
    allow_irq: bool,
    pending_irq: bool,
    reached_target: bool,
    reached_max_value: bool,
    in_blank: bool,
    div_8_remainder: u32,
    /// Timer 2 only: once sync mode 0 or 3 has stopped the counter at its
    /// freeze point, it stays stopped until the next mode write, unlike
    /// the generic blank-driven pause the other sync modes use.
    frozen: bool,
}

impl Timer {
    fn new(id: TimerId) -> Self {
        Self {
            id,
            counter: 0,
            target: 0,
            sync_enabled: false,
            sync_mode: 0,
            reset_mode: ResetMode::AtMax,
            irq_on_target: false,
            irq_on_max_value: false,
            irq_repeat_mode: false,
            irq_toggle_mode: false,
            clock_source: ClockSource::SysClock,
            allow_irq: true,
            pending_irq: false,
            reached_target: false,
            reached_max_value: false,
            in_blank: false,
            div_8_remainder: 0,
            frozen: false,
        }
    }

    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn write_counter(&mut self, value: u32) {
        self.counter = value & MAX_COUNTER;
    }

    pub fn write_target(&mut self, value: u32) {
        self.target = value as u16;
    }

    #[must_use]
    pub fn read_target(&self) -> u32 {
        self.target.into()
    }

    #[must_use]
    pub fn read_mode(&mut self) -> u32 {
        let value = u32::from(self.sync_enabled)
            | (u32::from(self.sync_mode) << 1)
            | (u32::from(self.reset_mode == ResetMode::AtTarget) << 3)
            | (u32::from(self.irq_on_target) << 4)
            | (u32::from(self.irq_on_max_value) << 5)
            | (u32::from(self.irq_repeat_mode) << 6)
            | (u32::from(self.irq_toggle_mode) << 7)
            | (u32::from(self.clock_source == ClockSource::Alternate) << 8)
            | (u32::from(!self.pending_irq) << 10)
            | (u32::from(self.reached_target) << 11)
            | (u32::from(self.reached_max_value) << 12);

        // reached_* auto-clear on read
        self.reached_target = false;
        self.reached_max_value = false;

        value
    }

    /// Writes to mode zero the counter, clear the pending-IRQ latch, and
    /// (in toggle mode) re-arm the toggle edge detector.
    pub fn write_mode(&mut self, value: u32) {
        self.sync_enabled = value.bit(0);
        self.sync_mode = ((value >> 1) & 3) as u8;
        self.reset_mode = if value.bit(3) { ResetMode::AtTarget } else { ResetMode::AtMax };
        self.irq_on_target = value.bit(4);
        self.irq_on_max_value = value.bit(5);
        self.irq_repeat_mode = value.bit(6);
        self.irq_toggle_mode = value.bit(7);
        self.clock_source =
            if value.bit(8) { ClockSource::Alternate } else { ClockSource::SysClock };

        self.counter = 0;
        self.pending_irq = false;
        self.frozen = false;
        if self.irq_toggle_mode {
            self.allow_irq = true;
        }

        log::trace!("Timer {:?} mode write: {value:08X}", self.id);
    }

    /// Called by the GPU collaborator when entering or leaving vblank
    /// (timer 0's dot clock is never blanked) or hblank.
    pub fn update_blank(&mut self, entering_blank: bool) {
        self.in_blank = entering_blank;

        if self.sync_enabled && entering_blank {
            match self.sync_mode {
                0 => {}
                1 | 2 => self.counter = 0,
                3 => self.sync_enabled = false,
                _ => unreachable!("sync_mode is masked to 2 bits"),
            }
        }
    }

    #[must_use]
    fn paused(&self) -> bool {
        if matches!(self.id, TimerId::Timer2) && matches!(self.sync_mode, 0 | 3) && self.frozen {
            return true;
        }

        if !self.sync_enabled {
            return false;
        }

        match self.sync_mode {
            0 => self.in_blank,
            1 => false,
            2 => !self.in_blank,
            3 => false,
            _ => unreachable!("sync_mode is masked to 2 bits"),
        }
    }

    fn fire_irq_if_armed(&mut self, condition: bool, interrupts: &mut InterruptController) {
        if !condition {
            return;
        }

        let fires = if self.irq_toggle_mode {
            let was_armed = self.allow_irq;
            self.allow_irq = !self.allow_irq;
            was_armed
        } else {
            true
        };

        if !fires {
            return;
        }

        if !self.irq_repeat_mode && self.pending_irq {
            // One-shot mode: already fired since the last mode write/re-arm.
            return;
        }

        interrupts.request(self.id.irq_source());
        self.pending_irq = true;
    }

    /// Advance the counter by `cycles` system clocks (already divided for
    /// Timer 2's SysClock/8 source by [`Timers::clock`]).
    fn clock(&mut self, cycles: u32, interrupts: &mut InterruptController) {
        if self.paused() || cycles == 0 {
            return;
        }

        let new_counter = self.counter + cycles;

        let crossed_target =
            self.counter <= u32::from(self.target) && new_counter > u32::from(self.target);
        let crossed_max = new_counter > MAX_COUNTER;

        if crossed_target {
            self.reached_target = true;
        }
        if crossed_max {
            self.reached_max_value = true;
        }

        if matches!(self.id, TimerId::Timer2) && self.sync_enabled && matches!(self.sync_mode, 0 | 3)
            && ((self.irq_on_target && crossed_target) || crossed_max)
        {
            self.frozen = true;
        }

        self.counter = match self.reset_mode {
            ResetMode::AtTarget if crossed_target => new_counter % (u32::from(self.target) + 1),
            _ => new_counter % (MAX_COUNTER + 1),
        };

        self.fire_irq_if_armed(self.irq_on_target && crossed_target, interrupts);
        self.fire_irq_if_armed(self.irq_on_max_value && crossed_max, interrupts);
    }
}

/// The three timers plus the dispatch logic for their MMIO window
/// (`0x1F80_1100..0x1F80_112F`).
#[derive(Debug, Clone)]
pub struct Timers {
    timers: [Timer; 3],
}

impl Timers {
    #[must_use]
    pub fn new() -> Self {
        Self {
            timers: [
                Timer::new(TimerId::Timer0),
                Timer::new(TimerId::Timer1),
                Timer::new(TimerId::Timer2),
            ],
        }
    }

    #[must_use]
    pub fn timer(&self, index: usize) -> &Timer {
        &self.timers[index]
    }

    pub fn timer_mut(&mut self, index: usize) -> &mut Timer {
        &mut self.timers[index]
    }

    /// Route an MMIO access; `address` is the full 32-bit physical address.
    #[must_use]
    pub fn read_register(&mut self, address: u32) -> u32 {
        let index = ((address >> 4) & 3) as usize;
        if index > 2 {
            log::warn!("Out-of-range timer index read: {address:08X}");
            return 0xFFFF_FFFF;
        }

        match address & 0xF {
            0x0 => self.timers[index].counter(),
            0x4 => self.timers[index].read_mode(),
            0x8 => self.timers[index].read_target(),
            _ => {
                log::warn!("Unhandled timer register read: {address:08X}");
                0
            }
        }
    }

    pub fn write_register(&mut self, address: u32, value: u32) {
        let index = ((address >> 4) & 3) as usize;
        if index > 2 {
            log::warn!("Out-of-range timer index write: {address:08X} {value:08X}");
            return;
        }

        match address & 0xF {
            0x0 => self.timers[index].write_counter(value),
            0x4 => self.timers[index].write_mode(value),
            0x8 => self.timers[index].write_target(value),
            _ => log::warn!("Unhandled timer register write: {address:08X} {value:08X}"),
        }
    }

    /// Update a single timer's clock. Timer 2's SysClock/8 source carries a
    /// remainder across calls so that e.g. 15 cycles at /8 advances the
    /// counter by 1 and leaves a remainder of 7.
    pub fn clock(&mut self, index: usize, cycles: u32, interrupts: &mut InterruptController) {
        let timer = &mut self.timers[index];

        if index == 2 && timer.clock_source == ClockSource::Alternate {
            let total = timer.div_8_remainder + cycles;
            let whole = total / 8;
            timer.div_8_remainder = total % 8;
            timer.clock(whole, interrupts);
        } else {
            timer.clock(cycles, interrupts);
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    #[must_use]
    fn cycles_until_next_event(&self) -> u32 {
        if self.paused() {
            return u32::MAX;
        }

        let to_target = if self.irq_on_target && self.counter <= u32::from(self.target) {
            u32::from(self.target) - self.counter + 1
        } else {
            u32::MAX
        };
        let to_max =
            if self.irq_on_max_value { MAX_COUNTER - self.counter + 1 } else { u32::MAX };

        let bound = to_target.min(to_max);
        if matches!((self.id, self.clock_source), (TimerId::Timer2, ClockSource::Alternate)) {
            bound.saturating_mul(8)
        } else {
            bound
        }
    }
}

impl Timers {
    #[must_use]
    pub fn cycles_until_next_event(&self) -> u32 {
        self.timers.iter().map(Timer::cycles_until_next_event).min().unwrap_or(u32::MAX)
    }

    pub fn update(&mut self, cycles: u32, interrupts: &mut InterruptController) {
        for index in 0..self.timers.len() {
            self.clock(index, cycles, interrupts);
        }
    }
}

/// Wraps the three timers plus the interrupt controller so the scheduler
/// can drive all of them as a single registered component. Constructed
/// on-the-fly each time the scheduler is advanced, never stored.
pub struct TimersEventSource<'a> {
    pub timers: &'a mut Timers,
    pub interrupts: &'a mut InterruptController,
}

impl SchedulerComponent for TimersEventSource<'_> {
    fn update(&mut self, cycles: u32) {
        self.timers.update(cycles, self.interrupts);
    }

    fn cycles_until_next_event(&self) -> u32 {
        self.timers.cycles_until_next_event()
    }
}

#[cfg(test)]
#[path = "timers/tests.rs"]
mod tests;
