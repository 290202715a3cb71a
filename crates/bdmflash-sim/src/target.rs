//! Line-level simulated BDM target
//!
//! [`SimTarget`] sits on the far side of a [`BdmPort`]. It watches the
//! control lines the engine drives, clocks the serial protocol one bit at
//! a time and answers on the status lines the way a halted CPU32 or
//! ColdFire core does. Memory commands run as cycles on a [`SimBus`].
//!
//! The target samples DSI on the rising edge of DSCLK and moves to its next
//! output bit on the falling edge. A received word is acted on after the
//! seventeenth falling edge; its response goes out during the next frame.

use crate::bus::SimBus;
use bdmflash_core::bdm::frame::{cmd, FRAME_BITS, RESP_BERR, RESP_COMPLETE, RESP_NOT_READY, RESP_NVC};
use bdmflash_core::bdm::{BdmPort, InterfaceKind, PinMap};
use bdmflash_core::error::Result;
use bdmflash_core::memory::Width;
use std::collections::VecDeque;

/// Register number field of RDREG/WRREG
const REG_MASK: u16 = 0x000F;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Idle,
    Operands { command: u16, words: Vec<u16>, needed: usize },
}

/// A simulated target behind a BDM cable
pub struct SimTarget {
    kind: InterfaceKind,
    pins: &'static PinMap,
    bus: SimBus,
    registers: [u32; 16],
    lines: u8,
    frozen: bool,
    freeze_after: Option<u32>,
    stuck: bool,
    bkpt_polls: u32,
    held_in_reset: bool,
    power_off: bool,
    unplugged: bool,
    received: u32,
    bit: u32,
    output: u32,
    results: VecDeque<u16>,
    pending: Pending,
    clock_edges: u64,
    status_reads: u64,
    elapsed_ns: u64,
    steps: u32,
}

impl SimTarget {
    /// A running target wired to a `kind` cable, with `bus` as its memory
    pub fn new(kind: InterfaceKind, bus: SimBus) -> Self {
        let pins = kind.pins();
        Self {
            kind,
            pins,
            bus,
            registers: [0; 16],
            lines: pins.control.released,
            frozen: false,
            freeze_after: Some(1),
            stuck: false,
            bkpt_polls: 0,
            held_in_reset: false,
            power_off: false,
            unplugged: false,
            received: 0,
            bit: 0,
            output: RESP_COMPLETE,
            results: VecDeque::new(),
            pending: Pending::Idle,
            clock_edges: 0,
            status_reads: 0,
            elapsed_ns: 0,
            steps: 0,
        }
    }

    /// Freeze on the `n`th status sample taken with BKPT asserted;
    /// `None` never freezes
    pub fn with_freeze_after(mut self, polls: Option<u32>) -> Self {
        self.freeze_after = polls;
        self
    }

    /// Hang in a bus cycle that only a forced bus error ends
    pub fn stuck_in_bus_cycle(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Cable family this target is wired to
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Memory of the target
    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    /// Memory of the target, mutably
    pub fn bus_mut(&mut self) -> &mut SimBus {
        &mut self.bus
    }

    /// Data registers D0-D7 followed by address registers A0-A7
    pub fn registers(&self) -> &[u32; 16] {
        &self.registers
    }

    /// Whether the core is in background mode
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Control lines as last driven
    pub fn lines(&self) -> u8 {
        self.lines
    }

    /// Rising DSCLK edges seen so far
    pub fn clock_edges(&self) -> u64 {
        self.clock_edges
    }

    /// Status register samples taken so far
    pub fn status_reads(&self) -> u64 {
        self.status_reads
    }

    /// Total time the host waited, in nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed_ns
    }

    /// Instructions executed by single steps
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Hold the target in reset from the board side
    pub fn set_held_in_reset(&mut self, held: bool) {
        self.held_in_reset = held;
        if held {
            self.frozen = false;
        }
    }

    /// Switch target power
    pub fn set_power(&mut self, on: bool) {
        self.power_off = !on;
        if !on {
            self.frozen = false;
        }
    }

    /// Plug the cable into the target or pull it
    pub fn set_plugged(&mut self, plugged: bool) {
        self.unplugged = !plugged;
    }

    fn line(&self, mask: u8) -> bool {
        mask != 0 && self.lines & mask != 0
    }

    fn in_reset(&self) -> bool {
        self.held_in_reset || self.line(self.pins.control.reset)
    }

    fn freeze(&mut self) {
        log::trace!("sim: target frozen");
        self.frozen = true;
        self.bkpt_polls = 0;
        self.received = 0;
        self.bit = 0;
        self.output = RESP_COMPLETE;
        self.results.clear();
        self.pending = Pending::Idle;
    }

    fn resume(&mut self) {
        self.frozen = false;
        self.bkpt_polls = 0;
    }

    fn dso(&self) -> bool {
        self.frozen && (self.output >> (FRAME_BITS - 1 - self.bit)) & 1 != 0
    }

    fn process(&mut self, word: u16) {
        self.output = match std::mem::replace(&mut self.pending, Pending::Idle) {
            Pending::Operands {
                command,
                mut words,
                needed,
            } => {
                words.push(word);
                if words.len() < needed {
                    self.pending = Pending::Operands {
                        command,
                        words,
                        needed,
                    };
                    RESP_NOT_READY
                } else {
                    self.execute(command, &words)
                }
            }
            Pending::Idle if word == cmd::NOP => self.results.pop_front().map_or(RESP_COMPLETE, u32::from),
            Pending::Idle => {
                self.results.clear();
                self.decode(word)
            }
        };
    }

    fn take_operands(&mut self, command: u16, needed: usize) -> u32 {
        self.pending = Pending::Operands {
            command,
            words: Vec::with_capacity(needed),
            needed,
        };
        RESP_NOT_READY
    }

    fn decode(&mut self, word: u16) -> u32 {
        match word {
            cmd::GO => {
                if self.line(self.pins.control.bkpt) {
                    self.steps += 1;
                }
                self.resume();
                RESP_COMPLETE
            }
            cmd::READ_BYTE | cmd::READ_WORD | cmd::READ_LONG => self.take_operands(word, 2),
            cmd::WRITE_BYTE | cmd::WRITE_WORD => self.take_operands(word, 3),
            cmd::WRITE_LONG => self.take_operands(word, 4),
            w if w & !REG_MASK == cmd::RDREG => {
                let value = self.registers[(w & REG_MASK) as usize];
                self.results.push_back(value as u16);
                value >> 16
            }
            w if w & !REG_MASK == cmd::WRREG => self.take_operands(word, 2),
            _ => {
                log::trace!("sim: not a valid command 0x{:04X}", word);
                RESP_NVC
            }
        }
    }

    fn execute(&mut self, command: u16, words: &[u16]) -> u32 {
        let operand = ((words[0] as u32) << 16) | words[1] as u32;
        let outcome = match command {
            cmd::READ_BYTE => self.read_bus(operand, Width::Byte),
            cmd::READ_WORD => self.read_bus(operand, Width::Word),
            cmd::READ_LONG => self.read_bus(operand, Width::Long),
            cmd::WRITE_BYTE => self.bus.write_cycle(operand, Width::Byte, words[2] as u32),
            cmd::WRITE_WORD => self.bus.write_cycle(operand, Width::Word, words[2] as u32),
            cmd::WRITE_LONG => {
                let value = ((words[2] as u32) << 16) | words[3] as u32;
                self.bus.write_cycle(operand, Width::Long, value)
            }
            _ => {
                self.registers[(command & REG_MASK) as usize] = operand;
                Ok(())
            }
        };
        match outcome {
            Ok(()) => self.results.pop_front().map_or(RESP_COMPLETE, u32::from),
            Err(e) => {
                log::trace!("sim: 0x{:04X} @0x{:08X}: {}", command, operand, e);
                self.results.clear();
                RESP_BERR
            }
        }
    }

    fn read_bus(&mut self, addr: u32, width: Width) -> Result<()> {
        let value = self.bus.read_cycle(addr, width)?;
        if width == Width::Long {
            self.results.push_back((value >> 16) as u16);
        }
        self.results.push_back(value as u16);
        Ok(())
    }
}

impl BdmPort for SimTarget {
    fn write_control(&mut self, value: u8) -> Result<()> {
        let old = self.lines;
        self.lines = value;
        let control = self.pins.control;
        let rose = |mask: u8| mask != 0 && old & mask == 0 && value & mask != 0;
        let fell = |mask: u8| mask != 0 && old & mask != 0 && value & mask == 0;

        if rose(control.reset) {
            self.resume();
        }
        if fell(control.reset) && !self.held_in_reset && !self.power_off && self.line(control.bkpt) {
            // The core samples BKPT as it leaves reset
            self.freeze();
        }
        if rose(control.bkpt) {
            self.bkpt_polls = 0;
        }
        if rose(control.force_berr) && self.stuck {
            log::trace!("sim: forced bus error ends the hung cycle");
            self.stuck = false;
        }

        if rose(control.dsclk) {
            self.clock_edges += 1;
            if self.frozen {
                self.received = (self.received << 1) | (value & control.dsi != 0) as u32;
            }
        }
        if fell(control.dsclk) && self.frozen {
            self.bit += 1;
            if self.bit == FRAME_BITS {
                let word = self.received as u16;
                self.received = 0;
                self.bit = 0;
                self.process(word);
            }
        }
        Ok(())
    }

    fn read_status(&mut self) -> Result<u8> {
        self.status_reads += 1;

        let halting = !self.frozen
            && !self.stuck
            && !self.power_off
            && !self.in_reset()
            && self.line(self.pins.control.bkpt);
        if halting {
            self.bkpt_polls += 1;
            if self.freeze_after.is_some_and(|n| self.bkpt_polls >= n) {
                self.freeze();
            }
        }

        let map = &self.pins.status;
        let mut logical = 0;
        if self.frozen {
            logical |= map.freeze;
        }
        if self.in_reset() {
            logical |= map.reset;
        }
        if !self.power_off {
            logical |= map.power;
        }
        if !self.unplugged {
            logical |= map.cable;
        }
        let sensed = map.freeze | map.reset | map.power | map.cable;
        let mut raw = logical ^ (map.active_low & sensed);
        if self.dso() != self.pins.dso_inverted {
            raw |= self.pins.dso;
        }
        Ok(raw)
    }

    fn delay_ns(&mut self, ns: u32) {
        self.elapsed_ns += ns as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amd::AmdFlash;
    use crate::bus::Ram;
    use bdmflash_core::area::AreaRegistry;
    use bdmflash_core::bdm::{coldfire, Response, Session, SessionConfig};
    use bdmflash_core::error::Error;
    use bdmflash_core::flash::AlgorithmOptions;
    use bdmflash_core::memory::TargetMemory;

    const RAM_BASE: u32 = 0x2000_0000;

    fn ram_target(kind: InterfaceKind) -> SimTarget {
        SimTarget::new(kind, SimBus::new().with(Ram::new(RAM_BASE, 0x1000)))
    }

    fn open(target: SimTarget) -> Session<SimTarget> {
        open_with(target, true)
    }

    fn open_with(target: SimTarget, force_berr_on_stop: bool) -> Session<SimTarget> {
        let config = SessionConfig {
            interface: target.kind(),
            force_berr_on_stop,
            ..Default::default()
        };
        Session::open(target, config).unwrap()
    }

    #[test]
    fn test_frame_is_seventeen_clocks() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        session.stop_chip().unwrap();
        let before = session.port().clock_edges();
        session.serial_clock(cmd::NOP, 0).unwrap();
        assert_eq!(session.port().clock_edges() - before, 17);
    }

    #[test]
    fn test_stop_times_out() {
        let target = ram_target(InterfaceKind::ColdFire).with_freeze_after(None);
        let mut session = open(target);
        assert_eq!(session.stop_chip(), Err(Error::Response));
        assert_eq!(session.channel().shadow(), coldfire::PINS.control.stopped_idle);
        assert!(!session.port().is_frozen());
    }

    #[test]
    fn test_stop_after_polls() {
        let target = ram_target(InterfaceKind::ColdFire).with_freeze_after(Some(10));
        let mut session = open(target);
        session.stop_chip().unwrap();
        assert!(session.port().is_frozen());
        assert_eq!(session.port().lines(), coldfire::PINS.control.stopped_idle);
    }

    #[test]
    fn test_forced_bus_error_frees_hung_target() {
        let mut session = open(ram_target(InterfaceKind::Icd).stuck_in_bus_cycle());
        session.stop_chip().unwrap();
        assert!(session.port().is_frozen());

        let mut session = open_with(ram_target(InterfaceKind::Icd).stuck_in_bus_cycle(), false);
        assert_eq!(session.stop_chip(), Err(Error::Response));
    }

    #[test]
    fn test_resynchronize_after_slip() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        session.write_register(3, 0xDEAD_BEEF).unwrap();

        let idle = coldfire::PINS.control.shift_idle;
        for _ in 0..5 {
            session.channel_mut().pulse_clock(idle).unwrap();
        }
        session.resynchronize().unwrap();
        assert_eq!(session.read_register(3).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_registers() {
        let mut session = open(ram_target(InterfaceKind::Icd));
        session.write_register(8, RAM_BASE + 0x100).unwrap();
        session.write_register(0, 0x1234_5678).unwrap();
        assert_eq!(session.read_register(8).unwrap(), RAM_BASE + 0x100);
        assert_eq!(session.read_register(0).unwrap(), 0x1234_5678);
        assert_eq!(session.port().registers()[8], RAM_BASE + 0x100);
        assert_eq!(session.read_register(16), Err(Error::IllegalOperation));
    }

    #[test]
    fn test_memory_access() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        let mut mem = session.memory();
        mem.write_u32(RAM_BASE + 0x10, 0x1122_3344).unwrap();
        mem.write_u8(RAM_BASE + 0x14, 0x55).unwrap();
        assert_eq!(mem.read_u16(RAM_BASE + 0x12).unwrap(), 0x3344);
        assert_eq!(mem.read_u8(RAM_BASE + 0x10).unwrap(), 0x11);
        assert_eq!(mem.read_u32(RAM_BASE + 0x10).unwrap(), 0x1122_3344);

        assert_eq!(mem.read_u32(0x1000_0000), Err(Error::Berr));
        assert_eq!(mem.write_u16(0x1000_0000, 1), Err(Error::Berr));
        assert_eq!(mem.read_u8(RAM_BASE + 0x14).unwrap(), 0x55);

        let mut buf = [0u8; 5];
        mem.read(RAM_BASE + 0x10, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44, 0x55]);
    }

    #[test]
    fn test_not_a_valid_command() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        session.send_word(0x7777).unwrap();
        assert_eq!(session.collect_word(), Err(Error::Nvc));
        assert_eq!(session.exchange(cmd::NOP).unwrap(), Response::Data(0xFFFF));
    }

    #[test]
    fn test_sentinel_frames() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        session.memory().write_u16(RAM_BASE, 0xBEEF).unwrap();

        session.serial_clock(0x7777, 0).unwrap();
        let raw = session.serial_clock(cmd::NOP, 0).unwrap();
        assert_eq!(raw, RESP_NVC);
        assert_eq!(Response::decode(raw), Response::IllegalCommand);

        // Unmapped address: not ready while operands go in, then bus error
        session.serial_clock(cmd::READ_WORD, 0).unwrap();
        let raw = session.serial_clock(0x1000, 0).unwrap();
        assert_eq!(raw, RESP_NOT_READY);
        assert_eq!(Response::decode(raw), Response::NotReady);
        assert_eq!(session.serial_clock(0x0000, 0).unwrap(), RESP_NOT_READY);
        let raw = session.serial_clock(cmd::NOP, 0).unwrap();
        assert_eq!(raw, RESP_BERR);
        assert_eq!(Response::decode(raw).check(), Err(Error::Berr));

        session.serial_clock(cmd::READ_WORD, 0).unwrap();
        session.serial_clock((RAM_BASE >> 16) as u16, 0).unwrap();
        session.serial_clock(RAM_BASE as u16, 0).unwrap();
        assert_eq!(session.serial_clock(cmd::NOP, 0).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_fast_mode_settles_dso() {
        let config = SessionConfig {
            interface: InterfaceKind::ColdFire,
            speed: 0,
            ..Default::default()
        };
        let mut fast = Session::open(ram_target(InterfaceKind::ColdFire), config).unwrap();
        fast.stop_chip().unwrap();
        let mut paced = open(ram_target(InterfaceKind::ColdFire));
        paced.stop_chip().unwrap();

        let frame_reads = |session: &mut Session<SimTarget>| {
            let before = session.port().status_reads();
            session.serial_clock(cmd::NOP, 0).unwrap();
            session.port().status_reads() - before
        };
        // One extra status sample: DSO is already low before the first bit
        assert_eq!(frame_reads(&mut fast), frame_reads(&mut paced) + 1);

        let elapsed = fast.port().elapsed_ns();
        fast.write_register(2, 0xCAFE_F00D).unwrap();
        assert_eq!(fast.read_register(2).unwrap(), 0xCAFE_F00D);
        let mut mem = fast.memory();
        mem.write_u32(RAM_BASE + 0x20, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u32(RAM_BASE + 0x20).unwrap(), 0x1234_5678);
        assert_eq!(mem.read_u16(RAM_BASE + 0x22).unwrap(), 0x5678);
        assert_eq!(fast.port().elapsed_ns(), elapsed);
    }

    #[test]
    fn test_reset_halts_with_bkpt() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));
        session.reset_chip().unwrap();
        assert!(session.port().is_frozen());
        session.write_register(9, 0x55AA).unwrap();
        assert_eq!(session.read_register(9).unwrap(), 0x55AA);

        session.restart_chip().unwrap();
        assert!(!session.port().is_frozen());
    }

    #[test]
    fn test_step_refreezes() {
        let mut session = open(ram_target(InterfaceKind::Pd));
        session.stop_chip().unwrap();
        session.step_chip().unwrap();
        session.step_chip().unwrap();
        assert_eq!(session.port().steps(), 2);
        assert!(session.port().is_frozen());
    }

    #[test]
    fn test_unavailable_target() {
        let mut session = open(ram_target(InterfaceKind::ColdFire));

        session.port_mut().set_held_in_reset(true);
        assert_eq!(session.serial_clock(cmd::NOP, 0), Err(Error::Reset));
        session.port_mut().set_held_in_reset(false);

        session.port_mut().set_power(false);
        assert_eq!(session.serial_clock(cmd::NOP, 0), Err(Error::Power));
        session.port_mut().set_power(true);

        session.port_mut().set_plugged(false);
        assert_eq!(session.serial_clock(cmd::NOP, 0), Err(Error::Cable));
        session.port_mut().set_plugged(true);

        assert!(session.serial_clock(cmd::NOP, 0).is_ok());
    }

    #[test]
    fn test_pd_cable_register_access() {
        let mut session = open(ram_target(InterfaceKind::Pd));
        session.write_register(15, 0x0000_FFFE).unwrap();
        assert_eq!(session.read_register(15).unwrap(), 0x0000_FFFE);
        assert!(session.port().elapsed_ns() > 0);
    }

    #[test]
    fn test_flash_through_bdm() {
        let bus = SimBus::new()
            .with(AmdFlash::by_name("Am29F040", Width::Byte, 0x80000).unwrap())
            .with(Ram::new(0, 0x1000));
        let mut session = open(SimTarget::new(InterfaceKind::ColdFire, bus));
        session.stop_chip().unwrap();

        let mut registry = AreaRegistry::new(AlgorithmOptions::default());
        let mut mem = session.memory();
        let area = registry.register_area(&mut mem, None, 0x80000).unwrap();
        assert_eq!((area.begin(), area.end()), (0x80000, 0xFFFFF));
        assert_eq!(area.family(), "29");

        let data = [0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11];
        assert_eq!(registry.write_memory(&mut mem, 0x80100, &data).into_result(), Ok(6));
        let mut back = [0u8; 6];
        registry.read_memory(&mut mem, 0x80100, &mut back).unwrap();
        assert_eq!(back, data);
        drop(mem);

        assert!(session.port().bus().writes().iter().any(|w| w.addr == 0x80100));
    }
}
