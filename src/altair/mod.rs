//! MITS Altair 8800 emulation.
//!
//! An Intel 8080 (or Z80-flagged variant) with up to 64 KiB of memory,
//! the 88-2SIO serial board on ports 0x10-0x13 (second port pair wired to
//! the paper tape reader/punch), the 88-DISK floppy controller on ports
//! 8-10, the front-panel switch register on port 0xFF, and the standard
//! boot PROM materialised at 0xFF00 when the program counter first lands
//! there.

pub mod cpu;
pub mod dsk;
pub mod sio;

use std::collections::BTreeSet;

use crate::sched::EventQueue;
use crate::{ConfigError, StopReason};

pub const MAXMEMSIZE: usize = 0x10000;
pub const ADDRMASK: u32 = 0xFFFF;

/// Scheduled units: the keyboard poll rides the event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltairUnit {
    Kbd,
}

const KBD_POLL_WAIT: u64 = 4000;

/// 8080 register file and flags. Each flag is a plain bool; PUSH PSW
/// assembles the architected flag byte on demand.
#[derive(Debug, Default)]
pub struct Cpu8080 {
    pub a: u8,
    pub bc: u16,
    pub de: u16,
    pub hl: u16,
    pub sp: u16,
    pub pc: u16,
    pub c: bool,
    pub z: bool,
    pub ac: bool,
    pub s: bool,
    pub p: bool,
    /// Interrupt enable latch
    pub inte: bool,
}

/// The Altair machine: CPU, memory, devices, event queue
#[derive(Debug)]
pub struct AltairSystem {
    pub cpu: Cpu8080,
    mem: Vec<u8>,
    memsize: usize,
    pub sched: EventQueue<AltairUnit>,
    pub sio: sio::Sio,
    pub dsk: dsk::Dsk,
    /// Front panel switch register
    pub sr: u16,
    /// Stop on an unimplemented opcode
    pub itrap: bool,
    /// Z80 flag semantics (parity cleared by arithmetic)
    pub z80: bool,
    breakpoints: BTreeSet<u16>,
    prom_loaded: bool,
}

impl AltairSystem {
    pub fn new() -> Self {
        let mut sys = Self {
            cpu: Cpu8080::default(),
            // uninstalled memory reads 0xFF
            mem: vec![0xFF; MAXMEMSIZE],
            memsize: MAXMEMSIZE,
            sched: EventQueue::new(),
            sio: sio::Sio::new(),
            dsk: dsk::Dsk::new(),
            sr: 0,
            itrap: false,
            z80: false,
            breakpoints: BTreeSet::new(),
            prom_loaded: false,
        };
        sys.reset();
        sys
    }

    /// Reset clears carry, zero, PC, and restarts the keyboard poll
    pub fn reset(&mut self) {
        self.cpu.c = false;
        self.cpu.z = false;
        self.cpu.pc = 0;
        self.sio.reset();
        self.sched.cancel(AltairUnit::Kbd);
        self.sched.activate(AltairUnit::Kbd, KBD_POLL_WAIT);
    }

    /// Change installed memory size: 4K steps up to 64K. Shrinking over
    /// non-0xFF contents requires `force`.
    pub fn set_memsize(&mut self, new: usize, force: bool) -> Result<(), ConfigError> {
        if new == 0 || new > MAXMEMSIZE || new & 0xFFF != 0 {
            return Err(ConfigError::BadMemorySize(new as u32));
        }
        if new < self.memsize && !force && self.mem[new..self.memsize].iter().any(|&b| b != 0xFF) {
            return Err(ConfigError::TruncateNonZero);
        }
        self.memsize = new;
        for b in &mut self.mem[new..] {
            *b = 0xFF;
        }
        Ok(())
    }

    pub fn read_mem(&self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    /// Writes beyond installed memory are dropped
    pub fn write_mem(&mut self, addr: u16, val: u8) {
        if (addr as usize) < self.memsize {
            self.mem[addr as usize] = val;
        }
    }

    /// Load a program image at `org`
    pub fn load(&mut self, org: u16, image: &[u8]) {
        for (i, &b) in image.iter().enumerate() {
            self.write_mem(org.wrapping_add(i as u16), b);
        }
    }

    pub fn set_breakpoint(&mut self, pc: u16) {
        self.breakpoints.insert(pc);
    }

    pub fn clear_breakpoint(&mut self, pc: u16) {
        self.breakpoints.remove(&pc);
    }

    /// Port dispatch for IN/OUT. Port 0xFF reads the high switch
    /// register byte; unassigned ports read 0xFF.
    pub fn port_io(&mut self, port: u8, write: bool, data: u8) -> u8 {
        match port {
            0x08 => self.dsk.p08(write, data),
            0x09 => self.dsk.p09(write, data),
            0x0A => self.dsk.p0a(write, data),
            0x10 => self.sio.s0_status(write, data),
            0x11 => self.sio.s0_data(write, data),
            0x12 => self.sio.s1_status(write, data),
            0x13 => self.sio.s1_data(write, data),
            0xFF => {
                if write {
                    0
                } else {
                    (self.sr >> 8) as u8
                }
            }
            _ => {
                if write {
                    0
                } else {
                    0xFF
                }
            }
        }
    }

    fn svc(&mut self, u: AltairUnit) {
        match u {
            AltairUnit::Kbd => {
                self.sio.poll_kbd();
                self.sched.activate(AltairUnit::Kbd, KBD_POLL_WAIT);
            }
        }
    }

    /// Run for up to `limit` instructions
    pub fn run(&mut self, limit: u64) -> StopReason {
        let end = self.sched.gtime() + limit;
        loop {
            if self.sched.gtime() >= end {
                return StopReason::Complete;
            }
            while let Some(u) = self.sched.next_due() {
                self.svc(u);
            }
            if self.breakpoints.contains(&self.cpu.pc) {
                return StopReason::Breakpoint;
            }
            if self.cpu.pc == 0xFF00 && !self.prom_loaded {
                // first arrival at the boot PROM address materialises it
                for (i, &b) in cpu::BOOT_ROM.iter().enumerate() {
                    self.mem[0xFF00 + i] = b;
                }
                self.prom_loaded = true;
            }
            self.sched.tick();
            if let Some(reason) = self.step() {
                return reason;
            }
        }
    }
}

impl Default for AltairSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_with_carry_out() {
        let mut sys = AltairSystem::new();
        // ADD B with A=0xFF, B=1 wraps to zero with carry
        sys.cpu.a = 0xFF;
        sys.cpu.bc = 0x0100;
        sys.load(0x100, &[0x80]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.a, 0x00);
        assert!(sys.cpu.c);
        assert!(sys.cpu.z);
        assert!(!sys.cpu.s);
        assert!(sys.cpu.p); // even parity
        assert!(!sys.cpu.ac);
        assert_eq!(sys.cpu.pc, 0x101);
    }

    #[test]
    fn test_daa_adjusts_bcd() {
        let mut sys = AltairSystem::new();
        sys.cpu.a = 0x11;
        sys.cpu.ac = true;
        sys.load(0x100, &[0x27]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.a, 0x17);
        assert!(!sys.cpu.c);

        // high-nibble adjust with carry out
        let mut sys = AltairSystem::new();
        sys.cpu.a = 0x9B;
        sys.load(0x100, &[0x27]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.a, 0x01);
        assert!(sys.cpu.c);
        assert!(sys.cpu.ac);
    }

    #[test]
    fn test_halt_stops_and_rewinds() {
        let mut sys = AltairSystem::new();
        sys.load(0x100, &[0x00, 0x76]);
        sys.cpu.pc = 0x100;
        assert_eq!(sys.run(100), StopReason::Halt);
        // continuing re-executes the HALT
        assert_eq!(sys.cpu.pc, 0x101);
        assert_eq!(sys.run(100), StopReason::Halt);
    }

    #[test]
    fn test_push_pop_psw_roundtrip() {
        let mut sys = AltairSystem::new();
        sys.cpu.a = 0x5A;
        sys.cpu.s = true;
        sys.cpu.p = true;
        sys.cpu.c = true;
        let word = sys.pair_for_push(3);
        // scramble, then restore
        sys.cpu.a = 0;
        sys.cpu.s = false;
        sys.cpu.z = true;
        sys.cpu.p = false;
        sys.cpu.c = false;
        sys.pair_from_pop(3, word);
        assert_eq!(sys.pair_for_push(3), word);
        assert_eq!(sys.cpu.a, 0x5A);
        assert!(sys.cpu.s && sys.cpu.p && sys.cpu.c && !sys.cpu.z);
    }

    #[test]
    fn test_call_ret_stack() {
        let mut sys = AltairSystem::new();
        sys.cpu.sp = 0x2000;
        // CALL 0x200; at 0x200: RET
        sys.load(0x100, &[0xCD, 0x00, 0x02]);
        sys.load(0x200, &[0xC9]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.pc, 0x200);
        assert_eq!(sys.cpu.sp, 0x1FFE);
        sys.step();
        assert_eq!(sys.cpu.pc, 0x103);
        assert_eq!(sys.cpu.sp, 0x2000);
    }

    #[test]
    fn test_conditional_jump() {
        let mut sys = AltairSystem::new();
        // JNZ 0x300 with Z set falls through
        sys.cpu.z = true;
        sys.load(0x100, &[0xC2, 0x00, 0x03]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.pc, 0x103);
        // with Z clear it branches
        sys.cpu.z = false;
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.pc, 0x300);
    }

    #[test]
    fn test_switch_register_port() {
        let mut sys = AltairSystem::new();
        sys.sr = 0xAB00;
        // IN 0xFF
        sys.load(0x100, &[0xDB, 0xFF]);
        sys.cpu.pc = 0x100;
        sys.step();
        assert_eq!(sys.cpu.a, 0xAB);
    }

    #[test]
    fn test_console_io() {
        let mut sys = AltairSystem::new();
        sys.sio.queue_input(b"A");
        // spin on receive-ready, then echo the byte and halt
        sys.load(
            0x100,
            &[
                0xDB, 0x10, // IN 0x10
                0xE6, 0x01, // ANI 1
                0xCA, 0x00, 0x01, // JZ 0x100
                0xDB, 0x11, // IN 0x11
                0xD3, 0x11, // OUT 0x11
                0x76, // HLT
            ],
        );
        sys.cpu.pc = 0x100;
        assert_eq!(sys.run(100_000), StopReason::Halt);
        assert_eq!(sys.sio.take_output(), vec![0x41]);
    }

    #[test]
    fn test_boot_prom_materialises() {
        let mut sys = AltairSystem::new();
        assert_eq!(sys.read_mem(0xFF00), 0xFF);
        sys.cpu.pc = 0xFF00;
        sys.run(1);
        assert_eq!(sys.read_mem(0xFF00), 0o041);
        assert_eq!(sys.read_mem(0xFF10), 0o303);
    }

    #[test]
    fn test_memory_truncation_guard() {
        let mut sys = AltairSystem::new();
        sys.write_mem(0x8000, 0x42);
        assert_eq!(
            sys.set_memsize(0x8000, false),
            Err(ConfigError::TruncateNonZero)
        );
        sys.set_memsize(0x8000, true).unwrap();
        // uninstalled memory reads 0xFF and drops writes
        assert_eq!(sys.read_mem(0x8000), 0xFF);
        sys.write_mem(0x8000, 0x42);
        assert_eq!(sys.read_mem(0x8000), 0xFF);
    }

    #[test]
    fn test_disk_sector_roundtrip() {
        let mut sys = AltairSystem::new();
        sys.dsk.attach(0, vec![0; dsk::DSK_SIZE]);
        // select drive 0
        sys.port_io(0x08, true, 0x00);
        // load head
        sys.port_io(0x09, true, 0x04);
        // wait for sector 5
        loop {
            let pos = sys.port_io(0x09, false, 0);
            if (pos >> 1) & 0x1F == 5 {
                break;
            }
        }
        // write sequence: 137 bytes + terminator
        sys.port_io(0x09, true, 0x80);
        for i in 0..137u32 {
            sys.port_io(0x0A, true, i as u8);
        }
        sys.port_io(0x0A, true, 0); // flush
        // step in and back out to force a reselect, then read it back
        loop {
            let pos = sys.port_io(0x09, false, 0);
            if (pos >> 1) & 0x1F == 5 {
                break;
            }
        }
        let first = sys.port_io(0x0A, false, 0);
        assert_eq!(first, 0);
        for i in 1..137u8 {
            assert_eq!(sys.port_io(0x0A, false, 0), i);
        }
        let img = sys.dsk.detach(0).unwrap();
        assert_eq!(img[5 * dsk::DSK_SECTSIZE], 0);
        assert_eq!(img[5 * dsk::DSK_SECTSIZE + 42], 42);
    }

    #[test]
    fn test_tape_reader_port() {
        let mut sys = AltairSystem::new();
        sys.sio.attach_reader(vec![9, 8, 7]);
        assert_eq!(sys.port_io(0x12, false, 0), 0x03);
        assert_eq!(sys.port_io(0x13, false, 0), 9);
        assert_eq!(sys.port_io(0x13, false, 0), 8);
        assert_eq!(sys.port_io(0x13, false, 0), 7);
        // end of tape latches not-ready
        sys.port_io(0x13, false, 0);
        assert_eq!(sys.port_io(0x12, false, 0), 0x02);
    }
}
