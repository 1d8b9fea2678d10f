//! Interdata 16b and 32b family emulation.
//!
//! The two CPU generations share everything below the interpreter: the
//! physical memory store, the interrupt controller, the selector
//! channels, the event scheduler, and the peripheral complement. That
//! shared plumbing is the `IdFabric`; `cpu16` and `cpu32` each own one
//! and layer their register files, relocation, and instruction semantics
//! on top.

pub mod defs;
pub mod devices;
pub mod fp;
pub mod io;
pub mod mem;
pub mod selch;

pub mod cpu16;
pub mod cpu32;

#[cfg(test)]
mod tests16;
#[cfg(test)]
mod tests32;

use defs::*;
use devices::{DevSet, IoCtx, SvcCtx, UnitId};
use io::{DevId, DevMap, Dib, IntCtl};
use mem::IdMemory;
use selch::SelCh;

use crate::sched::EventQueue;
use crate::{ConfigError, StopReason};

/// Display register and switch register, the front-panel device at
/// device number 1. Write position wraps at 4 bytes on the small
/// machines and 8 on the others; the switch register reads out through a
/// byte flip-flop.
#[derive(Debug)]
pub struct Display {
    pub dno: u32,
    pub sr: u32,
    pub dr: u32,
    pub drx: u32,
    drmod: bool,
    srpos: u32,
    drpos: u32,
    /// 8-position display write counter (7/16 up and all 32b machines)
    pub wide_pos: bool,
}

impl Display {
    pub fn new(wide_pos: bool) -> Self {
        Self {
            dno: D_DS,
            sr: 0,
            dr: 0,
            drx: 0,
            drmod: false,
            srpos: 0,
            drpos: 0,
            wide_pos,
        }
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32) -> u32 {
        match op {
            IoOp::Adr => {
                if !self.drmod {
                    self.drpos = 0;
                    self.srpos = 0;
                }
                BY
            }

            IoOp::Oc => {
                match dat & 0xC0 {
                    0x40 => {
                        // incrementing mode
                        self.drmod = true;
                        self.drpos = 0;
                        self.srpos = 0;
                    }
                    0x80 => self.drmod = false,
                    _ => {}
                }
                0
            }

            IoOp::Wd => {
                if self.drpos < 4 {
                    self.dr = (self.dr & !(DMASK8 << (self.drpos * 8)))
                        | ((dat & DMASK8) << (self.drpos * 8));
                } else if self.drpos == 4 {
                    self.drx = dat & DMASK8;
                }
                self.drpos = (self.drpos + 1) & if self.wide_pos { 7 } else { 3 };
                0
            }

            IoOp::Rd => {
                let t = (self.sr >> (self.srpos * 8)) & DMASK8;
                self.srpos ^= 1;
                t
            }

            IoOp::Ss => 0x80,

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    pub fn reset(&mut self) {
        self.dr = 0;
        self.drmod = false;
        self.drpos = 0;
        self.srpos = 0;
    }
}

/// Everything below the interpreter: memory, interrupts, channels, the
/// event queue, and the devices, plus the dispatch tables binding them.
#[derive(Debug)]
pub struct IdFabric {
    pub mem: IdMemory,
    pub ints: IntCtl,
    pub selch: SelCh,
    pub sched: EventQueue<UnitId>,
    pub devs: DevSet,
    pub display: Display,
    pub dmap: DevMap,
}

impl IdFabric {
    pub fn new(pawidth: u32, maxmem: u32, num_selch: usize, wide_display: bool) -> Self {
        Self {
            mem: IdMemory::new(maxmem),
            ints: IntCtl::new(),
            selch: SelCh::new(pawidth, num_selch),
            sched: EventQueue::new(),
            devs: DevSet::new(),
            display: Display::new(wide_display),
            dmap: DevMap::empty(),
        }
    }

    /// Build the dispatch tables from every device's DIB, checking for
    /// device-number conflicts. A precondition for every CPU run.
    pub fn init_devtab(&mut self) -> Result<(), ConfigError> {
        let mut dibs = vec![Dib {
            dno: self.display.dno,
            sch: None,
            irq: V_DS,
            tplte: vec![],
            id: DevId::Display,
        }];
        dibs.extend(self.devs.dibs(self.selch.num_channels()));
        let (dmap, schtab) = io::devtab_init(&dibs, &mut self.ints)?;
        self.dmap = dmap;
        self.selch.set_dev_map(schtab);
        Ok(())
    }

    /// Device accessible: present in the dispatch table and not claimed
    /// by a running selector channel
    pub fn dev_acc(&self, dev: u32) -> bool {
        self.dmap.present(dev) && !self.selch.blocked(dev)
    }

    /// Programmed-I/O dispatch
    pub fn dev_io(&mut self, dev: u32, op: IoOp, dat: u32) -> u32 {
        let dev = dev & DEV_MAX;
        let Some(id) = self.dmap.get(dev) else {
            return 0;
        };
        if id == DevId::SelCh {
            let ch = (dev.wrapping_sub(D_SCH) & 0x3) as usize;
            if op == IoOp::Ss && !self.selch.go(ch) && !self.selch.ssta(ch) {
                // channel idle: report the bound device's status
                let sdv = self.selch.dev(ch);
                if !self.dmap.present(sdv) {
                    return CC_V;
                }
                self.dev_io(sdv, IoOp::Adr, 0);
                return self.dev_io(sdv, IoOp::Ss, 0) & !STA_BSY;
            }
            return self.selch.io(ch, op, dat, &mut self.ints);
        }
        if id == DevId::Display {
            return self.display.io(dev, op, dat);
        }
        let cx = &mut IoCtx {
            ints: &mut self.ints,
            sched: &mut self.sched,
            selch: &mut self.selch,
        };
        match id {
            DevId::Tt => self.devs.tt.io(dev, op, dat, cx),
            DevId::Pt => self.devs.pt.io(dev, op, dat, cx),
            DevId::Pas => self.devs.pas.io(dev, op, dat, cx),
            DevId::Lpt => self.devs.lpt.io(dev, op, dat, cx),
            DevId::Pic => self.devs.pic.io(dev, op, dat, cx),
            DevId::Lfc => self.devs.lfc.io(dev, op, dat, cx),
            DevId::Mt => self.devs.mt.io(dev, op, dat, cx),
            DevId::Dp => self.devs.dp.io(dev, op, dat, cx),
            DevId::Idc => self.devs.idc.io(dev, op, dat, cx),
            DevId::Fd => self.devs.fd.io(dev, op, dat, cx),
            DevId::Display | DevId::SelCh => unreachable!(),
        }
    }

    /// Unit service dispatch, fired by the scheduler between instructions
    pub fn svc(&mut self, u: UnitId) -> Result<(), StopReason> {
        let mut cx = SvcCtx {
            ints: &mut self.ints,
            sched: &mut self.sched,
            selch: &mut self.selch,
            mem: &mut self.mem,
        };
        match u {
            UnitId::Tti => self.devs.tt.svc_in(&mut cx),
            UnitId::Tto => self.devs.tt.svc_out(&mut cx),
            UnitId::Lfc => self.devs.lfc.svc(&mut cx),
            UnitId::Pic => self.devs.pic.svc(&mut cx),
            UnitId::Lpt => self.devs.lpt.svc(&mut cx),
            UnitId::Ptr => self.devs.pt.svc_rd(&mut cx),
            UnitId::Ptp => self.devs.pt.svc_wr(&mut cx),
            UnitId::PasRcv(n) => self.devs.pas.svc_rcv(n as usize, &mut cx),
            UnitId::PasXmt(n) => self.devs.pas.svc_xmt(n as usize, &mut cx),
            UnitId::Mt(n) => self.devs.mt.svc(n as usize, &mut cx),
            UnitId::Dp(n) => self.devs.dp.svc(n as usize, &mut cx),
            UnitId::Idc(n) => self.devs.idc.svc(n as usize, &mut cx),
            UnitId::Fd => self.devs.fd.svc(&mut cx),
        }
    }

    /// Drain every due event. Service routines re-arm their own units.
    pub fn process_events(&mut self) -> Result<(), StopReason> {
        while let Some(u) = self.sched.next_due() {
            self.svc(u)?;
        }
        Ok(())
    }

    /// Power-on reset of channels and devices
    pub fn reset_io(&mut self) {
        let mut cx = IoCtx {
            ints: &mut self.ints,
            sched: &mut self.sched,
            selch: &mut self.selch,
        };
        self.devs.reset_all(&mut cx);
        self.selch.reset(&mut self.ints);
        self.display.reset();
    }
}
