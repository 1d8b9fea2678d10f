//! Clocks: line-frequency tick and precision interval clock.
//!
//! The LFC is the system's free-running tick; the console and async line
//! polls co-schedule against it. The PIC counts a programmable interval
//! at one of four decade rates, interpolating the current count on
//! read-back and overflowing into an interrupt when armed.

use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

/// Nominal instructions per line-frequency tick
pub const LFC_WAIT: u64 = 8333;

#[derive(Debug)]
pub struct Lfc {
    pub dno: u32,
    arm: bool,
    /// Ticks per second (50 Hz = 100, 60 Hz = 120 half-cycles)
    pub tps: u32,
    pub poll: u64,
}

impl Lfc {
    pub fn new() -> Self {
        Self {
            dno: D_LFC,
            arm: false,
            tps: 120,
            poll: LFC_WAIT,
        }
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => BY,
            IoOp::Oc => {
                self.arm = cx.ints.int_chg(V_LFC, dat, self.arm);
                0
            }
            IoOp::Ss => 0x80,
            _ => 0,
        }
    }

    pub fn svc(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        cx.sched.activate(UnitId::Lfc, self.poll);
        if self.arm {
            cx.ints.set_int(V_LFC);
        }
        Ok(())
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        cx.sched.activate(UnitId::Lfc, self.poll);
        cx.ints.clr_int(V_LFC);
        cx.ints.clr_enb(V_LFC);
        self.arm = false;
    }
}

impl Default for Lfc {
    fn default() -> Self {
        Self::new()
    }
}

/* Precision clock */

const STA_OVF: u32 = 0x08; /* overflow */
const CMD_STRT: u32 = 0x20; /* start */
const PIC_V_RATE: u32 = 12;
const PIC_M_RATE: u32 = 0xF;
const PIC_RATE: u32 = PIC_M_RATE << PIC_V_RATE;
const PIC_CTR: u32 = 0x0FFF;

/// Instruction delay per count at each mapped rate
const PIC_TIME: [u64; 4] = [1, 10, 100, 1000];
/// Rate field to decade map
const PIC_MAP: [usize; 16] = [0, 0, 1, 0, 2, 0, 1, 0, 3, 0, 1, 0, 2, 0, 1, 0];

fn get_rate(x: u32) -> u32 {
    (x >> PIC_V_RATE) & PIC_M_RATE
}

#[derive(Debug)]
pub struct Pic {
    pub dno: u32,
    /// Host-written interval (rate + count)
    db: u32,
    /// Reset count (loaded on start and on each overflow)
    ric: u32,
    /// Current count
    cic: i32,
    ovf: bool,
    rdp: bool,
    wdp: bool,
    arm: bool,
    /// gtime at last (re)schedule, for count interpolation
    save: u64,
}

impl Pic {
    pub fn new() -> Self {
        Self {
            dno: D_PIC,
            db: 0,
            ric: 0,
            cic: 0,
            ovf: false,
            rdp: false,
            wdp: false,
            arm: false,
            save: 0,
        }
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => HW,

            IoOp::Rh => {
                self.rdp = false;
                self.read_cic(cx)
            }

            IoOp::Rd => {
                let t = self.read_cic(cx);
                let t = if self.rdp { t & DMASK8 } else { (t >> 8) & DMASK8 };
                self.rdp = !self.rdp;
                t
            }

            IoOp::Wh => {
                self.wdp = false;
                self.db = dat & DMASK16;
                0
            }

            IoOp::Wd => {
                if self.wdp {
                    self.db = (self.db & 0xFF00) | (dat & 0xFF);
                } else {
                    self.db = (self.db & 0xFF) | ((dat & 0xFF) << 8);
                }
                self.wdp = !self.wdp;
                0
            }

            IoOp::Ss => {
                if self.ovf {
                    self.ovf = false;
                    cx.ints.clr_int(V_PIC);
                    STA_OVF
                } else {
                    0
                }
            }

            IoOp::Oc => {
                self.arm = cx.ints.int_chg(V_PIC, dat, self.arm);
                if dat & CMD_STRT != 0 {
                    self.ric = self.db;
                    self.cic = (self.ric & PIC_CTR) as i32;
                    self.ovf = false;
                    cx.sched.cancel(UnitId::Pic);
                    self.rdp = false;
                    self.wdp = false;
                    if self.ric & PIC_RATE != 0 {
                        self.sched(cx.sched);
                    }
                }
                0
            }
        }
    }

    /// Interval expired: overflow, reload from the host buffer, reschedule
    pub fn svc(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        if self.wdp {
            // host was mid-write: flag a broken interval
            self.ovf = true;
        }
        if self.arm {
            cx.ints.set_int(V_PIC);
        }
        self.ric = self.db;
        self.cic = (self.ric & PIC_CTR) as i32;
        if self.ric & PIC_RATE == 0 {
            return Ok(());
        }
        self.sched(cx.sched);
        Ok(())
    }

    fn sched(&mut self, sched: &mut crate::sched::EventQueue<UnitId>) {
        self.save = sched.gtime();
        let r = PIC_MAP[get_rate(self.ric) as usize];
        let intv = if self.cic > 0 { self.cic as u64 } else { 1 };
        let mut t = PIC_TIME[r] * intv;
        if t == 1 {
            t += 1;
        }
        sched.activate(UnitId::Pic, t);
    }

    /// Interpolated current count
    fn read_cic(&self, cx: &IoCtx) -> u32 {
        if cx.sched.is_active(UnitId::Pic) {
            let delta = cx.sched.gtime() - self.save;
            let tm = PIC_TIME[PIC_MAP[get_rate(self.ric) as usize]];
            let elapsed = (delta / tm) as i32;
            if elapsed >= self.cic {
                return 0;
            }
            return (self.cic - elapsed) as u32;
        }
        self.cic as u32
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        cx.sched.cancel(UnitId::Pic);
        self.ric = 0;
        self.cic = 0;
        self.db = 0;
        self.ovf = false;
        self.rdp = false;
        self.wdp = false;
        cx.ints.clr_int(V_PIC);
        cx.ints.clr_enb(V_PIC);
        self.arm = false;
    }
}

impl Default for Pic {
    fn default() -> Self {
        Self::new()
    }
}
