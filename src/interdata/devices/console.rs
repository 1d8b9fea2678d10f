//! Console teletype.
//!
//! One keyboard unit and one printer unit behind a single device number.
//! The command byte flips the controller between read and write mode; the
//! BUSY bit tracks whichever side is selected. The keyboard poll rides on
//! the line-frequency clock so a single tick serves every poller.
//!
//! The terminal front end is not the core's business: the embedder queues
//! input bytes (or a break) and drains the output buffer.

use std::collections::VecDeque;

use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const STA_OVR: u32 = 0x80; /* overrun */
pub const STA_BRK: u32 = 0x20; /* break */
const STA_MASK: u32 = STA_OVR | STA_BRK | STA_BSY;
const SET_EX: u32 = STA_OVR | STA_BRK;

const CMD_V_FDPX: u32 = 4; /* full/half duplex */
const CMD_V_RD: u32 = 2; /* read/write */

const KBD_WAIT: u64 = 500;
const OUT_WAIT: u64 = 100;

#[derive(Debug)]
pub struct Console {
    pub dno: u32,
    sta: u32,
    fdpx: bool,
    rd: bool,
    chp: bool,
    arm: bool,
    ibuf: u32,
    obuf: u32,
    /// Bytes waiting to be polled in from the embedder
    input: VecDeque<u8>,
    /// Pending break signal
    brk: bool,
    /// Everything the printer side has emitted
    output: Vec<u8>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            dno: D_TT,
            sta: STA_BSY,
            fdpx: true,
            rd: true,
            chp: false,
            arm: false,
            ibuf: 0,
            obuf: 0,
            input: VecDeque::new(),
            brk: false,
            output: Vec::new(),
        }
    }

    /// Embedder: queue keyboard input
    pub fn queue_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Embedder: signal a line break on the next poll
    pub fn queue_break(&mut self) {
        self.brk = true;
    }

    /// Embedder: drain printed output
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => BY,

            IoOp::Oc => {
                let old_rd = self.rd;
                self.arm = cx.ints.int_chg(V_TT, dat, self.arm);
                self.fdpx = crate::interdata::io::io_2b(dat, CMD_V_FDPX, self.fdpx);
                self.rd = crate::interdata::io::io_2b(dat, CMD_V_RD, self.rd);
                if self.rd != old_rd {
                    let ready = if self.rd {
                        self.chp
                    } else {
                        !cx.sched.is_active(UnitId::Tto)
                    };
                    if ready {
                        self.sta = 0;
                        if self.arm {
                            cx.ints.set_int(V_TT);
                        }
                    } else {
                        self.sta = STA_BSY;
                        cx.ints.clr_int(V_TT);
                    }
                } else {
                    self.sta &= !STA_OVR;
                }
                0
            }

            IoOp::Rd => {
                self.chp = false;
                if self.rd {
                    self.sta = (self.sta | STA_BSY) & !STA_OVR;
                }
                self.ibuf & 0xFF
            }

            IoOp::Wd => {
                self.obuf = dat & 0xFF;
                if !self.rd {
                    self.sta |= STA_BSY;
                }
                cx.sched.activate(UnitId::Tto, OUT_WAIT);
                0
            }

            IoOp::Ss => {
                let mut t = self.sta & STA_MASK;
                if t & SET_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    /// Keyboard poll service: continue the poll on the clock tick, then
    /// take one byte (or a break) from the embedder's queue.
    pub fn svc_in(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let next = cx.sched.cosched(UnitId::Lfc, KBD_WAIT);
        cx.sched.activate(UnitId::Tti, next);
        self.sta &= !STA_BRK;
        let brk = std::mem::take(&mut self.brk);
        if !brk && self.input.is_empty() {
            return Ok(());
        }
        if self.rd {
            self.sta &= !STA_BSY;
            if self.arm {
                cx.ints.set_int(V_TT);
            }
            if self.chp {
                self.sta |= STA_OVR;
            }
        }
        self.chp = true;
        if brk {
            self.sta |= STA_BRK;
            self.ibuf = 0;
        } else {
            self.ibuf = self.input.pop_front().unwrap() as u32;
            if !self.fdpx {
                // half duplex: echo
                self.output.push(self.ibuf as u8);
            }
        }
        Ok(())
    }

    /// Printer service: emit the buffered byte, drop BUSY in write mode
    pub fn svc_out(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        self.output.push(self.obuf as u8);
        if !self.rd {
            self.sta &= !STA_BSY;
            if self.arm {
                cx.ints.set_int(V_TT);
            }
        }
        Ok(())
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        let next = cx.sched.cosched(UnitId::Lfc, KBD_WAIT);
        cx.sched.activate(UnitId::Tti, next);
        cx.sched.cancel(UnitId::Tto);
        self.rd = true;
        self.fdpx = true;
        self.chp = false;
        self.brk = false;
        self.sta = STA_BSY;
        cx.ints.clr_int(V_TT);
        cx.ints.clr_enb(V_TT);
        self.arm = false;
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
