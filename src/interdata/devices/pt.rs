//! Paper tape reader and punch.
//!
//! One device number with a reader unit and a punch unit; the command
//! byte's read/write bit selects which side drives the BUSY handshake.
//! The reader can free-run (slew) or step one frame per data read, and
//! reports end-of-tape as device-unavailable.

use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::interdata::io::io_2b;
use crate::StopReason;

pub const STA_OVR: u32 = 0x80; /* overrun */
pub const STA_NMTN: u32 = 0x10; /* no motion */
const STA_MASK: u32 = STA_BSY | STA_OVR | STA_DU;
const SET_EX: u32 = STA_OVR | STA_NMTN;

const CMD_V_RUN: u32 = 4;
const CMD_V_SLEW: u32 = 2;
const CMD_V_RD: u32 = 0;

const RD_WAIT: u64 = 100;
const WR_WAIT: u64 = 100;

#[derive(Debug)]
pub struct PaperTape {
    pub dno: u32,
    sta: u32,
    run: bool,
    slew: bool,
    rd: bool,
    chp: bool,
    arm: bool,
    rbuf: u32,
    pbuf: u32,
    pub stop_ioe: bool,
    /// Reader tape and position
    tape: Option<Vec<u8>>,
    rpos: usize,
    /// Punch output
    punch: Option<Vec<u8>>,
}

impl PaperTape {
    pub fn new() -> Self {
        Self {
            dno: D_PT,
            sta: STA_BSY,
            run: false,
            slew: false,
            rd: true,
            chp: false,
            arm: false,
            rbuf: 0,
            pbuf: 0,
            stop_ioe: false,
            tape: None,
            rpos: 0,
            punch: None,
        }
    }

    pub fn attach_reader(&mut self, tape: Vec<u8>) {
        self.tape = Some(tape);
        self.rpos = 0;
    }

    pub fn detach_reader(&mut self) -> Option<Vec<u8>> {
        self.tape.take()
    }

    pub fn attach_punch(&mut self) {
        self.punch = Some(Vec::new());
    }

    pub fn detach_punch(&mut self) -> Option<Vec<u8>> {
        self.punch.take()
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => BY,

            IoOp::Oc => {
                let old_rd = self.rd;
                let old_run = self.run;
                self.arm = cx.ints.int_chg(V_PT, dat, self.arm);
                self.rd = io_2b(dat, CMD_V_RD, self.rd);
                if old_rd != self.rd {
                    self.sta &= !STA_OVR;
                    let active = cx
                        .sched
                        .is_active(if self.rd { UnitId::Ptr } else { UnitId::Ptp });
                    if active {
                        self.sta |= STA_BSY;
                        cx.ints.clr_int(V_PT);
                    } else {
                        self.sta &= !STA_BSY;
                        if self.arm {
                            cx.ints.set_int(V_PT);
                        }
                    }
                }
                if self.rd {
                    self.run = io_2b(dat, CMD_V_RUN, self.run);
                    self.slew = io_2b(dat, CMD_V_SLEW, self.slew);
                    if self.run {
                        if !old_run {
                            cx.sched.activate(UnitId::Ptr, RD_WAIT);
                            self.sta &= !STA_DU;
                        }
                    } else {
                        cx.sched.cancel(UnitId::Ptr);
                    }
                } else {
                    self.sta &= !STA_DU;
                }
                0
            }

            IoOp::Rd => {
                if self.run && !self.slew {
                    cx.sched.activate(UnitId::Ptr, RD_WAIT);
                    self.sta &= !STA_DU;
                }
                self.chp = false;
                if self.rd {
                    self.sta |= STA_BSY;
                }
                self.rbuf & 0xFF
            }

            IoOp::Wd => {
                self.pbuf = dat & DMASK8;
                if !self.rd {
                    self.sta |= STA_BSY;
                }
                cx.sched.activate(UnitId::Ptp, WR_WAIT);
                0
            }

            IoOp::Ss => {
                let mut t = self.sta & STA_MASK;
                if self.rd && !self.run && !cx.sched.is_active(UnitId::Ptr) {
                    t |= STA_NMTN;
                }
                let att = if self.rd {
                    self.tape.is_some()
                } else {
                    self.punch.is_some()
                };
                if !att {
                    t |= STA_DU;
                }
                if t & SET_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    /// Reader frame service
    pub fn svc_rd(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let Some(tape) = &self.tape else {
            return if self.stop_ioe {
                Err(StopReason::IoError)
            } else {
                Ok(())
            };
        };
        if self.rd {
            self.sta &= !STA_BSY;
            if self.arm {
                cx.ints.set_int(V_PT);
            }
            if self.chp {
                self.sta |= STA_OVR;
            }
        }
        self.chp = true;
        match tape.get(self.rpos) {
            Some(&b) => {
                self.rbuf = b as u32;
                self.rpos += 1;
                if self.slew {
                    cx.sched.activate(UnitId::Ptr, RD_WAIT);
                }
                Ok(())
            }
            None => {
                // end of tape
                self.sta |= STA_DU;
                Ok(())
            }
        }
    }

    /// Punch frame service
    pub fn svc_wr(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let pbuf = self.pbuf as u8;
        let Some(punch) = &mut self.punch else {
            return if self.stop_ioe {
                Err(StopReason::IoError)
            } else {
                Ok(())
            };
        };
        if !self.rd {
            self.sta &= !STA_BSY;
            if self.arm {
                cx.ints.set_int(V_PT);
            }
        }
        punch.push(pbuf);
        Ok(())
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        cx.sched.cancel(UnitId::Ptr);
        cx.sched.cancel(UnitId::Ptp);
        self.rd = true;
        self.chp = false;
        self.run = false;
        self.slew = false;
        self.sta = STA_BSY;
        cx.ints.clr_int(V_PT);
        cx.ints.clr_enb(V_PT);
        self.arm = false;
    }
}

impl Default for PaperTape {
    fn default() -> Self {
        Self::new()
    }
}
