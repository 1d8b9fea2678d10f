//! 9-track magtape.
//!
//! Four drives behind one controller. Data moves either through the
//! selector channel (whole records per service) or byte-at-a-time through
//! the programmed buffer. Every positioning operation settles down in
//! three phases, each of which may interrupt: operation complete (EOF or
//! error code posted), then stop stage 1 (BUSY drops, EOM sets), then
//! stop stage 2 (NMTN sets, drive ready).

use super::storage::{TapeImage, TapeMotion, TapeRec};
use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

/// Commands
const MTC_SPCR: u32 = 0x11; /* backspace record */
const MTC_SKFR: u32 = 0x13; /* space file reverse */
const MTC_CLR: u32 = 0x20; /* clear */
const MTC_RD: u32 = 0x21;
const MTC_WR: u32 = 0x22;
const MTC_SKFF: u32 = 0x23; /* space file forward */
const MTC_WEOF: u32 = 0x30;
const MTC_REW: u32 = 0x38;
const MTC_MASK: u32 = 0x3F;
const MTC_STOP1: u32 = 0x40; /* stop, set EOM */
const MTC_STOP2: u32 = 0x80; /* stop, set NMTN */

/// Status bits
pub const STA_ERR: u32 = 0x80;
pub const STA_EOF: u32 = 0x40;
pub const STA_EOT: u32 = 0x20; /* unit flag */
pub const STA_NMTN: u32 = 0x10; /* unit flag */
const STA_UFLGS: u32 = STA_EOT | STA_NMTN;
const STA_MASK: u32 = STA_ERR | STA_EOF | STA_BSY | STA_EOM;
const SET_EX: u32 = STA_ERR | STA_EOF | STA_NMTN;

const BYTE_WAIT: u64 = 10;
const REC_WAIT: u64 = 1000;

const GOOD_CMD: [bool; 64] = {
    let mut t = [false; 64];
    t[MTC_SPCR as usize] = true;
    t[MTC_SKFR as usize] = true;
    t[MTC_RD as usize] = true;
    t[MTC_WR as usize] = true;
    t[MTC_SKFF as usize] = true;
    t[MTC_WEOF as usize] = true;
    t[MTC_REW as usize] = true;
    t
};

#[derive(Debug, Default)]
struct Drive {
    image: TapeImage,
    /// Unit status flags (EOT, NMTN)
    ust: u32,
    /// Command in progress, with the stop-phase bits
    ucmd: u32,
    arm: bool,
}

#[derive(Debug)]
pub struct Magtape {
    pub dno: u32,
    pub sch: u8,
    sta: u32,
    db: u32,
    /// Data transfer (read/write) in progress
    xfr: bool,
    buf: Vec<u8>,
    bptr: usize,
    blnt: usize,
    pub stop_ioe: bool,
    drv: [Drive; MT_NUMDR],
}

impl Magtape {
    pub fn new() -> Self {
        Self {
            dno: D_MT,
            sch: 0,
            sta: 0,
            db: 0,
            xfr: false,
            buf: Vec::new(),
            bptr: 0,
            blnt: 0,
            stop_ioe: true,
            drv: Default::default(),
        }
    }

    pub fn attach(&mut self, u: usize, recs: Vec<TapeRec>) -> Result<(), super::storage::AttachError> {
        self.drv[u].image.attach(recs)
    }

    /// Detach a drive; the unit goes not-ready
    pub fn detach(&mut self, u: usize) -> Vec<TapeRec> {
        self.drv[u].ust = 0;
        self.drv[u].image.detach()
    }

    pub fn image(&self, u: usize) -> &TapeImage {
        &self.drv[u].image
    }

    pub fn image_mut(&mut self, u: usize) -> &mut TapeImage {
        &mut self.drv[u].image
    }

    fn unit_of(&self, dev: u32) -> usize {
        (((dev - self.dno) / O_MT0) as usize).min(MT_NUMDR - 1)
    }

    pub fn io(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        let u = self.unit_of(dev);
        match op {
            IoOp::Adr => {
                cx.selch.adr(self.sch as usize, dev);
                BY
            }

            IoOp::Rd => {
                if self.xfr {
                    self.sta |= STA_BSY;
                }
                self.db
            }

            IoOp::Wd => {
                if self.xfr {
                    self.sta |= STA_BSY;
                    if self.drv[u].ucmd & (MTC_STOP1 | MTC_STOP2) != 0
                        && self.drv[u].ucmd & MTC_MASK == MTC_WR
                    {
                        // write overrun while stopping
                        self.sta |= STA_ERR;
                    }
                }
                self.db = dat & DMASK8;
                0
            }

            IoOp::Ss => {
                self.sta &= STA_MASK;
                let mut t = if self.drv[u].image.attached() {
                    self.sta | (self.drv[u].ust & STA_UFLGS)
                } else {
                    self.sta | STA_DU
                };
                if t & SET_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Oc => {
                self.drv[u].arm = cx.ints.int_chg(V_MT + u as u32, dat, self.drv[u].arm);
                let f = dat & MTC_MASK;
                if f == MTC_CLR {
                    self.reset(cx);
                    return 0;
                }
                if !self.drv[u].image.attached()
                    || !GOOD_CMD[f as usize]
                    || ((f == MTC_WR || f == MTC_WEOF) && self.drv[u].image.write_protected())
                {
                    return 0;
                }
                // a new command cancels any other drive's operation
                for i in 0..MT_NUMDR {
                    if cx.sched.is_active(UnitId::Mt(i as u8)) && self.drv[i].ucmd != MTC_REW {
                        cx.sched.cancel(UnitId::Mt(i as u8));
                        self.drv[i].ucmd = 0;
                    }
                }
                if cx.sched.is_active(UnitId::Mt(u as u8))
                    && self.drv[u].ucmd & (MTC_STOP1 | MTC_STOP2) == 0
                {
                    return 0;
                }
                self.sta = if f == MTC_WR || f == MTC_REW {
                    0
                } else {
                    STA_BSY
                };
                self.bptr = 0;
                self.blnt = 0;
                self.xfr = f == MTC_RD || f == MTC_WR;
                self.drv[u].ucmd = f;
                self.drv[u].ust = 0;
                cx.sched.activate(UnitId::Mt(u as u8), REC_WAIT);
                0
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    pub fn svc(&mut self, u: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let dev = self.dno + u as u32 * O_MT0;
        let sch = self.sch as usize;
        let vec = V_MT + u as u32;

        if !self.drv[u].image.attached() {
            self.drv[u].ucmd = 0;
            self.drv[u].ust = 0;
            self.xfr = false;
            self.sta = STA_ERR | STA_EOM;
            if self.drv[u].arm {
                cx.ints.set_int(vec);
            }
            return if self.stop_ioe {
                Err(StopReason::IoError)
            } else {
                Ok(())
            };
        }

        if self.drv[u].ucmd & MTC_STOP2 != 0 {
            // final settle: drive ready
            self.drv[u].ucmd = 0;
            self.drv[u].ust |= STA_NMTN;
            self.xfr = false;
            if self.drv[u].arm {
                cx.ints.set_int(vec);
            }
            return Ok(());
        }

        if self.drv[u].ucmd & MTC_STOP1 != 0 {
            // operation complete, motion winding down
            self.drv[u].ucmd |= MTC_STOP2;
            self.sta = (self.sta & !STA_BSY) | STA_EOM;
            if self.drv[u].arm {
                cx.ints.set_int(vec);
            }
            cx.sched.activate(UnitId::Mt(u as u8), REC_WAIT);
            return Ok(());
        }

        match self.drv[u].ucmd {
            MTC_REW => {
                self.drv[u].image.rewind();
                self.drv[u].ucmd = 0;
                self.drv[u].ust = STA_NMTN | STA_EOT;
                self.sta &= !STA_BSY;
                if self.drv[u].arm {
                    cx.ints.set_int(vec);
                }
                return Ok(());
            }

            MTC_RD => {
                if self.blnt == 0 {
                    match self.drv[u].image.read_fwd() {
                        TapeMotion::Data(d) => {
                            self.buf = d;
                            self.blnt = self.buf.len();
                        }
                        TapeMotion::Mark => {
                            self.sta |= STA_EOF;
                            if self.drv[u].arm {
                                cx.ints.set_int(vec);
                            }
                            if cx.selch.active(sch, dev) {
                                cx.selch.stop(sch, cx.ints);
                            }
                            return self.finish(u, cx);
                        }
                        _ => {
                            self.sta |= STA_ERR;
                            if cx.selch.active(sch, dev) {
                                cx.selch.stop(sch, cx.ints);
                            }
                            return self.finish(u, cx);
                        }
                    }
                }
                if cx.selch.active(sch, dev) {
                    let buf = std::mem::take(&mut self.buf);
                    let n = cx.selch.wrmem(sch, &buf, cx.mem, cx.ints);
                    self.buf = buf;
                    if cx.selch.active(sch, dev) {
                        // record shorter than the channel range
                        cx.selch.stop(sch, cx.ints);
                    } else if (n as usize) < self.blnt {
                        self.sta |= STA_ERR;
                    }
                } else if self.bptr < self.blnt {
                    if self.sta & STA_BSY == 0 {
                        // CPU never took the last byte
                        self.sta |= STA_ERR;
                    }
                    self.db = self.buf[self.bptr] as u32;
                    self.bptr += 1;
                    self.sta &= !STA_BSY;
                    if self.drv[u].arm {
                        cx.ints.set_int(vec);
                    }
                    cx.sched.activate(UnitId::Mt(u as u8), BYTE_WAIT);
                    return Ok(());
                }
            }

            MTC_WR => {
                if cx.selch.active(sch, dev) {
                    let mut buf = vec![0u8; 65536];
                    let n = cx.selch.rdmem(sch, &mut buf, cx.mem, cx.ints) as usize;
                    buf.truncate(n);
                    self.buf = buf;
                    self.bptr = n;
                    if cx.selch.active(sch, dev) {
                        cx.selch.stop(sch, cx.ints);
                    }
                } else if self.sta & STA_BSY != 0 {
                    self.buf.push(self.db as u8);
                    self.bptr += 1;
                    self.sta &= !STA_BSY;
                    if self.drv[u].arm {
                        cx.ints.set_int(vec);
                    }
                    cx.sched.activate(UnitId::Mt(u as u8), BYTE_WAIT);
                    return Ok(());
                }
                if self.bptr > 0 {
                    let rec = std::mem::take(&mut self.buf);
                    self.drv[u].image.write_rec(TapeRec::Data(rec));
                }
            }

            MTC_WEOF => {
                self.drv[u].image.write_rec(TapeRec::Mark);
                self.sta |= STA_EOF;
                if self.drv[u].arm {
                    cx.ints.set_int(vec);
                }
            }

            MTC_SKFF => loop {
                match self.drv[u].image.read_fwd() {
                    TapeMotion::Data(_) => continue,
                    TapeMotion::Mark => {
                        self.sta |= STA_EOF;
                        if self.drv[u].arm {
                            cx.ints.set_int(vec);
                        }
                        break;
                    }
                    _ => {
                        self.sta |= STA_ERR;
                        break;
                    }
                }
            },

            MTC_SKFR => loop {
                match self.drv[u].image.space_rev() {
                    TapeMotion::Data(_) => continue,
                    TapeMotion::Mark => {
                        self.sta |= STA_EOF;
                        if self.drv[u].arm {
                            cx.ints.set_int(vec);
                        }
                        break;
                    }
                    _ => {
                        self.drv[u].ust |= STA_EOT;
                        break;
                    }
                }
            },

            MTC_SPCR => {
                if self.drv[u].image.space_rev() == TapeMotion::BeginOfTape {
                    self.drv[u].ust |= STA_EOT;
                }
            }

            _ => {}
        }
        self.finish(u, cx)
    }

    /// Enter stop stage 1
    fn finish(&mut self, u: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        self.drv[u].ucmd |= MTC_STOP1;
        cx.sched.activate(UnitId::Mt(u as u8), REC_WAIT);
        Ok(())
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        self.sta = 0;
        self.db = 0;
        self.xfr = false;
        self.bptr = 0;
        self.blnt = 0;
        self.buf.clear();
        for u in 0..MT_NUMDR {
            cx.sched.cancel(UnitId::Mt(u as u8));
            cx.ints.clr_int(V_MT + u as u32);
            cx.ints.clr_enb(V_MT + u as u32);
            self.drv[u].arm = false;
            self.drv[u].ucmd = 0;
            self.drv[u].ust = (self.drv[u].ust & STA_UFLGS) | STA_NMTN;
        }
    }
}

impl Default for Magtape {
    fn default() -> Self {
        Self::new()
    }
}
