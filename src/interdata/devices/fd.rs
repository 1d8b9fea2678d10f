//! Floppy disk.
//!
//! Sectors are addressed by 1-based logical record number (LRN); the
//! command byte carries unit and function, the LRN arrives as two data
//! bytes. Data moves a byte at a time through the programmed channel (the
//! block I/O instructions drain it), one 128-byte sector per service, and
//! the controller runs on to the next sector until stopped.

use super::storage::BlockImage;
use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const FD_NUMBY: usize = 128; /* bytes per sector */
pub const FD_NUMSC: u32 = 26; /* sectors per track */
pub const FD_NUMTR: u32 = 77; /* tracks */
pub const FD_NUMLRN: u32 = FD_NUMTR * FD_NUMSC;
pub const FD_NUMDR: usize = 4;

const CMD_V_UNIT: u32 = 4;
const CMD_M_UNIT: u32 = 0x3;
const FNC_RD: u32 = 0x1;
const FNC_WR: u32 = 0x2;
const FNC_RDID: u32 = 0x3;
const FNC_RSTA: u32 = 0x4; /* read extended status */
const FNC_DEL: u32 = 0x5; /* write deleted */
const FNC_BOOT: u32 = 0x6;
const FNC_STOP: u32 = 0x7;
const FNC_RESET: u32 = 0x8;
const FNC_STOPPING: u32 = 0x10;

/// Status byte
pub const STA_DLR: u32 = 0x20; /* deleted record */
pub const STA_ERR: u32 = 0x10;
pub const STA_IDL: u32 = 0x02;
const STA_MASK: u32 = STA_DLR | STA_ERR | STA_BSY | STA_IDL;

/// Extended status
const ES_SIZE: usize = 6;
const ES0_LRN: u32 = 0x20; /* illegal LRN */
const ES0_ERR: u32 = 0x08;
const ES1_TK0: u32 = 0x80;
const ES1_NRDY: u32 = 0x40;
const ES1_CMD: u32 = 0x10; /* illegal command */

const LRN_BOOT: u32 = 5;

const CMD_WAIT: u64 = 100;
const SEEK_WAIT: u64 = 10; /* per LRN */

#[derive(Debug, Default)]
struct Drive {
    image: BlockImage,
    /// Last LRN accessed
    lrn: u32,
    /// Deleted-record flags, one bit per LRN would be excessive; track set
    deleted: std::collections::BTreeSet<u32>,
}

#[derive(Debug)]
pub struct Floppy {
    pub dno: u32,
    sta: u32,
    cmd: u32,
    fnc: u32,
    unit: usize,
    db: u32,
    lrn: u32,
    /// LRN load state: counts the two address bytes
    wdv: u32,
    buf: [u8; FD_NUMBY],
    bptr: usize,
    es: [u8; ES_SIZE],
    arm: bool,
    pub stop_ioe: bool,
    drv: [Drive; FD_NUMDR],
}

impl Floppy {
    pub fn new() -> Self {
        Self {
            dno: D_FD,
            sta: STA_IDL,
            cmd: 0,
            fnc: 0,
            unit: 0,
            db: 0,
            lrn: 1,
            wdv: 0,
            buf: [0; FD_NUMBY],
            bptr: 0,
            es: [0; ES_SIZE],
            arm: false,
            stop_ioe: true,
            drv: Default::default(),
        }
    }

    pub fn capacity() -> usize {
        FD_NUMLRN as usize * FD_NUMBY
    }

    pub fn attach(&mut self, u: usize, img: Vec<u8>) -> Result<(), super::storage::AttachError> {
        self.drv[u].image.attach_buf(img, Self::capacity())
    }

    pub fn detach(&mut self, u: usize) -> Vec<u8> {
        self.drv[u].image.detach().unwrap_or_default()
    }

    pub fn io(&mut self, _dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => BY,

            IoOp::Rd => {
                if self.fnc == FNC_RSTA {
                    // extended status bytes in sequence
                    let t = self.es.get(self.bptr).copied().unwrap_or(0) as u32;
                    self.bptr += 1;
                    if self.bptr >= ES_SIZE {
                        self.fnc = 0;
                        self.sta = STA_IDL;
                    }
                    return t;
                }
                if self.sta & STA_BSY == 0 && self.bptr < FD_NUMBY {
                    self.db = self.buf[self.bptr] as u32;
                    self.bptr += 1;
                    if self.bptr >= FD_NUMBY {
                        self.sta |= STA_BSY;
                        cx.sched.activate(UnitId::Fd, CMD_WAIT);
                    }
                }
                self.db
            }

            IoOp::Wd => {
                if self.sta & STA_IDL != 0 {
                    // two address bytes form the LRN
                    self.lrn = ((self.lrn << 8) | dat) & DMASK16;
                    self.wdv += 1;
                } else {
                    self.db = dat & DMASK8;
                    if self.bptr < FD_NUMBY {
                        self.buf[self.bptr] = dat as u8;
                        self.bptr += 1;
                        if self.bptr >= FD_NUMBY {
                            self.sta |= STA_BSY;
                            cx.sched.activate(UnitId::Fd, CMD_WAIT);
                        }
                    }
                }
                0
            }

            IoOp::Ss => {
                let mut t = self.sta & STA_MASK;
                if !self.drv[self.unit].image.attached() {
                    t |= STA_DU;
                }
                if t & STA_ERR != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Oc => {
                self.arm = cx.ints.int_chg(V_FD, dat, self.arm);
                let u = ((dat >> CMD_V_UNIT) & CMD_M_UNIT) as usize;
                let f = dat & 0xF;
                match f {
                    FNC_RESET => {
                        self.reset(cx);
                    }
                    FNC_STOP => {
                        if self.sta & STA_IDL == 0 {
                            self.fnc |= FNC_STOPPING;
                            cx.sched.activate(UnitId::Fd, CMD_WAIT);
                        }
                    }
                    FNC_RD | FNC_WR | FNC_RDID | FNC_RSTA | FNC_DEL | FNC_BOOT => {
                        if self.sta & STA_IDL == 0 {
                            return 0;
                        }
                        self.cmd = dat;
                        self.unit = u;
                        self.fnc = f;
                        self.wdv = 0;
                        self.bptr = 0;
                        self.sta = STA_BSY;
                        if f == FNC_BOOT {
                            self.lrn = LRN_BOOT;
                        }
                        let delta = self.lrn.abs_diff(self.drv[u].lrn).max(1) as u64;
                        cx.sched.activate(UnitId::Fd, CMD_WAIT + delta * SEEK_WAIT);
                    }
                    _ => {
                        self.es[1] = (self.es[1] as u32 | ES1_CMD) as u8;
                        self.sta |= STA_ERR;
                    }
                }
                0
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    pub fn svc(&mut self, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let u = self.unit;
        let fnc = self.fnc & 0xF;

        if self.fnc & FNC_STOPPING != 0 || fnc == FNC_STOP {
            self.fnc = 0;
            self.sta = (self.sta & !STA_BSY) | STA_IDL;
            if self.arm {
                cx.ints.set_int(V_FD);
            }
            return Ok(());
        }

        if !self.drv[u].image.attached() {
            self.es[1] = (self.es[1] as u32 | ES1_NRDY) as u8;
            self.finish_err(cx);
            return if self.stop_ioe {
                Err(StopReason::IoError)
            } else {
                Ok(())
            };
        }
        if self.lrn == 0 || self.lrn > FD_NUMLRN {
            self.es[0] = (self.es[0] as u32 | ES0_LRN | ES0_ERR) as u8;
            self.finish_err(cx);
            return Ok(());
        }
        let da = (self.lrn - 1) as usize * FD_NUMBY;

        match fnc {
            FNC_RD | FNC_BOOT => {
                self.drv[u].image.read_block(da, &mut self.buf);
                self.bptr = 0;
                self.sta &= !(STA_BSY | STA_IDL);
                if self.drv[u].deleted.contains(&self.lrn) {
                    self.sta |= STA_DLR;
                }
                self.drv[u].lrn = self.lrn;
                self.lrn = (self.lrn % FD_NUMLRN) + 1;
                if self.arm {
                    cx.ints.set_int(V_FD);
                }
            }

            FNC_WR | FNC_DEL => {
                if self.bptr > 0 {
                    if self.drv[u].image.write_protected() {
                        self.es[0] = (self.es[0] as u32 | ES0_ERR) as u8;
                        self.finish_err(cx);
                        return Ok(());
                    }
                    let buf = self.buf;
                    self.drv[u].image.write_block(da, &buf);
                    if fnc == FNC_DEL {
                        self.drv[u].deleted.insert(self.lrn);
                    } else {
                        self.drv[u].deleted.remove(&self.lrn);
                    }
                    self.drv[u].lrn = self.lrn;
                    self.lrn = (self.lrn % FD_NUMLRN) + 1;
                }
                self.bptr = 0;
                self.sta &= !(STA_BSY | STA_IDL);
                if self.arm {
                    cx.ints.set_int(V_FD);
                }
            }

            FNC_RDID => {
                // current track/sector into the data buffer
                let trk = (self.drv[u].lrn.max(1) - 1) / FD_NUMSC;
                let sec = ((self.drv[u].lrn.max(1) - 1) % FD_NUMSC) + 1;
                self.buf[0] = trk as u8;
                self.buf[1] = sec as u8;
                self.bptr = 0;
                self.sta &= !(STA_BSY | STA_IDL);
                if self.arm {
                    cx.ints.set_int(V_FD);
                }
            }

            FNC_RSTA => {
                let mut es1 = self.es[1] as u32;
                if self.drv[u].lrn <= FD_NUMSC {
                    es1 |= ES1_TK0;
                }
                self.es[1] = es1 as u8;
                self.es[5] = u as u8;
                self.bptr = 0;
                self.sta &= !(STA_BSY | STA_IDL);
                if self.arm {
                    cx.ints.set_int(V_FD);
                }
            }

            _ => {}
        }
        Ok(())
    }

    fn finish_err(&mut self, cx: &mut SvcCtx) {
        self.fnc = 0;
        self.sta = (self.sta & !STA_BSY) | STA_IDL | STA_ERR;
        if self.arm {
            cx.ints.set_int(V_FD);
        }
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        cx.sched.cancel(UnitId::Fd);
        self.sta = STA_IDL;
        self.cmd = 0;
        self.fnc = 0;
        self.db = 0;
        self.lrn = 1;
        self.wdv = 0;
        self.bptr = 0;
        self.es = [0; ES_SIZE];
        cx.ints.clr_int(V_FD);
        cx.ints.clr_enb(V_FD);
        self.arm = false;
    }
}

impl Default for Floppy {
    fn default() -> Self {
        Self::new()
    }
}
