//! Cartridge disk (2315 / 5440 style drives).
//!
//! One controller device number plus one number per drive. The drive
//! number selects the spindle; the controller carries the data channel.
//! Reads and writes stream one 256-byte sector per service tick through
//! the selector channel, re-arming while the channel still has address
//! range left. Seeks schedule in proportion to the cylinder delta and
//! interrupt per drive; data completion interrupts on the controller.

use super::storage::BlockImage;
use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const DP_NUMBY: usize = 256; /* bytes per sector */
pub const DP_NUMSC: u32 = 24; /* sectors per track */

/// Controller commands
const CMC_MASK: u32 = 0xF;
const CMC_CLR: u32 = 0x8;
const CMC_RD: u32 = 0x1;
const CMC_WR: u32 = 0x2;
const CMC_RCHK: u32 = 0x3; /* read check */

/// Controller status
pub const STC_OVR: u32 = 0x80; /* sector overrun */
pub const STC_ACF: u32 = 0x40; /* address compare fail */
pub const STC_CYO: u32 = 0x10; /* cylinder overflow */
pub const STC_IDL: u32 = 0x02; /* controller idle */
pub const STC_DTE: u32 = 0x01; /* transfer error */
const SETC_EX: u32 = STC_OVR | STC_ACF | STC_CYO;
const STC_MASK: u32 = STC_OVR | STC_ACF | STC_CYO | STA_BSY | STC_IDL | STC_DTE;

/// Drive status
pub const STD_WRP: u32 = 0x80; /* write protected */
pub const STD_ILA: u32 = 0x20; /* illegal address */
pub const STD_ILK: u32 = 0x10; /* address interlock */
pub const STD_MOV: u32 = 0x08; /* heads in motion */
pub const STD_NRDY: u32 = 0x01; /* not ready */
const STD_UST: u32 = STD_ILA | STD_MOV;
const SETD_EX: u32 = STD_ILA | STD_ILK;

/// Drive commands
const CMD_SK: u32 = 0x02; /* seek */
const CMD_RST: u32 = 0x01; /* restore */

/// Head/sector register
const HS_SMASK: u32 = 0x1F;
const HS_HMASK: u32 = 0x20;
const HS_MASK: u32 = HS_HMASK | HS_SMASK;

const ROT_WAIT: u64 = 100; /* sector time */
const SEEK_WAIT: u64 = 50; /* per-cylinder time */

/// Drive geometries: (cylinders, surfaces, platters)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpType {
    D2315,
    D5440,
}

impl DpType {
    pub fn cylinders(self) -> u32 {
        match self {
            DpType::D2315 => 203,
            DpType::D5440 => 408,
        }
    }

    fn platters(self) -> u32 {
        match self {
            DpType::D2315 => 1,
            DpType::D5440 => 2,
        }
    }

    pub fn capacity(self) -> usize {
        (self.platters() * self.cylinders() * 2 * DP_NUMSC) as usize * DP_NUMBY
    }
}

#[derive(Debug)]
struct Drive {
    image: BlockImage,
    dtype: DpType,
    cyl: u32,
    /// Drive status flags (STD_UST subset)
    std: u32,
    arm: bool,
}

#[derive(Debug)]
pub struct DpDisk {
    pub dno: u32,
    pub sch: u8,
    sta: u32,
    cmd: u32,
    /// Data byte latch
    db: u32,
    /// Head/sector register
    hdsc: u32,
    /// Host-written cylinder address
    cyl: u32,
    /// Device number of the selected drive
    svun: u32,
    /// Upper platter flag
    plat: u32,
    /// Transfer not yet started
    first: bool,
    bptr: usize,
    buf: [u8; DP_NUMBY],
    drv: [Drive; DP_NUMDR],
}

impl DpDisk {
    pub fn new() -> Self {
        Self {
            dno: D_DPC,
            sch: 0,
            sta: STA_BSY | STC_IDL,
            cmd: 0,
            db: 0,
            hdsc: 0,
            cyl: 0,
            svun: 0,
            plat: 0,
            first: false,
            bptr: 0,
            buf: [0; DP_NUMBY],
            drv: [
                Drive::new(DpType::D5440),
                Drive::new(DpType::D5440),
                Drive::new(DpType::D5440),
                Drive::new(DpType::D5440),
            ],
        }
    }

    pub fn attach(&mut self, u: usize, img: Vec<u8>) -> Result<(), super::storage::AttachError> {
        let cap = self.drv[u].dtype.capacity();
        self.drv[u].image.attach_buf(img, cap)?;
        self.drv[u].cyl = 0;
        Ok(())
    }

    pub fn detach(&mut self, u: usize) -> Vec<u8> {
        self.drv[u].image.detach().unwrap_or_default()
    }

    pub fn set_write_protect(&mut self, u: usize, wp: bool) {
        self.drv[u].image.set_write_protect(wp);
    }

    fn is_ctrl(&self, dev: u32) -> bool {
        dev == self.dno
    }

    fn unit_of(&self, dev: u32) -> usize {
        ((dev - self.dno - O_DP0) / O_DP0) as usize % DP_NUMDR
    }

    pub fn io(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        if self.is_ctrl(dev) {
            self.io_ctrl(dev, op, dat, cx)
        } else {
            self.io_drive(dev, op, dat, cx)
        }
    }

    fn io_ctrl(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        match op {
            IoOp::Adr => {
                cx.selch.adr(self.sch as usize, dev);
                BY
            }

            IoOp::Rd => {
                if self.sta & STC_IDL != 0 {
                    // idle: rotational position
                    (cx.sched.gtime() / ROT_WAIT % DP_NUMSC as u64) as u32
                } else {
                    self.sta |= STA_BSY;
                    self.db
                }
            }

            IoOp::Wd => {
                if self.sta & STC_IDL != 0 {
                    self.hdsc = dat & HS_MASK;
                } else {
                    self.sta |= STA_BSY;
                    self.db = dat & 0xFF;
                }
                0
            }

            IoOp::Ss => {
                let mut t = self.sta & STC_MASK;
                if t & SETC_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Oc => {
                let f = dat & CMC_MASK;
                if f & CMC_CLR != 0 {
                    self.reset(cx);
                    return 0;
                }
                let u = self.unit_of(self.svun.max(self.dno + O_DP0));
                if self.sta & STC_IDL == 0 || cx.sched.is_active(UnitId::Dp(u as u8)) {
                    return 0;
                }
                self.cmd = f;
                self.sta = if f == CMC_WR { 0 } else { STA_BSY };
                self.first = true;
                self.bptr = 0;
                self.plat = if self.svun & O_DPF != 0 { 1 } else { 0 };
                if matches!(f, CMC_RD | CMC_WR | CMC_RCHK) {
                    cx.sched.activate(UnitId::Dp(u as u8), ROT_WAIT);
                }
                0
            }

            IoOp::Rh | IoOp::Wh => 0,
        }
    }

    fn io_drive(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        let u = self.unit_of(dev);
        match op {
            IoOp::Adr => {
                if self.sta & STC_IDL != 0 {
                    self.svun = dev;
                }
                BY
            }

            IoOp::Wd => {
                if self.drv[u].dtype == DpType::D2315 {
                    self.cyl = dat & 0xFF;
                } else {
                    self.cyl = ((self.cyl << 8) | dat) & DMASK16;
                }
                0
            }

            IoOp::Ss => {
                let d = &self.drv[u];
                let mut t = if d.image.attached() {
                    (if d.image.write_protected() { STD_WRP } else { 0 })
                        | (if self.sta & STC_IDL == 0 { STD_ILK } else { 0 })
                        | (d.std & STD_UST)
                } else {
                    STD_MOV | STD_NRDY
                };
                if t & SETD_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Oc => {
                self.drv[u].arm = cx.ints.int_chg(V_DPC + u as u32 + 1, dat, self.drv[u].arm);
                let t = if dat & CMD_SK != 0 {
                    self.cyl
                } else if dat & CMD_RST != 0 {
                    0
                } else {
                    return 0;
                };
                let mut diff = t as i64 - self.drv[u].cyl as i64;
                if diff < 0 {
                    diff = -diff;
                } else if diff == 0 {
                    diff = 1;
                }
                self.drv[u].std = STD_MOV;
                self.drv[u].cyl = t;
                cx.sched.activate(UnitId::Dp(u as u8), diff as u64 * SEEK_WAIT);
                0
            }

            IoOp::Rd | IoOp::Rh | IoOp::Wh => 0,
        }
    }

    pub fn svc(&mut self, u: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let sch = self.sch as usize;

        if self.drv[u].std & STD_MOV != 0 {
            // seek completion
            self.drv[u].std = 0;
            if !self.drv[u].image.attached() {
                return Ok(());
            }
            if self.drv[u].cyl >= self.drv[u].dtype.cylinders() {
                self.drv[u].std = STD_ILA;
                self.drv[u].cyl = self.drv[u].dtype.cylinders() - 1;
            }
            if self.drv[u].arm {
                cx.ints.set_int(V_DPC + u as u32 + 1);
            }
            return Ok(());
        }

        match self.cmd & 0x7 {
            CMC_RCHK => match self.xfer_check(u) {
                Ok(_) => self.done(0, cx),
                Err(f) => self.done(f, cx),
            },

            CMC_RD => {
                if cx.selch.active(sch, self.dno) {
                    let sa = match self.xfer_check(u) {
                        Ok(sa) => sa,
                        Err(f) => {
                            self.done(f, cx);
                            return Ok(());
                        }
                    };
                    let mut sector = [0u8; DP_NUMBY];
                    self.drv[u].image.read_block(sa, &mut sector);
                    self.first = false;
                    cx.selch.wrmem(sch, &sector, cx.mem, cx.ints);
                    if cx.selch.active(sch, self.dno) {
                        cx.sched.activate(UnitId::Dp(u as u8), ROT_WAIT);
                        return Ok(());
                    }
                    self.done(0, cx);
                } else {
                    self.done(STC_DTE, cx);
                }
            }

            CMC_WR => {
                if cx.selch.active(sch, self.dno) {
                    let sa = match self.xfer_check(u) {
                        Ok(sa) => sa,
                        Err(f) => {
                            self.done(f, cx);
                            return Ok(());
                        }
                    };
                    let mut sector = [0u8; DP_NUMBY];
                    let n = cx.selch.rdmem(sch, &mut sector, cx.mem, cx.ints) as usize;
                    if n > 0 {
                        self.db = sector[n - 1] as u32;
                        // short transfers fill with the last byte
                        for b in sector[n..].iter_mut() {
                            *b = self.db as u8;
                        }
                    }
                    self.drv[u].image.write_block(sa, &sector);
                    self.first = false;
                    if cx.selch.active(sch, self.dno) {
                        cx.sched.activate(UnitId::Dp(u as u8), ROT_WAIT);
                        return Ok(());
                    }
                    self.done(0, cx);
                } else {
                    self.done(STC_DTE, cx);
                }
            }

            _ => self.done(0, cx),
        }
        Ok(())
    }

    /// Address checks before each sector: not attached or write protected,
    /// wrong cylinder, bad sector, cylinder overflow. On success returns
    /// the image offset of the current sector and advances the
    /// head/sector register, flipping surface at end of track.
    fn xfer_check(&mut self, u: usize) -> Result<usize, u32> {
        let d = &self.drv[u];
        if !d.image.attached() || (d.image.write_protected() && self.cmd == CMC_WR) {
            return Err(STC_DTE);
        }
        let hd = (self.hdsc & HS_HMASK) >> 5;
        let sc = self.hdsc & HS_SMASK;
        if self.cyl != d.cyl {
            if self.cyl == 0 {
                self.drv[u].cyl = 0;
            } else {
                return Err(STC_ACF);
            }
        }
        if sc >= DP_NUMSC {
            return Err(STC_OVR);
        }
        if !self.first && sc == 0 && hd == 0 {
            return Err(STC_CYO);
        }
        let d = &self.drv[u];
        let sa = ((self.plat * d.dtype.cylinders() + d.cyl) * 2 + hd) * DP_NUMSC + sc;
        if sc + 1 < DP_NUMSC {
            self.hdsc += 1;
        } else {
            self.hdsc = (self.hdsc ^ HS_HMASK) & HS_HMASK;
        }
        Ok(sa as usize * DP_NUMBY)
    }

    /// Transfer complete: idle the controller, raise the unmaskable
    /// controller interrupt, stop the channel on error
    fn done(&mut self, flg: u32, cx: &mut SvcCtx) {
        self.sta = (self.sta | STC_IDL | flg) & !STA_BSY;
        cx.ints.set_int(V_DPC);
        if flg != 0 {
            cx.selch.stop(self.sch as usize, cx.ints);
        }
    }

    pub fn reset(&mut self, cx: &mut IoCtx) {
        self.cmd = 0;
        self.sta = STA_BSY | STC_IDL;
        self.first = false;
        self.svun = 0;
        self.db = 0;
        self.plat = 0;
        self.hdsc = 0;
        cx.ints.clr_int(V_DPC);
        // controller completion is always enabled
        cx.ints.set_enb(V_DPC);
        for u in 0..DP_NUMDR {
            self.drv[u].cyl = 0;
            self.drv[u].std = 0;
            cx.ints.clr_int(V_DPC + u as u32 + 1);
            cx.ints.clr_enb(V_DPC + u as u32 + 1);
            self.drv[u].arm = false;
            cx.sched.cancel(UnitId::Dp(u as u8));
        }
    }
}

impl Drive {
    fn new(dtype: DpType) -> Self {
        Self {
            image: BlockImage::default(),
            dtype,
            cyl: 0,
            std: 0,
            arm: false,
        }
    }
}

impl Default for DpDisk {
    fn default() -> Self {
        Self::new()
    }
}
