//! MSM fixed/moving head disk on the selector channel.
//!
//! Same controller/drive split as the cartridge disk with a richer drive
//! command set: head and cylinder are loaded through a halfword register,
//! seeks complete per drive with their own interrupt vectors, and the
//! controller streams 256-byte sectors through its selector channel,
//! idling between operations and flagging mis-addressed transfers.

use super::storage::BlockImage;
use super::{IoCtx, SvcCtx, UnitId};
use crate::interdata::defs::*;
use crate::StopReason;

pub const IDC_NUMBY: usize = 256; /* bytes per sector */
pub const IDC_NUMSC: u32 = 64; /* sectors per surface */
const IDC_CYL: u32 = 823;
const IDC_SURF: u32 = 5; /* MSM80 geometry */

/// Controller status
pub const STC_WRP: u32 = 0x80; /* write protected */
pub const STC_ACF: u32 = 0x40; /* address compare fail */
pub const STC_CYO: u32 = 0x10; /* cylinder overflow */
pub const STC_IDL: u32 = 0x02; /* controller idle */
pub const STC_DTE: u32 = 0x01; /* transfer error */
const SETC_EX: u32 = STC_WRP | STC_ACF | STC_CYO;
const STC_MASK: u32 = STC_WRP | STC_ACF | STC_CYO | STA_BSY | STC_IDL | STC_DTE;

/// Controller commands
const CMC_MASK: u32 = 0x3F;
const CMC_CLR: u32 = 0x08;
const CMC_RD: u32 = 0x01;
const CMC_WR: u32 = 0x02;
const CMC_RCHK: u32 = 0x03;

/// Drive status
pub const STD_WRP: u32 = 0x80;
pub const STD_UNS: u32 = 0x10; /* unsafe */
pub const STD_NRDY: u32 = 0x08;
pub const STD_SKI: u32 = 0x02; /* seek incomplete */
pub const STD_OFFL: u32 = 0x01;
const STD_UST: u32 = STD_UNS | STD_SKI;
const SETD_EX: u32 = STD_WRP | STD_UNS;

/// Drive commands
const CMDF_SHD: u32 = 0x20; /* set head */
const CMDF_SCY: u32 = 0x10; /* set cylinder */
const CMD_SK: u32 = 0x02;
const CMD_RST: u32 = 0x01;

const HD_MASK: u32 = 0x1F;
const CY_MASK: u32 = 0xFFF;
const SC_MASK: u32 = 0x3F;
const HCYL_V_HD: u32 = 10;

const ROT_WAIT: u64 = 100;
const SEEK_WAIT: u64 = 20;

#[derive(Debug, Default)]
struct Drive {
    image: BlockImage,
    cyl: u32,
    /// Unit status flags
    std: u32,
    /// Seek in progress
    seeking: bool,
    arm: bool,
}

#[derive(Debug)]
pub struct IdcDisk {
    pub dno: u32,
    pub sch: u8,
    sta: u32,
    cmd: u32,
    db: u32,
    /// Head/cylinder register, loaded by drive data writes
    hcyl: u32,
    /// Current sector
    sec: u32,
    head: u32,
    /// Device number of the selected drive
    svun: u32,
    first: bool,
    drv: [Drive; ID_NUMDR],
}

impl IdcDisk {
    pub fn new() -> Self {
        Self {
            dno: D_IDC,
            sch: 1,
            sta: STA_BSY | STC_IDL,
            cmd: 0,
            db: 0,
            hcyl: 0,
            sec: 0,
            head: 0,
            svun: 0,
            first: false,
            drv: Default::default(),
        }
    }

    pub fn capacity() -> usize {
        (IDC_CYL * IDC_SURF * IDC_NUMSC) as usize * IDC_NUMBY
    }

    pub fn attach(&mut self, u: usize, img: Vec<u8>) -> Result<(), super::storage::AttachError> {
        self.drv[u].image.attach_buf(img, Self::capacity())?;
        self.drv[u].cyl = 0;
        Ok(())
    }

    pub fn detach(&mut self, u: usize) -> Vec<u8> {
        self.drv[u].std = 0;
        self.drv[u].image.detach().unwrap_or_default()
    }

    fn is_ctrl(&self, dev: u32) -> bool {
        dev == self.dno
    }

    fn unit_of(&self, dev: u32) -> usize {
        ((dev - self.dno - O_ID0) as usize) % ID_NUMDR
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
                HW
            }

            IoOp::Rd | IoOp::Rh => self.db,

            IoOp::Wd => {
                // sector address
                self.sec = dat & SC_MASK;
                0
            }

            IoOp::Wh => {
                self.sec = dat & SC_MASK;
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
                if self.svun < self.dno + O_ID0 {
                    return 0;
                }
                let u = self.unit_of(self.svun);
                if self.sta & STC_IDL == 0 || cx.sched.is_active(UnitId::Idc(u as u8)) {
                    return 0;
                }
                if !matches!(f, CMC_RD | CMC_WR | CMC_RCHK) {
                    return 0;
                }
                self.cmd = f;
                self.sta = if f == CMC_WR { 0 } else { STA_BSY };
                self.sta &= !STC_IDL;
                self.first = true;
                cx.sched.activate(UnitId::Idc(u as u8), ROT_WAIT);
                0
            }
        }
    }

    fn io_drive(&mut self, dev: u32, op: IoOp, dat: u32, cx: &mut IoCtx) -> u32 {
        let u = self.unit_of(dev);
        match op {
            IoOp::Adr => {
                if self.sta & STC_IDL != 0 {
                    self.svun = dev;
                }
                HW
            }

            IoOp::Wd => {
                self.hcyl = ((self.hcyl << 8) | dat) & DMASK16;
                0
            }

            IoOp::Wh => {
                self.hcyl = dat & DMASK16;
                0
            }

            IoOp::Ss => {
                let d = &self.drv[u];
                let mut t = if d.image.attached() {
                    (if d.image.write_protected() { STD_WRP } else { 0 }) | (d.std & STD_UST)
                } else {
                    STD_NRDY | STD_OFFL
                };
                if t & SETD_EX != 0 {
                    t |= STA_EX;
                }
                t
            }

            IoOp::Oc => {
                self.drv[u].arm = cx.ints.int_chg(V_IDC + u as u32 + 1, dat, self.drv[u].arm);
                if dat & CMDF_SHD != 0 {
                    self.head = (self.hcyl >> HCYL_V_HD) & HD_MASK;
                    return 0;
                }
                let t = if dat & CMDF_SCY != 0 || dat & CMD_SK != 0 {
                    self.hcyl & CY_MASK
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
                self.drv[u].seeking = true;
                self.drv[u].std = 0;
                self.drv[u].cyl = t;
                cx.sched
                    .activate(UnitId::Idc(u as u8), diff as u64 * SEEK_WAIT);
                0
            }

            IoOp::Rd | IoOp::Rh => 0,
        }
    }

    pub fn svc(&mut self, u: usize, cx: &mut SvcCtx) -> Result<(), StopReason> {
        let sch = self.sch as usize;

        if self.drv[u].seeking {
            self.drv[u].seeking = false;
            if !self.drv[u].image.attached() {
                return Ok(());
            }
            if self.drv[u].cyl >= IDC_CYL {
                self.drv[u].std = STD_SKI;
                self.drv[u].cyl = IDC_CYL - 1;
            }
            if self.drv[u].arm {
                cx.ints.set_int(V_IDC + u as u32 + 1);
            }
            return Ok(());
        }

        let rd = self.cmd == CMC_RD || self.cmd == CMC_RCHK;
        if !cx.selch.active(sch, self.dno) && self.cmd != CMC_RCHK {
            self.done(STC_DTE, cx);
            return Ok(());
        }
        let sa = match self.xfer_check(u, rd) {
            Ok(sa) => sa,
            Err(f) => {
                self.done(f, cx);
                return Ok(());
            }
        };
        match self.cmd {
            CMC_RD => {
                let mut sector = [0u8; IDC_NUMBY];
                self.drv[u].image.read_block(sa, &mut sector);
                cx.selch.wrmem(sch, &sector, cx.mem, cx.ints);
            }
            CMC_WR => {
                let mut sector = [0u8; IDC_NUMBY];
                let n = cx.selch.rdmem(sch, &mut sector, cx.mem, cx.ints) as usize;
                if n > 0 {
                    self.db = sector[n - 1] as u32;
                }
                self.drv[u].image.write_block(sa, &sector);
            }
            _ => {}
        }
        self.first = false;
        if self.cmd != CMC_RCHK && cx.selch.active(sch, self.dno) {
            cx.sched.activate(UnitId::Idc(u as u8), ROT_WAIT);
            return Ok(());
        }
        self.done(0, cx);
        Ok(())
    }

    fn xfer_check(&mut self, u: usize, rd: bool) -> Result<usize, u32> {
        let d = &self.drv[u];
        if !d.image.attached() {
            return Err(STC_DTE);
        }
        if !rd && d.image.write_protected() {
            return Err(STC_WRP);
        }
        if self.sec >= IDC_NUMSC {
            return Err(STC_ACF);
        }
        if self.head >= IDC_SURF {
            return Err(STC_ACF);
        }
        if !self.first && self.sec == 0 && self.head == 0 {
            return Err(STC_CYO);
        }
        let sa = ((d.cyl * IDC_SURF + self.head) * IDC_NUMSC + self.sec) as usize * IDC_NUMBY;
        self.sec += 1;
        if self.sec >= IDC_NUMSC {
            self.sec = 0;
            self.head = (self.head + 1) % IDC_SURF;
        }
        Ok(sa)
    }

    fn done(&mut self, flg: u32, cx: &mut SvcCtx) {
        self.sta = (self.sta | STC_IDL | flg) & !STA_BSY;
        cx.ints.set_int(V_IDC);
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
        self.hcyl = 0;
        self.sec = 0;
        self.head = 0;
        cx.ints.clr_int(V_IDC);
        cx.ints.set_enb(V_IDC);
        for u in 0..ID_NUMDR {
            self.drv[u].cyl = 0;
            self.drv[u].std = 0;
            self.drv[u].seeking = false;
            cx.ints.clr_int(V_IDC + u as u32 + 1);
            cx.ints.clr_enb(V_IDC + u as u32 + 1);
            self.drv[u].arm = false;
            cx.sched.cancel(UnitId::Idc(u as u8));
        }
    }
}

impl Default for IdcDisk {
    fn default() -> Self {
        Self::new()
    }
}
