//! Interrupt controller and device dispatch tables.
//!
//! Interrupt requests and enables live in four 32-bit words so they are
//! independent of device numbers: word 0 holds DMA devices, word 1
//! programmed-I/O devices, words 2-3 the async lines. Priorities run low
//! word first, low bit first. `int_tab` maps a vector index back to the
//! device number handed to the interrupt service code.
//!
//! Device numbers map to handler identities through a 256-entry table
//! built once per run by `devtab_init`, which expands each device's
//! number template and rejects overlaps instead of aliasing them.

use tracing::warn;

use super::defs::*;
use crate::ConfigError;

/// Handler identity for a device number. The Rust rendering of the
/// original's table of I/O function pointers: dispatch happens by matching
/// on the identity, with the device number passed through so multi-number
/// devices (drives, async line pairs) can recover their unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevId {
    /// Display and switch register (part of the CPU front panel)
    Display,
    /// Selector channel
    SelCh,
    /// Teletype
    Tt,
    /// Paper tape reader/punch
    Pt,
    /// Programmable async line adapter
    Pas,
    /// Line printer
    Lpt,
    /// Precision interval clock
    Pic,
    /// Line frequency clock
    Lfc,
    /// Magtape controller
    Mt,
    /// Cartridge disk controller + drives
    Dp,
    /// MSM disk controller + drives
    Idc,
    /// Floppy disk
    Fd,
}

/// Device information block: binds a handler identity to a base device
/// number, selector channel, interrupt vector, and device-number template.
#[derive(Debug, Clone)]
pub struct Dib {
    /// Base device number
    pub dno: u32,
    /// Selector channel index, if channel-capable
    pub sch: Option<u8>,
    /// Base interrupt vector index (word * 32 + bit)
    pub irq: u32,
    /// Offsets from `dno` covered by this device; empty means just `dno`
    pub tplte: Vec<u8>,
    pub id: DevId,
}

/// Device-number to handler-identity map
#[derive(Debug, Clone, PartialEq)]
pub struct DevMap {
    tab: [Option<DevId>; DEVNO],
}

impl DevMap {
    pub fn empty() -> Self {
        Self { tab: [None; DEVNO] }
    }

    pub fn get(&self, dev: u32) -> Option<DevId> {
        self.tab[(dev & DEV_MAX) as usize]
    }

    pub fn present(&self, dev: u32) -> bool {
        self.get(dev).is_some()
    }
}

/// Interrupt request/enable words plus the vector-to-device map
#[derive(Debug, Clone)]
pub struct IntCtl {
    pub req: [u32; INTSZ],
    pub enb: [u32; INTSZ],
    tab: [u32; INTSZ * 32],
}

impl IntCtl {
    pub fn new() -> Self {
        Self {
            req: [0; INTSZ],
            enb: [0; INTSZ],
            tab: [0; INTSZ * 32],
        }
    }

    pub fn set_int(&mut self, v: u32) {
        self.req[(v >> 5) as usize] |= 1 << (v & 0x1F);
    }

    pub fn clr_int(&mut self, v: u32) {
        self.req[(v >> 5) as usize] &= !(1 << (v & 0x1F));
    }

    pub fn set_enb(&mut self, v: u32) {
        self.enb[(v >> 5) as usize] |= 1 << (v & 0x1F);
    }

    pub fn clr_enb(&mut self, v: u32) {
        self.enb[(v >> 5) as usize] &= !(1 << (v & 0x1F));
    }

    pub fn req_set(&self, v: u32) -> bool {
        self.req[(v >> 5) as usize] & (1 << (v & 0x1F)) != 0
    }

    pub fn enb_set(&self, v: u32) -> bool {
        self.enb[(v >> 5) as usize] & (1 << (v & 0x1F)) != 0
    }

    /// True iff any enabled request is pending. Requests masked off by the
    /// enable word never wake the CPU.
    pub fn eval(&self) -> bool {
        self.req
            .iter()
            .zip(self.enb.iter())
            .any(|(r, e)| r & e != 0)
    }

    /// Pick the highest-priority pending interrupt, clear its request bit,
    /// and return the owning device number. Re-arming happens only through
    /// subsequent device activity.
    pub fn getdev(&mut self) -> u32 {
        for i in 0..INTSZ {
            let r = self.req[i] & self.enb[i];
            if r != 0 {
                let j = r.trailing_zeros();
                self.req[i] &= !(1 << j);
                return self.tab[i * 32 + j as usize];
            }
        }
        0
    }

    /// Apply the 2-bit arm/enable field of a device command byte and return
    /// the new armed state. Enable arms and allows; disable keeps the arm
    /// but blocks delivery; disarm clears arm, enable, and any standing
    /// request.
    pub fn int_chg(&mut self, irq: u32, cmd: u32, armed: bool) -> bool {
        match cmd_get_int(cmd) {
            CMD_IENB => {
                self.set_enb(irq);
                true
            }
            CMD_IDIS => {
                self.clr_enb(irq);
                true
            }
            CMD_IDSA => {
                self.clr_enb(irq);
                self.clr_int(irq);
                false
            }
            _ => armed,
        }
    }
}

impl Default for IntCtl {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a 2-bit unchanged/set/clear/complement command field
pub fn io_2b(val: u32, pos: u32, old: bool) -> bool {
    match (val >> pos) & 3 {
        0 => old,
        1 => true,
        2 => false,
        _ => !old,
    }
}

/// Build the dispatch tables from the enabled devices' DIBs.
///
/// Expands each DIB's template across device numbers, rejecting any
/// overlap, and fills the interrupt vector map. Returns the device map and
/// the device-to-channel table for the selector channels. A precondition
/// for every CPU run.
pub fn devtab_init(
    dibs: &[Dib],
    ints: &mut IntCtl,
) -> Result<(DevMap, [Option<u8>; DEVNO]), ConfigError> {
    let mut map = DevMap::empty();
    let mut schtab = [None; DEVNO];
    ints.tab = [0; INTSZ * 32];

    for dib in dibs {
        let single = [0u8];
        let tplte: &[u8] = if dib.tplte.is_empty() {
            &single
        } else {
            &dib.tplte
        };
        for (j, &off) in tplte.iter().enumerate() {
            let t = (dib.dno + off as u32) & DEV_MAX;
            if map.tab[t as usize].is_some() {
                warn!(devno = t, "device number conflict");
                return Err(ConfigError::DevNoConflict(t));
            }
            map.tab[t as usize] = Some(dib.id);
            if let Some(sch) = dib.sch {
                schtab[t as usize] = Some(sch);
            }
            ints.tab[(dib.irq as usize) + j] = t;
        }
    }
    Ok((map, schtab))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_set_clear_eval() {
        let mut ic = IntCtl::new();
        ic.set_int(V_LFC);
        // request without enable never pends
        assert!(!ic.eval());
        ic.set_enb(V_LFC);
        assert!(ic.eval());
        ic.clr_int(V_LFC);
        assert!(!ic.eval());
    }

    #[test]
    fn test_getdev_priority_and_clear() {
        let mut ic = IntCtl::new();
        ic.tab[V_LFC as usize] = D_LFC;
        ic.tab[V_SCH as usize] = D_SCH;
        ic.set_enb(V_LFC);
        ic.set_enb(V_SCH);
        ic.set_int(V_LFC);
        ic.set_int(V_SCH);

        // word 0 (DMA) outranks word 1
        assert_eq!(ic.getdev(), D_SCH);
        assert!(!ic.req_set(V_SCH));
        // then the clock
        assert_eq!(ic.getdev(), D_LFC);
        assert!(!ic.eval());
    }

    #[test]
    fn test_int_chg_semantics() {
        let mut ic = IntCtl::new();
        ic.set_int(V_TT);

        // enable = arm + allow
        let armed = ic.int_chg(V_TT, CMD_IENB << CMD_V_INT, false);
        assert!(armed && ic.enb_set(V_TT) && ic.req_set(V_TT));

        // disable keeps arm, blocks delivery, request stands
        let armed = ic.int_chg(V_TT, CMD_IDIS << CMD_V_INT, armed);
        assert!(armed && !ic.enb_set(V_TT) && ic.req_set(V_TT));

        // disarm drops everything
        let armed = ic.int_chg(V_TT, CMD_IDSA << CMD_V_INT, armed);
        assert!(!armed && !ic.enb_set(V_TT) && !ic.req_set(V_TT));

        // 00 leaves the armed state alone
        assert!(!ic.int_chg(V_TT, 0, false));
        assert!(ic.int_chg(V_TT, 0, true));
    }

    #[test]
    fn test_io_2b() {
        assert!(io_2b(0b01 << 2, 2, false));
        assert!(!io_2b(0b10 << 2, 2, true));
        assert!(io_2b(0b11 << 2, 2, false));
        assert!(io_2b(0b00 << 2, 2, true));
    }

    #[test]
    fn test_devtab_init_conflict() {
        let mut ic = IntCtl::new();
        let dibs = vec![
            Dib {
                dno: 0x10,
                sch: None,
                irq: V_TT,
                tplte: vec![],
                id: DevId::Tt,
            },
            Dib {
                dno: 0x10,
                sch: None,
                irq: V_PT,
                tplte: vec![],
                id: DevId::Pt,
            },
        ];
        assert_eq!(
            devtab_init(&dibs, &mut ic),
            Err(ConfigError::DevNoConflict(0x10))
        );
    }

    #[test]
    fn test_devtab_init_template() {
        let mut ic = IntCtl::new();
        let dibs = vec![Dib {
            dno: D_DPC,
            sch: Some(0),
            irq: V_DPC,
            tplte: vec![0, 0x10, 0x20, 0x30, 0x40],
            id: DevId::Dp,
        }];
        let (map, schtab) = devtab_init(&dibs, &mut ic).unwrap();
        assert_eq!(map.get(D_DPC), Some(DevId::Dp));
        assert_eq!(map.get(D_DPC + 0x30), Some(DevId::Dp));
        assert!(map.get(D_DPC + 1).is_none());
        assert_eq!(schtab[D_DPC as usize], Some(0));
        assert_eq!(ic.tab[V_DPC as usize], D_DPC);
        assert_eq!(ic.tab[(V_DPC + 2) as usize], D_DPC + 0x20);
    }
}
