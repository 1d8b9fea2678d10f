//! Attachable media images.
//!
//! The core's contract with host storage is block-level only: an attached
//! unit exposes flat byte blocks (disks) or a record stream (tapes).
//! Images live in memory and can be loaded from / flushed to a host file
//! at attach/detach time; everything in between is pure byte shuffling.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("unit already attached")]
    AlreadyAttached,
    #[error("image larger than drive capacity ({0} > {1})")]
    TooLarge(usize, usize),
    #[error("host file error: {0}")]
    Io(#[from] io::Error),
}

/// Flat block image backing a disk unit
#[derive(Debug, Clone, Default)]
pub struct BlockImage {
    data: Vec<u8>,
    path: Option<PathBuf>,
    attached: bool,
    write_protect: bool,
}

impl BlockImage {
    /// Attach an in-memory image of `capacity` bytes
    pub fn attach_buf(&mut self, buf: Vec<u8>, capacity: usize) -> Result<(), AttachError> {
        if self.attached {
            return Err(AttachError::AlreadyAttached);
        }
        if buf.len() > capacity {
            return Err(AttachError::TooLarge(buf.len(), capacity));
        }
        self.data = buf;
        self.data.resize(capacity, 0);
        self.path = None;
        self.attached = true;
        Ok(())
    }

    /// Attach a host file, creating it if absent
    pub fn attach_file(&mut self, path: &Path, capacity: usize) -> Result<(), AttachError> {
        if self.attached {
            return Err(AttachError::AlreadyAttached);
        }
        let buf = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        self.attach_buf(buf, capacity)?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Detach, flushing to the host file if one is bound. Returns the
    /// image contents for buffer-attached units.
    pub fn detach(&mut self) -> Result<Vec<u8>, AttachError> {
        if let Some(p) = self.path.take() {
            std::fs::write(p, &self.data)?;
        }
        self.attached = false;
        Ok(std::mem::take(&mut self.data))
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn set_write_protect(&mut self, wp: bool) {
        self.write_protect = wp;
    }

    pub fn write_protected(&self) -> bool {
        self.write_protect
    }

    /// Read a block; short or out-of-range reads are zero filled
    pub fn read_block(&self, offset: usize, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.data.get(offset + i).copied().unwrap_or(0);
        }
    }

    /// Write a block; out-of-range bytes are dropped
    pub fn write_block(&mut self, offset: usize, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate() {
            if let Some(d) = self.data.get_mut(offset + i) {
                *d = b;
            }
        }
    }
}

/// One object on a tape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeRec {
    Data(Vec<u8>),
    Mark,
}

/// Record-structured tape image. Position counts records from load point.
#[derive(Debug, Clone, Default)]
pub struct TapeImage {
    recs: Vec<TapeRec>,
    pos: usize,
    attached: bool,
    write_protect: bool,
}

/// Outcome of a forward/reverse record operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapeMotion {
    Data(Vec<u8>),
    Mark,
    EndOfMedium,
    BeginOfTape,
}

impl TapeImage {
    pub fn attach(&mut self, recs: Vec<TapeRec>) -> Result<(), AttachError> {
        if self.attached {
            return Err(AttachError::AlreadyAttached);
        }
        self.recs = recs;
        self.pos = 0;
        self.attached = true;
        Ok(())
    }

    pub fn detach(&mut self) -> Vec<TapeRec> {
        self.attached = false;
        self.pos = 0;
        std::mem::take(&mut self.recs)
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn set_write_protect(&mut self, wp: bool) {
        self.write_protect = wp;
    }

    pub fn write_protected(&self) -> bool {
        self.write_protect
    }

    pub fn at_load_point(&self) -> bool {
        self.pos == 0
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn read_fwd(&mut self) -> TapeMotion {
        match self.recs.get(self.pos) {
            Some(TapeRec::Data(d)) => {
                self.pos += 1;
                TapeMotion::Data(d.clone())
            }
            Some(TapeRec::Mark) => {
                self.pos += 1;
                TapeMotion::Mark
            }
            None => TapeMotion::EndOfMedium,
        }
    }

    pub fn space_rev(&mut self) -> TapeMotion {
        if self.pos == 0 {
            return TapeMotion::BeginOfTape;
        }
        self.pos -= 1;
        match &self.recs[self.pos] {
            TapeRec::Data(d) => TapeMotion::Data(d.clone()),
            TapeRec::Mark => TapeMotion::Mark,
        }
    }

    /// Write a record at the current position, truncating the rest of the
    /// tape (industry-standard overwrite semantics)
    pub fn write_rec(&mut self, rec: TapeRec) {
        self.recs.truncate(self.pos);
        self.recs.push(rec);
        self.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_image_roundtrip() {
        let mut img = BlockImage::default();
        img.attach_buf(vec![1, 2, 3], 1024).unwrap();
        let mut buf = [0u8; 4];
        img.read_block(0, &mut buf);
        assert_eq!(buf, [1, 2, 3, 0]);

        img.write_block(1020, &[9, 9, 9, 9, 9, 9]);
        img.read_block(1020, &mut buf);
        assert_eq!(buf, [9, 9, 9, 9]);

        assert!(img.attach_buf(vec![], 16).is_err());
        let data = img.detach().unwrap();
        assert_eq!(data.len(), 1024);
        assert!(!img.attached());
    }

    #[test]
    fn test_block_image_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut img = BlockImage::default();
        img.attach_file(&path, 512).unwrap();
        img.write_block(0, b"hello");
        img.detach().unwrap();

        let mut img2 = BlockImage::default();
        img2.attach_file(&path, 512).unwrap();
        let mut buf = [0u8; 5];
        img2.read_block(0, &mut buf);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_tape_motion() {
        let mut t = TapeImage::default();
        t.attach(vec![
            TapeRec::Data(vec![1, 2]),
            TapeRec::Mark,
            TapeRec::Data(vec![3]),
        ])
        .unwrap();

        assert_eq!(t.read_fwd(), TapeMotion::Data(vec![1, 2]));
        assert_eq!(t.read_fwd(), TapeMotion::Mark);
        assert_eq!(t.read_fwd(), TapeMotion::Data(vec![3]));
        assert_eq!(t.read_fwd(), TapeMotion::EndOfMedium);

        assert_eq!(t.space_rev(), TapeMotion::Data(vec![3]));
        assert_eq!(t.space_rev(), TapeMotion::Mark);
        assert_eq!(t.space_rev(), TapeMotion::Data(vec![1, 2]));
        assert_eq!(t.space_rev(), TapeMotion::BeginOfTape);
        assert!(t.at_load_point());
    }

    #[test]
    fn test_tape_write_truncates() {
        let mut t = TapeImage::default();
        t.attach(vec![TapeRec::Data(vec![1]), TapeRec::Data(vec![2])])
            .unwrap();
        t.read_fwd();
        t.write_rec(TapeRec::Mark);
        t.rewind();
        assert_eq!(t.read_fwd(), TapeMotion::Data(vec![1]));
        assert_eq!(t.read_fwd(), TapeMotion::Mark);
        assert_eq!(t.read_fwd(), TapeMotion::EndOfMedium);
    }
}
