//! region — владелец отображённого файла (arena) и доступ к нему по смещениям.
//!
//! Все структуры хранилища живут внутри одного `MmapMut` и адресуются
//! вычисленными смещениями (см. `layout`), отдельных указателей нет.
//! Выход за границы отображения трактуется как повреждение формата.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub struct Region {
    mmap: MmapMut,
    path: PathBuf,
    // держим файл открытым, пока жива проекция
    _file: File,
}

impl Region {
    /// Отобразить первые `len` байт файла (файл уже должен иметь нужную длину).
    pub fn map(file: File, path: &Path, len: u64) -> Result<Self> {
        let flen = file.metadata()?.len();
        if flen < len {
            return Err(anyhow!(
                "file {} is {} bytes, layout needs {}",
                path.display(),
                flen,
                len
            ));
        }
        let len_usize = usize::try_from(len)
            .map_err(|_| anyhow!("mapping of {} bytes does not fit in address space", len))?;
        let mmap = unsafe {
            MmapOptions::new()
                .offset(0)
                .len(len_usize)
                .map_mut(&file)
                .with_context(|| format!("mmap {}", path.display()))?
        };
        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    fn range(&self, off: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let start = usize::try_from(off).map_err(|_| out_of_bounds(off, len, self.len()))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| out_of_bounds(off, len, self.len()))?;
        if end > self.mmap.len() {
            return Err(out_of_bounds(off, len, self.len()));
        }
        Ok(start..end)
    }

    pub fn slice(&self, off: u64, len: usize) -> Result<&[u8]> {
        let r = self.range(off, len)?;
        Ok(&self.mmap[r])
    }

    pub fn slice_mut(&mut self, off: u64, len: usize) -> Result<&mut [u8]> {
        let r = self.range(off, len)?;
        Ok(&mut self.mmap[r])
    }

    #[inline]
    pub fn read_u8(&self, off: u64) -> Result<u8> {
        Ok(self.slice(off, 1)?[0])
    }

    #[inline]
    pub fn write_u8(&mut self, off: u64, v: u8) -> Result<()> {
        self.slice_mut(off, 1)?[0] = v;
        Ok(())
    }

    #[inline]
    pub fn read_u32(&self, off: u64) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.slice(off, 4)?))
    }

    #[inline]
    pub fn write_u32(&mut self, off: u64, v: u32) -> Result<()> {
        LittleEndian::write_u32(self.slice_mut(off, 4)?, v);
        Ok(())
    }

    #[inline]
    pub fn read_u64(&self, off: u64) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.slice(off, 8)?))
    }

    #[inline]
    pub fn write_u64(&mut self, off: u64, v: u64) -> Result<()> {
        LittleEndian::write_u64(self.slice_mut(off, 8)?, v);
        Ok(())
    }

    pub fn write_bytes(&mut self, off: u64, src: &[u8]) -> Result<()> {
        self.slice_mut(off, src.len())?.copy_from_slice(src);
        Ok(())
    }

    pub fn fill(&mut self, off: u64, len: usize, byte: u8) -> Result<()> {
        self.slice_mut(off, len)?.fill(byte);
        Ok(())
    }

    /// memmove внутри отображения (диапазоны могут пересекаться).
    pub fn copy_within(&mut self, src: u64, dst: u64, len: usize) -> Result<()> {
        let s = self.range(src, len)?;
        let d = self.range(dst, len)?;
        self.mmap.copy_within(s, d.start);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .with_context(|| format!("flush mmap {}", self.path.display()))
    }
}

fn out_of_bounds(off: u64, len: usize, total: u64) -> anyhow::Error {
    StoreError::Corruption(format!(
        "access [{}..+{}) outside mapped region of {} bytes",
        off, len, total
    ))
    .into()
}
