//! Block Buffers
//!
//! A block buffer is a logical byte sequence backed by a scatter list of
//! segments, each referencing a possibly-shared region of pooled memory.
//! Views (`splice`), structural edits (`insert`, `delete`, `resize`) and
//! duplication never copy payload; a deep copy happens only on the write
//! path, when the backing region is still referenced by another holder.
//!
//! Mappings are segment-granular: `read`/`write` return at most the octets
//! available in one segment and the caller loops for larger ranges. Unmap is
//! the guard drop.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

/// Default prepend margin allocated in front of new buffers, in octets.
const DEFAULT_PREPEND: usize = 32;

/// Default append margin allocated behind new buffers, in octets.
const DEFAULT_APPEND: usize = 32;

/// Block manager configuration.
#[derive(Debug, Clone)]
pub struct UbufBlockConfig {
    /// Margin in front of each allocation, consumed by front extensions.
    pub prepend: usize,
    /// Margin behind each allocation, consumed by back extensions.
    pub append: usize,
}

impl Default for UbufBlockConfig {
    fn default() -> Self {
        Self {
            prepend: DEFAULT_PREPEND,
            append: DEFAULT_APPEND,
        }
    }
}

struct UbufBlockMgrInner {
    umem: UmemMgr,
    config: UbufBlockConfig,
}

/// Shared manager producing block buffers from a memory pool.
#[derive(Clone)]
pub struct UbufBlockMgr {
    inner: Arc<UbufBlockMgrInner>,
}

impl UbufBlockMgr {
    /// Creates a manager with default margins.
    pub fn new(umem: UmemMgr) -> Self {
        Self::with_config(umem, UbufBlockConfig::default())
    }

    /// Creates a manager with explicit margins.
    pub fn with_config(umem: UmemMgr, config: UbufBlockConfig) -> Self {
        Self {
            inner: Arc::new(UbufBlockMgrInner { umem, config }),
        }
    }

    /// Allocates a block buffer of `size` octets in one segment.
    pub fn alloc(&self, size: usize) -> UbufBlock {
        let cfg = &self.inner.config;
        let mem = self.inner.umem.alloc(cfg.prepend + size + cfg.append);
        UbufBlock {
            segs: vec![Seg {
                mem: Arc::new(mem),
                off: cfg.prepend,
                len: size,
                front_margin: cfg.prepend,
                back_margin: cfg.append,
            }],
            total: size,
            cursor: Cell::new((0, 0)),
            mgr: self.clone(),
        }
    }

    /// Allocates a block buffer holding a copy of `data`.
    pub fn alloc_from(&self, data: &[u8]) -> UbufBlock {
        let mut ubuf = self.alloc(data.len());
        if let Some(seg) = ubuf.segs.first_mut() {
            if let Some(mem) = Arc::get_mut(&mut seg.mem) {
                mem[seg.off..seg.off + seg.len].copy_from_slice(data);
            }
        }
        ubuf
    }

    fn alloc_seg(&self, size: usize) -> Seg {
        let mem = self.inner.umem.alloc(size);
        Seg {
            mem: Arc::new(mem),
            off: 0,
            len: size,
            front_margin: 0,
            back_margin: 0,
        }
    }
}

impl std::fmt::Debug for UbufBlockMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufBlockMgr")
            .field("prepend", &self.inner.config.prepend)
            .field("append", &self.inner.config.append)
            .finish()
    }
}

/// One segment of the scatter list.
struct Seg {
    mem: Arc<Umem>,
    /// Offset of the first visible octet in the region.
    off: usize,
    /// Visible length.
    len: usize,
    /// Octets in front of `off` available for extension.
    front_margin: usize,
    /// Octets behind `off + len` available for extension.
    back_margin: usize,
}

impl Seg {
    fn share(&self) -> Seg {
        Seg {
            mem: Arc::clone(&self.mem),
            off: self.off,
            len: self.len,
            // Margins stay with the original allocation: a shared window must
            // not expose octets outside itself.
            front_margin: 0,
            back_margin: 0,
        }
    }
}

/// Shared read mapping of one segment.
pub struct BlockRead<'a> {
    data: &'a [u8],
}

impl Deref for BlockRead<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

/// Exclusive write mapping of one segment.
pub struct BlockWrite<'a> {
    data: &'a mut [u8],
}

impl Deref for BlockWrite<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for BlockWrite<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

/// Reference-counted block buffer.
pub struct UbufBlock {
    segs: Vec<Seg>,
    total: usize,
    /// Cached (segment index, logical offset of its first octet), for
    /// amortised O(1) sequential walks.
    cursor: Cell<(usize, usize)>,
    mgr: UbufBlockMgr,
}

impl UbufBlock {
    /// Total size in octets.
    #[inline]
    pub fn size(&self) -> usize {
        self.total
    }

    /// Duplicates the buffer, sharing every segment.
    pub fn dup(&self) -> UbufBlock {
        UbufBlock {
            segs: self.segs.iter().map(Seg::share).collect(),
            total: self.total,
            cursor: Cell::new((0, 0)),
            mgr: self.mgr.clone(),
        }
    }

    /// Maps up to `max_len` octets at `offset` for shared reading.
    ///
    /// The granted length is bounded by the containing segment; loop for
    /// ranges crossing segments.
    pub fn read(&self, offset: usize, max_len: usize) -> Result<BlockRead<'_>> {
        let (idx, seg_start) = self.find_seg(offset)?;
        let seg = &self.segs[idx];
        let in_seg = offset - seg_start;
        let granted = max_len.min(seg.len - in_seg);
        if granted == 0 {
            return Err(Error::Invalid);
        }
        let start = seg.off + in_seg;
        Ok(BlockRead {
            data: &seg.mem[start..start + granted],
        })
    }

    /// Maps up to `max_len` octets at `offset` for exclusive writing.
    ///
    /// If the backing region is shared, it is detached first by a deep copy
    /// of the segment; the caller sees identical semantics either way.
    pub fn write(&mut self, offset: usize, max_len: usize) -> Result<BlockWrite<'_>> {
        let (idx, seg_start) = self.find_seg(offset)?;
        self.detach_seg(idx)?;
        let seg = &mut self.segs[idx];
        let in_seg = offset - seg_start;
        let granted = max_len.min(seg.len - in_seg);
        if granted == 0 {
            return Err(Error::Invalid);
        }
        let start = seg.off + in_seg;
        let mem = Arc::get_mut(&mut seg.mem).ok_or(Error::Busy)?;
        Ok(BlockWrite {
            data: &mut mem[start..start + granted],
        })
    }

    /// Creates a cheap subview of `len` octets at `offset`.
    ///
    /// The affected segments are shared; no payload is copied.
    pub fn splice(&self, offset: usize, len: usize) -> Result<UbufBlock> {
        if offset + len > self.total {
            return Err(Error::Invalid);
        }
        let mut segs = Vec::new();
        let mut seg_start = 0;
        for seg in &self.segs {
            let seg_end = seg_start + seg.len;
            if seg_end > offset && seg_start < offset + len {
                let mut shared = seg.share();
                let skip = offset.saturating_sub(seg_start);
                let take = (offset + len).min(seg_end) - seg_start.max(offset);
                shared.off += skip;
                shared.len = take;
                segs.push(shared);
            }
            seg_start = seg_end;
        }
        Ok(UbufBlock {
            segs,
            total: len,
            cursor: Cell::new((0, 0)),
            mgr: self.mgr.clone(),
        })
    }

    /// Grows or trims both extremities.
    ///
    /// Positive values extend into allocation margins when available (and
    /// into a fresh segment otherwise); negative values trim. The sequence
    /// `resize(p, a); resize(-p, -a)` restores the original octets and size.
    pub fn resize(&mut self, prepend: isize, append: isize) -> Result<()> {
        if prepend.unsigned_abs() > self.total && prepend < 0 {
            return Err(Error::Invalid);
        }
        if prepend > 0 {
            self.extend_front(prepend as usize);
        } else if prepend < 0 {
            self.trim_front(prepend.unsigned_abs())?;
        }
        if append > 0 {
            self.extend_back(append as usize);
        } else if append < 0 {
            self.trim_back(append.unsigned_abs())?;
        }
        self.cursor.set((0, 0));
        Ok(())
    }

    /// Inserts another block buffer at `at`.
    pub fn insert(&mut self, at: usize, sub: UbufBlock) -> Result<()> {
        if at > self.total {
            return Err(Error::Invalid);
        }
        let idx = self.split_at(at)?;
        let added = sub.total;
        self.segs.splice(idx..idx, sub.segs);
        self.total += added;
        self.cursor.set((0, 0));
        Ok(())
    }

    /// Appends another block buffer.
    pub fn append(&mut self, sub: UbufBlock) -> Result<()> {
        let at = self.total;
        self.insert(at, sub)
    }

    /// Deletes `len` octets at `offset`.
    pub fn delete(&mut self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.total {
            return Err(Error::Invalid);
        }
        let start = self.split_at(offset)?;
        let end = self.split_at(offset + len)?;
        self.segs.drain(start..end);
        self.total -= len;
        self.cursor.set((0, 0));
        Ok(())
    }

    /// Truncates to `len` octets.
    pub fn truncate(&mut self, len: usize) -> Result<()> {
        if len > self.total {
            return Err(Error::Invalid);
        }
        let total = self.total;
        self.delete(len, total - len)
    }

    /// Copies `buf.len()` octets at `offset` out of the buffer.
    pub fn extract(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let map = self.read(offset + done, buf.len() - done)?;
            buf[done..done + map.len()].copy_from_slice(&map);
            done += map.len();
        }
        Ok(())
    }

    /// Returns `scratch.len()` octets at `offset`, borrowing directly from a
    /// single segment when possible and copying into `scratch` otherwise.
    pub fn peek<'a>(&'a self, offset: usize, scratch: &'a mut [u8]) -> Result<&'a [u8]> {
        if scratch.is_empty() {
            return Ok(&[]);
        }
        let map = self.read(offset, scratch.len())?;
        if map.len() == scratch.len() {
            return Ok(map.data);
        }
        drop(map);
        self.extract(offset, scratch)?;
        Ok(scratch)
    }

    /// Advances `offset` to the next occurrence of `value`.
    ///
    /// On failure `offset` is left at the end of the buffer.
    pub fn scan(&self, offset: &mut usize, value: u8) -> Result<()> {
        while *offset < self.total {
            let map = self.read(*offset, self.total - *offset)?;
            if let Some(pos) = map.iter().position(|&b| b == value) {
                *offset += pos;
                return Ok(());
            }
            *offset += map.len();
        }
        Err(Error::Invalid)
    }

    /// Advances `offset` to the next match of `pattern`.
    pub fn find(&self, offset: &mut usize, pattern: &[u8]) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::Invalid);
        }
        while *offset + pattern.len() <= self.total {
            self.scan(offset, pattern[0])?;
            if *offset + pattern.len() > self.total {
                break;
            }
            if self.match_filter_at(*offset, pattern, &[])? {
                return Ok(());
            }
            *offset += 1;
        }
        Err(Error::Invalid)
    }

    /// Compares the head of the buffer against `filter` under `mask`.
    ///
    /// An empty mask compares exact octets.
    pub fn match_filter(&self, filter: &[u8], mask: &[u8]) -> Result<bool> {
        self.match_filter_at(0, filter, mask)
    }

    fn match_filter_at(&self, offset: usize, filter: &[u8], mask: &[u8]) -> Result<bool> {
        if offset + filter.len() > self.total {
            return Ok(false);
        }
        let mut pos = 0;
        while pos < filter.len() {
            let map = self.read(offset + pos, filter.len() - pos)?;
            for (i, &b) in map.iter().enumerate() {
                let m = mask.get(pos + i).copied().unwrap_or(0xff);
                if b & m != filter[pos + i] & m {
                    return Ok(false);
                }
            }
            pos += map.len();
        }
        Ok(true)
    }

    /// Locates the segment containing `offset` through the cached cursor.
    fn find_seg(&self, offset: usize) -> Result<(usize, usize)> {
        if offset >= self.total {
            return Err(Error::Invalid);
        }
        let (mut idx, mut seg_start) = self.cursor.get();
        if idx >= self.segs.len() || seg_start > offset {
            idx = 0;
            seg_start = 0;
        }
        while seg_start + self.segs[idx].len <= offset {
            seg_start += self.segs[idx].len;
            idx += 1;
        }
        self.cursor.set((idx, seg_start));
        Ok((idx, seg_start))
    }

    /// Detaches segment `idx` from shared storage by deep copy if needed.
    fn detach_seg(&mut self, idx: usize) -> Result<()> {
        let seg = &mut self.segs[idx];
        if Arc::get_mut(&mut seg.mem).is_some() {
            return Ok(());
        }
        let mut fresh = self.mgr.alloc_seg(seg.len);
        match Arc::get_mut(&mut fresh.mem) {
            Some(mem) => mem[..seg.len].copy_from_slice(&seg.mem[seg.off..seg.off + seg.len]),
            None => return Err(Error::Alloc),
        }
        fresh.len = seg.len;
        *seg = fresh;
        Ok(())
    }

    /// Splits the segment list at logical offset `at`, returning the index
    /// of the first segment at or after it.
    fn split_at(&mut self, at: usize) -> Result<usize> {
        if at == self.total {
            return Ok(self.segs.len());
        }
        let (idx, seg_start) = self.find_seg(at)?;
        let in_seg = at - seg_start;
        if in_seg == 0 {
            return Ok(idx);
        }
        let seg = &mut self.segs[idx];
        let mut tail = seg.share();
        tail.off = seg.off + in_seg;
        tail.len = seg.len - in_seg;
        seg.len = in_seg;
        seg.back_margin = 0;
        self.segs.insert(idx + 1, tail);
        self.cursor.set((0, 0));
        Ok(idx + 1)
    }

    fn extend_front(&mut self, len: usize) {
        if let Some(seg) = self.segs.first_mut() {
            if seg.front_margin >= len {
                seg.off -= len;
                seg.len += len;
                seg.front_margin -= len;
                self.total += len;
                return;
            }
        }
        let seg = self.mgr.alloc_seg(len);
        self.segs.insert(0, seg);
        self.total += len;
    }

    fn extend_back(&mut self, len: usize) {
        if let Some(seg) = self.segs.last_mut() {
            if seg.back_margin >= len {
                seg.len += len;
                seg.back_margin -= len;
                self.total += len;
                return;
            }
        }
        let seg = self.mgr.alloc_seg(len);
        self.segs.push(seg);
        self.total += len;
    }

    fn trim_front(&mut self, mut len: usize) -> Result<()> {
        if len > self.total {
            return Err(Error::Invalid);
        }
        self.total -= len;
        while len > 0 {
            let seg = match self.segs.first_mut() {
                Some(seg) => seg,
                None => return Err(Error::Invalid),
            };
            if seg.len <= len {
                len -= seg.len;
                self.segs.remove(0);
            } else {
                seg.off += len;
                seg.len -= len;
                seg.front_margin += len;
                len = 0;
            }
        }
        Ok(())
    }

    fn trim_back(&mut self, mut len: usize) -> Result<()> {
        if len > self.total {
            return Err(Error::Invalid);
        }
        self.total -= len;
        while len > 0 {
            let seg = match self.segs.last_mut() {
                Some(seg) => seg,
                None => return Err(Error::Invalid),
            };
            if seg.len <= len {
                len -= seg.len;
                self.segs.pop();
            } else {
                seg.len -= len;
                seg.back_margin += len;
                len = 0;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for UbufBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufBlock")
            .field("size", &self.total)
            .field("segments", &self.segs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> UbufBlockMgr {
        UbufBlockMgr::new(UmemMgr::new())
    }

    fn fill(block: &mut UbufBlock) {
        let size = block.size();
        let mut done = 0;
        while done < size {
            let mut map = block.write(done, size - done).unwrap();
            let len = map.len();
            for (i, b) in map.iter_mut().enumerate() {
                *b = (done + i) as u8;
            }
            done += len;
        }
    }

    #[test]
    fn test_alloc_and_size() {
        let block = mgr().alloc(188);
        assert_eq!(block.size(), 188);
    }

    #[test]
    fn test_write_then_read() {
        let mut block = mgr().alloc(32);
        fill(&mut block);
        let map = block.read(5, 4).unwrap();
        assert_eq!(&*map, &[5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_on_write_preserves_dup() {
        let mut block = mgr().alloc(32);
        fill(&mut block);
        let dup = block.dup();
        {
            let mut map = block.write(0, 1).unwrap();
            map[0] = 0xab;
        }
        assert_eq!(block.read(0, 1).unwrap()[0], 0xab);
        assert_eq!(dup.read(0, 1).unwrap()[0], 0);
    }

    #[test]
    fn test_splice_shares_payload() {
        let mut block = mgr().alloc(32);
        fill(&mut block);
        let view = block.splice(10, 8).unwrap();
        assert_eq!(view.size(), 8);
        assert_eq!(&*view.read(0, 8).unwrap(), &[10, 11, 12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn test_resize_round_trip() {
        let mut block = mgr().alloc(16);
        fill(&mut block);
        let mut reference = vec![0u8; 16];
        block.extract(0, &mut reference).unwrap();

        block.resize(4, 8).unwrap();
        assert_eq!(block.size(), 28);
        block.resize(-4, -8).unwrap();
        assert_eq!(block.size(), 16);

        let mut restored = vec![0u8; 16];
        block.extract(0, &mut restored).unwrap();
        assert_eq!(reference, restored);
    }

    #[test]
    fn test_insert_delete() {
        let mut block = mgr().alloc_from(&[1, 2, 3, 4]);
        let sub = mgr().alloc_from(&[9, 9]);
        block.insert(2, sub).unwrap();
        let mut out = vec![0u8; 6];
        block.extract(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 9, 9, 3, 4]);

        block.delete(2, 2).unwrap();
        let mut out = vec![0u8; 4];
        block.extract(0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_peek_across_segments() {
        let mut block = mgr().alloc_from(&[1, 2]);
        block.append(mgr().alloc_from(&[3, 4])).unwrap();
        let mut scratch = [0u8; 3];
        let peeked = block.peek(1, &mut scratch).unwrap();
        assert_eq!(peeked, &[2, 3, 4]);
    }

    #[test]
    fn test_scan_find() {
        let block = mgr().alloc_from(&[0, 0, 0x47, 1, 0x47, 2]);
        let mut offset = 0;
        block.scan(&mut offset, 0x47).unwrap();
        assert_eq!(offset, 2);
        offset += 1;
        block.scan(&mut offset, 0x47).unwrap();
        assert_eq!(offset, 4);

        let mut offset = 0;
        block.find(&mut offset, &[0x47, 2]).unwrap();
        assert_eq!(offset, 4);
    }

    #[test]
    fn test_match_filter_masked() {
        let block = mgr().alloc_from(&[0x47, 0x5f]);
        assert!(block.match_filter(&[0x47, 0x1f], &[0xff, 0x1f]).unwrap());
        assert!(!block.match_filter(&[0x46, 0x1f], &[0xff, 0x1f]).unwrap());
    }

    #[test]
    fn test_truncate() {
        let mut block = mgr().alloc_from(&[1, 2, 3, 4, 5]);
        block.truncate(2).unwrap();
        assert_eq!(block.size(), 2);
        assert!(block.read(2, 1).is_err());
    }
}
