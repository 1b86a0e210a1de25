//! Sound Buffers
//!
//! A sound buffer holds a run of sample frames in one substrate, split into
//! named channel planes. Planar formats declare one plane per channel;
//! interleaved formats declare a single plane whose name enumerates the
//! channels (e.g. `"lr"`), with the sample size covering the whole frame.
//!
//! `resize` slides a window over the substrate; a copy happens only when the
//! requested window no longer fits, or on a write mapping while the
//! substrate is shared.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

struct UbufSoundMgrInner {
    umem: UmemMgr,
    sample_size: usize,
    planes: Vec<String>,
}

/// Shared manager producing sound buffers of one channel layout.
#[derive(Clone)]
pub struct UbufSoundMgr {
    inner: Arc<UbufSoundMgrInner>,
}

/// Builder for [`UbufSoundMgr`].
pub struct UbufSoundMgrBuilder {
    umem: UmemMgr,
    sample_size: usize,
    planes: Vec<String>,
}

impl UbufSoundMgrBuilder {
    /// Declares a channel plane.
    pub fn plane(mut self, channel: &str) -> Self {
        self.planes.push(channel.to_owned());
        self
    }

    /// Validates the layout and builds the manager.
    pub fn build(self) -> Result<UbufSoundMgr> {
        if self.planes.is_empty() || self.sample_size == 0 {
            return Err(Error::Invalid);
        }
        Ok(UbufSoundMgr {
            inner: Arc::new(UbufSoundMgrInner {
                umem: self.umem,
                sample_size: self.sample_size,
                planes: self.planes,
            }),
        })
    }
}

impl UbufSoundMgr {
    /// Starts building a manager with `sample_size` octets per sample frame
    /// and per plane.
    pub fn builder(umem: UmemMgr, sample_size: usize) -> UbufSoundMgrBuilder {
        UbufSoundMgrBuilder {
            umem,
            sample_size,
            planes: Vec::new(),
        }
    }

    /// Octets per sample frame per plane.
    pub fn sample_size(&self) -> usize {
        self.inner.sample_size
    }

    /// Declared plane names.
    pub fn planes(&self) -> impl Iterator<Item = &str> {
        self.inner.planes.iter().map(String::as_str)
    }

    /// Allocates a buffer of `samples` frames.
    pub fn alloc(&self, samples: usize) -> Result<UbufSound> {
        if samples == 0 {
            return Err(Error::Invalid);
        }
        let plane_len = samples * self.inner.sample_size;
        let mem = self.inner.umem.alloc(plane_len * self.inner.planes.len());
        let origins = (0..self.inner.planes.len())
            .map(|i| i * plane_len)
            .collect();
        Ok(UbufSound {
            mem: Arc::new(mem),
            mgr: self.clone(),
            origins,
            capacity: samples,
            samples,
        })
    }

    fn plane_index(&self, channel: &str) -> Result<usize> {
        self.inner
            .planes
            .iter()
            .position(|p| p == channel)
            .ok_or(Error::Invalid)
    }
}

impl std::fmt::Debug for UbufSoundMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufSoundMgr")
            .field("sample_size", &self.inner.sample_size)
            .field("planes", &self.inner.planes)
            .finish()
    }
}

/// Shared read mapping of one channel plane.
pub struct SoundPlaneRead<'a> {
    data: &'a [u8],
}

impl Deref for SoundPlaneRead<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

/// Exclusive write mapping of one channel plane.
pub struct SoundPlaneWrite<'a> {
    data: &'a mut [u8],
}

impl Deref for SoundPlaneWrite<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for SoundPlaneWrite<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

/// Reference-counted sound buffer.
pub struct UbufSound {
    mem: Arc<Umem>,
    mgr: UbufSoundMgr,
    /// Per-plane offset of the first visible frame.
    origins: Vec<usize>,
    /// Frames available in the substrate behind each origin's plane base.
    capacity: usize,
    samples: usize,
}

impl UbufSound {
    /// Buffer geometry: `(samples, sample_size)`.
    pub fn size(&self) -> (usize, usize) {
        (self.samples, self.mgr.sample_size())
    }

    /// Iterates plane names.
    pub fn plane_iterate(&self) -> impl Iterator<Item = &str> {
        self.mgr.inner.planes.iter().map(String::as_str)
    }

    /// Duplicates the buffer, sharing the substrate.
    pub fn dup(&self) -> UbufSound {
        UbufSound {
            mem: Arc::clone(&self.mem),
            mgr: self.mgr.clone(),
            origins: self.origins.clone(),
            capacity: self.capacity,
            samples: self.samples,
        }
    }

    /// Maps `samples` frames of a plane at `offset` for shared reading.
    pub fn plane_read(&self, channel: &str, offset: usize, samples: usize) -> Result<SoundPlaneRead<'_>> {
        let (from, to) = self.plane_window(channel, offset, samples)?;
        Ok(SoundPlaneRead {
            data: &self.mem[from..to],
        })
    }

    /// Maps `samples` frames of a plane at `offset` for exclusive writing,
    /// detaching a shared substrate first.
    pub fn plane_write(
        &mut self,
        channel: &str,
        offset: usize,
        samples: usize,
    ) -> Result<SoundPlaneWrite<'_>> {
        let (from, to) = self.plane_window(channel, offset, samples)?;
        self.detach()?;
        let mem = Arc::get_mut(&mut self.mem).ok_or(Error::Busy)?;
        Ok(SoundPlaneWrite {
            data: &mut mem[from..to],
        })
    }

    /// Slides the visible window: drops `trim_front` frames (which may be
    /// negative to reveal trimmed ones again) and sets the new length.
    ///
    /// A copy happens only when the window no longer fits the substrate.
    pub fn resize(&mut self, trim_front: isize, new_samples: usize) -> Result<()> {
        if new_samples == 0 {
            return Err(Error::Invalid);
        }
        let ss = self.mgr.sample_size();
        let plane_len = self.capacity * ss;

        // Current window start, in frames from the plane base.
        let start = (self.origins[0] % plane_len.max(1)) / ss;
        let new_start = start as isize + trim_front;
        if new_start >= 0 && new_start as usize + new_samples <= self.capacity {
            for origin in &mut self.origins {
                *origin = (*origin as isize + trim_front * ss as isize) as usize;
            }
            self.samples = new_samples;
            return Ok(());
        }

        // Window escapes the substrate: reallocate and copy the overlap.
        let mut fresh = self.mgr.alloc(new_samples)?;
        {
            let dst_origins = fresh.origins.clone();
            let dst_mem = Arc::get_mut(&mut fresh.mem).ok_or(Error::Busy)?;
            for (idx, &dst_origin) in dst_origins.iter().enumerate() {
                for frame in 0..new_samples {
                    let src_frame = frame as isize + trim_front;
                    if src_frame < 0 || src_frame as usize >= self.samples {
                        continue;
                    }
                    let src_at = self.origins[idx] + src_frame as usize * ss;
                    let dst_at = dst_origin + frame * ss;
                    dst_mem[dst_at..dst_at + ss].copy_from_slice(&self.mem[src_at..src_at + ss]);
                }
            }
        }
        *self = fresh;
        Ok(())
    }

    fn plane_window(&self, channel: &str, offset: usize, samples: usize) -> Result<(usize, usize)> {
        if offset + samples > self.samples {
            return Err(Error::Invalid);
        }
        let idx = self.mgr.plane_index(channel)?;
        let ss = self.mgr.sample_size();
        let from = self.origins[idx] + offset * ss;
        Ok((from, from + samples * ss))
    }

    fn detach(&mut self) -> Result<()> {
        if Arc::get_mut(&mut self.mem).is_some() {
            return Ok(());
        }
        let copy = self.mgr.inner.umem.alloc(self.mem.len());
        let mut copy = Arc::new(copy);
        match Arc::get_mut(&mut copy) {
            Some(mem) => mem.copy_from_slice(&self.mem),
            None => return Err(Error::Alloc),
        }
        self.mem = copy;
        Ok(())
    }
}

impl std::fmt::Debug for UbufSound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufSound")
            .field("samples", &self.samples)
            .field("sample_size", &self.mgr.sample_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_planar() -> UbufSoundMgr {
        UbufSoundMgr::builder(UmemMgr::new(), 2)
            .plane("l")
            .plane("r")
            .build()
            .unwrap()
    }

    fn interleaved() -> UbufSoundMgr {
        UbufSoundMgr::builder(UmemMgr::new(), 4).plane("lr").build().unwrap()
    }

    #[test]
    fn test_alloc_size() {
        let sound = stereo_planar().alloc(128).unwrap();
        assert_eq!(sound.size(), (128, 2));
        assert_eq!(sound.plane_iterate().count(), 2);
    }

    #[test]
    fn test_planar_write_read() {
        let mut sound = stereo_planar().alloc(8).unwrap();
        {
            let mut map = sound.plane_write("l", 0, 8).unwrap();
            for (i, b) in map.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
        let map = sound.plane_read("l", 2, 2).unwrap();
        assert_eq!(&*map, &[4, 5, 6, 7]);
    }

    #[test]
    fn test_interleaved_single_plane() {
        let sound = interleaved().alloc(16).unwrap();
        assert!(sound.plane_read("lr", 0, 16).is_ok());
        assert!(sound.plane_read("l", 0, 1).is_err());
    }

    #[test]
    fn test_resize_slides_window() {
        let mut sound = stereo_planar().alloc(8).unwrap();
        {
            let mut map = sound.plane_write("r", 0, 8).unwrap();
            for (i, b) in map.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
        let dup = sound.dup();
        sound.resize(2, 4).unwrap();
        assert_eq!(sound.size().0, 4);
        assert_eq!(sound.plane_read("r", 0, 1).unwrap()[0], 4);
        // Slide is window arithmetic: still sharing.
        assert_eq!(Arc::strong_count(&dup.mem), 2);
    }

    #[test]
    fn test_resize_copies_when_growing() {
        let mut sound = stereo_planar().alloc(4).unwrap();
        {
            let mut map = sound.plane_write("l", 0, 4).unwrap();
            map.copy_from_slice(&[1, 1, 2, 2, 3, 3, 4, 4]);
        }
        sound.resize(0, 8).unwrap();
        assert_eq!(sound.size().0, 8);
        assert_eq!(sound.plane_read("l", 1, 1).unwrap()[0], 2);
    }

    #[test]
    fn test_write_detaches_shared_substrate() {
        let mut sound = stereo_planar().alloc(4).unwrap();
        let dup = sound.dup();
        {
            let mut map = sound.plane_write("l", 0, 1).unwrap();
            map[0] = 0xab;
        }
        assert_eq!(sound.plane_read("l", 0, 1).unwrap()[0], 0xab);
        assert_eq!(dup.plane_read("l", 0, 1).unwrap()[0], 0);
    }
}
