//! Picture Buffers
//!
//! A picture buffer is a set of named planes sharing one substrate
//! allocation. Each plane has a chroma subsampling relative to the picture,
//! a bytes-per-macropixel, a stride, and margins on all four sides so that
//! cropping and small shifts are pure origin arithmetic.
//!
//! Duplicates share the substrate as one unit; strides are equal across
//! duplicates. A write mapping detaches the substrate by deep copy when it
//! is still shared.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::umem::{Umem, UmemMgr};

/// Picture manager configuration.
#[derive(Debug, Clone)]
pub struct UbufPicConfig {
    /// Horizontal margin on each side, in pixels.
    pub hmargin: usize,
    /// Vertical margin on each side, in lines.
    pub vmargin: usize,
    /// Stride alignment, in octets (0 or 1 disables).
    pub align: usize,
}

impl Default for UbufPicConfig {
    fn default() -> Self {
        Self {
            hmargin: 0,
            vmargin: 0,
            align: 0,
        }
    }
}

/// Static description of one plane.
#[derive(Debug, Clone)]
pub struct PicPlaneDesc {
    /// Plane name, e.g. `"y8"`.
    pub chroma: String,
    /// Horizontal subsampling.
    pub hsub: usize,
    /// Vertical subsampling.
    pub vsub: usize,
    /// Octets per macropixel in this plane.
    pub macropixel_size: usize,
}

struct UbufPicMgrInner {
    umem: UmemMgr,
    macropixel: usize,
    planes: Vec<PicPlaneDesc>,
    config: UbufPicConfig,
}

/// Shared manager producing picture buffers of one pixel format.
#[derive(Clone)]
pub struct UbufPicMgr {
    inner: Arc<UbufPicMgrInner>,
}

/// Builder for [`UbufPicMgr`].
pub struct UbufPicMgrBuilder {
    umem: UmemMgr,
    macropixel: usize,
    planes: Vec<PicPlaneDesc>,
    config: UbufPicConfig,
}

impl UbufPicMgrBuilder {
    /// Declares a plane.
    pub fn plane(mut self, chroma: &str, hsub: usize, vsub: usize, macropixel_size: usize) -> Self {
        self.planes.push(PicPlaneDesc {
            chroma: chroma.to_owned(),
            hsub,
            vsub,
            macropixel_size,
        });
        self
    }

    /// Sets margins, in pixels and lines.
    pub fn margins(mut self, hmargin: usize, vmargin: usize) -> Self {
        self.config.hmargin = hmargin;
        self.config.vmargin = vmargin;
        self
    }

    /// Sets stride alignment in octets.
    pub fn align(mut self, align: usize) -> Self {
        self.config.align = align;
        self
    }

    /// Validates the format and builds the manager.
    pub fn build(self) -> Result<UbufPicMgr> {
        if self.planes.is_empty() || self.macropixel == 0 {
            return Err(Error::Invalid);
        }
        for desc in &self.planes {
            if desc.hsub == 0 || desc.vsub == 0 || desc.macropixel_size == 0 {
                return Err(Error::Invalid);
            }
            // Margins must land on plane boundaries for shifts to be exact.
            if self.config.hmargin % (desc.hsub * self.macropixel) != 0
                || self.config.vmargin % desc.vsub != 0
            {
                return Err(Error::Invalid);
            }
        }
        Ok(UbufPicMgr {
            inner: Arc::new(UbufPicMgrInner {
                umem: self.umem,
                macropixel: self.macropixel,
                planes: self.planes,
                config: self.config,
            }),
        })
    }
}

impl UbufPicMgr {
    /// Starts building a manager for pictures of `macropixel` pixels per
    /// macropixel.
    pub fn builder(umem: UmemMgr, macropixel: usize) -> UbufPicMgrBuilder {
        UbufPicMgrBuilder {
            umem,
            macropixel,
            planes: Vec::new(),
            config: UbufPicConfig::default(),
        }
    }

    /// Convenience planar YUV 4:2:0 manager (`y8`, `u8`, `v8`).
    pub fn yuv420(umem: UmemMgr) -> UbufPicMgr {
        let planes = [("y8", 1), ("u8", 2), ("v8", 2)]
            .into_iter()
            .map(|(chroma, sub)| PicPlaneDesc {
                chroma: chroma.to_owned(),
                hsub: sub,
                vsub: sub,
                macropixel_size: 1,
            })
            .collect();
        UbufPicMgr {
            inner: Arc::new(UbufPicMgrInner {
                umem,
                macropixel: 1,
                planes,
                config: UbufPicConfig::default(),
            }),
        }
    }

    /// Pixels per macropixel.
    pub fn macropixel(&self) -> usize {
        self.inner.macropixel
    }

    /// Declared planes.
    pub fn planes(&self) -> &[PicPlaneDesc] {
        &self.inner.planes
    }

    /// Allocates a picture of `hsize`×`vsize` pixels.
    pub fn alloc(&self, hsize: usize, vsize: usize) -> Result<UbufPic> {
        let inner = &self.inner;
        self.check_geometry(hsize, vsize)?;

        let align = inner.config.align.max(1);
        let mut planes = Vec::with_capacity(inner.planes.len());
        let mut offset = 0;
        for desc in &inner.planes {
            let visible = hsize / desc.hsub / inner.macropixel * desc.macropixel_size;
            let margin = inner.config.hmargin / desc.hsub / inner.macropixel * desc.macropixel_size;
            let stride = round_up(2 * margin + visible, align);
            let vmargin_lines = inner.config.vmargin / desc.vsub;
            let lines = vsize / desc.vsub + 2 * vmargin_lines;
            let base = round_up(offset, align);
            let region = lines * stride;
            planes.push(PlaneState {
                base,
                origin: base + vmargin_lines * stride + margin,
                stride,
                region,
            });
            offset = base + region;
        }

        let mem = inner.umem.alloc(offset);
        Ok(UbufPic {
            mem: Arc::new(mem),
            mgr: self.clone(),
            hsize,
            vsize,
            planes,
        })
    }

    /// Checks that a geometry respects the macropixel and every plane's
    /// subsampling.
    pub fn check_geometry(&self, hsize: usize, vsize: usize) -> Result<()> {
        let inner = &self.inner;
        if hsize == 0 || vsize == 0 || hsize % inner.macropixel != 0 {
            return Err(Error::Invalid);
        }
        for desc in &inner.planes {
            if hsize % (desc.hsub * inner.macropixel) != 0 || vsize % desc.vsub != 0 {
                return Err(Error::Invalid);
            }
        }
        Ok(())
    }

    fn plane_index(&self, chroma: &str) -> Result<usize> {
        self.inner
            .planes
            .iter()
            .position(|d| d.chroma == chroma)
            .ok_or(Error::Invalid)
    }
}

impl std::fmt::Debug for UbufPicMgr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufPicMgr")
            .field("macropixel", &self.inner.macropixel)
            .field("planes", &self.inner.planes.len())
            .finish()
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[derive(Debug, Clone, Copy)]
struct PlaneState {
    /// First octet of the plane region in the substrate.
    base: usize,
    /// Octet of pixel (0, 0).
    origin: usize,
    stride: usize,
    /// Plane region length.
    region: usize,
}

/// Shared read mapping of one plane.
pub struct PicPlaneRead<'a> {
    data: &'a [u8],
    /// Distance between two lines, in octets.
    pub stride: usize,
}

impl Deref for PicPlaneRead<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

/// Exclusive write mapping of one plane.
pub struct PicPlaneWrite<'a> {
    data: &'a mut [u8],
    /// Distance between two lines, in octets.
    pub stride: usize,
}

impl Deref for PicPlaneWrite<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for PicPlaneWrite<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

/// Reference-counted picture buffer.
pub struct UbufPic {
    mem: Arc<Umem>,
    mgr: UbufPicMgr,
    hsize: usize,
    vsize: usize,
    planes: Vec<PlaneState>,
}

impl UbufPic {
    /// Picture geometry: `(hsize, vsize, macropixel)`.
    pub fn size(&self) -> (usize, usize, usize) {
        (self.hsize, self.vsize, self.mgr.macropixel())
    }

    /// Iterates plane names.
    pub fn plane_iterate(&self) -> impl Iterator<Item = &str> {
        self.mgr.inner.planes.iter().map(|d| d.chroma.as_str())
    }

    /// Returns `(stride, hsub, vsub, macropixel_size)` for a plane.
    pub fn plane_size(&self, chroma: &str) -> Result<(usize, usize, usize, usize)> {
        let idx = self.mgr.plane_index(chroma)?;
        let desc = &self.mgr.inner.planes[idx];
        Ok((
            self.planes[idx].stride,
            desc.hsub,
            desc.vsub,
            desc.macropixel_size,
        ))
    }

    /// Duplicates the picture, sharing the substrate.
    pub fn dup(&self) -> UbufPic {
        UbufPic {
            mem: Arc::clone(&self.mem),
            mgr: self.mgr.clone(),
            hsize: self.hsize,
            vsize: self.vsize,
            planes: self.planes.clone(),
        }
    }

    /// Maps a plane for shared reading. Line `v` starts at `v * stride`.
    pub fn plane_read(&self, chroma: &str) -> Result<PicPlaneRead<'_>> {
        let idx = self.mgr.plane_index(chroma)?;
        let plane = &self.planes[idx];
        let end = plane.base + plane.region;
        Ok(PicPlaneRead {
            data: &self.mem[plane.origin..end],
            stride: plane.stride,
        })
    }

    /// Maps a plane for exclusive writing, detaching a shared substrate
    /// first.
    pub fn plane_write(&mut self, chroma: &str) -> Result<PicPlaneWrite<'_>> {
        let idx = self.mgr.plane_index(chroma)?;
        self.detach()?;
        let plane = &self.planes[idx];
        let (origin, end, stride) = (plane.origin, plane.base + plane.region, plane.stride);
        let mem = Arc::get_mut(&mut self.mem).ok_or(Error::Busy)?;
        Ok(PicPlaneWrite {
            data: &mut mem[origin..end],
            stride,
        })
    }

    /// Crops or shifts the picture window.
    ///
    /// The new origin is the old pixel `(hskip, vskip)`. When every plane's
    /// shifted window stays inside its allocated margins this is pure origin
    /// arithmetic; otherwise the picture is reallocated and the overlapping
    /// pixels are copied plane by plane.
    pub fn resize(
        &mut self,
        hskip: isize,
        vskip: isize,
        new_hsize: usize,
        new_vsize: usize,
    ) -> Result<()> {
        self.mgr.check_geometry(new_hsize, new_vsize)?;
        let macropixel = self.mgr.macropixel();
        for desc in self.mgr.planes() {
            if hskip.rem_euclid((desc.hsub * macropixel) as isize) != 0
                || vskip.rem_euclid(desc.vsub as isize) != 0
            {
                return Err(Error::Invalid);
            }
        }

        if let Some(origins) = self.shifted_origins(hskip, vskip, new_hsize, new_vsize) {
            for (plane, origin) in self.planes.iter_mut().zip(origins) {
                plane.origin = origin;
            }
            self.hsize = new_hsize;
            self.vsize = new_vsize;
            return Ok(());
        }

        self.realloc_copy(hskip, vskip, new_hsize, new_vsize)
    }

    /// Computes shifted origins, or `None` when a plane would leave its
    /// region.
    fn shifted_origins(
        &self,
        hskip: isize,
        vskip: isize,
        new_hsize: usize,
        new_vsize: usize,
    ) -> Option<Vec<usize>> {
        let macropixel = self.mgr.macropixel();
        let mut origins = Vec::with_capacity(self.planes.len());
        for (desc, plane) in self.mgr.inner.planes.iter().zip(&self.planes) {
            let delta = vskip / desc.vsub as isize * plane.stride as isize
                + hskip / (desc.hsub * macropixel) as isize * desc.macropixel_size as isize;
            let origin = plane.origin as isize + delta;
            let visible = new_hsize / desc.hsub / macropixel * desc.macropixel_size;
            let lines = new_vsize / desc.vsub;
            if origin < plane.base as isize {
                return None;
            }
            let origin = origin as usize;
            if origin + (lines - 1) * plane.stride + visible > plane.base + plane.region {
                return None;
            }
            origins.push(origin);
        }
        Some(origins)
    }

    fn realloc_copy(
        &mut self,
        hskip: isize,
        vskip: isize,
        new_hsize: usize,
        new_vsize: usize,
    ) -> Result<()> {
        let macropixel = self.mgr.macropixel();
        let mut fresh = self.mgr.alloc(new_hsize, new_vsize)?;
        for (idx, desc) in self.mgr.inner.planes.iter().enumerate() {
            let src_plane = &self.planes[idx];
            let dst_plane = fresh.planes[idx];
            let dst_mem = Arc::get_mut(&mut fresh.mem).ok_or(Error::Busy)?;

            let src_lines = self.vsize / desc.vsub;
            let dst_lines = new_vsize / desc.vsub;
            let src_visible = self.hsize / desc.hsub / macropixel * desc.macropixel_size;
            let dst_visible = new_hsize / desc.hsub / macropixel * desc.macropixel_size;
            let line_skip = vskip / desc.vsub as isize;
            let byte_skip = hskip / (desc.hsub * macropixel) as isize * desc.macropixel_size as isize;

            for dst_v in 0..dst_lines {
                let src_v = dst_v as isize + line_skip;
                if src_v < 0 || src_v as usize >= src_lines {
                    continue;
                }
                // Horizontal overlap between the shifted window and the
                // source line.
                let src_from = byte_skip.max(0) as usize;
                let dst_from = (-byte_skip).max(0) as usize;
                if src_from >= src_visible || dst_from >= dst_visible {
                    continue;
                }
                let run = (src_visible - src_from).min(dst_visible - dst_from);
                let src_at = src_plane.origin + src_v as usize * src_plane.stride + src_from;
                let dst_at = dst_plane.origin + dst_v * dst_plane.stride + dst_from;
                dst_mem[dst_at..dst_at + run].copy_from_slice(&self.mem[src_at..src_at + run]);
            }
        }
        *self = fresh;
        Ok(())
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

impl std::fmt::Debug for UbufPic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UbufPic")
            .field("hsize", &self.hsize)
            .field("vsize", &self.vsize)
            .field("planes", &self.planes.len())
            .finish()
    }
}
