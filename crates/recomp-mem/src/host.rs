//! Host memory reservation backends.
//!
//! A [`HostReserver`] hands out one contiguous, zero-filled, read/write [`Reservation`] per call.
//! The address space manager drives the candidate-base policy; backends only report where the
//! host actually placed the region.

use core::ptr::NonNull;
use std::io;

/// Page protection applied to a range of a [`Reservation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

pub trait HostReserver {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Reserves and commits `len` zeroed bytes.
    ///
    /// With `Some(hint)` the backend may place the region anywhere; the caller checks
    /// [`Reservation::base`] and drops mismatches. `None` means "host chooses".
    fn reserve(&mut self, hint: Option<u64>, len: usize) -> Option<Reservation>;
}

enum Backing {
    #[cfg(unix)]
    Mmap,
    Heap {
        // Held for ownership only; accessed through `Reservation::base`.
        _buf: Box<[u8]>,
        read_only: Vec<(usize, usize)>,
    },
}

/// An owned host region. Released on drop.
pub struct Reservation {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

impl core::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Reservation")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl Reservation {
    pub fn base(&self) -> u64 {
        self.base.as_ptr() as usize as u64
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Changes the protection of `[offset, offset + len)`.
    ///
    /// The mmap backend works in host pages. [`Protection::ReadOnly`] shrinks the range to the
    /// whole pages inside it, so partial pages at either end stay writable.
    /// [`Protection::ReadWrite`] grows it to every page it touches.
    pub fn protect(&mut self, offset: usize, len: usize, prot: Protection) -> io::Result<()> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range outside region"))?;

        match &mut self.backing {
            #[cfg(unix)]
            Backing::Mmap => {
                let page = page_size();
                let down = |at: usize| at & !(page - 1);
                let up = |at: usize| ((at + page - 1) & !(page - 1)).min(self.len);
                let (start, end, flags) = match prot {
                    Protection::ReadOnly => (up(offset), down(end), libc::PROT_READ),
                    Protection::ReadWrite => (
                        down(offset),
                        up(end),
                        libc::PROT_READ | libc::PROT_WRITE,
                    ),
                };
                if end <= start {
                    return Ok(());
                }
                // SAFETY: `start..end` lies inside the mapping we own.
                let rc = unsafe {
                    libc::mprotect(self.base.as_ptr().add(start).cast(), end - start, flags)
                };
                if rc != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Backing::Heap { read_only, .. } => {
                read_only.retain(|&(s, e)| e <= offset || s >= end);
                if prot == Protection::ReadOnly {
                    read_only.push((offset, end));
                }
            }
        }
        Ok(())
    }

    /// Whether any byte of `[offset, offset + len)` is logically read-only.
    ///
    /// Only the heap backend tracks this; mmap protection is enforced by the host.
    pub fn is_read_only(&self, offset: usize, len: usize) -> bool {
        match &self.backing {
            #[cfg(unix)]
            Backing::Mmap => false,
            Backing::Heap { read_only, .. } => {
                let end = offset.saturating_add(len);
                read_only.iter().any(|&(s, e)| offset < e && s < end)
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        match self.backing {
            #[cfg(unix)]
            Backing::Mmap => {
                // SAFETY: `base..base+len` is exactly the mapping returned by `mmap`.
                let rc = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
                if rc != 0 {
                    tracing::warn!(
                        base = format_args!("{:#x}", self.base()),
                        len = self.len,
                        error = %io::Error::last_os_error(),
                        "munmap failed"
                    );
                }
            }
            Backing::Heap { .. } => {}
        }
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

/// Anonymous private `mmap` reservations. Pages are zero on first touch.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapReserver;

#[cfg(unix)]
impl HostReserver for MmapReserver {
    fn name(&self) -> &'static str {
        "mmap"
    }

    fn reserve(&mut self, hint: Option<u64>, len: usize) -> Option<Reservation> {
        if len == 0 {
            return None;
        }
        let addr = match hint {
            Some(h) => usize::try_from(h).ok()?,
            None => 0,
        };

        #[allow(unused_mut)]
        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            flags |= libc::MAP_NORESERVE;
            if hint.is_some() {
                flags |= libc::MAP_FIXED_NOREPLACE;
            }
        }

        // SAFETY: anonymous mapping with no fd; the kernel validates `addr`/`len`.
        let ptr = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            tracing::debug!(
                hint = format_args!("{:#x}", addr),
                len,
                error = %io::Error::last_os_error(),
                "mmap reservation refused"
            );
            return None;
        }

        let base = NonNull::new(ptr.cast::<u8>())?;
        Some(Reservation {
            base,
            len,
            backing: Backing::Mmap,
        })
    }
}

/// Zero-filled boxed buffer. Only honours "host chooses".
///
/// Read-only ranges are recorded and checked by the address space in debug builds.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapReserver;

impl HostReserver for HeapReserver {
    fn name(&self) -> &'static str {
        "heap"
    }

    fn reserve(&mut self, hint: Option<u64>, len: usize) -> Option<Reservation> {
        if hint.is_some() || len == 0 {
            return None;
        }
        let mut buf = vec![0u8; len].into_boxed_slice();
        let base = NonNull::new(buf.as_mut_ptr())?;
        Some(Reservation {
            base,
            len,
            backing: Backing::Heap {
                _buf: buf,
                read_only: Vec::new(),
            },
        })
    }
}

/// Backend used by [`crate::AddressSpace::init`].
pub fn default_reserver() -> Box<dyn HostReserver> {
    #[cfg(unix)]
    {
        Box::new(MmapReserver)
    }
    #[cfg(not(unix))]
    {
        Box::new(HeapReserver)
    }
}
