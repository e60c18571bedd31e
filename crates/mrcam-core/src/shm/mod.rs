//! Typed views over named shared memory.
//!
//! A [`SharedSegment<L>`] owns one mapping of at least `size_of::<L>()` bytes
//! and dereferences to `&L`.  Layout fields are only reachable through the
//! accessor methods on `L`, which use atomics or the seqlock discipline.
//!
//! # Backing
//!
//! | Host      | `create` / `open`                                   |
//! |-----------|-----------------------------------------------------|
//! | Windows   | pagefile-backed named section, null DACL            |
//! | elsewhere | file in [`segment_dir`] mapped with `memmap2`       |
//!
//! [`SharedSegment::anonymous`] gives a private zeroed mapping for tests and
//! single-process use.

use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use thiserror::Error;
use tracing::debug;

#[cfg(target_os = "windows")]
pub mod windows;

/// Environment variable overriding the directory used for file-backed
/// segments.
pub const SHM_DIR_ENV: &str = "MRCAM_SHM_DIR";

/// Error type for mapping shared segments.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Creating, opening, or mapping the segment failed.
    #[error("shared segment {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An existing segment is smaller than the layout requires.
    #[error("shared segment {name} is {actual} bytes, layout needs {expected}")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The mapping address does not satisfy the layout's alignment.
    #[error("shared segment {name} is mapped at a misaligned address")]
    Misaligned { name: String },
}

impl SegmentError {
    pub(crate) fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

/// A type that can be overlaid on a shared mapping.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers, be valid for the
/// all-zero bit pattern (a freshly created segment), and tolerate concurrent
/// access from other processes through their own methods.
pub unsafe trait SharedLayout: Sync + Sized {}

enum Mapping {
    Memory(MmapMut),
    #[cfg(target_os = "windows")]
    Section(windows::SectionView),
}

impl Mapping {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Mapping::Memory(map) => map.as_ptr(),
            #[cfg(target_os = "windows")]
            Mapping::Section(view) => view.as_ptr(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Mapping::Memory(map) => map.len(),
            #[cfg(target_os = "windows")]
            Mapping::Section(view) => view.len(),
        }
    }
}

/// A mapped shared-memory segment viewed as `L`.
pub struct SharedSegment<L: SharedLayout> {
    name: String,
    mapping: Mapping,
    _layout: PhantomData<L>,
}

impl<L: SharedLayout> SharedSegment<L> {
    /// Size in bytes of the mapping this segment needs.
    pub const SIZE: usize = std::mem::size_of::<L>();

    /// Creates (or re-creates) the named segment and zeroes it.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentError::Io`] when the OS refuses the mapping.
    pub fn create(name: &str) -> Result<Self, SegmentError> {
        #[cfg(target_os = "windows")]
        {
            let view = windows::SectionView::create(name, Self::SIZE)?;
            Self::from_mapping(name, Mapping::Section(view))
        }
        #[cfg(not(target_os = "windows"))]
        {
            Self::create_in(&segment_dir(), name)
        }
    }

    /// Opens a segment some other process created.
    ///
    /// # Errors
    ///
    /// [`SegmentError::Io`] when the segment does not exist or cannot be
    /// mapped; [`SegmentError::TooSmall`] when it was created for a smaller
    /// layout.
    pub fn open(name: &str) -> Result<Self, SegmentError> {
        #[cfg(target_os = "windows")]
        {
            let view = windows::SectionView::open(name, Self::SIZE)?;
            Self::from_mapping(name, Mapping::Section(view))
        }
        #[cfg(not(target_os = "windows"))]
        {
            Self::open_in(&segment_dir(), name)
        }
    }

    /// Creates a file-backed segment for `name` inside `dir`, zeroed.
    pub fn create_in(dir: &Path, name: &str) -> Result<Self, SegmentError> {
        let path = segment_path(dir, name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| SegmentError::io(name, e))?;
        file.set_len(Self::SIZE as u64)
            .map_err(|e| SegmentError::io(name, e))?;
        // SAFETY: the file was just truncated and sized by us; other
        // processes only access it through the same layout.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| SegmentError::io(name, e))?;
        debug!(segment = name, path = %path.display(), bytes = Self::SIZE, "created segment");
        Self::from_mapping(name, Mapping::Memory(map))
    }

    /// Opens the file-backed segment for `name` inside `dir`.
    pub fn open_in(dir: &Path, name: &str) -> Result<Self, SegmentError> {
        let path = segment_path(dir, name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| SegmentError::io(name, e))?;
        let actual = file
            .metadata()
            .map_err(|e| SegmentError::io(name, e))?
            .len() as usize;
        if actual < Self::SIZE {
            return Err(SegmentError::TooSmall {
                name: name.to_string(),
                expected: Self::SIZE,
                actual,
            });
        }
        // SAFETY: the file is at least the layout size; concurrent writers
        // go through the same layout accessors.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| SegmentError::io(name, e))?;
        debug!(segment = name, path = %path.display(), "opened segment");
        Self::from_mapping(name, Mapping::Memory(map))
    }

    /// A private zeroed mapping, not visible to other processes.
    pub fn anonymous() -> Result<Self, SegmentError> {
        let map = MmapMut::map_anon(Self::SIZE).map_err(|e| SegmentError::io("<anonymous>", e))?;
        Self::from_mapping("<anonymous>", Mapping::Memory(map))
    }

    fn from_mapping(name: &str, mapping: Mapping) -> Result<Self, SegmentError> {
        if mapping.len() < Self::SIZE {
            return Err(SegmentError::TooSmall {
                name: name.to_string(),
                expected: Self::SIZE,
                actual: mapping.len(),
            });
        }
        if mapping.as_ptr().align_offset(std::mem::align_of::<L>()) != 0 {
            return Err(SegmentError::Misaligned {
                name: name.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            mapping,
            _layout: PhantomData,
        })
    }

    /// Name the segment was created or opened with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<L: SharedLayout> Deref for SharedSegment<L> {
    type Target = L;

    fn deref(&self) -> &L {
        // SAFETY: `from_mapping` checked size and alignment, the mapping
        // lives as long as `self`, and `L: SharedLayout` is valid for any
        // contents another process can leave behind.
        unsafe { &*self.mapping.as_ptr().cast::<L>() }
    }
}

/// Directory holding file-backed segments on hosts without named sections.
///
/// `$MRCAM_SHM_DIR` if set, else `/dev/shm` when present, else the temp dir.
pub fn segment_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(SHM_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        return dev_shm.to_path_buf();
    }
    std::env::temp_dir()
}

/// Maps a Win32 object name such as `Global\mrcam_implant` to a file path.
pub fn segment_path(dir: &Path, name: &str) -> PathBuf {
    let bare = name
        .strip_prefix("Global\\")
        .or_else(|| name.strip_prefix("Local\\"))
        .unwrap_or(name);
    let file: String = bare
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    dir.join(file)
}
