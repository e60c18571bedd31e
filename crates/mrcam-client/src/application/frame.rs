//! Owned camera frames.
//!
//! A frame is the raw payload of one bulk transfer.  The headset packs a
//! header followed by a side-by-side stereo image: two 640 × 480 8-bit
//! images forming one 1280 × 480 image that starts at byte 1312.

use mrcam_core::protocol::{STEREO_HEIGHT, STEREO_IMAGE_OFFSET, STEREO_WIDTH};

/// One frame copied out of the camera segment.
///
/// Every published frame is delivered, including payloads too short to
/// contain the stereo image; for those [`CameraFrame::stereo_image`] returns
/// `None` and the raw bytes remain available through [`CameraFrame::data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    number: u32,
    exposure_usec: u64,
    data: Vec<u8>,
}

/// Borrowed view of the stereo image inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StereoImage<'a> {
    pub width: usize,
    pub height: usize,
    /// Row-major, `width` bytes per row.
    pub pixels: &'a [u8],
}

impl StereoImage<'_> {
    /// Row `y`, or `None` past the bottom.
    pub fn row(&self, y: usize) -> Option<&[u8]> {
        self.pixels.get(y * self.width..(y + 1) * self.width)
    }

    /// Left-eye half of row `y`.
    pub fn left_row(&self, y: usize) -> Option<&[u8]> {
        self.row(y).map(|row| &row[..self.width / 2])
    }

    /// Right-eye half of row `y`.
    pub fn right_row(&self, y: usize) -> Option<&[u8]> {
        self.row(y).map(|row| &row[self.width / 2..])
    }
}

impl CameraFrame {
    pub fn new(number: u32, exposure_usec: u64, data: Vec<u8>) -> Self {
        Self {
            number,
            exposure_usec,
            data,
        }
    }

    /// Sequence number (the segment's write counter for this frame).
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Capture time in microseconds since the Unix epoch.
    pub fn exposure_usec(&self) -> u64 {
        self.exposure_usec
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Microseconds between capture and `now_usec`; zero if the clock went
    /// backwards.
    pub fn age_usec(&self, now_usec: u64) -> u64 {
        now_usec.saturating_sub(self.exposure_usec)
    }

    /// The stereo image, or `None` if the payload is too short to hold it.
    pub fn stereo_image(&self) -> Option<StereoImage<'_>> {
        let end = STEREO_IMAGE_OFFSET + STEREO_WIDTH * STEREO_HEIGHT;
        self.data.get(STEREO_IMAGE_OFFSET..end).map(|pixels| StereoImage {
            width: STEREO_WIDTH,
            height: STEREO_HEIGHT,
            pixels,
        })
    }

    /// Gives the payload buffer back for reuse.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
