//! Windower: split document text into overlapping fixed-size windows.
//!
//! Windows are measured in characters (Unicode scalar values), never bytes,
//! so a window boundary can never split a multi-byte CJK character.
//!
//! No attempt is made to cut on sentence or question boundaries. Finding
//! those is the extraction service's job; the overlap guarantees that any
//! question shorter than `overlap` is seen whole in at least one window.

use crate::error::HarvestError;
use serde::{Deserialize, Serialize};

/// A contiguous slice `[start, end)` of the document, in char offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// 0-based position in the window sequence.
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Window {
    /// Length in chars.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True when there is nothing worth sending to the model.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Fixed-size overlapping splitter.
#[derive(Debug, Clone, Copy)]
pub struct Windower {
    size: usize,
    overlap: usize,
}

impl Windower {
    /// Requires `size > overlap > 0`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, HarvestError> {
        if overlap == 0 || size <= overlap {
            return Err(HarvestError::InvalidConfig(format!(
                "window size ({size}) must be greater than overlap ({overlap}) and overlap must be ≥ 1"
            )));
        }
        Ok(Self { size, overlap })
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }

    /// Number of windows a document of `len` chars produces.
    pub fn count(&self, len: usize) -> usize {
        if len <= self.size {
            1
        } else {
            (len - self.overlap).div_ceil(self.stride())
        }
    }

    /// Split `document`. Always returns at least one window.
    pub fn split(&self, document: &str) -> Vec<Window> {
        // Byte offset of every char boundary, including the end.
        let bounds: Vec<usize> = document
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(document.len()))
            .collect();
        let len = bounds.len() - 1;

        let mut windows = Vec::with_capacity(self.count(len));
        let mut start = 0usize;
        loop {
            let end = (start + self.size).min(len);
            windows.push(Window {
                index: windows.len(),
                start,
                end,
                text: document[bounds[start]..bounds[end]].to_string(),
            });
            if end == len {
                break;
            }
            start += self.stride();
        }
        windows
    }
}

/// Split `document` into windows of `window_size` chars overlapping by `overlap`.
pub fn window(
    document: &str,
    window_size: usize,
    overlap: usize,
) -> Result<Vec<Window>, HarvestError> {
    Ok(Windower::new(window_size, overlap)?.split(document))
}
