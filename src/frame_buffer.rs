// src/frame_buffer.rs
//
// Fixed-capacity look-back window of decoded frames.
//
// Frames arrive with strictly increasing indices (gaps allowed when the
// decoder skips). Once `depth` frames are held, every push evicts the
// oldest one and hands it back so the caller can drop any per-frame
// state keyed on it (the result cache in particular).
//
// Slot 0 is the oldest frame, slot `depth - 1` the newest.

use crate::types::Frame;
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::ops::Index;
use std::sync::Arc;
use tracing::debug;

pub struct FrameBuffer {
    frames: VecDeque<Arc<Frame>>,
    depth: usize,
}

impl FrameBuffer {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(depth + 1),
            depth,
        }
    }

    /// Append a frame. Returns the evicted oldest frame once the window
    /// overflows.
    pub fn push(&mut self, frame: Arc<Frame>) -> Result<Option<Arc<Frame>>> {
        if let Some(newest) = self.frames.back() {
            if frame.index <= newest.index {
                bail!(
                    "frame {} arrived after frame {} (indices must increase)",
                    frame.index,
                    newest.index
                );
            }
        }

        self.frames.push_back(frame);

        if self.frames.len() > self.depth {
            let evicted = self.frames.pop_front();
            if let Some(ref e) = evicted {
                debug!("frame {} evicted from look-back window", e.index);
            }
            return Ok(evicted);
        }
        Ok(None)
    }

    /// Lookup by frame index. Assumes contiguity first, then scans so gaps
    /// still resolve.
    pub fn get_by_frame_number(&self, index: i64) -> Option<&Arc<Frame>> {
        let oldest = self.frames.front()?.index;
        let offset = index - oldest;
        if offset >= 0 {
            if let Some(frame) = self.frames.get(offset as usize) {
                if frame.index == index {
                    return Some(frame);
                }
            }
        }
        self.frames.iter().find(|f| f.index == index)
    }

    /// Scheduling only starts once the window is full
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.depth
    }

    /// Frame indices of every buffered frame, oldest first
    pub fn frame_indices(&self) -> Vec<i64> {
        self.frames.iter().map(|f| f.index).collect()
    }

    pub fn oldest_index(&self) -> Option<i64> {
        self.frames.front().map(|f| f.index)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Index<usize> for FrameBuffer {
    type Output = Frame;

    fn index(&self, slot: usize) -> &Frame {
        &self.frames[slot]
    }
}
