// SPDX-License-Identifier: GPL-3.0-only

//! Pre-allocated plane storage.
//!
//! Spec §3 Lifecycle: "Buffers for all planes are pre-allocated at session
//! start ... and reused; they are freed only at session teardown." This
//! mirrors the teacher's single pre-sized `CameraFrame` buffer reused
//! across the preview loop, generalized to the five plane kinds a stereo
//! [`super::FrameData`] can carry.

use super::FrameData;

/// Byte/float buffers sized for `max_width * max_height * channels`,
/// handed out to the capture/decode/stereo stages and recycled after the
/// consumer has copied out what it needs (spec §3: "producers fill,
/// consumers memcpy out under a short critical section").
pub struct FrameArena {
    max_width: u32,
    max_height: u32,
    color_channels: u32,
    free_mono: Vec<Vec<u8>>,
    free_color: Vec<Vec<u8>>,
    free_depth: Vec<Vec<f32>>,
}

impl FrameArena {
    pub fn new(max_width: u32, max_height: u32, color_channels: u32) -> Self {
        Self {
            max_width,
            max_height,
            color_channels,
            free_mono: Vec::new(),
            free_color: Vec::new(),
            free_depth: Vec::new(),
        }
    }

    fn mono_capacity(&self) -> usize {
        (self.max_width * self.max_height) as usize
    }

    fn color_capacity(&self) -> usize {
        (self.max_width * self.max_height * self.color_channels) as usize
    }

    /// Check out a zeroed, full-capacity mono-sized buffer (`p1`/`p2`),
    /// reusing a freed one if available.
    pub fn checkout_mono(&mut self) -> Vec<u8> {
        let cap = self.mono_capacity();
        self.checkout_mono_sized(cap)
    }

    /// Check out a zeroed mono-kind buffer truncated/extended to exactly
    /// `len` bytes. Falls back to a fresh allocation, bypassing the pool,
    /// if `len` exceeds this arena's configured capacity (the declared
    /// frame dimensions must not exceed `max_width`/`max_height`, but this
    /// keeps a mismatch from corrupting the free list instead of panicking).
    pub fn checkout_mono_sized(&mut self, len: usize) -> Vec<u8> {
        if len > self.mono_capacity() {
            return vec![0u8; len];
        }
        match self.free_mono.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0);
                buf
            }
            None => vec![0u8; len],
        }
    }

    /// Check out a zeroed, full-capacity color-sized buffer.
    pub fn checkout_color(&mut self) -> Vec<u8> {
        let cap = self.color_capacity();
        self.checkout_color_sized(cap)
    }

    /// Sized counterpart of [`Self::checkout_color`], see
    /// [`Self::checkout_mono_sized`].
    pub fn checkout_color_sized(&mut self, len: usize) -> Vec<u8> {
        if len > self.color_capacity() {
            return vec![0u8; len];
        }
        match self.free_color.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0);
                buf
            }
            None => vec![0u8; len],
        }
    }

    /// Check out a zeroed, full-capacity depth-sized buffer.
    pub fn checkout_depth(&mut self) -> Vec<f32> {
        let cap = self.mono_capacity();
        self.checkout_depth_sized(cap)
    }

    /// Sized counterpart of [`Self::checkout_depth`], see
    /// [`Self::checkout_mono_sized`].
    pub fn checkout_depth_sized(&mut self, len: usize) -> Vec<f32> {
        if len > self.mono_capacity() {
            return vec![0.0f32; len];
        }
        match self.free_depth.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0.0);
                buf
            }
            None => vec![0.0f32; len],
        }
    }

    /// Return a buffer to the pool for reuse, padding it back up to this
    /// arena's full capacity so the free list stays one uniform size
    /// regardless of how small a buffer a caller checked out. Drops (does
    /// not pool) a buffer larger than capacity, so a `max_width`/
    /// `max_height` change at re-`Initialize` can't corrupt later checkouts.
    pub fn release_mono(&mut self, mut buf: Vec<u8>) {
        let cap = self.mono_capacity();
        if buf.len() <= cap {
            buf.resize(cap, 0);
            self.free_mono.push(buf);
        }
    }

    pub fn release_color(&mut self, mut buf: Vec<u8>) {
        let cap = self.color_capacity();
        if buf.len() <= cap {
            buf.resize(cap, 0);
            self.free_color.push(buf);
        }
    }

    pub fn release_depth(&mut self, mut buf: Vec<f32>) {
        let cap = self.mono_capacity();
        if buf.len() <= cap {
            buf.resize(cap, 0.0);
            self.free_depth.push(buf);
        }
    }

    /// Return every arena-backed plane of a displaced `FrameData` to the
    /// pool, so a `FrameSet` slot overwritten on the hot path recycles its
    /// buffers instead of letting them drop (spec §3 Lifecycle: "freed
    /// only at session teardown"). The `raw` plane is vendor-layout bytes,
    /// not arena-backed, and is simply dropped.
    pub fn release_frame(&mut self, frame: FrameData) {
        if let Some(p1) = frame.p1 {
            self.release_mono(p1);
        }
        if let Some(p2) = frame.p2 {
            self.release_mono(p2);
        }
        if let Some(color) = frame.color {
            self.release_color(color);
        }
        if let Some(depth) = frame.depth {
            self.release_depth(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_is_zeroed_and_correctly_sized() {
        let mut arena = FrameArena::new(4, 3, 3);
        let mono = arena.checkout_mono();
        assert_eq!(mono.len(), 12);
        assert!(mono.iter().all(|&b| b == 0));
        let color = arena.checkout_color();
        assert_eq!(color.len(), 36);
    }

    #[test]
    fn release_then_checkout_reuses_allocation() {
        let mut arena = FrameArena::new(2, 2, 1);
        let mut buf = arena.checkout_mono();
        buf[0] = 7;
        arena.release_mono(buf);
        let reused = arena.checkout_mono();
        // Reused buffer must be re-zeroed, not leak prior contents.
        assert_eq!(reused, vec![0, 0, 0, 0]);
    }

    #[test]
    fn mismatched_size_buffer_is_dropped_not_pooled() {
        let mut arena = FrameArena::new(2, 2, 1);
        arena.release_mono(vec![0u8; 99]);
        assert!(arena.free_mono.is_empty());
    }

    #[test]
    fn sized_checkout_truncates_to_requested_length_and_reuses_pool() {
        let mut arena = FrameArena::new(4, 3, 1);
        let buf = arena.checkout_mono_sized(5);
        assert_eq!(buf.len(), 5);
        arena.release_mono(buf);
        // Released buffer is padded back to full capacity (12) before
        // rejoining the pool.
        assert_eq!(arena.free_mono[0].len(), 12);
        let reused = arena.checkout_mono_sized(5);
        assert_eq!(reused.len(), 5);
        assert!(reused.iter().all(|&b| b == 0));
    }

    #[test]
    fn release_frame_returns_every_plane_to_its_pool() {
        let mut arena = FrameArena::new(2, 2, 1);
        let mut frame = FrameData::empty(2, 2);
        frame.p1 = Some(arena.checkout_mono());
        frame.p2 = Some(arena.checkout_mono());
        frame.depth = Some(arena.checkout_depth());
        arena.release_frame(frame);
        assert_eq!(arena.free_mono.len(), 2);
        assert_eq!(arena.free_depth.len(), 1);
    }
}
