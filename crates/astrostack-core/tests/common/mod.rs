#![allow(dead_code)]

use ndarray::Array2;

use astrostack_core::image::{Image, PixelBuffer};
use astrostack_core::sequence::{MemorySequence, Sequence};

/// Deterministic pseudo-random generator (64-bit LCG, upper bits).
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1))
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 32) as u32
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    pub fn u16_vec(&mut self, n: usize, max: u16) -> Vec<u16> {
        (0..n)
            .map(|_| (self.next_u32() % (max as u32 + 1)) as u16)
            .collect()
    }

    pub fn f32_vec(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.next_f32()).collect()
    }
}

pub fn sorted_median(data: &[f64]) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        (v[n / 2 - 1] + v[n / 2]) / 2.0
    }
}

pub fn mono_u16(h: usize, w: usize, f: impl Fn(usize, usize) -> u16) -> Image {
    Image::mono(PixelBuffer::U16(Array2::from_shape_fn((h, w), |(r, c)| f(r, c))))
}

pub fn mono_f32(h: usize, w: usize, f: impl Fn(usize, usize) -> f32) -> Image {
    Image::mono(PixelBuffer::F32(Array2::from_shape_fn((h, w), |(r, c)| f(r, c))))
}

pub fn flat_u16(h: usize, w: usize, v: u16) -> Image {
    mono_u16(h, w, |_, _| v)
}

/// In-memory source plus a matching single-channel sequence.
pub fn memory_stack(images: Vec<Image>) -> (MemorySequence, Sequence) {
    let n = images.len();
    (MemorySequence::new(images), Sequence::new(n, 1))
}

pub fn u16_at(image: &Image, row: usize, col: usize) -> u16 {
    image.channel(0).unwrap().as_u16().expect("u16 channel")[[row, col]]
}

pub fn f32_at(image: &Image, row: usize, col: usize) -> f32 {
    image.channel(0).unwrap().as_f32().expect("f32 channel")[[row, col]]
}
