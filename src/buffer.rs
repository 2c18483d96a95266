use neopixel_strip_shared::{ChannelOrder, BYTES_PER_LED};
use smart_leds::RGB8;

use crate::{Error, Result};

/// Fixed-length sequence of pixel colors.
///
/// Colors are stored as logical red/green/blue; channel order and brightness
/// are only applied by [`PixelBuffer::encode_into`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
	pixels: Box<[RGB8]>,
}

impl PixelBuffer {
	/// Creates a buffer of `len` black pixels.
	pub fn new(len: usize) -> Self {
		Self {
			pixels: vec![RGB8::default(); len].into_boxed_slice(),
		}
	}

	pub fn len(&self) -> usize {
		self.pixels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pixels.is_empty()
	}

	pub fn get(&self, index: usize) -> Result<RGB8> {
		self.pixels.get(index).copied().ok_or(Error::OutOfRange {
			index,
			len: self.len(),
		})
	}

	pub fn set(&mut self, index: usize, color: RGB8) -> Result<()> {
		let len = self.len();
		let pixel = self.pixels.get_mut(index).ok_or(Error::OutOfRange { index, len })?;
		*pixel = color;

		Ok(())
	}

	pub fn fill(&mut self, color: RGB8) {
		self.pixels.fill(color);
	}

	pub fn clear(&mut self) {
		self.fill(RGB8::default());
	}

	/// Copies colors from `colors` in order; pixels past the end of the iterator are set black.
	pub fn load<I>(&mut self, colors: I)
	where
		I: IntoIterator<Item = RGB8>,
	{
		let mut colors = colors.into_iter();
		for pixel in self.pixels.iter_mut() {
			*pixel = colors.next().unwrap_or_default();
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = &RGB8> + '_ {
		self.pixels.iter()
	}

	pub fn as_slice(&self) -> &[RGB8] {
		&self.pixels
	}

	/// Encodes the buffer into wire bytes, replacing the contents of `out`.
	///
	/// Each channel is scaled by `brightness` and truncated, then the triple is
	/// rearranged into `order`.
	pub fn encode_into(&self, order: ChannelOrder, brightness: f32, out: &mut Vec<u8>) {
		out.clear();
		out.reserve(self.len() * BYTES_PER_LED);

		for pixel in self.pixels.iter() {
			let scaled = [
				scale(pixel.r, brightness),
				scale(pixel.g, brightness),
				scale(pixel.b, brightness),
			];
			out.extend_from_slice(&order.arrange(scaled));
		}
	}
}

// float to int casts saturate, so out of range brightness can't wrap
#[inline]
fn scale(value: u8, brightness: f32) -> u8 {
	(f32::from(value) * brightness) as u8
}
