#![no_std]

use core::{fmt, time::Duration};

pub const MESSAGE_TYPE_LEN: usize = 8;

pub const UPDATE_MESSAGE: &[u8; MESSAGE_TYPE_LEN] = b"update\0\0";
pub const SET_STRIPS_MESSAGE: &[u8; MESSAGE_TYPE_LEN] = b"strips\0\0";
pub const SET_LEDS_MESSAGE: &[u8; MESSAGE_TYPE_LEN] = b"leds\0\0\0\0";

/// The bridge clocks out 8 strips in parallel, one per output pin.
pub const MAX_STRIPS: usize = 8;
/// Longer strips drop the bridge below 60 updates per second.
pub const MAX_LEDS_PER_STRIP: usize = 512;
pub const BYTES_PER_LED: usize = 3;

pub const MAX_BUFFER_SIZE: usize = BYTES_PER_LED * MAX_LEDS_PER_STRIP * MAX_STRIPS;

/// Minimum low time on the data line before the chips latch a frame.
pub const RESET_DURATION: Duration = Duration::from_micros(280);

pub const DEVICE_MESSAGE_TYPE_LEN: usize = 1;

pub const DEVICE_INIT_MESSAGE: &[u8; DEVICE_MESSAGE_TYPE_LEN] = b"i";
pub const DEVICE_ERROR_MESSAGE: &[u8; DEVICE_MESSAGE_TYPE_LEN] = b"e";
pub const DEVICE_PARTIAL_MESSAGE: &[u8; DEVICE_MESSAGE_TYPE_LEN] = b"p";
pub const DEVICE_OK_MESSAGE: &[u8; DEVICE_MESSAGE_TYPE_LEN] = b"k";

// https://pid.codes/1209/F0F0/
pub const DEVICE_VENDOR_ID: u16 = 0x1209;
pub const DEVICE_PRODUCT_ID: u16 = 0xF0F0;

pub const DEVICE_PRODUCT_NAME: &str = "Serial WS2812";

/// Byte order a chipset expects on its data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelOrder {
	Rgb,
	/// WS2812B and most "NeoPixel" strips.
	#[default]
	Grb,
}

impl ChannelOrder {
	/// Rearranges a logical `[r, g, b]` triple into wire order.
	#[inline]
	pub const fn arrange(self, [r, g, b]: [u8; 3]) -> [u8; 3] {
		match self {
			ChannelOrder::Rgb => [r, g, b],
			ChannelOrder::Grb => [g, r, b],
		}
	}
}

impl fmt::Display for ChannelOrder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ChannelOrder::Rgb => "RGB",
			ChannelOrder::Grb => "GRB",
		})
	}
}

/// Swaps the first two bytes of every triple.
///
/// The bridge firmware emits G R B from R G B input, so running a frame
/// through this before sending puts the caller's bytes on the wire unchanged.
pub fn swap_leading_pair(frame: &mut [u8]) {
	for triple in frame.chunks_exact_mut(BYTES_PER_LED) {
		triple.swap(0, 1);
	}
}
