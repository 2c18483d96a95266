use std::{fmt, time::Duration};

use neopixel_strip_shared::{ChannelOrder, BYTES_PER_LED, MAX_BUFFER_SIZE, MAX_LEDS_PER_STRIP, MAX_STRIPS};
use smart_leds::RGB8;

use crate::{Error, Result};

/// Output pin on the bridge, `GP0` through `GP7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pin(u8);

impl Pin {
	pub const GP0: Pin = Pin(0);

	pub fn new(index: u8) -> Result<Self> {
		if usize::from(index) >= MAX_STRIPS {
			return Err(Error::Configuration(format!(
				"pin GP{index} does not exist, the bridge has GP0 to GP{}",
				MAX_STRIPS - 1
			)));
		}

		Ok(Self(index))
	}

	/// Strip slot this pin occupies in a bridge frame.
	pub fn index(self) -> usize {
		usize::from(self.0)
	}
}

impl fmt::Display for Pin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "GP{}", self.0)
	}
}

/// Everything a [`Strip`](crate::Strip) needs to know about the hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct StripConfig {
	pub pin:           Pin,
	pub pixel_count:   usize,
	pub channel_order: ChannelOrder,
	/// Global scale applied to every channel at transmit time, `0.0..=1.0`.
	pub brightness:    f32,
	/// Transmit after every buffer mutation instead of waiting for `write`.
	pub auto_write:    bool,
}

impl Default for StripConfig {
	fn default() -> Self {
		Self {
			pin:           Pin::GP0,
			pixel_count:   150,
			channel_order: ChannelOrder::Grb,
			brightness:    0.2,
			auto_write:    false,
		}
	}
}

impl StripConfig {
	pub fn validate(&self) -> Result<()> {
		if self.pixel_count == 0 {
			return Err(Error::Configuration("pixel count must be at least 1".into()));
		}
		if self.pixel_count > MAX_LEDS_PER_STRIP {
			return Err(Error::Configuration(format!(
				"pixel count {} exceeds the {MAX_LEDS_PER_STRIP} pixels a pin can drive",
				self.pixel_count
			)));
		}
		// written this way so NaN is rejected too
		if !(0.0..=1.0).contains(&self.brightness) {
			return Err(Error::Configuration(format!(
				"brightness {} is outside 0.0..=1.0",
				self.brightness
			)));
		}
		Pin::new(self.pin.0)?;

		Ok(())
	}

	/// Size of one encoded frame in bytes.
	pub fn frame_len(&self) -> usize {
		self.pixel_count * BYTES_PER_LED
	}
}

/// Layout the bridge is configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
	pub strips: usize,
	pub leds:   usize,
	/// Strip slot the frame is written to; lower slots are sent black.
	pub slot:   usize,
}

impl BridgeConfig {
	pub fn for_strip(config: &StripConfig) -> Self {
		Self {
			strips: config.pin.index() + 1,
			leds:   config.pixel_count,
			slot:   config.pin.index(),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.slot >= self.strips || self.strips > MAX_STRIPS {
			return Err(Error::Configuration(format!(
				"strip slot {} does not fit {} strips (max {MAX_STRIPS})",
				self.slot, self.strips
			)));
		}
		if self.buffer_len() > MAX_BUFFER_SIZE {
			return Err(Error::Configuration(format!(
				"{} strips of {} leds exceed the bridge buffer",
				self.strips, self.leds
			)));
		}

		Ok(())
	}

	/// Bytes in one `update` payload.
	pub fn buffer_len(&self) -> usize {
		self.strips * self.leds * BYTES_PER_LED
	}
}

/// Parameters of the fill loop run by [`Strip::run`](crate::Strip::run).
#[derive(Debug, Clone, PartialEq)]
pub struct FillLoop {
	pub color:         RGB8,
	/// Pause between frames.
	pub cadence:       Duration,
	/// Write one black frame when the loop is cancelled.
	pub blank_on_exit: bool,
}

impl Default for FillLoop {
	fn default() -> Self {
		Self {
			color:         RGB8::new(255, 0, 0),
			cadence:       Duration::from_millis(20),
			blank_on_exit: true,
		}
	}
}
