//! Drive a WS2812 ("NeoPixel") strip from a single-board computer.
//!
//! A [`Strip`] owns a fixed-length [`PixelBuffer`] and an [`Output`] that puts
//! encoded frames on the data line. The stock output is the [`SerialBridge`],
//! a USB serial microcontroller that clocks the frame out on one of its pins.
//!
//! ```no_run
//! use neopixel_strip::{FillLoop, SerialBridge, Strip, StripConfig};
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> neopixel_strip::Result<()> {
//! let config = StripConfig::default();
//! let bridge = SerialBridge::find(&config)?.expect("bridge connected");
//! let mut strip = Strip::new(config, bridge)?;
//!
//! let stop = AtomicBool::new(false);
//! strip.run(&FillLoop::default(), &stop)?;
//! # Ok(())
//! # }
//! ```

use std::io;

pub use neopixel_strip_shared::ChannelOrder;
pub use smart_leds::RGB8;

mod buffer;
mod config;
mod fps;
mod output;
mod serial;
mod strip;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer::PixelBuffer;
pub use config::{BridgeConfig, FillLoop, Pin, StripConfig};
pub use fps::FrameRate;
pub use output::{Output, Recorder};
pub use serial::{BridgePort, SerialBridge};
pub use strip::Strip;

/// Durations of the command and data halves of a bridge exchange.
#[cfg(feature = "timings")]
pub type WriteResult = (std::time::Duration, std::time::Duration);
#[cfg(not(feature = "timings"))]
pub type WriteResult = ();

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	Configuration(String),
	#[error("pixel index {index} out of range for strip of {len}")]
	OutOfRange { index: usize, len: usize },

	#[error("serial port error")]
	Serial(#[from] serialport::Error),
	#[error("io error")]
	Io(#[from] io::Error),
	#[error("write to the device was incomplete")]
	IncompleteWrite,
	#[error("device did not respond")]
	NoResponse,
	#[error("unexpected response from device: {received} (expected {expected:?})")]
	UnexpectedResponse { expected: String, received: String },
	#[error("frame is {actual} bytes, device expects {expected}")]
	FrameLength { expected: usize, actual: usize },
}

impl Error {
	/// Whether the error came from the hardware side rather than from the caller.
	pub fn is_hardware(&self) -> bool {
		!matches!(self, Error::Configuration(_) | Error::OutOfRange { .. })
	}
}
