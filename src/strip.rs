use std::{
	sync::atomic::{AtomicBool, Ordering},
	thread,
	time::{Duration, Instant},
};

use neopixel_strip_shared::RESET_DURATION;
use smart_leds::{SmartLedsWrite, RGB8};
use tracing::{debug, info, trace};

use crate::{
	fps::REPORT_EVERY,
	Error,
	FillLoop,
	FrameRate,
	Output,
	PixelBuffer,
	Result,
	StripConfig,
	WriteResult,
};

/// A pixel buffer bound to an output pin.
pub struct Strip<O> {
	pub(crate) config: StripConfig,
	pub(crate) buffer: PixelBuffer,
	pub(crate) output: O,

	pub(crate) frame: Vec<u8>,
	last_write:       Option<Instant>,
}

impl<O> Strip<O> {
	/// Validates `config` and allocates a black buffer of `config.pixel_count` pixels.
	pub fn new(config: StripConfig, output: O) -> Result<Self> {
		config.validate()?;

		info!(
			pin = %config.pin,
			pixels = config.pixel_count,
			order = %config.channel_order,
			brightness = config.brightness,
			auto_write = config.auto_write,
			"strip ready"
		);

		Ok(Self {
			buffer: PixelBuffer::new(config.pixel_count),
			frame: Vec::with_capacity(config.frame_len()),
			config,
			output,

			last_write: None,
		})
	}

	pub fn config(&self) -> &StripConfig {
		&self.config
	}

	pub fn len(&self) -> usize {
		self.buffer.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buffer.is_empty()
	}

	pub fn get(&self, index: usize) -> Result<RGB8> {
		self.buffer.get(index)
	}

	pub fn buffer(&self) -> &PixelBuffer {
		&self.buffer
	}

	/// Bytes handed to the output by the most recent write.
	pub fn last_frame(&self) -> &[u8] {
		&self.frame
	}

	pub fn output(&self) -> &O {
		&self.output
	}

	pub fn output_mut(&mut self) -> &mut O {
		&mut self.output
	}

	pub fn into_output(self) -> O {
		self.output
	}

	/// Encodes the buffer into `self.frame` and returns how long to wait before
	/// the previous frame has latched.
	pub(crate) fn prepare_frame(&mut self) -> Option<Duration> {
		self.buffer
			.encode_into(self.config.channel_order, self.config.brightness, &mut self.frame);

		let since = self.last_write?.elapsed();
		RESET_DURATION.checked_sub(since).filter(|wait| !wait.is_zero())
	}

	pub(crate) fn frame_sent(&mut self) {
		self.last_write = Some(Instant::now());
	}
}

impl<O: Output> Strip<O> {
	/// Sends the buffer to the strip, scaled by brightness and in wire channel order.
	pub fn write(&mut self) -> Result<WriteResult> {
		if let Some(wait) = self.prepare_frame() {
			thread::sleep(wait);
		}

		let result = self.output.transmit(&self.frame)?;
		self.frame_sent();
		trace!(bytes = self.frame.len(), "frame sent");

		Ok(result)
	}

	pub fn set(&mut self, index: usize, color: RGB8) -> Result<()> {
		self.buffer.set(index, color)?;
		self.auto_write()
	}

	pub fn fill(&mut self, color: RGB8) -> Result<()> {
		self.buffer.fill(color);
		self.auto_write()
	}

	pub fn clear(&mut self) -> Result<()> {
		self.buffer.clear();
		self.auto_write()
	}

	fn auto_write(&mut self) -> Result<()> {
		if self.config.auto_write {
			self.write()?;
		}

		Ok(())
	}

	/// Fills the strip with `fill.color` and writes it every `fill.cadence` until `stop` is set.
	///
	/// Returns the frame rate the loop ran at. Hardware errors end the loop and
	/// are returned as is.
	pub fn run(&mut self, fill: &FillLoop, stop: &AtomicBool) -> Result<FrameRate> {
		info!(color = ?fill.color, cadence = ?fill.cadence, "starting fill loop");

		let mut frames = 0u64;
		let mut rate = FrameRate::new();
		let mut previous: Option<Instant> = None;
		while !stop.load(Ordering::Relaxed) {
			self.buffer.fill(fill.color);
			self.write()?;

			let now = Instant::now();
			if let Some(previous) = previous.replace(now) {
				rate.record(now - previous);
			}
			frames += 1;
			if frames % REPORT_EVERY == 0 {
				trace!(frames, fps = rate.fps(), "frame rate");
			}

			thread::sleep(fill.cadence);
		}

		debug!(frames, fps = rate.fps(), "fill loop cancelled");
		if fill.blank_on_exit {
			self.buffer.clear();
			self.write()?;
		}
		info!("fill loop stopped");

		Ok(rate)
	}
}

impl<O: Output> SmartLedsWrite for Strip<O> {
	type Error = Error;
	type Color = RGB8;

	fn write<T, I>(&mut self, iterator: T) -> Result<()>
	where
		T: IntoIterator<Item = I>,
		I: Into<Self::Color>,
	{
		self.buffer.load(iterator.into_iter().map(Into::into));
		Strip::write(self).map(|_| ())
	}
}
