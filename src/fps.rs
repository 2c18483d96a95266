use std::time::Duration;

/// Frames to run between `trace!` reports of the frame rate.
pub(crate) const REPORT_EVERY: u64 = 100;

/// Exponentially weighted frames-per-second estimate.
///
/// Each new frame time contributes a tenth of the estimate, starting from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameRate {
	fps: f64,
}

impl FrameRate {
	pub fn new() -> Self {
		Self::default()
	}

	/// Folds in the time one frame took and returns the new estimate.
	///
	/// Zero-length frames carry no rate and are skipped.
	pub fn record(&mut self, frame_time: Duration) -> f64 {
		let seconds = frame_time.as_secs_f64();
		if seconds > 0.0 {
			self.fps = self.fps * 0.9 + (1.0 / seconds) * 0.1;
		}

		self.fps
	}

	pub fn fps(&self) -> f64 {
		self.fps
	}
}
