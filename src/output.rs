use crate::{Result, WriteResult};

/// Something that can put an encoded frame on a strip's data line.
///
/// A frame holds `pixel_count * 3` bytes, already in wire channel order and
/// scaled by brightness.
pub trait Output {
	fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult>;
}

/// Output that keeps every frame in memory instead of driving hardware.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
	frames: Vec<Vec<u8>>,
}

impl Recorder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn frames(&self) -> &[Vec<u8>] {
		&self.frames
	}

	pub fn last_frame(&self) -> Option<&[u8]> {
		self.frames.last().map(Vec::as_slice)
	}

	pub(crate) fn record(&mut self, frame: &[u8]) -> WriteResult {
		self.frames.push(frame.to_vec());
		Default::default()
	}
}

impl Output for Recorder {
	fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult> {
		Ok(self.record(frame))
	}
}
