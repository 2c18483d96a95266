//! Async counterparts of the serial bridge and the strip driver.

use std::{future::Future, io};
#[cfg(feature = "timings")]
use std::time::Instant;

use neopixel_strip_shared::{
	DEVICE_ERROR_MESSAGE,
	DEVICE_INIT_MESSAGE,
	DEVICE_MESSAGE_TYPE_LEN,
	DEVICE_OK_MESSAGE,
	DEVICE_PARTIAL_MESSAGE,
	SET_LEDS_MESSAGE,
	SET_STRIPS_MESSAGE,
	UPDATE_MESSAGE,
};
use smart_leds::RGB8;
use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
	time::{timeout, Instant as TokioInstant},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace, warn};

use crate::{
	fps::REPORT_EVERY,
	serial::{
		expect_response,
		find_device,
		stage_frame,
		BAUD_RATE,
		READ_TIMEOUT,
		RESET_ATTEMPTS,
		RESET_READ_TIMEOUT,
	},
	BridgeConfig,
	Error,
	FillLoop,
	FrameRate,
	Recorder,
	Result,
	Strip,
	StripConfig,
	WriteResult,
};

/// Async version of [`Output`](crate::Output).
#[allow(async_fn_in_trait)]
pub trait AsyncOutput {
	async fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult>;
}

impl AsyncOutput for Recorder {
	async fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult> {
		Ok(self.record(frame))
	}
}

/// Async serial bridge.
///
/// Reads on an async serial stream ignore the port timeout, so every reply is
/// awaited under [`tokio::time::timeout`] instead.
pub struct SerialBridge<P = SerialStream> {
	config: BridgeConfig,
	port:   P,
	buffer: Vec<u8>,

	reset:      bool,
	configured: bool,
}

impl SerialBridge {
	/// Opens `serial_device` and lays the bridge out for `strip`.
	pub fn new(serial_device: &str, strip: &StripConfig) -> Result<Self> {
		let builder = tokio_serial::new(serial_device, BAUD_RATE).timeout(READ_TIMEOUT);
		let port = builder.open_native_async()?;
		info!(device = serial_device, pin = %strip.pin, "opened serial bridge");

		Self::with_port(port, strip)
	}

	/// Finds the first available bridge and opens it for `strip`.
	///
	/// If more than one bridge is connected the returned one is the first the OS lists.
	pub fn find(strip: &StripConfig) -> Result<Option<Self>> {
		let Some(serial_device) = find_device(tokio_serial::available_ports()?) else {
			return Ok(None);
		};

		Ok(Some(Self::new(&serial_device, strip)?))
	}
}

impl<P: AsyncRead + AsyncWrite + Unpin> SerialBridge<P> {
	/// Runs the bridge protocol over an already open stream.
	pub fn with_port(port: P, strip: &StripConfig) -> Result<Self> {
		let config = BridgeConfig::for_strip(strip);
		config.validate()?;

		Ok(Self {
			buffer: vec![0; config.buffer_len()],
			config,
			port,

			reset:      false,
			configured: false,
		})
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}

	async fn reset_to_command(&mut self) -> Result<()> {
		let mut buffer = [0u8; DEVICE_MESSAGE_TYPE_LEN * 4];

		let mut has_printed = false;
		let mut counter = 0;

		info!("trying to reset device to start of command");

		for _ in 0..RESET_ATTEMPTS {
			let read_bytes = match timeout(RESET_READ_TIMEOUT, self.port.read(&mut buffer)).await {
				Ok(Ok(n)) => n,
				Ok(Err(e)) if e.kind() != io::ErrorKind::TimedOut => return Err(e.into()),
				_ => {
					if !has_printed {
						info!("read timeout, writing null bytes to force a response");
						has_printed = true;
					}

					counter += 1;
					if counter < 8 {
						self.port.write_all(&[0u8]).await?;
					} else {
						self.port.write_all(&[0u8; 32]).await?;
					}

					continue;
				}
			};

			// more than one byte back means a 32 byte burst overshot, start over
			if read_bytes > 1 {
				counter = 0;
				continue;
			}

			if read_bytes == 1 && (&buffer[..1] == DEVICE_INIT_MESSAGE || &buffer[..1] == DEVICE_ERROR_MESSAGE) {
				info!("reset successful");
				return Ok(());
			}
		}

		warn!(attempts = RESET_ATTEMPTS, "device never answered the reset");
		Err(Error::NoResponse)
	}

	/// Resets the bridge if needed and sends the strip layout.
	pub async fn configure(&mut self) -> Result<()> {
		if !self.reset {
			self.reset_to_command().await?;
			self.reset = true;
		}

		self.configured = false;
		send_command(&mut self.port, SET_STRIPS_MESSAGE, &u32::to_le_bytes(self.config.strips as u32))
			.await?;
		send_command(&mut self.port, SET_LEDS_MESSAGE, &u32::to_le_bytes(self.config.leds as u32))
			.await?;
		self.configured = true;
		debug!(strips = self.config.strips, leds = self.config.leds, "bridge configured");

		Ok(())
	}
}

impl<P: AsyncRead + AsyncWrite + Unpin> AsyncOutput for SerialBridge<P> {
	async fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult> {
		if !self.configured {
			self.configure().await?;
		}

		stage_frame(&self.config, &mut self.buffer, frame)?;
		send_command(&mut self.port, UPDATE_MESSAGE, &self.buffer).await
	}
}

async fn read_reply<P: AsyncRead + Unpin>(port: &mut P, expected: &[u8; DEVICE_MESSAGE_TYPE_LEN]) -> Result<()> {
	let mut output = [0u8; DEVICE_MESSAGE_TYPE_LEN];

	match timeout(READ_TIMEOUT, port.read(&mut output)).await {
		Ok(Ok(1)) => expect_response(&output, expected),
		Ok(Ok(_)) | Err(_) => Err(Error::NoResponse),
		Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Err(Error::NoResponse),
		Ok(Err(e)) => Err(e.into()),
	}
}

async fn send_command<P>(port: &mut P, command: &[u8], data: &[u8]) -> Result<WriteResult>
where
	P: AsyncRead + AsyncWrite + Unpin,
{
	#[cfg(feature = "timings")]
	let command_start = Instant::now();

	port.write_all(command).await?;
	read_reply(port, DEVICE_PARTIAL_MESSAGE).await?;

	#[cfg(feature = "timings")]
	let data_start = Instant::now();

	port.write_all(data).await?;
	read_reply(port, DEVICE_OK_MESSAGE).await?;

	#[cfg(feature = "timings")]
	let end = Instant::now();

	#[cfg(feature = "timings")]
	return Ok((data_start - command_start, end - data_start));

	#[cfg(not(feature = "timings"))]
	Ok(())
}

impl<O: AsyncOutput> Strip<O> {
	/// Async version of [`Strip::write`].
	pub async fn write_async(&mut self) -> Result<WriteResult> {
		if let Some(wait) = self.prepare_frame() {
			tokio::time::sleep(wait).await;
		}

		let result = self.output.transmit(&self.frame).await?;
		self.frame_sent();
		trace!(bytes = self.frame.len(), "frame sent");

		Ok(result)
	}

	pub async fn set_async(&mut self, index: usize, color: RGB8) -> Result<()> {
		self.buffer.set(index, color)?;
		self.auto_write_async().await
	}

	pub async fn fill_async(&mut self, color: RGB8) -> Result<()> {
		self.buffer.fill(color);
		self.auto_write_async().await
	}

	pub async fn clear_async(&mut self) -> Result<()> {
		self.buffer.clear();
		self.auto_write_async().await
	}

	async fn auto_write_async(&mut self) -> Result<()> {
		if self.config.auto_write {
			self.write_async().await?;
		}

		Ok(())
	}

	/// Fills and writes every `fill.cadence` until `shutdown` resolves.
	///
	/// Shutdown also abandons a frame that is still being transmitted. The strip
	/// is only blanked when the loop stopped between frames, since the output may
	/// be left mid-exchange otherwise.
	pub async fn run_until<F>(&mut self, fill: &FillLoop, shutdown: F) -> Result<FrameRate>
	where
		F: Future<Output = ()>,
	{
		info!(color = ?fill.color, cadence = ?fill.cadence, "starting fill loop");
		tokio::pin!(shutdown);

		let mut frames = 0u64;
		let mut rate = FrameRate::new();
		let mut previous: Option<TokioInstant> = None;
		let mut interrupted = false;
		loop {
			self.buffer.fill(fill.color);
			tokio::select! {
				biased;
				_ = &mut shutdown => {
					interrupted = true;
					break;
				}
				result = self.write_async() => {
					result?;
				}
			}

			let now = TokioInstant::now();
			if let Some(previous) = previous.replace(now) {
				rate.record(now - previous);
			}
			frames += 1;
			if frames % REPORT_EVERY == 0 {
				trace!(frames, fps = rate.fps(), "frame rate");
			}

			tokio::select! {
				_ = &mut shutdown => break,
				_ = tokio::time::sleep(fill.cadence) => {}
			}
		}

		debug!(frames, fps = rate.fps(), "fill loop cancelled");
		if interrupted {
			warn!("shutdown interrupted a frame, leaving the strip as is");
		} else if fill.blank_on_exit {
			self.buffer.clear();
			self.write_async().await?;
		}
		info!("fill loop stopped");

		Ok(rate)
	}
}
