#[cfg(feature = "timings")]
use std::time::Instant;
use std::{
	io,
	io::{Read, Write},
	time::Duration,
};

use neopixel_strip_shared::{
	swap_leading_pair,
	DEVICE_ERROR_MESSAGE,
	DEVICE_INIT_MESSAGE,
	DEVICE_MESSAGE_TYPE_LEN,
	DEVICE_OK_MESSAGE,
	DEVICE_PARTIAL_MESSAGE,
	DEVICE_PRODUCT_ID,
	DEVICE_PRODUCT_NAME,
	DEVICE_VENDOR_ID,
	SET_LEDS_MESSAGE,
	SET_STRIPS_MESSAGE,
	UPDATE_MESSAGE,
};
use serialport::{SerialPort, SerialPortType, UsbPortInfo};
use tracing::{debug, info, warn};

use crate::{BridgeConfig, Error, Output, Result, StripConfig, WriteResult};

pub(crate) const BAUD_RATE: u32 = 921_600;
/// How long to wait for each reply to a command.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Read timeout while poking the bridge back to the start of a command.
pub(crate) const RESET_READ_TIMEOUT: Duration = Duration::from_millis(10);
/// Reads tried during the reset handshake before giving up on the device.
pub(crate) const RESET_ATTEMPTS: usize = 256;

/// Byte stream the bridge protocol runs over.
pub trait BridgePort: Read + Write {
	fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl BridgePort for Box<dyn SerialPort> {
	fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
		SerialPort::set_timeout(&mut **self, timeout)?;
		Ok(())
	}
}

/// USB serial bridge that clocks frames out on one of its pins.
pub struct SerialBridge<P = Box<dyn SerialPort>> {
	config: BridgeConfig,
	port:   P,
	buffer: Vec<u8>,

	reset:      bool,
	configured: bool,
}

impl SerialBridge {
	/// Opens `serial_device` and lays the bridge out for `strip`.
	pub fn new(serial_device: &str, strip: &StripConfig) -> Result<Self> {
		let builder = serialport::new(serial_device, BAUD_RATE).timeout(READ_TIMEOUT);
		let port = builder.open()?;
		info!(device = serial_device, pin = %strip.pin, "opened serial bridge");

		Self::with_port(port, strip)
	}

	/// Finds the first connected bridge and opens it for `strip`.
	///
	/// If more than one bridge is connected the returned one is the first the OS lists.
	pub fn find(strip: &StripConfig) -> Result<Option<Self>> {
		let Some(serial_device) = find_device(serialport::available_ports()?) else {
			return Ok(None);
		};

		Ok(Some(Self::new(&serial_device, strip)?))
	}
}

impl<P: BridgePort> SerialBridge<P> {
	/// Runs the bridge protocol over an already open port.
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

	fn reset_to_command(&mut self) -> Result<()> {
		let mut buffer = [0u8; DEVICE_MESSAGE_TYPE_LEN * 4];

		let mut has_printed = false;
		let mut counter = 0;

		info!("trying to reset device to start of command");
		self.port.set_timeout(RESET_READ_TIMEOUT)?;

		for _ in 0..RESET_ATTEMPTS {
			let read_bytes = match self.port.read(&mut buffer) {
				Ok(n) => n,
				Err(e) if e.kind() == io::ErrorKind::TimedOut => {
					if !has_printed {
						info!("read timeout, writing null bytes to force a response");
						has_printed = true;
					}

					counter += 1;
					if counter < 8 {
						self.port.write_all(&[0u8])?;
					} else {
						self.port.write_all(&[0u8; 32])?;
					}

					continue;
				}
				Err(e) => return Err(e.into()),
			};

			// more than one byte back means a 32 byte burst overshot, start over
			if read_bytes > 1 {
				counter = 0;
				continue;
			}

			if read_bytes == 1 && (&buffer[..1] == DEVICE_INIT_MESSAGE || &buffer[..1] == DEVICE_ERROR_MESSAGE) {
				self.port.set_timeout(READ_TIMEOUT)?;
				info!("reset successful");

				return Ok(());
			}
		}

		warn!(attempts = RESET_ATTEMPTS, "device never answered the reset");
		Err(Error::NoResponse)
	}

	/// Resets the bridge if needed and sends the strip layout.
	///
	/// The layout only counts as sent once both commands are acknowledged, so a
	/// failed attempt is repeated by the next transmit.
	pub fn configure(&mut self) -> Result<()> {
		if !self.reset {
			self.reset_to_command()?;
			self.reset = true;
		}

		self.configured = false;
		send_command(&mut self.port, SET_STRIPS_MESSAGE, &u32::to_le_bytes(self.config.strips as u32))?;
		send_command(&mut self.port, SET_LEDS_MESSAGE, &u32::to_le_bytes(self.config.leds as u32))?;
		self.configured = true;
		debug!(strips = self.config.strips, leds = self.config.leds, "bridge configured");

		Ok(())
	}
}

impl<P: BridgePort> Output for SerialBridge<P> {
	fn transmit(&mut self, frame: &[u8]) -> Result<WriteResult> {
		if !self.configured {
			self.configure()?;
		}

		stage_frame(&self.config, &mut self.buffer, frame)?;
		send_command(&mut self.port, UPDATE_MESSAGE, &self.buffer)
	}
}

/// Picks the bridge out of the OS port list, by USB ids or product name.
pub(crate) fn find_device<I>(ports: I) -> Option<String>
where
	I: IntoIterator<Item = serialport::SerialPortInfo>,
{
	ports.into_iter().find_map(|p| match p.port_type {
		SerialPortType::UsbPort(usb) if is_bridge(&usb) => Some(p.port_name),
		_ => None,
	})
}

fn is_bridge(usb: &UsbPortInfo) -> bool {
	let by_id = usb.vid == DEVICE_VENDOR_ID && usb.pid == DEVICE_PRODUCT_ID;
	let by_name = usb.product.as_deref().is_some_and(|product| {
		product == DEVICE_PRODUCT_NAME || product == DEVICE_PRODUCT_NAME.replace(' ', "_")
	});

	by_id || by_name
}

/// Copies `frame` into its strip slot of the `update` payload.
///
/// Other slots stay black. Each triple is pre-swapped because the firmware swaps
/// the first two bytes of every pixel on its way out.
pub(crate) fn stage_frame(config: &BridgeConfig, buffer: &mut [u8], frame: &[u8]) -> Result<()> {
	let slot_len = config.buffer_len() / config.strips;
	if frame.len() != slot_len {
		return Err(Error::FrameLength {
			expected: slot_len,
			actual:   frame.len(),
		});
	}

	let start = config.slot * slot_len;
	let slot = &mut buffer[start..start + slot_len];
	slot.copy_from_slice(frame);
	swap_leading_pair(slot);

	Ok(())
}

pub(crate) fn expect_response(received: &[u8; DEVICE_MESSAGE_TYPE_LEN], expected: &[u8; DEVICE_MESSAGE_TYPE_LEN]) -> Result<()> {
	if received != expected {
		return Err(Error::UnexpectedResponse {
			expected: String::from_utf8_lossy(expected).to_string(),
			received: format!("{:?}", received),
		});
	}

	Ok(())
}

fn send_command<P: Read + Write>(port: &mut P, command: &[u8], data: &[u8]) -> Result<WriteResult> {
	let mut output = [0u8; DEVICE_MESSAGE_TYPE_LEN];

	#[cfg(feature = "timings")]
	let command_start = Instant::now();

	if serial_write(port, command)? != command.len() {
		return Err(Error::IncompleteWrite);
	}
	if port.read(&mut output)? != 1 {
		return Err(Error::NoResponse);
	}
	expect_response(&output, DEVICE_PARTIAL_MESSAGE)?;

	#[cfg(feature = "timings")]
	let data_start = Instant::now();

	if serial_write(port, data)? != data.len() {
		return Err(Error::IncompleteWrite);
	}
	if port.read(&mut output)? != 1 {
		return Err(Error::NoResponse);
	}
	expect_response(&output, DEVICE_OK_MESSAGE)?;

	#[cfg(feature = "timings")]
	let end = Instant::now();

	#[cfg(feature = "timings")]
	return Ok((data_start - command_start, end - data_start));

	#[cfg(not(feature = "timings"))]
	Ok(())
}

// write_all already retries on Interrupted
fn serial_write<P: Write>(port: &mut P, buffer: &[u8]) -> Result<usize> {
	match port.write_all(buffer) {
		Ok(_) => Ok(buffer.len()),
		Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
			warn!("serial timeout");
			Ok(0)
		}
		Err(e) => Err(e.into()),
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;

	use serialport::SerialPortInfo;

	use super::*;
	use crate::Pin;

	/// In-memory port that plays back canned replies and keeps every write.
	#[derive(Default)]
	struct ScriptedPort {
		replies:      VecDeque<Option<Vec<u8>>>,
		writes:       Vec<Vec<u8>>,
		timeouts:     Vec<Duration>,
		write_errors: VecDeque<io::ErrorKind>,
	}

	impl ScriptedPort {
		fn reply(&mut self, bytes: &[u8]) -> &mut Self {
			self.replies.push_back(Some(bytes.to_vec()));
			self
		}

		fn time_out(&mut self) -> &mut Self {
			self.replies.push_back(None);
			self
		}
	}

	impl Read for ScriptedPort {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			match self.replies.pop_front() {
				Some(Some(bytes)) => {
					buf[..bytes.len()].copy_from_slice(&bytes);
					Ok(bytes.len())
				}
				_ => Err(io::ErrorKind::TimedOut.into()),
			}
		}
	}

	impl Write for ScriptedPort {
		fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
			if let Some(kind) = self.write_errors.pop_front() {
				return Err(kind.into());
			}
			self.writes.push(buf.to_vec());
			Ok(buf.len())
		}

		fn flush(&mut self) -> io::Result<()> {
			Ok(())
		}
	}

	impl BridgePort for ScriptedPort {
		fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
			self.timeouts.push(timeout);
			Ok(())
		}
	}

	fn bridge(pixel_count: usize) -> SerialBridge<ScriptedPort> {
		let strip = StripConfig { pixel_count, ..Default::default() };
		SerialBridge::with_port(ScriptedPort::default(), &strip).unwrap()
	}

	#[test]
	fn command_waits_for_partial_then_ok() {
		let mut port = ScriptedPort::default();
		port.reply(b"p").reply(b"k");

		send_command(&mut port, SET_STRIPS_MESSAGE, &[1, 0, 0, 0]).unwrap();
		assert_eq!(port.writes, [b"strips\0\0".to_vec(), vec![1, 0, 0, 0]]);
		assert!(port.replies.is_empty());
	}

	#[test]
	fn silent_device_is_no_response() {
		let mut port = ScriptedPort::default();
		port.reply(b"");
		assert!(matches!(send_command(&mut port, UPDATE_MESSAGE, &[0; 3]), Err(Error::NoResponse)));

		let mut port = ScriptedPort::default();
		port.reply(b"p").reply(b"");
		assert!(matches!(send_command(&mut port, UPDATE_MESSAGE, &[0; 3]), Err(Error::NoResponse)));
	}

	#[test]
	fn write_timeout_is_an_incomplete_write() {
		let mut port = ScriptedPort::default();
		port.write_errors.push_back(io::ErrorKind::TimedOut);
		assert!(matches!(send_command(&mut port, UPDATE_MESSAGE, &[0; 3]), Err(Error::IncompleteWrite)));

	}

	#[test]
	fn interrupted_write_is_retried() {
		let mut port = ScriptedPort::default();
		port.reply(b"p").reply(b"k");
		port.write_errors.push_back(io::ErrorKind::Interrupted);

		send_command(&mut port, UPDATE_MESSAGE, &[0; 3]).unwrap();
		assert_eq!(port.writes.len(), 2);
	}

	#[test]
	fn data_rejected_by_device() {
		let mut port = ScriptedPort::default();
		port.reply(b"p").reply(b"e");
		assert!(matches!(
			send_command(&mut port, SET_LEDS_MESSAGE, &[0; 4]),
			Err(Error::UnexpectedResponse { .. })
		));
	}

	#[test]
	fn first_transmit_resets_and_sends_layout() {
		let mut bridge = bridge(300);
		bridge.port.time_out().reply(b"i");
		bridge.port.reply(b"p").reply(b"k").reply(b"p").reply(b"k").reply(b"p").reply(b"k");

		bridge.transmit(&[7; 900]).unwrap();

		let writes = &bridge.port.writes;
		assert_eq!(writes.len(), 7);
		assert_eq!(writes[0], [0u8]);
		assert_eq!(writes[1], SET_STRIPS_MESSAGE);
		assert_eq!(writes[2], [1u8, 0, 0, 0]);
		assert_eq!(writes[3], SET_LEDS_MESSAGE);
		assert_eq!(writes[4], [0x2c_u8, 0x01, 0, 0]);
		assert_eq!(writes[5], UPDATE_MESSAGE);
		assert_eq!(writes[6].len(), 900);
		assert_eq!(bridge.port.timeouts, [RESET_READ_TIMEOUT, READ_TIMEOUT]);

		// later frames skip the handshake
		bridge.port.reply(b"p").reply(b"k");
		bridge.transmit(&[7; 900]).unwrap();
		assert_eq!(bridge.port.writes.len(), 9);
		assert_eq!(bridge.port.writes[7], UPDATE_MESSAGE);
	}

	#[test]
	fn rejected_layout_is_resent_on_retry() {
		let mut bridge = bridge(2);
		bridge.port.reply(b"i").reply(b"p").reply(b"e");
		assert!(matches!(bridge.transmit(&[0; 6]), Err(Error::UnexpectedResponse { .. })));
		assert_eq!(bridge.port.writes.len(), 2);

		bridge.port.reply(b"p").reply(b"k").reply(b"p").reply(b"k").reply(b"p").reply(b"k");
		bridge.transmit(&[0; 6]).unwrap();

		let retry = &bridge.port.writes[2..];
		assert_eq!(retry[0], SET_STRIPS_MESSAGE);
		assert_eq!(retry[2], SET_LEDS_MESSAGE);
		assert_eq!(retry[4], UPDATE_MESSAGE);
		// no second reset
		assert_eq!(bridge.port.timeouts.len(), 2);
	}

	#[test]
	fn reset_restarts_burst_count_after_overshoot() {
		let mut bridge = bridge(1);
		for _ in 0..8 {
			bridge.port.time_out();
		}
		bridge.port.reply(b"\0\0\0\0").time_out().reply(b"e");

		bridge.reset_to_command().unwrap();

		let writes = &bridge.port.writes;
		assert_eq!(writes.len(), 9);
		assert!(writes[..7].iter().all(|w| w == &[0u8]));
		assert_eq!(writes[7], [0u8; 32]);
		assert_eq!(writes[8], [0u8]);
	}

	#[test]
	fn reset_ignores_empty_reads() {
		let mut bridge = bridge(1);
		bridge.port.reply(b"i\0\0").reply(b"").reply(b"e");

		bridge.reset_to_command().unwrap();
		assert!(bridge.port.replies.is_empty());
	}

	#[test]
	fn reset_gives_up_on_a_mute_device() {
		let mut bridge = bridge(1);

		assert!(matches!(bridge.reset_to_command(), Err(Error::NoResponse)));
		assert_eq!(bridge.port.writes.len(), RESET_ATTEMPTS);
		assert_eq!(bridge.port.timeouts, [RESET_READ_TIMEOUT]);
	}

	fn usb(vid: u16, pid: u16, product: Option<&str>) -> SerialPortType {
		SerialPortType::UsbPort(UsbPortInfo {
			vid,
			pid,
			serial_number: None,
			manufacturer: None,
			product: product.map(str::to_string),
		})
	}

	fn port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
		SerialPortInfo {
			port_name: name.to_string(),
			port_type,
		}
	}

	#[test]
	fn finds_bridge_by_product_name_or_ids() {
		let ports = vec![
			port("/dev/ttyS0", SerialPortType::Unknown),
			port("/dev/ttyACM0", usb(0x2e8a, 0x0005, Some("Board in FS mode"))),
			port("/dev/ttyACM1", usb(0x1234, 0x5678, Some("Serial_WS2812"))),
		];
		assert_eq!(find_device(ports).as_deref(), Some("/dev/ttyACM1"));

		let ports = vec![port("COM3", usb(DEVICE_VENDOR_ID, DEVICE_PRODUCT_ID, None))];
		assert_eq!(find_device(ports).as_deref(), Some("COM3"));

		let ports = vec![port("/dev/ttyUSB0", usb(0x0403, 0x6001, Some("FT232R")))];
		assert_eq!(find_device(ports), None);
	}

	#[test]
	fn stage_frame_fills_only_its_slot() {
		let strip = StripConfig { pin: Pin::new(1).unwrap(), pixel_count: 2, ..Default::default() };
		let config = BridgeConfig::for_strip(&strip);
		let mut buffer = vec![0xAA; config.buffer_len()];

		stage_frame(&config, &mut buffer, &[1, 2, 3, 4, 5, 6]).unwrap();
		assert_eq!(buffer, [0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 2, 1, 3, 5, 4, 6]);
	}

	#[test]
	fn stage_frame_rejects_wrong_length() {
		let config = BridgeConfig::for_strip(&StripConfig { pixel_count: 2, ..Default::default() });
		let mut buffer = vec![0; config.buffer_len()];

		assert!(matches!(
			stage_frame(&config, &mut buffer, &[0; 5]),
			Err(Error::FrameLength { expected: 6, actual: 5 })
		));
	}

	#[test]
	fn unexpected_response_names_both_sides() {
		let err = expect_response(b"e", DEVICE_OK_MESSAGE).unwrap_err();
		assert!(err.is_hardware());
		assert_eq!(err.to_string(), "unexpected response from device: [101] (expected \"k\")");
	}
}
