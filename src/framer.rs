//! Splitting a byte stream into complete, terminator-delimited lines.

use std::{
	io,
	time::{Duration, Instant},
};

/// The default line terminator of the protocol.
pub const LINE_FEED: u8 = b'\n';

/// The number of bytes requested from the backend per read.
const READ_CHUNK: usize = 64;

/// Assembles complete lines from bytes read from a backend.
///
/// Bytes are accumulated until the terminator is seen. A line is only
/// complete at its terminator, regardless of how many reads it took, so
/// partially received data survives a timeout and is continued by the next
/// call. Bytes following a terminator in the same read are kept for the next
/// line.
#[derive(Debug, Clone)]
pub struct Framer {
	/// Bytes read but not yet returned as a line.
	buffer: Vec<u8>,
	/// The byte that ends a line.
	terminator: u8,
}

impl Framer {
	/// Create a framer using the protocol's line feed terminator.
	pub fn new() -> Self {
		Framer::with_terminator(LINE_FEED)
	}

	/// Create a framer that ends lines at `terminator`.
	pub fn with_terminator(terminator: u8) -> Self {
		Framer {
			buffer: Vec::with_capacity(READ_CHUNK),
			terminator,
		}
	}

	/// The byte that ends a line.
	pub fn terminator(&self) -> u8 {
		self.terminator
	}

	/// Append raw bytes to the buffer without reading from a backend.
	pub fn push(&mut self, bytes: &[u8]) {
		self.buffer.extend_from_slice(bytes);
	}

	/// Remove and return the first complete line in the buffer, if any.
	///
	/// The terminator, and a carriage return preceding it, are stripped.
	pub fn pop_line(&mut self) -> Option<String> {
		let end = self.buffer.iter().position(|&b| b == self.terminator)?;
		let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
		line.pop();
		if line.last() == Some(&b'\r') {
			line.pop();
		}
		Some(String::from_utf8_lossy(&line).into_owned())
	}

	/// Whether a complete line is buffered.
	pub fn has_line(&self) -> bool {
		self.buffer.contains(&self.terminator)
	}

	/// The bytes of an incomplete line received so far.
	pub fn pending(&self) -> &[u8] {
		&self.buffer
	}

	/// Discard any partially received data.
	pub fn reset(&mut self) {
		self.buffer.clear();
	}

	/// Read from `reader` until a complete line is available or `deadline`
	/// passes.
	///
	/// The deadline is checked after every read, whether it returned data or
	/// not, so a reader that never stops sending cannot hold this past the
	/// deadline. Reads that find no data (`TimedOut` or `WouldBlock`) are
	/// retried until then. A deadline in the past still performs one read,
	/// which makes this usable for draining whatever is available right now.
	///
	/// When the deadline passes without a complete line, an error of kind
	/// [`io::ErrorKind::TimedOut`] is returned and the partial data is kept.
	pub fn next_line<R>(&mut self, reader: &mut R, deadline: Instant) -> io::Result<String>
	where
		R: io::Read + ?Sized,
	{
		let mut chunk = [0u8; READ_CHUNK];
		let mut have_read = false;
		loop {
			if let Some(line) = self.pop_line() {
				return Ok(line);
			}
			if have_read && Instant::now() >= deadline {
				return Err(io::Error::new(
					io::ErrorKind::TimedOut,
					"no complete line before the deadline",
				));
			}
			have_read = true;
			match reader.read(&mut chunk) {
				Ok(0) => {
					return Err(io::Error::new(
						io::ErrorKind::UnexpectedEof,
						"the stream was closed",
					))
				}
				Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
				Err(e)
					if matches!(
						e.kind(),
						io::ErrorKind::Interrupted
							| io::ErrorKind::TimedOut
							| io::ErrorKind::WouldBlock
					) => {}
				Err(e) => return Err(e),
			}
		}
	}

	/// Like [`next_line`](Framer::next_line) but with a deadline `timeout`
	/// from now.
	pub fn next_line_within<R>(&mut self, reader: &mut R, timeout: Duration) -> io::Result<String>
	where
		R: io::Read + ?Sized,
	{
		self.next_line(reader, Instant::now() + timeout)
	}
}

impl Default for Framer {
	fn default() -> Self {
		Framer::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::backend::Mock;

	const STREAM: &[u8] = b"ACK GO 2 100 5000\nNOTICE DONE 2\r\nERROR bad axis\n\nACK ALIVE\n";

	fn lines_of(framer: &mut Framer) -> Vec<String> {
		std::iter::from_fn(|| framer.pop_line()).collect()
	}

	#[test]
	fn splits_lines_and_strips_terminators() {
		let mut framer = Framer::new();
		framer.push(STREAM);
		assert!(framer.has_line());
		assert_eq!(
			lines_of(&mut framer),
			vec![
				"ACK GO 2 100 5000",
				"NOTICE DONE 2",
				"ERROR bad axis",
				"",
				"ACK ALIVE"
			]
		);
		assert!(framer.pending().is_empty());
		assert!(!framer.has_line());
	}

	#[test]
	fn chunk_boundaries_do_not_change_lines() {
		let mut whole = Framer::new();
		whole.push(STREAM);
		let expected = lines_of(&mut whole);

		for size in 1..=STREAM.len() {
			let mut framer = Framer::new();
			let mut lines = Vec::new();
			for chunk in STREAM.chunks(size) {
				framer.push(chunk);
				lines.extend(lines_of(&mut framer));
			}
			assert_eq!(lines, expected, "chunk size {size}");
		}
	}

	#[test]
	fn reads_partial_lines_across_reads() {
		let mut mock = Mock::new();
		mock.set_chunk_size(Some(3));
		mock.append_data(STREAM);
		let mut framer = Framer::new();
		let mut lines = Vec::new();
		while let Ok(line) = framer.next_line_within(&mut mock, Duration::from_millis(10)) {
			lines.push(line);
		}
		assert_eq!(lines.len(), 5);
		assert_eq!(lines[1], "NOTICE DONE 2");
	}

	#[test]
	fn timeout_preserves_partial_line() {
		let mut mock = Mock::new();
		mock.append_data(b"ACK GET P");
		let mut framer = Framer::new();
		let err = framer.next_line(&mut mock, Instant::now()).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);
		assert_eq!(framer.pending(), b"ACK GET P");

		mock.append_data(b"OS 0 12\n");
		let line = framer
			.next_line_within(&mut mock, Duration::from_millis(10))
			.unwrap();
		assert_eq!(line, "ACK GET POS 0 12");
	}

	/// Sends `x` forever, a few bytes per millisecond.
	struct Noise;

	impl io::Read for Noise {
		fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
			std::thread::sleep(Duration::from_millis(1));
			let n = buf.len().min(4);
			buf[..n].fill(b'x');
			Ok(n)
		}
	}

	#[test]
	fn deadline_holds_while_data_keeps_arriving() {
		let mut framer = Framer::new();
		let start = Instant::now();
		let err = framer
			.next_line_within(&mut Noise, Duration::from_millis(10))
			.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);
		assert!(start.elapsed() < Duration::from_millis(250), "{:?}", start.elapsed());
		assert!(framer.pending().iter().all(|&b| b == b'x'));
	}

	#[test]
	fn custom_terminator() {
		let mut framer = Framer::with_terminator(b';');
		framer.push(b"ACK ALIVE;ACK STATE READY;");
		assert_eq!(lines_of(&mut framer), vec!["ACK ALIVE", "ACK STATE READY"]);
	}

	#[test]
	fn surfaces_read_errors() {
		let mut mock = Mock::new();
		mock.read_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
		let mut framer = Framer::new();
		let err = framer.next_line(&mut mock, Instant::now()).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
	}
}
