//! Types that can exchange (read/write) bytes with a connected rig controller.
//!
//! The [`Backend`] trait represents all such types. It is the transport the
//! [`Router`](crate::router::Router) drives: a duplex byte stream with a
//! configurable read timeout.

use std::io;
use std::time::Duration;

use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with a connected controller.
///
/// A read that finds no data before the read timeout expires must fail with
/// [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`]. A read
/// returning `Ok(0)` is treated as the stream having been closed.
pub trait Backend: io::Read + io::Write {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

impl<C: Backend + ?Sized> Backend for &mut C {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

impl Backend for std::net::TcpStream {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		std::net::TcpStream::set_read_timeout(self, timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		std::net::TcpStream::read_timeout(self)
	}
	fn name(&self) -> Option<String> {
		self.peer_addr().map(|addr| format!("{addr}")).ok()
	}
}

/// A platform agnostic serial port backend.
//
// `serialport` exposes `COMPort` and `TTYPort` for windows and unix. Wrapping
// whichever one the platform uses in a single newtype keeps consumers free of
// both dynamic dispatch and an extra type parameter.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl io::Read for Serial {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for Serial {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Backend for Serial {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		// serialport has no infinite timeout; Duration::MAX is close enough.
		Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(Some(self.0.timeout()))
	}
	fn name(&self) -> Option<String> {
		self.0.name()
	}
}

/// A function that produces the controller's answer to a command line
/// written to a [`Mock`].
#[cfg(any(test, feature = "mock"))]
pub type Responder = Box<dyn FnMut(&str) -> Option<String> + Send>;

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records all data written to it.
///   * It can be filled with data for reading, either up front or by a
///     [`Responder`] that answers each complete line written to it.
///   * Reads can be limited to a maximum chunk size to simulate data trickling in.
///   * Specific errors can be inserted for calls to `read`, `write`, `flush`,
///     and `set_read_timeout`.
#[cfg(any(test, feature = "mock"))]
pub struct Mock {
	/// The buffer data is read from
	buffer: io::Cursor<Vec<u8>>,
	/// Everything written to the mock.
	written: Vec<u8>,
	/// Written bytes that do not yet form a complete line.
	partial_line: Vec<u8>,
	/// Answers complete lines written to the mock, if set.
	responder: Option<Responder>,
	/// The maximum number of bytes returned by a single read.
	chunk_size: Option<usize>,
	/// The error to surface on the next read, if any. It is only surfaced once.
	read_error: Option<io::Error>,
	/// The error to surface on the next write, if any. It is only surfaced once.
	write_error: Option<io::Error>,
	/// The error to surface on the next flush, if any. It is only surfaced once.
	flush_error: Option<io::Error>,
	/// The error to surface on the next `set_read_timeout`, if any. It is only surfaced once.
	set_read_timeout_error: Option<io::Error>,
	/// The read timeout, which is ignored.
	ignored_read_timeout: Option<Duration>,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
	/// Create a new Mock backend.
	pub fn new() -> Self {
		Mock {
			buffer: io::Cursor::new(Vec::new()),
			written: Vec::new(),
			partial_line: Vec::new(),
			responder: None,
			chunk_size: None,
			read_error: None,
			write_error: None,
			flush_error: None,
			set_read_timeout_error: None,
			ignored_read_timeout: Some(Duration::ZERO),
		}
	}
	/// Append data to the read buffer.
	///
	/// The data is not validated in any way.
	pub fn append_data<T: AsRef<[u8]>>(&mut self, bytes: T) {
		self.buffer.get_mut().extend_from_slice(bytes.as_ref());
	}
	/// Clear the read buffer.
	pub fn clear_buffer(&mut self) {
		self.buffer.get_mut().clear();
		self.buffer.set_position(0);
	}
	/// Whether the mock has any data available or not
	pub fn is_empty(&self) -> bool {
		usize::try_from(self.buffer.position()).unwrap_or(usize::MAX) >= self.buffer.get_ref().len()
	}
	/// Set the function used to answer each complete line written to the mock.
	///
	/// The line is passed without its terminator. Any returned text is
	/// appended to the read buffer verbatim.
	pub fn set_responder<F>(&mut self, responder: F)
	where
		F: FnMut(&str) -> Option<String> + Send + 'static,
	{
		self.responder = Some(Box::new(responder));
	}
	/// Limit the number of bytes a single `read` returns.
	pub fn set_chunk_size(&mut self, size: Option<usize>) {
		self.chunk_size = size;
	}
	/// All bytes written to the mock so far.
	pub fn written(&self) -> &[u8] {
		&self.written
	}
	/// All complete lines written to the mock so far, without terminators.
	pub fn written_lines(&self) -> Vec<String> {
		String::from_utf8_lossy(&self.written)
			.split_terminator('\n')
			.map(str::to_string)
			.collect()
	}
	/// Forget everything written to the mock so far.
	pub fn clear_written(&mut self) {
		self.written.clear();
	}
	/// Set the error for the next `read`, if any.
	pub fn read_error(&mut self, err: Option<io::Error>) {
		self.read_error = err;
	}
	/// Set the error for the next `write`, if any.
	pub fn write_error(&mut self, err: Option<io::Error>) {
		self.write_error = err;
	}
	/// Set the error for the next `flush`, if any.
	pub fn flush_error(&mut self, err: Option<io::Error>) {
		self.flush_error = err;
	}
	/// Set the error for the next `set_read_timeout`, if any.
	pub fn set_read_timeout_error(&mut self, err: Option<io::Error>) {
		self.set_read_timeout_error = err;
	}
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "mock"))]
impl std::fmt::Debug for Mock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Mock")
			.field("unread", &(self.buffer.get_ref().len() as u64).saturating_sub(self.buffer.position()))
			.field("written", &self.written.len())
			.field("responder", &self.responder.is_some())
			.finish_non_exhaustive()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		if let Some(err) = self.set_read_timeout_error.take() {
			Err(err)
		} else {
			self.ignored_read_timeout = timeout;
			Ok(())
		}
	}

	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(self.ignored_read_timeout)
	}

	fn name(&self) -> Option<String> {
		Some(format!("<mock {:p}>", self as *const Mock))
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if let Some(err) = self.read_error.take() {
			Err(err)
		} else if self.is_empty() {
			// A real device with no data ready would wait and then time out.
			// The data here is already in memory, so time out immediately.
			Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			))
		} else {
			let len = match self.chunk_size {
				Some(size) => buf.len().min(size.max(1)),
				None => buf.len(),
			};
			io::Read::read(&mut self.buffer, &mut buf[..len])
		}
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if let Some(err) = self.write_error.take() {
			return Err(err);
		}
		self.written.extend_from_slice(buf);
		if self.responder.is_some() {
			self.partial_line.extend_from_slice(buf);
			while let Some(end) = self.partial_line.iter().position(|&b| b == b'\n') {
				let line: Vec<u8> = self.partial_line.drain(..=end).collect();
				let line = String::from_utf8_lossy(&line[..end]).into_owned();
				let answer = self.responder.as_mut().and_then(|respond| respond(&line));
				if let Some(answer) = answer {
					self.append_data(answer);
				}
			}
		}
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		if let Some(err) = self.flush_error.take() {
			Err(err)
		} else {
			Ok(())
		}
	}
}
