//! Routing replies and notices between the transport and the commands/axes
//! that are waiting for them.
//!
//! The protocol is half-duplex for synchronous exchanges: each command gets
//! exactly one `ACK ...` or `ERROR ...` reply and replies are not labelled, so
//! the Nth reply belongs to the Nth command. `NOTICE ...` messages, on the
//! other hand, can arrive at any time, including in the middle of another
//! command's exchange. The [`Router`] keeps the two apart: replies are only
//! ever returned to the command in flight and notices are queued until the
//! axis they name claims them.

mod options;
#[cfg(test)]
mod test;

use crate::backend::{Backend, Serial, UNKNOWN_BACKEND_NAME};
#[allow(clippy::wildcard_imports)]
use crate::error::*;
use crate::{
	framer::Framer,
	message::{classify, AxisId, Kind, Message},
	timeout_guard::TimeoutGuard,
};
pub use options::*;
use std::{
	collections::VecDeque,
	io,
	net::{TcpStream, ToSocketAddrs},
	time::{Duration, Instant},
};

/// The direction a line was sent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
	/// The line was transmitted to the controller.
	Tx,
	/// The line was received from the controller.
	Recv,
}

/// A callback that is called after a line is either transmitted or received.
///
/// See [`Router::set_line_handler`] for more details.
pub type LineHandler = Box<dyn FnMut(&str, Direction) + Send>;

/// Sends commands to a rig controller and routes what comes back.
///
/// Every operation takes `&mut self`, so only one exchange can be in
/// progress at a time. To share a router between several
/// [`Axis`](crate::axis::Axis) handles, wrap it in one of the
/// [`SharedMut`](crate::shared::SharedMut) types, which is what
/// [`Rig`](crate::rig::Rig) does.
pub struct Router<B> {
	/// The underlying backend
	backend: B,
	/// Assembles lines from the backend's bytes.
	framer: Framer,
	/// Notices received but not yet claimed, in arrival order.
	notices: VecDeque<Message>,
	/// Protocol timeouts and limits.
	options: RouterOptions,
	/// If populated, the error that has "poisoned" the router. This error MUST be
	/// reported before the router is used for communication again.
	///
	/// A router becomes poisoned when a [`TimeoutGuard`] cannot restore the
	/// original read timeout in its Drop implementation.
	poison: Option<io::Error>,
	/// User supplied callback for every line sent or received.
	line_handler: Option<LineHandler>,
}

impl<B: Backend> std::fmt::Debug for Router<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Router")
			.field("name", &self.backend.name())
			.field("pending_notices", &self.notices.len())
			.finish_non_exhaustive()
	}
}

impl Router<Serial> {
	/// Open the serial port at the specified path using the default options.
	///
	/// Alternatively, use [`Router::open_serial_options`] to customize how the port is opened.
	///
	/// ## Example
	///
	/// ```no_run
	/// # use steprig::router::Router;
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let mut router = Router::open_serial("/dev/ttyUSB0")?;
	/// // Or equivalently
	/// let mut router = Router::open_serial_options().open("/dev/ttyUSB0")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn open_serial(path: &str) -> Result<Router<Serial>, RouterError> {
		OpenSerialOptions::new().open(path)
	}

	/// Get an [`OpenSerialOptions`] to customize how a serial port is opened.
	pub fn open_serial_options() -> OpenSerialOptions {
		OpenSerialOptions::default()
	}
}

impl Router<TcpStream> {
	/// Connect to a controller behind a serial-to-TCP bridge at the specified
	/// address using the default options.
	///
	/// Alternatively, use [`Router::open_tcp_options`] to customize how the connection is opened.
	pub fn open_tcp<A: ToSocketAddrs>(address: A) -> Result<Router<TcpStream>, io::Error> {
		OpenTcpOptions::default().open(address)
	}

	/// Get an [`OpenTcpOptions`] to customize how a TCP connection is opened.
	pub fn open_tcp_options() -> OpenTcpOptions {
		OpenTcpOptions::default()
	}
}

impl<B: Backend> Router<B> {
	/// Create a `Router` around any [`Backend`] using the default [`RouterOptions`].
	pub fn new(backend: B) -> Self {
		Router::with_options(backend, RouterOptions::default())
	}

	/// Create a `Router` around any [`Backend`] with custom [`RouterOptions`].
	pub fn with_options(backend: B, options: RouterOptions) -> Self {
		Router {
			backend,
			framer: Framer::with_terminator(options.terminator),
			notices: VecDeque::new(),
			options,
			poison: None,
			line_handler: None,
		}
	}

	/// Poison the router with `e`, which the next operation reports.
	pub(crate) fn poison(&mut self, e: io::Error) {
		self.poison = Some(e);
	}

	/// Check if the router is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	/// The backend's name, for logging.
	fn backend_name(&self) -> String {
		self.backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string())
	}

	/// Send a command and return its reply.
	///
	/// The command is written followed by the line terminator, then lines are
	/// read until an Ack or Error arrives, which is returned as is; use
	/// [`Message::check_ack`] to turn an Error reply into a [`DeviceError`].
	/// Any notice received while waiting is queued for
	/// [`claim_notice`](Router::claim_notice) and never returned here.
	/// Unrecognized lines are logged and skipped, up to
	/// [`RouterOptions::unrecognized_limit`].
	///
	/// ## Errors
	///
	/// * [`ReservedCharacterError`] if `command` contains the line terminator.
	/// * [`TimeoutError`] if no reply arrives within
	///   [`RouterOptions::reply_timeout`].
	/// * [`UnrecognizedLimitError`] if too many unrecognized lines arrive.
	///
	/// ## Example
	///
	/// ```no_run
	/// # use steprig::{router::Router, backend::Backend};
	/// # fn wrapper<B: Backend>(mut router: Router<B>) -> Result<(), Box<dyn std::error::Error>> {
	/// let reply = router.send_command("GET VERSION")?.check_ack()?;
	/// println!("firmware {}", reply.reply_value("GET VERSION").unwrap_or("?"));
	/// # Ok(())
	/// # }
	/// ```
	pub fn send_command(&mut self, command: &str) -> Result<Message, RouterError> {
		self.check_poisoned()?;
		if command.as_bytes().contains(&self.framer.terminator()) {
			return Err(ReservedCharacterError::new(command).into());
		}
		let interval = self.options.read_interval;
		let mut guard = self.timeout_guard(Some(interval))?;
		guard.exchange(command)
	}

	/// Write `command` and read until its reply.
	fn exchange(&mut self, command: &str) -> Result<Message, RouterError> {
		self.write_line(command)?;
		let timeout = self.options.reply_timeout;
		let deadline = Instant::now() + timeout;
		let mut unrecognized = 0;
		loop {
			let message = match self.receive(deadline) {
				Ok(message) => message,
				Err(e) if e.kind() == io::ErrorKind::TimedOut => {
					return Err(TimeoutError::new(Some(command), timeout).into())
				}
				Err(e) => return Err(e.into()),
			};
			match message.kind() {
				Kind::Ack | Kind::Error => return Ok(message),
				Kind::Notice => self.queue_notice(message),
				Kind::Unrecognized => {
					unrecognized += 1;
					log::warn!(
						"{} skipping unrecognized line while waiting for a reply to `{command}`: {}",
						self.backend_name(),
						message.payload()
					);
					if unrecognized > self.options.unrecognized_limit {
						return Err(
							UnrecognizedLimitError::new(unrecognized, message.into_payload()).into(),
						);
					}
				}
			}
			// The reply timeout covers the whole exchange, not only idle reads.
			if Instant::now() >= deadline {
				return Err(TimeoutError::new(Some(command), timeout).into());
			}
		}
	}

	/// Claim the oldest pending notice for `axis`, if there is one.
	///
	/// Lines that are already available are drained first, without waiting
	/// for more: notices are queued and unrecognized lines are logged and
	/// dropped. Draining stops once [`RouterOptions::drain_timeout`] has
	/// passed, even if the controller is still sending, so this is safe to
	/// poll.
	///
	/// ## Errors
	///
	/// An Ack or Error received while draining has no command to belong to.
	/// It is reported as an [`UnexpectedReplyError`] rather than dropped. Any
	/// lines after it are left unread for the next call.
	pub fn claim_notice(&mut self, axis: AxisId) -> Result<Option<Message>, RouterError> {
		self.check_poisoned()?;
		let drain_timeout = self.options.drain_timeout;
		let mut guard = self.timeout_guard(Some(drain_timeout))?;
		guard.drain()?;
		Ok(guard.take_notice(axis))
	}

	/// Read and route the lines that are available right now, for at most
	/// the drain timeout.
	fn drain(&mut self) -> Result<(), RouterError> {
		let deadline = Instant::now() + self.options.drain_timeout;
		loop {
			let message = match self.receive(deadline) {
				Ok(message) => message,
				Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(()),
				Err(e) => return Err(e.into()),
			};
			match message.kind() {
				Kind::Notice => self.queue_notice(message),
				Kind::Ack | Kind::Error => return Err(UnexpectedReplyError::new(message).into()),
				Kind::Unrecognized => log::warn!(
					"{} dropping unrecognized line: {}",
					self.backend_name(),
					message.payload()
				),
			}
			// Lines already received are always routed.
			if Instant::now() >= deadline && !self.framer.has_line() {
				return Ok(());
			}
		}
	}

	/// Drop every queued notice for `axis` and return how many there were.
	///
	/// A notice that is already queued when an axis starts a new motion was
	/// received before that motion's Ack, so it belongs to something earlier.
	pub fn discard_notices(&mut self, axis: AxisId) -> usize {
		let before = self.notices.len();
		let name = self.backend_name();
		self.notices.retain(|notice| {
			let stale = notice.axis() == Some(axis);
			if stale {
				log::warn!("{name} discarding stale notice: {notice}");
			}
			!stale
		});
		before - self.notices.len()
	}

	/// Remove and return the first queued notice for `axis`.
	fn take_notice(&mut self, axis: AxisId) -> Option<Message> {
		let index = self
			.notices
			.iter()
			.position(|notice| notice.axis() == Some(axis))?;
		self.notices.remove(index)
	}

	/// Bring the link back to a known state after a protocol error or a
	/// timeout.
	///
	/// Any partially received line is discarded, then an empty line (to flush
	/// the controller's receive buffer) and `ALIVE` are sent. Lines are read
	/// and discarded until `ACK ALIVE` arrives; notices among them are still
	/// queued. Returns the number of discarded lines.
	///
	/// ## Errors
	///
	/// A [`TimeoutError`] if `ACK ALIVE` does not arrive within
	/// [`RouterOptions::resync_timeout`].
	pub fn resync(&mut self) -> Result<usize, RouterError> {
		self.check_poisoned()?;
		if !self.framer.pending().is_empty() {
			log::debug!(
				"{} discarding partial line: {}",
				self.backend_name(),
				String::from_utf8_lossy(self.framer.pending())
			);
			self.framer.reset();
		}
		let interval = self.options.read_interval;
		let mut guard = self.timeout_guard(Some(interval))?;
		guard.resync_exchange()
	}

	fn resync_exchange(&mut self) -> Result<usize, RouterError> {
		self.write_line("")?;
		self.write_line("ALIVE")?;
		let timeout = self.options.resync_timeout;
		let deadline = Instant::now() + timeout;
		let mut discarded = 0;
		loop {
			let message = match self.receive(deadline) {
				Ok(message) => message,
				Err(e) if e.kind() == io::ErrorKind::TimedOut => {
					return Err(TimeoutError::new(Some("ALIVE"), timeout).into())
				}
				Err(e) => return Err(e.into()),
			};
			match message.kind() {
				Kind::Ack if message.payload() == "ALIVE" => return Ok(discarded),
				Kind::Notice => self.queue_notice(message),
				_ => {
					discarded += 1;
					log::warn!("{} resync discarded: {message}", self.backend_name());
				}
			}
			if Instant::now() >= deadline {
				return Err(TimeoutError::new(Some("ALIVE"), timeout).into());
			}
		}
	}

	/// Write `line` followed by the terminator.
	fn write_line(&mut self, line: &str) -> Result<(), io::Error> {
		log::debug!("{} TX:   {}", self.backend_name(), line);
		let mut bytes = Vec::with_capacity(line.len() + 1);
		bytes.extend_from_slice(line.as_bytes());
		bytes.push(self.framer.terminator());
		self.backend.write_all(&bytes)?;
		self.backend.flush()?;
		if let Some(callback) = self.line_handler.as_mut() {
			(callback)(line, Direction::Tx);
		}
		Ok(())
	}

	/// Read and classify the next line.
	fn receive(&mut self, deadline: Instant) -> Result<Message, io::Error> {
		let line = self.framer.next_line(&mut self.backend, deadline)?;
		log::debug!("{} RECV: {}", self.backend_name(), line);
		if let Some(callback) = self.line_handler.as_mut() {
			(callback)(&line, Direction::Recv);
		}
		Ok(classify(&line))
	}

	/// Append a notice to the pending queue.
	fn queue_notice(&mut self, notice: Message) {
		if notice.axis().is_none() {
			log::warn!(
				"{} queued a notice that names no axis: {notice}",
				self.backend_name()
			);
		}
		self.notices.push_back(notice);
	}

	/// The notices received but not yet claimed, oldest first.
	pub fn notices(&self) -> impl Iterator<Item = &Message> + '_ {
		self.notices.iter()
	}

	/// Remove and return every pending notice, oldest first.
	///
	/// Notices that name no axis can never be claimed; this is the way to get
	/// rid of them.
	pub fn take_notices(&mut self) -> Vec<Message> {
		self.notices.drain(..).collect()
	}

	/// Set the read timeout and return a "scope guard" that will reset the timeout when it goes out of scope.
	///
	/// If no timeout is specified, reads can block indefinitely.
	///
	/// While the guard is in scope, the router can only be accessed through the guard.
	/// However, because the guard implements [`Deref`](std::ops::Deref) and [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the router.
	pub fn timeout_guard(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<TimeoutGuard<'_, B>, io::Error> {
		self.check_poisoned()?;

		TimeoutGuard::new(self, timeout)
	}

	/// Get the protocol options.
	pub fn options(&self) -> &RouterOptions {
		&self.options
	}

	/// Set how long [`send_command`](Router::send_command) waits for a reply.
	///
	/// The previous value is returned.
	pub fn set_reply_timeout(&mut self, timeout: Duration) -> Duration {
		std::mem::replace(&mut self.options.reply_timeout, timeout)
	}

	/// Set how many unrecognized lines [`send_command`](Router::send_command)
	/// tolerates while waiting for a reply.
	///
	/// The previous value is returned.
	pub fn set_unrecognized_limit(&mut self, limit: usize) -> usize {
		std::mem::replace(&mut self.options.unrecognized_limit, limit)
	}

	/// Set the backend's read timeout and return the old timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	pub fn set_read_timeout(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<Option<Duration>, io::Error> {
		let old = self.backend.read_timeout()?;
		self.backend.set_read_timeout(timeout)?;
		Ok(old)
	}

	/// Get the backend's read timeout.
	///
	/// If it is `None`, reads will block indefinitely.
	pub fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		self.backend.read_timeout()
	}

	/// Get the "name" of the router's backend.
	pub fn name(&self) -> Option<String> {
		self.backend.name()
	}

	/// Get a reference to the backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Consume the router and return the underlying backend.
	///
	/// Any partially received line and any pending notices are lost.
	pub fn into_backend(self) -> B {
		self.backend
	}

	/// Set a callback that will be called immediately after any line is sent
	/// or received.
	///
	/// If a previous callback was set, it is returned.
	///
	/// The router already logs every line via the [`log`] crate, so a
	/// callback is mostly useful for showing the traffic in a front end.
	///
	/// ```no_run
	/// # use steprig::router::Router;
	/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
	/// let mut router = Router::open_serial("/dev/ttyUSB0")?;
	/// router.set_line_handler(|line, dir| println!("{dir:?}: {line}"));
	/// # Ok(())
	/// # }
	/// ```
	pub fn set_line_handler<F>(&mut self, callback: F) -> Option<LineHandler>
	where
		F: FnMut(&str, Direction) + Send + 'static,
	{
		self.line_handler.replace(Box::new(callback))
	}

	/// Clear any callback registered via [`set_line_handler`](Router::set_line_handler) and return it.
	pub fn clear_line_handler(&mut self) -> Option<LineHandler> {
		self.line_handler.take()
	}
}
