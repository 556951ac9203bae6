//! Types for commanding a single axis of the rig and tracking its state.
//!
//! An [`Axis`] is Ready until a move or home is acknowledged, then Busy until
//! the controller announces completion with a `NOTICE DONE <axis>`, which
//! [`Axis::poll_done`] claims. The axis only talks to the controller through
//! a shared [`Router`], so several axes can be driven over one transport.

use crate::{
	backend::Backend,
	error::{BusyError, CommandError, MalformedReplyError},
	message::AxisId,
	router::Router,
	shared::SharedMut,
};
use std::{
	cell::RefCell,
	marker::PhantomData,
	rc::Rc,
	sync::{Arc, Mutex},
};

/// Whether an axis can accept a new motion command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Status {
	/// The axis is idle.
	#[default]
	Ready,
	/// The axis acknowledged a motion command and has not reported completion yet.
	Busy,
}

/// How the completion of a `HOME` command is detected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Completion {
	/// The axis is Busy until the controller sends a `NOTICE` for it.
	#[default]
	Notice,
	/// The controller only replies once homing is done, so the Ack means the
	/// axis is Ready.
	Immediate,
}

/// A snapshot of what the client knows about an axis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AxisState {
	id: AxisId,
	status: Status,
	position: i64,
	pending_target: Option<i64>,
}

impl AxisState {
	fn new(id: AxisId) -> Self {
		AxisState {
			id,
			status: Status::Ready,
			position: 0,
			pending_target: None,
		}
	}
	/// The axis identifier.
	pub fn id(&self) -> AxisId {
		self.id
	}
	/// Whether the axis is Ready or Busy.
	pub fn status(&self) -> Status {
		self.status
	}
	/// The last known position, in motor counts.
	pub fn position(&self) -> i64 {
		self.position
	}
	/// The position the axis will be at once the motion in progress completes.
	///
	/// This is only set while the axis is Busy.
	pub fn pending_target(&self) -> Option<i64> {
		self.pending_target
	}
}

/// Options for creating an [`Axis`].
///
/// ## Example
///
/// ```
/// # use steprig::{axis::{AxisOptions, Completion}, backend::Backend, router::Router};
/// # use std::{cell::RefCell, rc::Rc};
/// # fn wrapper<B: Backend>(router: Rc<RefCell<Router<B>>>) {
/// let axis = AxisOptions::new()
///     .ms_per_count(2)
///     .home_completion(Completion::Immediate)
///     .build(router, 3);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisOptions {
	/// Milliseconds of move duration requested per count travelled.
	ms_per_count: u64,
	/// How the end of a `HOME` is detected.
	home_completion: Completion,
}

impl AxisOptions {
	/// Create the default options: one millisecond per count and homes that
	/// complete with a notice.
	pub fn new() -> Self {
		AxisOptions {
			ms_per_count: 1,
			home_completion: Completion::Notice,
		}
	}

	/// Set the move duration, in milliseconds, requested per count travelled.
	///
	/// The default is 1.
	pub fn ms_per_count(&mut self, ms: u64) -> &mut Self {
		self.ms_per_count = ms;
		self
	}

	/// Set how the end of a `HOME` is detected.
	///
	/// The default is [`Completion::Notice`].
	pub fn home_completion(&mut self, completion: Completion) -> &mut Self {
		self.home_completion = completion;
		self
	}

	/// Create an [`Axis`] with these options.
	pub fn build<B, P>(&self, router: P, id: AxisId) -> Axis<B, P>
	where
		B: Backend,
		P: SharedMut<Router<B>>,
	{
		Axis {
			router,
			state: AxisState::new(id),
			options: self.clone(),
			_backend: PhantomData,
		}
	}
}

impl Default for AxisOptions {
	fn default() -> Self {
		AxisOptions::new()
	}
}

/// Represents a single axis of the rig.
///
/// The axis state is owned by this value, so it is not `Clone`: two handles
/// for the same axis would disagree about whether it is Busy.
pub struct Axis<B, P: SharedMut<Router<B>> = Rc<RefCell<Router<B>>>> {
	/// The shared router
	router: P,
	/// What is known about the axis
	state: AxisState,
	/// How commands are built and completion detected
	options: AxisOptions,
	_backend: PhantomData<fn() -> B>,
}

/// An [`Axis`] that can shared between threads.
pub type SyncAxis<B> = Axis<B, Arc<Mutex<Router<B>>>>;

impl<B, P> std::fmt::Debug for Axis<B, P>
where
	P: SharedMut<Router<B>>,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Axis")
			.field("state", &self.state)
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}

impl<B, P> Axis<B, P>
where
	B: Backend,
	P: SharedMut<Router<B>>,
{
	/// Create a Ready axis at position 0 using the default [`AxisOptions`].
	pub fn new(router: P, id: AxisId) -> Self {
		AxisOptions::default().build(router, id)
	}

	/// The axis identifier.
	pub fn id(&self) -> AxisId {
		self.state.id
	}

	/// Whether the axis is Ready or Busy.
	pub fn status(&self) -> Status {
		self.state.status
	}

	/// Whether the axis is Busy.
	pub fn is_busy(&self) -> bool {
		self.state.status == Status::Busy
	}

	/// The last known position, in motor counts.
	pub fn position(&self) -> i64 {
		self.state.position
	}

	/// A snapshot of the axis state.
	pub fn state(&self) -> AxisState {
		self.state
	}

	/// The options the axis was created with.
	pub fn options(&self) -> &AxisOptions {
		&self.options
	}

	/// Get the shared router the axis commands through.
	pub fn router(&self) -> &P {
		&self.router
	}

	fn ensure_ready(&self) -> Result<(), BusyError> {
		if self.is_busy() {
			Err(BusyError::new(self.state.id))
		} else {
			Ok(())
		}
	}

	/// Send `command` and require an Ack.
	fn command_ack(&self, command: &str) -> Result<crate::Message, CommandError> {
		let reply = self.router.lock_mut()?.send_command(command)?;
		Ok(reply.check_ack()?)
	}

	/// Send a motion `command` and require an Ack.
	///
	/// The axis is Ready, so every notice for it that was received up to the
	/// reply is left over from earlier and is dropped. Later notices can then
	/// only complete this motion.
	fn start_motion(&self, command: &str) -> Result<(), CommandError> {
		let mut router = self.router.lock_mut()?;
		let reply = router.send_command(command)?;
		router.discard_notices(self.state.id);
		reply.check_ack()?;
		Ok(())
	}

	/// Start a move to the absolute position `target`.
	///
	/// `GO <id> <target> <duration>` is sent, where the duration is the
	/// distance from the current position times
	/// [`ms_per_count`](AxisOptions::ms_per_count). Once the controller
	/// acknowledges the command the axis is Busy until
	/// [`poll_done`](Axis::poll_done) sees it complete.
	///
	/// ## Errors
	///
	/// * [`BusyError`] if the axis is still moving. Nothing is sent.
	/// * [`DeviceError`](crate::error::DeviceError) if the controller answers
	///   `ERROR ...`. The axis state is unchanged.
	/// * Any [`RouterError`](crate::error::RouterError) from the exchange.
	pub fn move_absolute(&mut self, target: i64) -> Result<(), CommandError> {
		self.ensure_ready()?;
		let duration = self
			.state
			.position
			.abs_diff(target)
			.saturating_mul(self.options.ms_per_count);
		self.start_motion(&format!("GO {} {} {}", self.state.id, target, duration))?;
		self.state.status = Status::Busy;
		self.state.pending_target = Some(target);
		Ok(())
	}

	/// Start a move by `delta` counts from the last known position.
	///
	/// See [`move_absolute`](Axis::move_absolute) for details.
	pub fn move_relative(&mut self, delta: i64) -> Result<(), CommandError> {
		let target = self.state.position.saturating_add(delta);
		self.move_absolute(target)
	}

	/// Home the axis.
	///
	/// With [`Completion::Immediate`] the axis is Ready at position 0 as soon
	/// as the controller acknowledges `HOME <id>`. With [`Completion::Notice`]
	/// it is Busy until [`poll_done`](Axis::poll_done) sees it complete, and
	/// its position is 0 from then on.
	///
	/// ## Errors
	///
	/// As for [`move_absolute`](Axis::move_absolute).
	pub fn home(&mut self) -> Result<(), CommandError> {
		self.ensure_ready()?;
		self.start_motion(&format!("HOME {}", self.state.id))?;
		match self.options.home_completion {
			Completion::Immediate => {
				self.state.position = 0;
			}
			Completion::Notice => {
				self.state.status = Status::Busy;
				self.state.pending_target = Some(0);
			}
		}
		Ok(())
	}

	/// Read the axis position from the controller and remember it.
	///
	/// This does not change whether the axis is Ready or Busy.
	///
	/// ## Errors
	///
	/// A [`MalformedReplyError`] if the Ack does not echo `GET POS <id>`
	/// followed by an integer.
	pub fn read_position(&mut self) -> Result<i64, CommandError> {
		let command = format!("GET POS {}", self.state.id);
		let reply = self.command_ack(&command)?;
		let position = reply
			.reply_value(&command)
			.and_then(|value| value.parse::<i64>().ok());
		match position {
			Some(position) => {
				self.state.position = position;
				Ok(position)
			}
			None => Err(MalformedReplyError::new(reply).into()),
		}
	}

	/// Check, without blocking, whether the axis has finished moving.
	///
	/// A Ready axis is done. A Busy axis becomes Ready, at the target of the
	/// motion that was in progress, once a notice for it has been received.
	pub fn poll_done(&mut self) -> Result<bool, CommandError> {
		if !self.is_busy() {
			return Ok(true);
		}
		let notice = self.router.lock_mut()?.claim_notice(self.state.id)?;
		match notice {
			Some(notice) => {
				log::debug!("axis {} done: {notice}", self.state.id);
				self.state.status = Status::Ready;
				if let Some(target) = self.state.pending_target.take() {
					self.state.position = target;
				}
				Ok(true)
			}
			None => {
				log::trace!("axis {} still busy", self.state.id);
				Ok(false)
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{backend::Mock, error::DeviceError};

	fn shared_router() -> Rc<RefCell<Router<Mock>>> {
		SharedMut::new(Router::new(Mock::new()))
	}

	fn written(router: &Rc<RefCell<Router<Mock>>>) -> Vec<String> {
		router.borrow().backend().written_lines()
	}

	fn append(router: &Rc<RefCell<Router<Mock>>>, data: &str) {
		router.borrow_mut().backend_mut().append_data(data);
	}

	#[test]
	fn move_then_notice() {
		let router = shared_router();
		let mut axis = AxisOptions::new().ms_per_count(50).build(router.clone(), 2);
		assert_eq!(axis.status(), Status::Ready);

		append(&router, "ACK GO 2 100 5000\n");
		axis.move_absolute(100).unwrap();
		assert_eq!(written(&router), vec!["GO 2 100 5000"]);
		assert!(axis.is_busy());
		assert_eq!(axis.state().pending_target(), Some(100));

		assert!(!axis.poll_done().unwrap());
		assert!(axis.is_busy());

		append(&router, "NOTICE DONE 2\n");
		assert!(axis.poll_done().unwrap());
		assert_eq!(axis.status(), Status::Ready);
		assert_eq!(axis.position(), 100);
		assert_eq!(axis.state().pending_target(), None);

		append(&router, "ACK GET POS 2 100\n");
		assert_eq!(axis.read_position().unwrap(), 100);
		assert_eq!(axis.position(), 100);
		assert_eq!(axis.status(), Status::Ready);
		assert_eq!(written(&router), vec!["GO 2 100 5000", "GET POS 2"]);
	}

	#[test]
	fn stale_notices_do_not_complete_a_new_move() {
		let router = shared_router();
		let mut axis = AxisOptions::new()
			.home_completion(Completion::Immediate)
			.build(router.clone(), 0);
		// This firmware also announces the end of a home it already waited for.
		append(&router, "ACK HOME 0\nNOTICE DONE 0\nACK GO 0 100 100\n");
		axis.home().unwrap();
		assert_eq!(axis.status(), Status::Ready);

		axis.move_absolute(100).unwrap();
		assert!(axis.is_busy());
		assert_eq!(router.borrow().notices().count(), 0);
		assert!(!axis.poll_done().unwrap());
		assert_eq!(axis.position(), 0);

		append(&router, "NOTICE DONE 0\n");
		assert!(axis.poll_done().unwrap());
		assert_eq!(axis.position(), 100);
	}

	#[test]
	fn stale_notices_are_dropped_even_when_already_queued() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 1);
		append(&router, "NOTICE DONE 1\nNOTICE DONE 2\nACK ALIVE\n");
		router.borrow_mut().send_command("ALIVE").unwrap();
		assert_eq!(router.borrow().notices().count(), 2);

		append(&router, "ACK GO 1 5 5\n");
		axis.move_absolute(5).unwrap();
		assert!(!axis.poll_done().unwrap());
		// Only the other axis' notice is left.
		let axes: Vec<_> = router.borrow().notices().map(|n| n.axis()).collect();
		assert_eq!(axes, vec![Some(2)]);
	}

	#[test]
	fn error_reply_leaves_state_unchanged() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 9);
		append(&router, "ERROR axis out of range\n");
		let err = axis.move_absolute(0).unwrap_err();
		let err = DeviceError::try_from(err).unwrap();
		assert_eq!(err.text(), "axis out of range");
		assert_eq!(written(&router), vec!["GO 9 0 0"]);
		assert_eq!(axis.state(), AxisState::new(9));
	}

	#[test]
	fn busy_axis_rejects_motion_without_sending() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 1);
		append(&router, "ACK GO 1 10 10\n");
		axis.move_absolute(10).unwrap();
		router.borrow_mut().backend_mut().clear_written();

		let err = axis.move_relative(5).unwrap_err();
		assert!(matches!(err, CommandError::Busy(ref e) if e.axis() == 1), "{err:?}");
		assert!(matches!(axis.home(), Err(CommandError::Busy(_))));
		assert!(written(&router).is_empty());
		assert!(axis.is_busy());
	}

	#[test]
	fn relative_moves_use_the_last_known_position() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 0);
		append(&router, "ACK GO 0 30 30\nNOTICE DONE 0\nACK GO 0 20 10\n");
		axis.move_relative(30).unwrap();
		assert!(axis.poll_done().unwrap());
		axis.move_relative(-10).unwrap();
		assert_eq!(written(&router), vec!["GO 0 30 30", "GO 0 20 10"]);
	}

	#[test]
	fn home_completes_with_a_notice() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 3);
		append(&router, "ACK GET POS 3 -40\nACK HOME 3\n");
		assert_eq!(axis.read_position().unwrap(), -40);
		axis.home().unwrap();
		assert!(axis.is_busy());
		assert_eq!(axis.position(), -40);

		append(&router, "NOTICE DONE 3\n");
		assert!(axis.poll_done().unwrap());
		assert_eq!(axis.position(), 0);
		assert_eq!(written(&router), vec!["GET POS 3", "HOME 3"]);
	}

	#[test]
	fn home_completes_immediately() {
		let router = shared_router();
		let mut axis = AxisOptions::new()
			.home_completion(Completion::Immediate)
			.build(router.clone(), 3);
		append(&router, "ACK GET POS 3 12\nACK HOME 3\n");
		axis.read_position().unwrap();
		axis.home().unwrap();
		assert_eq!(axis.status(), Status::Ready);
		assert_eq!(axis.position(), 0);
		assert!(axis.poll_done().unwrap());
	}

	#[test]
	fn read_position_keeps_status() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 1);
		append(&router, "ACK GO 1 8 8\nNOTICE DONE 0\nACK GET POS 1 4\n");
		axis.move_absolute(8).unwrap();
		assert_eq!(axis.read_position().unwrap(), 4);
		assert!(axis.is_busy());
		// The notice for another axis was queued, not consumed.
		assert_eq!(router.borrow().notices().count(), 1);
		assert!(!axis.poll_done().unwrap());
	}

	#[test]
	fn read_position_rejects_malformed_replies() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 1);
		for reply in ["ACK GET POS 2 4\n", "ACK GET POS 1\n", "ACK GET POS 1 four\n"] {
			append(&router, reply);
			let err = axis.read_position().unwrap_err();
			assert!(matches!(err, CommandError::MalformedReply(_)), "{reply}: {err:?}");
		}
		assert_eq!(axis.position(), 0);
	}

	#[test]
	fn reentrant_use_reports_lock_unavailable() {
		let router = shared_router();
		let mut axis = Axis::new(router.clone(), 1);
		let _guard = router.borrow_mut();
		let err = axis.move_absolute(1).unwrap_err();
		assert!(matches!(err, CommandError::LockUnavailable(_)), "{err:?}");
	}

	#[test]
	fn sync_axis_can_be_sent_to_another_thread() {
		let router: Arc<Mutex<Router<Mock>>> = SharedMut::new(Router::new(Mock::new()));
		router
			.lock()
			.unwrap()
			.backend_mut()
			.append_data("ACK GO 4 5 5\nNOTICE DONE 4\n");
		let mut axis: SyncAxis<Mock> = Axis::new(router.clone(), 4);
		let handle = std::thread::spawn(move || {
			axis.move_absolute(5).unwrap();
			while !axis.poll_done().unwrap() {}
			axis.position()
		});
		assert_eq!(handle.join().unwrap(), 5);
	}
}
