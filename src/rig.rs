//! Types for accessing the rig controller as a whole and the axes on it.

use crate::{
	axis::{Axis, AxisOptions},
	backend::Backend,
	error::{CommandError, MalformedReplyError, TimeoutError},
	message::{AxisId, Message},
	router::Router,
	shared::SharedMut,
};
use std::{
	cell::RefCell,
	collections::BTreeSet,
	marker::PhantomData,
	rc::Rc,
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

/// The default time between `STATE` polls in
/// [`poll_until_ready`](Rig::poll_until_ready).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the controller reports to `STATE`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
	/// No axis is moving.
	Ready,
	/// At least one axis is moving.
	Going,
}

/// Represents the rig controller and the axes attached to it.
///
/// The router is shared with every [`Axis`] the rig hands out. An [`Axis`]
/// tracks whether its motor is moving, so the rig hands out at most one
/// handle per axis.
pub struct Rig<B, P: SharedMut<Router<B>> = Rc<RefCell<Router<B>>>> {
	/// The shared router
	router: P,
	/// The number of axes, with ids `0..axis_count`.
	axis_count: u32,
	/// The options for axes handed out by the rig.
	axis_options: AxisOptions,
	/// The axes that have been handed out.
	issued: BTreeSet<AxisId>,
	/// How long to wait between `STATE` polls.
	poll_interval: Duration,
	_backend: PhantomData<fn() -> B>,
}

/// A [`Rig`] that can shared between threads.
pub type SyncRig<B> = Rig<B, Arc<Mutex<Router<B>>>>;

impl<B, P> std::fmt::Debug for Rig<B, P>
where
	P: SharedMut<Router<B>>,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Rig")
			.field("axis_count", &self.axis_count)
			.field("axis_options", &self.axis_options)
			.field("issued", &self.issued)
			.finish_non_exhaustive()
	}
}

impl<B: Backend> Rig<B> {
	/// Create a new [`Rig`] with `axis_count` axes.
	///
	/// To create a `Rig` that can be shared across threads, use [`new_sync`](Rig::new_sync).
	pub fn new(router: Router<B>, axis_count: u32) -> Self {
		Rig::from_shared(SharedMut::new(router), axis_count)
	}
}

impl<B: Backend> SyncRig<B> {
	/// Create a new [`Rig`] with `axis_count` axes that can be shared across threads.
	///
	/// To create a `Rig` that cannot be shared across threads, but has
	/// reduced overhead, use [`new`](Rig::new).
	pub fn new_sync(router: Router<B>, axis_count: u32) -> Self {
		Rig::from_shared(SharedMut::new(router), axis_count)
	}
}

impl<B, P> Rig<B, P>
where
	B: Backend,
	P: SharedMut<Router<B>>,
{
	/// Create a rig around an already shared router.
	pub fn from_shared(router: P, axis_count: u32) -> Self {
		Rig {
			router,
			axis_count,
			axis_options: AxisOptions::default(),
			issued: BTreeSet::new(),
			poll_interval: DEFAULT_POLL_INTERVAL,
			_backend: PhantomData,
		}
	}

	/// Set how long [`poll_until_ready`](Rig::poll_until_ready) waits between
	/// polls.
	///
	/// The default is [`DEFAULT_POLL_INTERVAL`].
	pub fn set_poll_interval(&mut self, interval: Duration) -> &mut Self {
		self.poll_interval = interval;
		self
	}

	/// Set the options used for axes handed out from now on.
	pub fn set_axis_options(&mut self, options: AxisOptions) -> &mut Self {
		self.axis_options = options;
		self
	}

	/// The number of axes on the rig.
	pub fn axis_count(&self) -> u32 {
		self.axis_count
	}

	/// Whether `id` names an axis of the rig.
	pub fn has_axis(&self, id: AxisId) -> bool {
		id < self.axis_count
	}

	/// Get the shared router.
	pub fn router(&self) -> &P {
		&self.router
	}

	/// Get the Ready [`Axis`] handle for the axis `id`, at position 0.
	///
	/// Returns None if there is no axis with that id, or if its handle was
	/// already handed out.
	pub fn axis(&mut self, id: AxisId) -> Option<Axis<B, P>> {
		if !self.has_axis(id) || !self.issued.insert(id) {
			log::debug!("axis {id} is not available");
			return None;
		}
		Some(self.axis_options.build(self.router.clone(), id))
	}

	/// Get the handles of every axis not handed out yet, in id order.
	pub fn axes(&mut self) -> Vec<Axis<B, P>> {
		let mut axes = Vec::new();
		for id in 0..self.axis_count {
			if !self.is_issued(id) {
				axes.extend(self.axis(id));
			}
		}
		axes
	}

	/// Whether the handle for axis `id` has been handed out.
	pub fn is_issued(&self, id: AxisId) -> bool {
		self.issued.contains(&id)
	}

	/// Send `command` and require an Ack.
	fn command_ack(&self, command: &str) -> Result<Message, CommandError> {
		let reply = self.router.lock_mut()?.send_command(command)?;
		Ok(reply.check_ack()?)
	}

	/// Send a `GET` and return the value after the echoed command.
	fn get(&self, command: &str) -> Result<(Message, String), CommandError> {
		let reply = self.command_ack(command)?;
		match reply.reply_value(command) {
			Some(value) if !value.is_empty() => {
				let value = value.to_string();
				Ok((reply, value))
			}
			_ => Err(MalformedReplyError::new(reply).into()),
		}
	}

	/// Get the controller's firmware version.
	pub fn version(&self) -> Result<String, CommandError> {
		Ok(self.get("GET VERSION")?.1)
	}

	/// Get the controller's frame index.
	pub fn index(&self) -> Result<i64, CommandError> {
		let (reply, value) = self.get("GET INDEX")?;
		value
			.parse()
			.map_err(|_| MalformedReplyError::new(reply).into())
	}

	/// Set the controller's frame index.
	pub fn set_index(&self, index: i64) -> Result<(), CommandError> {
		self.command_ack(&format!("SET INDEX {index}"))?;
		Ok(())
	}

	/// Ask the controller whether any axis is moving.
	pub fn state(&self) -> Result<DeviceState, CommandError> {
		let (reply, value) = self.get("STATE")?;
		match value.as_str() {
			"READY" => Ok(DeviceState::Ready),
			"GOING" => Ok(DeviceState::Going),
			_ => Err(MalformedReplyError::new(reply).into()),
		}
	}

	/// Check that the controller is answering.
	pub fn alive(&self) -> Result<(), CommandError> {
		self.command_ack("ALIVE")?;
		Ok(())
	}

	/// Resynchronize the link. See [`Router::resync`].
	pub fn resync(&self) -> Result<usize, CommandError> {
		Ok(self.router.lock_mut()?.resync()?)
	}

	/// Poll `STATE` until the controller reports [`DeviceState::Ready`].
	///
	/// Polls are spaced by the [poll interval](Rig::set_poll_interval).
	///
	/// ## Errors
	///
	/// A [`TimeoutError`] if the controller is still going after `timeout`.
	pub fn poll_until_ready(&self, timeout: Duration) -> Result<(), CommandError> {
		let deadline = Instant::now() + timeout;
		loop {
			if self.state()? == DeviceState::Ready {
				return Ok(());
			}
			let now = Instant::now();
			if now >= deadline {
				return Err(TimeoutError::new(Some("STATE"), timeout).into());
			}
			std::thread::sleep(self.poll_interval.min(deadline - now));
		}
	}
}
