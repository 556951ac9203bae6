//! Running motion scripts.
//!
//! A script is an ordered list of [`Step`]s. The [`Sequencer`] runs one step
//! completely, including waiting for every axis it moved to finish, before it
//! starts the next. Steps depend on the positions left by earlier steps, so
//! the first failure aborts the whole run.


use crate::{
	axis::Axis,
	backend::Backend,
	capture::Capture,
	error::{DuplicateAxisError, Error, MotionTimeoutError, ScriptError, UnknownAxisError},
	message::AxisId,
	rig::Rig,
	router::Router,
	shared::SharedMut,
};
use std::{
	cell::RefCell,
	collections::{BTreeMap, BTreeSet},
	path::{Path, PathBuf},
	rc::Rc,
	time::{Duration, Instant},
};

/// One step of a motion script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
	/// Move one axis to an absolute position and wait for it.
	Move {
		/// The axis to move.
		axis: AxisId,
		/// The absolute target position, in counts.
		target: i64,
	},
	/// Home one axis and wait for it.
	Home {
		/// The axis to home.
		axis: AxisId,
	},
	/// Start moving several axes to absolute positions, then wait for all of
	/// them.
	MoveGroup(Vec<(AxisId, i64)>),
	/// Take a photo.
	Snapshot {
		/// A label for the photo, used for logging only.
		tag: u32,
	},
}

impl Step {
	/// The axes the step commands.
	pub fn axes(&self) -> Vec<AxisId> {
		match self {
			Step::Move { axis, .. } | Step::Home { axis } => vec![*axis],
			Step::MoveGroup(moves) => moves.iter().map(|(axis, _)| *axis).collect(),
			Step::Snapshot { .. } => Vec::new(),
		}
	}
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
	/// The number of steps run.
	pub steps: usize,
	/// The paths passed to the camera, in order.
	pub snapshots: Vec<PathBuf>,
}

/// Options for creating a [`Sequencer`].
///
/// ## Example
///
/// ```
/// # use steprig::{backend::Backend, capture, rig::Rig, sequencer::SequencerOptions};
/// # use std::time::Duration;
/// # fn wrapper<B: Backend>(mut rig: Rig<B>) {
/// let camera = capture::from_fn(|_| Ok(()));
/// let sequencer = SequencerOptions::new()
///     .motion_timeout(Duration::from_secs(60))
///     .build(rig.axes(), camera);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerOptions {
	/// How long a barrier waits for the axes of one step.
	motion_timeout: Duration,
	/// How long to sleep between barrier poll rounds.
	poll_interval: Duration,
}

impl SequencerOptions {
	/// Create the default options: a 180 second motion timeout, polled every
	/// 10 ms.
	pub fn new() -> Self {
		SequencerOptions {
			motion_timeout: Duration::from_secs(180),
			poll_interval: Duration::from_millis(10),
		}
	}

	/// Set how long a step waits for its axes to finish moving.
	pub fn motion_timeout(&mut self, timeout: Duration) -> &mut Self {
		self.motion_timeout = timeout;
		self
	}

	/// Set how long to sleep between checks of the moving axes.
	pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
		self.poll_interval = interval;
		self
	}

	/// Create a [`Sequencer`] driving `axes` and `camera` with these options.
	pub fn build<B, P, C, I>(&self, axes: I, camera: C) -> Sequencer<B, C, P>
	where
		B: Backend,
		P: SharedMut<Router<B>>,
		C: Capture,
		I: IntoIterator<Item = Axis<B, P>>,
	{
		Sequencer {
			axes: axes.into_iter().map(|axis| (axis.id(), axis)).collect(),
			camera,
			options: self.clone(),
		}
	}
}

impl Default for SequencerOptions {
	fn default() -> Self {
		SequencerOptions::new()
	}
}

/// Runs motion scripts against a fixed set of axes and a camera.
pub struct Sequencer<B, C, P: SharedMut<Router<B>> = Rc<RefCell<Router<B>>>> {
	/// The axes steps may command, by id.
	axes: BTreeMap<AxisId, Axis<B, P>>,
	/// Takes the photos.
	camera: C,
	/// Barrier timing.
	options: SequencerOptions,
}

impl<B, C, P> std::fmt::Debug for Sequencer<B, C, P>
where
	P: SharedMut<Router<B>>,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Sequencer")
			.field("axes", &self.axes.values().collect::<Vec<_>>())
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}

impl<B, C, P> Sequencer<B, C, P>
where
	B: Backend,
	P: SharedMut<Router<B>>,
	C: Capture,
{
	/// Create a sequencer driving `axes` and `camera` with the default options.
	pub fn new<I: IntoIterator<Item = Axis<B, P>>>(axes: I, camera: C) -> Self {
		SequencerOptions::default().build(axes, camera)
	}

	/// Create a sequencer driving every axis of `rig` that has not been
	/// handed out yet.
	pub fn from_rig(rig: &mut Rig<B, P>, camera: C) -> Self {
		Sequencer::new(rig.axes(), camera)
	}

	/// Get the axis `id`, if the sequencer drives it.
	pub fn axis(&self, id: AxisId) -> Option<&Axis<B, P>> {
		self.axes.get(&id)
	}

	/// Get the camera.
	pub fn camera_mut(&mut self) -> &mut C {
		&mut self.camera
	}

	/// Consume the sequencer and return its axes and camera.
	pub fn into_parts(self) -> (Vec<Axis<B, P>>, C) {
		(self.axes.into_values().collect(), self.camera)
	}

	fn axis_mut(&mut self, step: usize, id: AxisId) -> Result<&mut Axis<B, P>, UnknownAxisError> {
		self.axes
			.get_mut(&id)
			.ok_or_else(|| UnknownAxisError::new(step, id))
	}

	/// Check that every step only names axes the sequencer drives, and
	/// names each of them at most once.
	pub fn validate(&self, steps: &[Step]) -> Result<(), ScriptError> {
		for (index, step) in steps.iter().enumerate() {
			let mut seen = BTreeSet::new();
			for axis in step.axes() {
				if !self.axes.contains_key(&axis) {
					return Err(UnknownAxisError::new(index, axis).into());
				}
				if !seen.insert(axis) {
					return Err(DuplicateAxisError::new(index, axis).into());
				}
			}
		}
		Ok(())
	}

	/// Run `steps` in order, storing photos in `output_dir`.
	///
	/// The script is [validated](Sequencer::validate) before anything is
	/// sent. Moves and homes wait until every axis they commanded is done.
	/// Photos are named after their position among the script's snapshots:
	/// the first is `0000000000.jpg`, the second `0000000001.jpg`, and so on.
	/// `output_dir` is created if the script takes any photos.
	///
	/// ## Errors
	///
	/// The first error aborts the run; no step is retried or skipped. A
	/// [`MotionTimeoutError`] lists the axes still moving when a step's
	/// [motion timeout](SequencerOptions::motion_timeout) expired.
	pub fn run(&mut self, steps: &[Step], output_dir: &Path) -> Result<RunReport, Error> {
		self.validate(steps)?;
		if steps.iter().any(|step| matches!(step, Step::Snapshot { .. })) {
			std::fs::create_dir_all(output_dir)?;
		}

		let mut report = RunReport::default();
		for (index, step) in steps.iter().enumerate() {
			log::info!("step {}/{}: {step:?}", index + 1, steps.len());
			match step {
				Step::Move { axis, target } => {
					self.axis_mut(index, *axis)?.move_absolute(*target)?;
					self.barrier(index, &[*axis])?;
				}
				Step::Home { axis } => {
					self.axis_mut(index, *axis)?.home()?;
					self.barrier(index, &[*axis])?;
				}
				Step::MoveGroup(moves) => {
					for (axis, target) in moves {
						self.axis_mut(index, *axis)?.move_absolute(*target)?;
					}
					self.barrier(index, &step.axes())?;
				}
				Step::Snapshot { tag } => {
					let path = output_dir.join(format!("{:010}.jpg", report.snapshots.len()));
					log::info!("snapshot {tag} to {}", path.display());
					self.camera.capture(&path).map_err(|e| e.at(&path))?;
					report.snapshots.push(path);
				}
			}
			report.steps += 1;
		}
		Ok(report)
	}

	/// Wait until every axis in `participants` is done moving.
	fn barrier(&mut self, step: usize, participants: &[AxisId]) -> Result<(), Error> {
		let timeout = self.options.motion_timeout;
		let deadline = Instant::now() + timeout;
		loop {
			let mut busy = Vec::new();
			for &id in participants {
				if !self.axis_mut(step, id)?.poll_done()? {
					busy.push(id);
				}
			}
			if busy.is_empty() {
				return Ok(());
			}
			if Instant::now() >= deadline {
				log::warn!("axes {busy:?} still busy after {timeout:?}");
				return Err(MotionTimeoutError::new(busy, timeout).into());
			}
			log::trace!("waiting for axes {busy:?}");
			std::thread::sleep(self.options.poll_interval);
		}
	}
}
