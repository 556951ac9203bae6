//! Taking a photo as one step of a motion script.
//!
//! The camera is a collaborator: the [`Sequencer`](crate::sequencer::Sequencer)
//! only ever asks it to capture one photo to a given path.

use crate::error::CaptureError;
use std::{
	ffi::OsString,
	path::Path,
	process::{Command, Stdio},
};

/// Types that can capture one photo to a path.
pub trait Capture {
	/// Capture a photo and store it at `path`.
	///
	/// Returning an error aborts the script that requested the photo.
	fn capture(&mut self, path: &Path) -> Result<(), CaptureError>;
}

impl<C: Capture + ?Sized> Capture for &mut C {
	fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
		(**self).capture(path)
	}
}

impl<C: Capture + ?Sized> Capture for Box<C> {
	fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
		(**self).capture(path)
	}
}

/// A [`Capture`] that calls a closure. See [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> std::fmt::Debug for FromFn<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FromFn").finish_non_exhaustive()
	}
}

impl<F> Capture for FromFn<F>
where
	F: FnMut(&Path) -> Result<(), CaptureError>,
{
	fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
		(self.0)(path)
	}
}

/// Create a [`Capture`] from a closure.
///
/// ```
/// # use steprig::capture::{self, Capture};
/// # use std::path::Path;
/// let mut taken = Vec::new();
/// let mut camera = capture::from_fn(|path| {
///     taken.push(path.to_path_buf());
///     Ok(())
/// });
/// camera.capture(Path::new("0000000000.jpg")).unwrap();
/// drop(camera);
/// assert_eq!(taken.len(), 1);
/// ```
pub fn from_fn<F>(f: F) -> FromFn<F>
where
	F: FnMut(&Path) -> Result<(), CaptureError>,
{
	FromFn(f)
}

/// A [`Capture`] that runs an external program for every photo.
///
/// Every argument equal to `{path}` is replaced by the destination path. The
/// capture fails if the program cannot be started or exits unsuccessfully.
///
/// ## Example
///
/// ```rust
/// # use steprig::capture::ExternalCapture;
/// // The default: gphoto2 --capture-image-and-download --filename {path}
/// let camera = ExternalCapture::gphoto2();
///
/// let mut custom = ExternalCapture::new("raspistill");
/// custom.arg("-o").arg("{path}");
/// ```
#[derive(Debug, Clone)]
pub struct ExternalCapture {
	/// The program to run.
	program: OsString,
	/// The program's arguments, possibly containing the path placeholder.
	args: Vec<OsString>,
}

impl ExternalCapture {
	/// The argument that is replaced by the destination path.
	pub const PATH_PLACEHOLDER: &'static str = "{path}";

	/// Create a capture that runs `program` without arguments.
	pub fn new<S: Into<OsString>>(program: S) -> Self {
		ExternalCapture {
			program: program.into(),
			args: Vec::new(),
		}
	}

	/// Capture with a USB tethered camera through `gphoto2`.
	pub fn gphoto2() -> Self {
		let mut capture = ExternalCapture::new("gphoto2");
		capture
			.arg("--capture-image-and-download")
			.arg("--filename")
			.arg(ExternalCapture::PATH_PLACEHOLDER);
		capture
	}

	/// Append an argument.
	pub fn arg<S: Into<OsString>>(&mut self, arg: S) -> &mut Self {
		self.args.push(arg.into());
		self
	}

	/// Build the command for one photo.
	fn command(&self, path: &Path) -> Command {
		let mut command = Command::new(&self.program);
		for arg in &self.args {
			if arg == ExternalCapture::PATH_PLACEHOLDER {
				command.arg(path);
			} else {
				command.arg(arg);
			}
		}
		command
	}
}

impl Default for ExternalCapture {
	fn default() -> Self {
		ExternalCapture::gphoto2()
	}
}

impl Capture for ExternalCapture {
	fn capture(&mut self, path: &Path) -> Result<(), CaptureError> {
		log::debug!(
			"capturing {} with {}",
			path.display(),
			self.program.to_string_lossy()
		);
		let output = self
			.command(path)
			.stdin(Stdio::null())
			.output()
			.map_err(|e| {
				CaptureError::new(format!(
					"cannot run `{}`: {e}",
					self.program.to_string_lossy()
				))
			})?;
		if output.status.success() {
			Ok(())
		} else {
			let stderr = String::from_utf8_lossy(&output.stderr);
			Err(CaptureError::new(format!(
				"`{}` {}: {}",
				self.program.to_string_lossy(),
				output.status,
				stderr.trim()
			)))
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::path::PathBuf;

	fn capture_with<C: Capture>(mut camera: C, path: &str) {
		camera.capture(Path::new(path)).unwrap();
	}

	#[test]
	fn closures_and_references_capture() {
		let mut taken: Vec<PathBuf> = Vec::new();
		{
			let mut camera = from_fn(|path: &Path| {
				taken.push(path.to_path_buf());
				Ok(())
			});
			capture_with(&mut camera, "a.jpg");
			let mut boxed: Box<dyn Capture + '_> = Box::new(&mut camera);
			boxed.capture(Path::new("b.jpg")).unwrap();
		}
		assert_eq!(taken, [PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
	}

	#[test]
	fn gphoto2_arguments() {
		let camera = ExternalCapture::default();
		let command = camera.command(Path::new("out/0000000003.jpg"));
		assert_eq!(command.get_program(), "gphoto2");
		let args: Vec<_> = command.get_args().collect();
		assert_eq!(
			args,
			["--capture-image-and-download", "--filename", "out/0000000003.jpg"]
		);
	}

	#[cfg(unix)]
	#[test]
	fn external_program_status_is_reported() {
		let mut ok = ExternalCapture::new("sh");
		ok.arg("-c").arg("test \"$0\" = out/1.jpg").arg("{path}");
		ok.capture(Path::new("out/1.jpg")).unwrap();

		let mut failing = ExternalCapture::new("sh");
		failing.arg("-c").arg("echo no camera >&2; exit 3");
		let err = failing.capture(Path::new("out/1.jpg")).unwrap_err();
		assert!(err.reason().contains("no camera"), "{err}");
		assert_eq!(err.path(), None);

		let mut missing = ExternalCapture::new("/nonexistent/steprig-camera");
		assert!(missing.capture(Path::new("out/1.jpg")).is_err());
	}
}
