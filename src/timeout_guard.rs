//! A guard that holds a router at a temporary read timeout.

use crate::{backend::Backend, router::Router};
use std::{io, time::Duration};

/// Exclusive access to a [`Router`] whose backend read timeout has been
/// changed for the duration of one operation.
///
/// The original timeout is put back when the guard is dropped. If that
/// fails, the router is poisoned and its next operation reports the error.
///
/// Create one with [`Router::timeout_guard`]. The guard dereferences to the
/// router, so it can be used in its place.
#[derive(Debug)]
pub struct TimeoutGuard<'a, B: Backend> {
	router: &'a mut Router<B>,
	/// Restored on drop.
	original: Option<Duration>,
}

impl<'a, B: Backend> TimeoutGuard<'a, B> {
	pub(crate) fn new(router: &'a mut Router<B>, timeout: Option<Duration>) -> io::Result<Self> {
		let original = router.backend().read_timeout()?;
		router.backend_mut().set_read_timeout(timeout)?;
		Ok(TimeoutGuard { router, original })
	}
}

impl<B: Backend> std::ops::Deref for TimeoutGuard<'_, B> {
	type Target = Router<B>;
	fn deref(&self) -> &Router<B> {
		self.router
	}
}

impl<B: Backend> std::ops::DerefMut for TimeoutGuard<'_, B> {
	fn deref_mut(&mut self) -> &mut Router<B> {
		self.router
	}
}

impl<B: Backend> Drop for TimeoutGuard<'_, B> {
	fn drop(&mut self) {
		let original = self.original;
		if let Err(err) = self.router.backend_mut().set_read_timeout(original) {
			let reason = match original {
				Some(timeout) => format!("cannot restore the {timeout:?} read timeout: {err}"),
				None => format!("cannot restore the blocking read timeout: {err}"),
			};
			log::error!("{reason}");
			self.router.poison(io::Error::new(io::ErrorKind::Other, reason));
		}
	}
}

#[cfg(test)]
mod test {
	use crate::{backend::Mock, error::RouterError, router::Router};
	use std::{io, time::Duration};

	#[test]
	fn restores_original_timeout() {
		let mut router = Router::new(Mock::new());
		router.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
		{
			let guard = router.timeout_guard(Some(Duration::from_millis(5))).unwrap();
			assert_eq!(guard.read_timeout().unwrap(), Some(Duration::from_millis(5)));
		}
		assert_eq!(router.read_timeout().unwrap(), Some(Duration::from_secs(3)));
	}

	#[test]
	fn failed_restore_poisons_router() {
		let mut router = Router::new(Mock::new());
		{
			let mut guard = router.timeout_guard(Some(Duration::from_millis(5))).unwrap();
			guard
				.backend_mut()
				.set_read_timeout_error(Some(io::Error::new(io::ErrorKind::Other, "boom")));
		}
		let err = router.send_command("ALIVE").unwrap_err();
		assert!(matches!(err, RouterError::Io(_)), "{err:?}");
		// The poison is only reported once.
		router.backend_mut().append_data("ACK ALIVE\n");
		router.send_command("ALIVE").unwrap();
	}
}
