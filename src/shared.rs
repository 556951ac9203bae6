//! Traits to access a [`Router`](crate::router::Router) through different
//! sharing mechanisms.
//!
//! Every [`Axis`](crate::axis::Axis) handed out by a [`Rig`](crate::rig::Rig)
//! holds a clone of the same shared router. Locking it for the duration of
//! an exchange is what keeps exchanges on the transport one at a time and
//! what protects the router's queue of pending notices.
//!
//! Use `Rc<RefCell<_>>` when everything runs on one thread, or
//! `Arc<Mutex<_>>` when axes are driven from several threads.

use crate::error::{LockError, LockPoisonedError, LockUnavailableError};
use std::{
	cell::{RefCell, RefMut},
	ops::DerefMut,
	rc::Rc,
	sync::{Arc, Mutex, MutexGuard, TryLockError},
};

/// Any type that gives exclusive, shared access to a `T`, either within a
/// thread or across threads.
pub trait SharedMut<T>: Clone {
	/// The type protecting the shared resource while it is locked.
	type GuardMut<'g>: DerefMut<Target = T>
	where
		Self: 'g;

	/// Create a new instance of the shared type in the unlocked state.
	fn new(value: T) -> Self;

	/// Lock the underlying resource.
	///
	/// In multithreaded contexts, this will block the current thread until
	/// the resource is available. In a single thread, locking a resource that
	/// is already locked fails with [`LockUnavailableError`].
	fn lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError>;

	/// Try to lock the underlying resource without blocking.
	fn try_lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError>;

	/// Consume the shared value and return it if there are no other shared
	/// references to it. If there are other references, `None` is returned
	/// and the reference is dropped.
	fn into_inner(this: Self) -> Option<T>;
}

impl<T> SharedMut<T> for Rc<RefCell<T>> {
	type GuardMut<'g> = RefMut<'g, T> where Self: 'g;

	fn new(value: T) -> Self {
		Rc::new(RefCell::new(value))
	}
	fn lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError> {
		self.try_lock_mut()
	}
	fn try_lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError> {
		self.try_borrow_mut()
			.map_err(|_| LockUnavailableError.into())
	}
	fn into_inner(this: Self) -> Option<T> {
		Rc::into_inner(this).map(RefCell::into_inner)
	}
}

impl<T> SharedMut<T> for Arc<Mutex<T>> {
	type GuardMut<'g> = MutexGuard<'g, T> where Self: 'g;

	fn new(value: T) -> Self {
		Arc::new(Mutex::new(value))
	}
	fn lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError> {
		Mutex::lock(self).map_err(|_| LockPoisonedError.into())
	}
	fn try_lock_mut(&self) -> Result<Self::GuardMut<'_>, LockError> {
		Mutex::try_lock(self).map_err(|err| match err {
			TryLockError::Poisoned(_) => LockPoisonedError.into(),
			TryLockError::WouldBlock => LockUnavailableError.into(),
		})
	}
	fn into_inner(this: Self) -> Option<T> {
		Arc::into_inner(this).and_then(|mutex| Mutex::into_inner(mutex).ok())
	}
}
