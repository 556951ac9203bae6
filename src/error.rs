//! Error types.
//!
//! Each error is represented by a unique type that implements [`std::error::Error`].
//! However, most APIs return more than one kind of error and so will return one
//! of the higher level [enums](#enums), such as [`RouterError`],
//! [`CommandError`], or [`Error`]. Where appropriate, the error types are
//! convertible to the higher level enums, allowing them to be used with `?`:
//!
//! ```
//! use steprig::error::{CommandError, Error};
//!
//! fn foo() -> Result<(), CommandError> {
//!     // ...
//! # unimplemented!();
//! }
//!
//! fn bar() -> Result<(), Error> {
//!     foo()?;
//!     // ...
//! # Ok(())
//! }
//! ```
//!
//! The errors map onto the protocol's failure modes:
//!
//! * [`TimeoutError`]: no reply arrived in time. The caller may retry or abort.
//! * [`ProtocolError`]: a malformed or out-of-order message. The link should be
//!   resynchronized (see [`Router::resync`](crate::router::Router::resync))
//!   before it is trusted again.
//! * [`DeviceError`]: the controller answered `ERROR ...`.
//! * [`BusyError`]: an axis was commanded while it was still moving.
//! * [`MotionTimeoutError`]: a barrier wait expired, aborting a script.
//!
//! Nothing in this crate retries on its own.

use crate::message::{AxisId, Message};
use std::{
	path::{Path, PathBuf},
	time::Duration,
};

/// Implement Error and Display traits for the specified type.
///
/// After the type define the format string and any arguments it should
/// reference after `self =>` (to abide by macro hygiene rules).
macro_rules! impl_error_display {
    (
        $name:path,
        $self:ident =>
        $display:literal
        $(,
            $($arg:expr),+
        )?
    ) => {
        impl std::error::Error for $name {}

        impl std::fmt::Display for $name {
            fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    $display
                    $(,
                        $($arg),+
                    )?
                )
            }
        }
    };
}

/// Implement `is_timeout` for an error enum with `Io` and `Timeout` variants.
macro_rules! impl_is_timeout {
    ($name:ident) => {
        impl $name {
            /// A convenience function for determining if the error is due to
            /// a reply or the backend timing out.
            pub fn is_timeout(&self) -> bool {
                match self {
                    $name::Timeout(_) => true,
                    $name::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
                    _ => false,
                }
            }
        }
    };
}

macro_rules! impl_from_serialport_error {
    ($name:ident) => {
        impl From<serialport::Error> for $name {
            fn from(other: serialport::Error) -> Self {
                use std::io;

                match other.kind() {
                    serialport::ErrorKind::NoDevice => $name::SerialDeviceInUseOrDisconnected(
                        SerialDeviceInUseOrDisconnectedError(other.description.into_boxed_str()),
                    ),
                    serialport::ErrorKind::InvalidInput => $name::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        other.description,
                    )),
                    serialport::ErrorKind::Unknown => {
                        $name::Io(io::Error::new(io::ErrorKind::Other, other.description))
                    }
                    serialport::ErrorKind::Io(kind) => {
                        $name::Io(io::Error::new(kind, other.description))
                    }
                }
            }
        }
    };
}

/// Define error enums that contain concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
///
/// Simple implementations of From and TryFrom with other error enums can be
/// added by appending a succinct impl block, which assumes that:
///   * it is being implemented for this error enum,
///   * each variant has a single tuple value, and can be converted to the value
///     in this enum with its own From implementation.
///
/// ```compile_fail
/// # // This fails to compile because the macro is not exported.
/// error_enum!{
///     // This defines the enum and From/TryFrom between ThisError and A and B.
///     #[non_exhaustive]
///     pub enum ThisError {
///         VariantA(A),
///         VariantB(B),
///         // ...
///     }
///
///     // This implements a simple From/TryFrom between ThisError and OtherType.
///     impl From<OtherType> {
///         FromVariantA => VariantA,
///         // ...
///     }
/// }
/// ```
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $variant:ident($inner:path)
            ),+
            $(,)?
        }
        $(
            impl From<$from_t:ident>
            {
                $($from_variant:ident => $to_variant:ident),+
                $(,)?
            }
        )*
    ) => {
        $(
            #[$attr]
        )*
        #[allow(missing_docs)]
        pub enum $name {
            $(
                $variant($inner)
            ),+
        }

        impl std::error::Error for $name {}

        // Defer the display to the inner error type
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$variant(e) => std::fmt::Display::fmt(e, f)
                    ),+
                }
            }
        }

        // Allow the enum to be convertible from an infallible error
        impl From<std::convert::Infallible> for $name {
            fn from(_: std::convert::Infallible) -> Self {
                unreachable!();
            }
        }

        // Conversions with underlying errors
        $(
            impl From<$inner> for $name {
                fn from(other: $inner) -> Self {
                    $name::$variant(other)
                }
            }

            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        #[allow(unreachable_patterns)]
                        value => Err(value)
                    }
                }
            }
        )+

        // Conversions from other enum errors
        $(
            impl From<$from_t> for $name {
                fn from(other: $from_t) -> Self {
                    match other {
                        $($from_t::$from_variant(e) => $name::$to_variant(From::from(e))),+
                    }
                }
            }

            impl TryFrom<$name> for $from_t {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $(
                            $name::$to_variant(e) => Ok($from_t::$from_variant(From::from(e)))
                        ),+
                        ,
                        #[allow(unreachable_patterns)]
                        _ => Err(other)
                    }
                }
            }
        )*
    };
}

/// The specified device is either disconnected or already in use by another process.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SerialDeviceInUseOrDisconnectedError(Box<str>);

impl_error_display! {
    SerialDeviceInUseOrDisconnectedError,
    self =>
    "the specified device is either disconnected or already in use by another process: {}", self.0
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct TimeoutInner {
	command: Option<String>,
	waited: Duration,
}

/// No reply arrived within the allotted time.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TimeoutError(Box<TimeoutInner>);

impl TimeoutError {
	pub(crate) fn new(command: Option<&str>, waited: Duration) -> Self {
		TimeoutError(Box::new(TimeoutInner {
			command: command.map(str::to_string),
			waited,
		}))
	}
	/// The command that went unanswered, if the wait was for a reply.
	pub fn command(&self) -> Option<&str> {
		self.0.command.as_deref()
	}
	/// How long was waited.
	pub fn waited(&self) -> Duration {
		self.0.waited
	}
}

impl std::error::Error for TimeoutError {}

impl std::fmt::Display for TimeoutError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.command() {
			Some(command) => write!(f, "no reply to `{command}` within {:?}", self.waited()),
			None => write!(f, "timed out after {:?}", self.waited()),
		}
	}
}

/// A reply (Ack or Error) arrived while no command was in flight.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct UnexpectedReplyError(Box<Message>);

impl_error_display! {
    UnexpectedReplyError,
    self => "received a reply with no command in flight: {}", self.0
}

impl UnexpectedReplyError {
	pub(crate) fn new(message: Message) -> Self {
		UnexpectedReplyError(Box::new(message))
	}
}

impl AsRef<Message> for UnexpectedReplyError {
	/// Get access to the message associated with this error.
	fn as_ref(&self) -> &Message {
		&self.0
	}
}

impl From<UnexpectedReplyError> for Message {
	/// Consume the error and return the message associated with it.
	fn from(other: UnexpectedReplyError) -> Self {
		*other.0
	}
}

/// Too many unrecognized lines arrived while waiting for a reply.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct UnrecognizedLimitError(Box<(usize, String)>);

impl UnrecognizedLimitError {
	pub(crate) fn new(count: usize, last_line: String) -> Self {
		UnrecognizedLimitError(Box::new((count, last_line)))
	}
	/// How many unrecognized lines were received.
	pub fn count(&self) -> usize {
		self.0 .0
	}
	/// The last unrecognized line.
	pub fn last_line(&self) -> &str {
		&self.0 .1
	}
}

impl_error_display! {
    UnrecognizedLimitError,
    self => "received {} unrecognized lines while waiting for a reply, the last was `{}`", self.count(), self.last_line()
}

/// An Ack's payload did not have the expected shape.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MalformedReplyError(Box<Message>);

impl_error_display! {
    MalformedReplyError,
    self => "reply is malformed: {}", self.0
}

impl MalformedReplyError {
	pub(crate) fn new(message: Message) -> Self {
		MalformedReplyError(Box::new(message))
	}
}

impl AsRef<Message> for MalformedReplyError {
	/// Get access to the message associated with this error.
	fn as_ref(&self) -> &Message {
		&self.0
	}
}

impl From<MalformedReplyError> for Message {
	/// Consume the error and return the message associated with it.
	fn from(other: MalformedReplyError) -> Self {
		*other.0
	}
}

/// A command contained the line terminator and would have been split in two.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReservedCharacterError(Box<str>);

impl ReservedCharacterError {
	pub(crate) fn new(command: &str) -> Self {
		ReservedCharacterError(command.into())
	}
	/// The rejected command.
	pub fn command(&self) -> &str {
		&self.0
	}
}

impl_error_display! {
    ReservedCharacterError,
    self => "command contains the line terminator: {:?}", self.0
}

/// The controller rejected a command with an `ERROR ...` reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceError(Box<str>);

impl DeviceError {
	pub(crate) fn new<S: Into<Box<str>>>(text: S) -> Self {
		DeviceError(text.into())
	}
	/// The literal text the controller sent after `ERROR `.
	pub fn text(&self) -> &str {
		&self.0
	}
}

impl_error_display! {
    DeviceError,
    self => "controller reported an error: {}", self.0
}

/// An axis was commanded while it was still moving.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BusyError(AxisId);

impl BusyError {
	pub(crate) fn new(axis: AxisId) -> Self {
		BusyError(axis)
	}
	/// The busy axis.
	pub fn axis(&self) -> AxisId {
		self.0
	}
}

impl_error_display! {
    BusyError,
    self => "axis {} is busy", self.0
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct MotionTimeoutInner {
	busy: Vec<AxisId>,
	waited: Duration,
}

/// A barrier wait expired while axes were still moving.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MotionTimeoutError(Box<MotionTimeoutInner>);

impl MotionTimeoutError {
	pub(crate) fn new(busy: Vec<AxisId>, waited: Duration) -> Self {
		MotionTimeoutError(Box::new(MotionTimeoutInner { busy, waited }))
	}
	/// The axes that had not finished.
	pub fn busy_axes(&self) -> &[AxisId] {
		&self.0.busy
	}
	/// How long was waited.
	pub fn waited(&self) -> Duration {
		self.0.waited
	}
}

impl_error_display! {
    MotionTimeoutError,
    self => "axes {:?} did not finish moving within {:?}", self.busy_axes(), self.waited()
}

/// A script step refers to an axis the rig does not have.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UnknownAxisError {
	step: usize,
	axis: AxisId,
}

impl UnknownAxisError {
	pub(crate) fn new(step: usize, axis: AxisId) -> Self {
		UnknownAxisError { step, axis }
	}
	/// The index of the offending step.
	pub fn step(&self) -> usize {
		self.step
	}
	/// The unknown axis.
	pub fn axis(&self) -> AxisId {
		self.axis
	}
}

impl_error_display! {
    UnknownAxisError,
    self => "step {} refers to unknown axis {}", self.step, self.axis
}

/// A script step commands the same axis more than once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DuplicateAxisError {
	step: usize,
	axis: AxisId,
}

impl DuplicateAxisError {
	pub(crate) fn new(step: usize, axis: AxisId) -> Self {
		DuplicateAxisError { step, axis }
	}
	/// The index of the offending step.
	pub fn step(&self) -> usize {
		self.step
	}
	/// The axis named more than once.
	pub fn axis(&self) -> AxisId {
		self.axis
	}
}

impl_error_display! {
    DuplicateAxisError,
    self => "step {} commands axis {} more than once", self.step, self.axis
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct CaptureInner {
	path: Option<PathBuf>,
	reason: String,
}

/// A capture device failed to take or save a photo.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CaptureError(Box<CaptureInner>);

impl CaptureError {
	/// Create an error with the reason the capture failed.
	pub fn new<S: std::fmt::Display>(reason: S) -> Self {
		CaptureError(Box::new(CaptureInner {
			path: None,
			reason: reason.to_string(),
		}))
	}
	/// Attach the path the photo was meant to be saved to.
	pub(crate) fn at(mut self, path: &Path) -> Self {
		self.0.path = Some(path.to_path_buf());
		self
	}
	/// The path the photo was meant to be saved to, if known.
	pub fn path(&self) -> Option<&Path> {
		self.0.path.as_deref()
	}
	/// Why the capture failed.
	pub fn reason(&self) -> &str {
		&self.0.reason
	}
}

impl std::error::Error for CaptureError {}

impl std::fmt::Display for CaptureError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.path() {
			Some(path) => write!(f, "failed to capture {}: {}", path.display(), self.reason()),
			None => write!(f, "failed to capture: {}", self.reason()),
		}
	}
}

/// A lock protecting a shared router was poisoned by a panicking thread.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LockPoisonedError;

impl_error_display! {
    LockPoisonedError,
    self => "the lock was poisoned"
}

/// A lock protecting a shared router is currently held elsewhere.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LockUnavailableError;

impl_error_display! {
    LockUnavailableError,
    self => "the lock is currently unavailable"
}

error_enum! {
    /// Failure to acquire a shared resource.
    #[derive(Debug, PartialEq, Eq, Hash)]
    #[non_exhaustive]
    pub enum LockError {
        Poisoned(LockPoisonedError),
        Unavailable(LockUnavailableError),
    }
}

error_enum! {
    /// Received data that did not conform to the protocol.
    #[derive(Debug, PartialEq, Eq, Hash)]
    #[non_exhaustive]
    pub enum ProtocolError {
        UnexpectedReply(UnexpectedReplyError),
        UnrecognizedLimit(UnrecognizedLimitError),
        MalformedReply(MalformedReplyError),
    }
}

error_enum! {
    /// A motion script that cannot be run as written.
    #[derive(Debug, PartialEq, Eq, Hash)]
    #[non_exhaustive]
    pub enum ScriptError {
        UnknownAxis(UnknownAxisError),
        DuplicateAxis(DuplicateAxisError),
    }
}

error_enum! {
    /// Any error returned by the [`Router`](crate::router::Router).
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum RouterError {
        SerialDeviceInUseOrDisconnected(SerialDeviceInUseOrDisconnectedError),
        Io(std::io::Error),
        Timeout(TimeoutError),
        UnexpectedReply(UnexpectedReplyError),
        UnrecognizedLimit(UnrecognizedLimitError),
        ReservedCharacter(ReservedCharacterError),
    }
}
impl_is_timeout! { RouterError }
impl_from_serialport_error! { RouterError }

error_enum! {
    /// Any error returned when commanding an [`Axis`](crate::axis::Axis) or
    /// a [`Rig`](crate::rig::Rig).
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum CommandError {
        SerialDeviceInUseOrDisconnected(SerialDeviceInUseOrDisconnectedError),
        Io(std::io::Error),
        Timeout(TimeoutError),
        UnexpectedReply(UnexpectedReplyError),
        UnrecognizedLimit(UnrecognizedLimitError),
        MalformedReply(MalformedReplyError),
        ReservedCharacter(ReservedCharacterError),
        Device(DeviceError),
        Busy(BusyError),
        LockPoisoned(LockPoisonedError),
        LockUnavailable(LockUnavailableError),
    }

    impl From<LockError> {
        Poisoned => LockPoisoned,
        Unavailable => LockUnavailable,
    }

    impl From<ProtocolError> {
        UnexpectedReply => UnexpectedReply,
        UnrecognizedLimit => UnrecognizedLimit,
        MalformedReply => MalformedReply,
    }

    impl From<RouterError> {
        SerialDeviceInUseOrDisconnected => SerialDeviceInUseOrDisconnected,
        Io => Io,
        Timeout => Timeout,
        UnexpectedReply => UnexpectedReply,
        UnrecognizedLimit => UnrecognizedLimit,
        ReservedCharacter => ReservedCharacter,
    }
}
impl_is_timeout! { CommandError }
impl_from_serialport_error! { CommandError }

error_enum! {
    /// Any error returned by this library.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        SerialDeviceInUseOrDisconnected(SerialDeviceInUseOrDisconnectedError),
        Io(std::io::Error),
        Timeout(TimeoutError),
        UnexpectedReply(UnexpectedReplyError),
        UnrecognizedLimit(UnrecognizedLimitError),
        MalformedReply(MalformedReplyError),
        ReservedCharacter(ReservedCharacterError),
        Device(DeviceError),
        Busy(BusyError),
        LockPoisoned(LockPoisonedError),
        LockUnavailable(LockUnavailableError),
        MotionTimeout(MotionTimeoutError),
        UnknownAxis(UnknownAxisError),
        DuplicateAxis(DuplicateAxisError),
        Capture(CaptureError),
    }

    impl From<ScriptError> {
        UnknownAxis => UnknownAxis,
        DuplicateAxis => DuplicateAxis,
    }

    impl From<ProtocolError> {
        UnexpectedReply => UnexpectedReply,
        UnrecognizedLimit => UnrecognizedLimit,
        MalformedReply => MalformedReply,
    }

    impl From<LockError> {
        Poisoned => LockPoisoned,
        Unavailable => LockUnavailable,
    }

    impl From<RouterError> {
        SerialDeviceInUseOrDisconnected => SerialDeviceInUseOrDisconnected,
        Io => Io,
        Timeout => Timeout,
        UnexpectedReply => UnexpectedReply,
        UnrecognizedLimit => UnrecognizedLimit,
        ReservedCharacter => ReservedCharacter,
    }

    impl From<CommandError> {
        SerialDeviceInUseOrDisconnected => SerialDeviceInUseOrDisconnected,
        Io => Io,
        Timeout => Timeout,
        UnexpectedReply => UnexpectedReply,
        UnrecognizedLimit => UnrecognizedLimit,
        MalformedReply => MalformedReply,
        ReservedCharacter => ReservedCharacter,
        Device => Device,
        Busy => Busy,
        LockPoisoned => LockPoisoned,
        LockUnavailable => LockUnavailable,
    }
}
impl_is_timeout! { Error }
impl_from_serialport_error! { Error }

impl Error {
	/// Whether the error is a [`ProtocolError`], after which the link should be
	/// resynchronized before it is used again.
	pub fn is_protocol(&self) -> bool {
		matches!(
			self,
			Error::UnexpectedReply(_) | Error::UnrecognizedLimit(_) | Error::MalformedReply(_)
		)
	}
}
