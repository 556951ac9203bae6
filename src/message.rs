//! Classifying framed lines into protocol messages.

use crate::error::DeviceError;

/// The identifier of an axis on the rig controller.
pub type AxisId = u32;

/// The prefix of a synchronous success reply.
const ACK_PREFIX: &str = "ACK ";
/// The prefix of a synchronous failure reply.
const ERROR_PREFIX: &str = "ERROR ";
/// The prefix of an asynchronous, axis-scoped event.
const NOTICE_PREFIX: &str = "NOTICE ";

/// The kind of a [`Message`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
	/// A synchronous success reply to the most recently sent command.
	Ack,
	/// A synchronous failure reply to the most recently sent command.
	Error,
	/// An asynchronous event, such as an axis finishing a move.
	Notice,
	/// A line that does not follow the protocol.
	Unrecognized,
}

impl Kind {
	/// Whether this kind is a synchronous reply (an Ack or an Error).
	pub fn is_reply(self) -> bool {
		matches!(self, Kind::Ack | Kind::Error)
	}
}

/// A classified line received from the controller.
///
/// Messages are produced by [`classify`] and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
	kind: Kind,
	axis: Option<AxisId>,
	payload: String,
}

impl Message {
	/// The kind of message.
	pub fn kind(&self) -> Kind {
		self.kind
	}
	/// The axis a Notice refers to, if it names one.
	///
	/// This is only ever set for [`Kind::Notice`] messages.
	pub fn axis(&self) -> Option<AxisId> {
		self.axis
	}
	/// The text after the kind prefix.
	///
	/// For [`Kind::Unrecognized`] messages this is the whole line.
	pub fn payload(&self) -> &str {
		self.payload.as_str()
	}
	/// Consume the message and return its payload.
	pub fn into_payload(self) -> String {
		self.payload
	}

	/// Return the message if it is an Ack, or the device's error otherwise.
	///
	/// This is meant for replies: a Notice or unrecognized message is also
	/// reported as a [`DeviceError`] carrying the full line.
	pub fn check_ack(self) -> Result<Message, DeviceError> {
		match self.kind {
			Kind::Ack => Ok(self),
			Kind::Error => Err(DeviceError::new(self.payload)),
			_ => Err(DeviceError::new(self.to_string())),
		}
	}

	/// For an Ack that echoes the command it acknowledges, return the text
	/// after the echoed `command`, trimmed.
	///
	/// Returns `None` if this is not an Ack or the payload does not start
	/// with `command` followed by a space or the end of the payload.
	///
	/// ```
	/// # use steprig::classify;
	/// let reply = classify("ACK GET POS 2 100");
	/// assert_eq!(reply.reply_value("GET POS 2"), Some("100"));
	/// assert_eq!(reply.reply_value("GET POS 1"), None);
	/// ```
	pub fn reply_value(&self, command: &str) -> Option<&str> {
		if self.kind != Kind::Ack {
			return None;
		}
		let rest = self.payload.strip_prefix(command)?;
		if rest.is_empty() {
			Some(rest)
		} else if rest.starts_with(' ') {
			Some(rest.trim())
		} else {
			None
		}
	}
}

impl std::fmt::Display for Message {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.kind {
			Kind::Ack => write!(f, "{ACK_PREFIX}{}", self.payload),
			Kind::Error => write!(f, "{ERROR_PREFIX}{}", self.payload),
			Kind::Notice => write!(f, "{NOTICE_PREFIX}{}", self.payload),
			Kind::Unrecognized => f.write_str(&self.payload),
		}
	}
}

/// Classify a complete line (without its terminator) as a [`Message`].
///
/// The rules are evaluated in order:
///
/// 1. `ACK <payload>` is an [`Kind::Ack`].
/// 2. `ERROR <payload>` is an [`Kind::Error`].
/// 3. `NOTICE <payload>` is a [`Kind::Notice`]. If the second
///    whitespace-delimited token of the payload is a non-negative integer it
///    is the notice's axis (`NOTICE DONE 2` refers to axis 2).
/// 4. Anything else is [`Kind::Unrecognized`].
///
/// Classification is pure: it never touches any shared state.
pub fn classify(line: &str) -> Message {
	if let Some(payload) = line.strip_prefix(ACK_PREFIX) {
		Message {
			kind: Kind::Ack,
			axis: None,
			payload: payload.to_string(),
		}
	} else if let Some(payload) = line.strip_prefix(ERROR_PREFIX) {
		Message {
			kind: Kind::Error,
			axis: None,
			payload: payload.to_string(),
		}
	} else if let Some(payload) = line.strip_prefix(NOTICE_PREFIX) {
		Message {
			kind: Kind::Notice,
			axis: payload
				.split_whitespace()
				.nth(1)
				.and_then(|token| token.parse().ok()),
			payload: payload.to_string(),
		}
	} else {
		Message {
			kind: Kind::Unrecognized,
			axis: None,
			payload: line.to_string(),
		}
	}
}
