//! A client library for driving a multi-axis stepper rig (plus a camera
//! trigger) over a line-oriented ASCII protocol.
//!
//! The protocol is half-duplex for synchronous exchanges: every command gets
//! exactly one `ACK ...` or `ERROR ...` reply. Motion commands complete later,
//! out of band, with a `NOTICE DONE <axis>` message that can arrive at any
//! time, including in the middle of another command's exchange.
//!
//! The pieces, leaf first:
//!
//! * [`framer`]: turns a byte stream into complete lines.
//! * [`message`]: classifies a line as an Ack, Error, Notice or unrecognized.
//! * [`router`]: correlates replies with the command that caused them and
//!   buffers notices until an axis claims them.
//! * [`axis`]: a Busy/Ready state machine for a single axis.
//! * [`rig`]: a handle on the whole controller that hands out axes.
//! * [`sequencer`]: runs a script of moves and snapshots with barrier waits.
//!
//! ## Example
//!
//! ```no_run
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! use steprig::{rig::Rig, router::Router};
//!
//! let router = Router::open_serial("/dev/ttyUSB0")?;
//! let mut rig = Rig::new(router, 4);
//! let mut axis = rig.axis(2).expect("axis 2 exists");
//! axis.move_absolute(100)?;
//! while !axis.poll_done()? {
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! assert_eq!(axis.read_position()?, 100);
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod axis;
pub mod backend;
pub mod capture;
pub mod error;
pub mod framer;
pub mod message;
pub mod rig;
pub mod router;
pub mod sequencer;
pub mod shared;
pub mod timeout_guard;

pub use message::{classify, AxisId, Kind, Message};
