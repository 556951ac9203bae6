use std::{
	io,
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use crate::{
	backend::{Backend, Mock},
	error::*,
	message::Kind,
	router::{Direction, Router, RouterOptions, MIN_READ_TIMEOUT},
};

/// Generate code to check which error `send_command` reports for different
/// controller output.
///
/// The syntax is `<router>, <case>...` where each `<case>` is
/// `<bytes_to_append> => <expected_error_type>,`.
macro_rules! check_errors {
    ($router:ident, $($response_bytes:literal => $err_type:ident,)+) => {
        $(
            // Make sure there is nothing left over from other cases
            $router.backend_mut().clear_buffer();
            $router.framer.reset();
            $router.backend_mut().append_data($response_bytes);
            match $router.send_command("ALIVE") {
                Err(e) => {
                    if let Err(e) = $err_type::try_from(e) {
                        panic!("unexpected error when reading {}:\n\texpected:\t{}\n\tgot:\t\t{}\n\t\t\t{:?}\n",
                            stringify!($response_bytes),
                            stringify!($err_type),
                            e,
                            e);
                    }
                }
                Ok(m) => panic!("unexpected Ok({m}) when reading {}", stringify!($response_bytes)),
            }
        )+
    };
}

/// A controller that repeats `line` forever, one read per millisecond.
struct Chatter {
	line: &'static [u8],
	offset: usize,
}

impl Chatter {
	fn new(line: &'static str) -> Self {
		Chatter {
			line: line.as_bytes(),
			offset: 0,
		}
	}
}

impl io::Read for Chatter {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		std::thread::sleep(Duration::from_millis(1));
		let n = buf.len().min(self.line.len() - self.offset);
		buf[..n].copy_from_slice(&self.line[self.offset..self.offset + n]);
		self.offset = (self.offset + n) % self.line.len();
		Ok(n)
	}
}

impl io::Write for Chatter {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		Ok(buf.len())
	}
	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl Backend for Chatter {
	fn set_read_timeout(&mut self, _: Option<Duration>) -> Result<(), io::Error> {
		Ok(())
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(None)
	}
	fn name(&self) -> Option<String> {
		Some("<chatter>".to_string())
	}
}

fn quick_router() -> Router<Mock> {
	RouterOptions::new()
		.reply_timeout(Duration::from_millis(20))
		.unrecognized_limit(2)
		.build(Mock::new())
}

#[test]
fn send_command_returns_the_ack() {
	let mut router = Router::new(Mock::new());
	router.backend_mut().append_data("ACK GO 2 100 5000\n");
	let reply = router.send_command("GO 2 100 5000").unwrap();
	assert_eq!(reply.kind(), Kind::Ack);
	assert_eq!(reply.payload(), "GO 2 100 5000");
	assert_eq!(router.backend().written(), b"GO 2 100 5000\n");
}

#[test]
fn send_command_returns_the_error_reply() {
	let mut router = Router::new(Mock::new());
	router.backend_mut().append_data("ERROR axis out of range\n");
	let reply = router.send_command("GO 9 0 0").unwrap();
	assert_eq!(reply.kind(), Kind::Error);
	let err = reply.check_ack().unwrap_err();
	assert_eq!(err.text(), "axis out of range");
}

#[test]
fn notices_while_waiting_are_queued_not_returned() {
	let mut router = Router::new(Mock::new());
	router
		.backend_mut()
		.append_data("NOTICE DONE 1\nNOTICE DONE 3\nACK GET POS 2 100\n");
	let reply = router.send_command("GET POS 2").unwrap();
	assert_eq!(reply.reply_value("GET POS 2"), Some("100"));
	let axes: Vec<_> = router.notices().map(|n| n.axis()).collect();
	assert_eq!(axes, vec![Some(1), Some(3)]);
}

#[test]
fn replies_are_assembled_from_partial_reads() {
	let mut router = Router::new(Mock::new());
	router.backend_mut().set_chunk_size(Some(1));
	router.backend_mut().append_data("ACK STATE READY\r\n");
	let reply = router.send_command("STATE").unwrap();
	assert_eq!(reply.payload(), "STATE READY");
}

#[test]
fn send_command_errors() {
	let mut router = quick_router();
	check_errors! { router,
		"" => TimeoutError,
		"NOTICE DONE 1\n" => TimeoutError,
		"junk\njunk\njunk\nACK ALIVE\n" => UnrecognizedLimitError,
	};
}

#[test]
fn reply_timeout_holds_while_notices_stream() {
	let mut router = RouterOptions::new()
		.reply_timeout(Duration::from_millis(20))
		.build(Chatter::new("NOTICE DONE 1\n"));
	let start = Instant::now();
	let err = router.send_command("STATE").unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
	assert!(start.elapsed() < Duration::from_millis(250), "{:?}", start.elapsed());
	assert!(router.notices().count() > 0);
}

#[test]
fn reply_timeout_holds_while_garbage_streams() {
	let mut router = RouterOptions::new()
		.reply_timeout(Duration::from_millis(20))
		.build(Chatter::new("xxxxxxxx"));
	let start = Instant::now();
	let err = router.send_command("STATE").unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
	assert!(start.elapsed() < Duration::from_millis(250), "{:?}", start.elapsed());
}

#[test]
fn unrecognized_lines_under_the_limit_are_skipped() {
	let mut router = quick_router();
	router.backend_mut().append_data("junk\n\nACK ALIVE\n");
	let reply = router.send_command("ALIVE").unwrap();
	assert_eq!(reply.payload(), "ALIVE");
}

#[test]
fn timeout_names_the_command() {
	let mut router = quick_router();
	let err = router.send_command("HOME 1").unwrap_err();
	assert!(err.is_timeout());
	match err {
		RouterError::Timeout(e) => {
			assert_eq!(e.command(), Some("HOME 1"));
			assert_eq!(e.waited(), Duration::from_millis(20));
		}
		other => panic!("unexpected error {other:?}"),
	}
}

#[test]
fn reserved_character_is_rejected_before_writing() {
	let mut router = Router::new(Mock::new());
	let err = router.send_command("GO 1 0 0\nGO 2 0 0").unwrap_err();
	assert!(matches!(err, RouterError::ReservedCharacter(_)), "{err:?}");
	assert!(router.backend().written().is_empty());
}

#[test]
fn io_errors_are_reported() {
	let mut router = Router::new(Mock::new());
	router
		.backend_mut()
		.write_error(Some(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged")));
	let err = router.send_command("ALIVE").unwrap_err();
	assert!(matches!(err, RouterError::Io(_)), "{err:?}");
}

#[test]
fn claim_notice_returns_the_oldest_for_the_axis() {
	let mut router = Router::new(Mock::new());
	router
		.backend_mut()
		.append_data("NOTICE DONE 1\nNOTICE DONE 2\nNOTICE HOMED 1\n");
	let first = router.claim_notice(1).unwrap().unwrap();
	assert_eq!(first.payload(), "DONE 1");
	let second = router.claim_notice(1).unwrap().unwrap();
	assert_eq!(second.payload(), "HOMED 1");
	assert_eq!(router.claim_notice(1).unwrap(), None);
	// Other axes' notices are untouched.
	assert_eq!(router.notices().count(), 1);
	assert_eq!(router.claim_notice(2).unwrap().unwrap().payload(), "DONE 2");
}

#[test]
fn claim_notice_does_not_block() {
	let mut router = Router::new(Mock::new());
	assert_eq!(router.claim_notice(0).unwrap(), None);
	router.backend_mut().append_data("NOTICE DO");
	assert_eq!(router.claim_notice(0).unwrap(), None);
	router.backend_mut().append_data("NE 0\n");
	assert!(router.claim_notice(0).unwrap().is_some());
}

#[test]
fn claim_notice_returns_while_notices_stream() {
	let mut router = RouterOptions::new()
		.drain_timeout(Duration::from_millis(5))
		.build(Chatter::new("NOTICE DONE 1\n"));
	let start = Instant::now();
	assert_eq!(router.claim_notice(0).unwrap(), None);
	assert!(start.elapsed() < Duration::from_millis(250), "{:?}", start.elapsed());
	assert!(router.notices().count() < 50);
}

#[test]
fn discard_notices_only_touches_the_axis() {
	let mut router = Router::new(Mock::new());
	router
		.backend_mut()
		.append_data("NOTICE DONE 0\nNOTICE DONE 1\nNOTICE HOMED 0\nACK ALIVE\n");
	router.send_command("ALIVE").unwrap();
	assert_eq!(router.discard_notices(0), 2);
	assert_eq!(router.discard_notices(0), 0);
	let axes: Vec<_> = router.notices().map(|n| n.axis()).collect();
	assert_eq!(axes, vec![Some(1)]);
}

#[test]
fn zero_read_timeouts_are_raised() {
	let router = RouterOptions::new()
		.read_interval(Duration::ZERO)
		.drain_timeout(Duration::ZERO)
		.build(Mock::new());
	assert_eq!(router.options().get_read_interval(), MIN_READ_TIMEOUT);
	assert_eq!(router.options().get_drain_timeout(), MIN_READ_TIMEOUT);
}

#[test]
fn claim_notice_reports_stray_replies() {
	let mut router = Router::new(Mock::new());
	router
		.backend_mut()
		.append_data("NOTICE DONE 0\nACK ALIVE\nNOTICE DONE 1\n");
	let err = router.claim_notice(1).unwrap_err();
	match err {
		RouterError::UnexpectedReply(e) => assert_eq!(e.as_ref().payload(), "ALIVE"),
		other => panic!("unexpected error {other:?}"),
	}
	// Lines before the stray reply were routed, lines after it are still
	// available.
	assert_eq!(router.notices().count(), 1);
	assert_eq!(router.claim_notice(1).unwrap().unwrap().payload(), "DONE 1");
	assert_eq!(router.claim_notice(0).unwrap().unwrap().payload(), "DONE 0");
}

#[test]
fn resync_discards_until_ack_alive() {
	let mut router = Router::new(Mock::new());
	router.framer.push(b"ACK GO 1 5");
	router
		.backend_mut()
		.append_data("ERROR unknown command\nNOTICE DONE 3\nACK STATE READY\nACK ALIVE\n");
	let discarded = router.resync().unwrap();
	assert_eq!(discarded, 2);
	assert!(router.framer.pending().is_empty());
	assert_eq!(router.backend().written_lines(), vec!["", "ALIVE"]);
	assert_eq!(router.claim_notice(3).unwrap().unwrap().payload(), "DONE 3");
}

#[test]
fn resync_times_out() {
	let mut router = RouterOptions::new()
		.resync_timeout(Duration::from_millis(10))
		.build(Mock::new());
	router.backend_mut().append_data("ERROR unknown command\n");
	let err = router.resync().unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
}

#[test]
fn resync_timeout_holds_while_notices_stream() {
	let mut router = RouterOptions::new()
		.resync_timeout(Duration::from_millis(20))
		.build(Chatter::new("NOTICE DONE 1\n"));
	let start = Instant::now();
	let err = router.resync().unwrap_err();
	assert!(err.is_timeout(), "{err:?}");
	assert!(start.elapsed() < Duration::from_millis(250), "{:?}", start.elapsed());
}

#[test]
fn line_handler_sees_traffic_in_order() {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let mut router = Router::new(Mock::new());
	{
		let seen = seen.clone();
		router.set_line_handler(move |line, dir| {
			seen.lock().unwrap().push((line.to_string(), dir));
		});
	}
	router.backend_mut().set_responder(|line| match line {
		"STATE" => Some("NOTICE DONE 0\nACK STATE READY\n".to_string()),
		_ => None,
	});
	router.send_command("STATE").unwrap();
	assert_eq!(
		*seen.lock().unwrap(),
		vec![
			("STATE".to_string(), Direction::Tx),
			("NOTICE DONE 0".to_string(), Direction::Recv),
			("ACK STATE READY".to_string(), Direction::Recv),
		]
	);
	assert!(router.clear_line_handler().is_some());
	assert!(router.clear_line_handler().is_none());
}

#[test]
fn take_notices_empties_the_queue() {
	let mut router = Router::new(Mock::new());
	router.backend_mut().append_data("NOTICE READY\nACK ALIVE\n");
	router.send_command("ALIVE").unwrap();
	let notices = router.take_notices();
	assert_eq!(notices.len(), 1);
	assert_eq!(notices[0].axis(), None);
	assert_eq!(router.notices().count(), 0);
}
