//! Types defining the different options when opening a router.

use super::Router;
use crate::{
    backend::{Backend, Serial},
    error::RouterError,
    framer::LINE_FEED,
};
use serialport as sp;
use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

/// The shortest backend read timeout a router uses. Some backends reject a
/// zero read timeout.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Protocol timeouts and limits used by a [`Router`].
///
/// ## Example
///
/// ```no_run
/// # use steprig::router::RouterOptions;
/// # use std::{net::TcpStream, time::Duration};
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = TcpStream::connect("192.168.0.1:4000")?;
/// let router = RouterOptions::new()
///     .reply_timeout(Duration::from_secs(2))
///     .unrecognized_limit(0)
///     .build(stream);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// How long to wait for a command's reply.
    pub(super) reply_timeout: Duration,
    /// The backend read timeout while waiting for a reply.
    pub(super) read_interval: Duration,
    /// The backend read timeout while draining for notices.
    pub(super) drain_timeout: Duration,
    /// How many unrecognized lines to skip while waiting for a reply.
    pub(super) unrecognized_limit: usize,
    /// How long to wait for `ACK ALIVE` when resynchronizing.
    pub(super) resync_timeout: Duration,
    /// The byte that ends every line.
    pub(super) terminator: u8,
}

impl RouterOptions {
    /// Create the default set of options ready for configuration.
    ///
    /// Replies are awaited for 15 seconds, read in 50 ms slices. Draining for
    /// notices reads with a 1 ms timeout. Up to 8 unrecognized lines are
    /// skipped per reply and a resync waits 10 seconds for `ACK ALIVE`. Lines
    /// end with a line feed.
    ///
    /// Equivalent to [`default`](RouterOptions::default).
    pub fn new() -> Self {
        RouterOptions {
            reply_timeout: Duration::from_secs(15),
            read_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_millis(1),
            unrecognized_limit: 8,
            resync_timeout: Duration::from_secs(10),
            terminator: LINE_FEED,
        }
    }

    /// Set how long [`Router::send_command`] waits for a reply.
    pub fn reply_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set the backend read timeout used while waiting for a reply.
    ///
    /// This is the granularity of the reply timeout. Values below
    /// [`MIN_READ_TIMEOUT`] are raised to it.
    pub fn read_interval(&mut self, interval: Duration) -> &mut Self {
        self.read_interval = interval.max(MIN_READ_TIMEOUT);
        self
    }

    /// Set how long [`Router::claim_notice`] reads, which is also its
    /// backend read timeout.
    ///
    /// Values below [`MIN_READ_TIMEOUT`] are raised to it.
    pub fn drain_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.drain_timeout = timeout.max(MIN_READ_TIMEOUT);
        self
    }

    /// Set how many unrecognized lines are skipped while waiting for a reply
    /// before giving up with an
    /// [`UnrecognizedLimitError`](crate::error::UnrecognizedLimitError).
    pub fn unrecognized_limit(&mut self, limit: usize) -> &mut Self {
        self.unrecognized_limit = limit;
        self
    }

    /// Set how long [`Router::resync`] waits for `ACK ALIVE`.
    pub fn resync_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.resync_timeout = timeout;
        self
    }

    /// Set the byte that ends every line.
    pub fn terminator(&mut self, terminator: u8) -> &mut Self {
        self.terminator = terminator;
        self
    }

    /// Get the configured reply timeout.
    pub fn get_reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Get the configured backend read timeout while waiting for a reply.
    pub fn get_read_interval(&self) -> Duration {
        self.read_interval
    }

    /// Get the configured drain timeout.
    pub fn get_drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Get the configured limit of unrecognized lines per reply.
    pub fn get_unrecognized_limit(&self) -> usize {
        self.unrecognized_limit
    }

    /// Create a [`Router`] around `backend` with these options.
    pub fn build<B: Backend>(&self, backend: B) -> Router<B> {
        Router::with_options(backend, self.clone())
    }
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions::new()
    }
}

/// Options for configuring and opening a serial port.
///
/// ## Example
///
/// ```rust
/// # use steprig::router::OpenSerialOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut router = OpenSerialOptions::new()
///     .timeout(Some(Duration::from_millis(50)))
///     .open("/dev/ttyUSB0")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenSerialOptions {
    /// The custom baud rate
    baud_rate: u32,
    /// The custom timeout
    timeout: Option<Duration>,
    /// The options of the router wrapping the port.
    router: RouterOptions,
}

impl OpenSerialOptions {
    /// The default baud rate of the rig controller: 9,600.
    pub const DEFAULT_BAUD_RATE: u32 = 9_600;

    /// Create a blank set of options ready for configuration.
    ///
    /// The default baud rate and read timeout are 9,600 and 3 seconds,
    /// respectively. The port is always opened as 8N1 without flow control.
    ///
    /// Equivalent to [`default`](OpenSerialOptions::default).
    pub fn new() -> Self {
        OpenSerialOptions {
            baud_rate: OpenSerialOptions::DEFAULT_BAUD_RATE,
            timeout: Some(Duration::from_secs(3)),
            router: RouterOptions::default(),
        }
    }

    /// Set a custom baud rate.
    ///
    /// The default is 9,600.
    pub fn baud_rate(&mut self, baud_rate: u32) -> &mut Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set a custom read timeout.
    ///
    /// If duration is `None`, reads will block indefinitely. The default is 3 seconds.
    pub fn timeout(&mut self, duration: Option<Duration>) -> &mut Self {
        self.timeout = duration;
        self
    }

    /// Set the options of the router wrapping the port.
    pub fn router_options(&mut self, options: RouterOptions) -> &mut Self {
        self.router = options;
        self
    }

    /// Open a [`Serial`] port configured for the rig controller at the specified path.
    fn open_serial_port(&self, path: &str) -> Result<Serial, RouterError> {
        // The baud rate passed to `new` can be ignored on some platforms, so
        // it is set again with the `baud_rate` method below.
        sp::new(path, OpenSerialOptions::DEFAULT_BAUD_RATE)
            .data_bits(sp::DataBits::Eight)
            .parity(sp::Parity::None)
            .flow_control(sp::FlowControl::None)
            .stop_bits(sp::StopBits::One)
            // The serialport API does not support infinite timeouts.
            .timeout(self.timeout.unwrap_or(Duration::MAX))
            .baud_rate(self.baud_rate)
            .open_native()
            .map(Serial)
            .map_err(Into::into)
    }

    /// Open the port at the specified path with the custom options.
    pub fn open(&self, path: &str) -> Result<Router<Serial>, RouterError> {
        log::info!("opening {path} at {} baud", self.baud_rate);
        Ok(self.router.build(self.open_serial_port(path)?))
    }

    /// Open the port at the specified path with the custom options.
    ///
    /// The type of the underlying backend is erased via dynamic dispatch,
    /// which does have runtime overhead. [`OpenSerialOptions::open`] should
    /// generally be used instead, except when the type of the underlying
    /// backend may not be known at compile time.
    pub fn open_dyn(&self, path: &str) -> Result<Router<Box<dyn Backend + Send>>, RouterError> {
        log::info!("opening {path} at {} baud", self.baud_rate);
        Ok(self.router.build(Box::new(self.open_serial_port(path)?)))
    }
}

impl Default for OpenSerialOptions {
    fn default() -> Self {
        OpenSerialOptions::new()
    }
}

/// Options for configuring and opening a connection to a controller behind a
/// serial-to-TCP bridge.
///
/// ## Example
///
/// ```rust
/// # use steprig::router::OpenTcpOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
/// let mut router = OpenTcpOptions::new()
///     .timeout(Some(Duration::from_millis(50)))
///     .open("192.168.0.1:4000")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OpenTcpOptions {
    /// The custom timeout
    timeout: Option<Duration>,
    /// The options of the router wrapping the stream.
    router: RouterOptions,
}

impl OpenTcpOptions {
    /// Create a blank set of options ready for configuration.
    ///
    /// The default read timeout is 3 seconds.
    ///
    /// Equivalent to [`default`](OpenTcpOptions::default).
    pub fn new() -> Self {
        OpenTcpOptions {
            timeout: Some(Duration::from_secs(3)),
            router: RouterOptions::default(),
        }
    }

    /// Set a custom read timeout.
    ///
    /// If duration is `None`, reads will block indefinitely. The default is 3 seconds.
    pub fn timeout(&mut self, duration: Option<Duration>) -> &mut Self {
        self.timeout = duration;
        self
    }

    /// Set the options of the router wrapping the stream.
    pub fn router_options(&mut self, options: RouterOptions) -> &mut Self {
        self.router = options;
        self
    }

    /// Open a [`TcpStream`] at the specified address.
    fn open_tcp_stream<A: ToSocketAddrs>(&self, address: A) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(address)?;
        stream.set_read_timeout(self.timeout)?;
        Ok(stream)
    }

    /// Connect to the specified address with the custom options.
    pub fn open<A: ToSocketAddrs>(&self, address: A) -> io::Result<Router<TcpStream>> {
        Ok(self.router.build(self.open_tcp_stream(address)?))
    }

    /// Connect to the specified address with the custom options.
    ///
    /// The type of the underlying backend is erased via dynamic dispatch,
    /// which does have runtime overhead. [`OpenTcpOptions::open`] should
    /// generally be used instead, except when the type of the underlying
    /// backend may not be known at compile time.
    pub fn open_dyn<A: ToSocketAddrs>(
        &self,
        address: A,
    ) -> io::Result<Router<Box<dyn Backend + Send>>> {
        Ok(self.router.build(Box::new(self.open_tcp_stream(address)?)))
    }
}

impl Default for OpenTcpOptions {
    fn default() -> Self {
        OpenTcpOptions::new()
    }
}
