//! Serial transport with a background receiver thread.
//!
//! The receiver owns a cloned port handle and the frame parser. Parsed
//! packets go through a bounded channel; if the caller stops draining it, new
//! packets are dropped after a short wait instead of piling up.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, SendTimeoutError, Sender, bounded};
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Framing, Packet, UartFramer, UsbFramer};
use crate::transport::Transport;

/// Capacity of the inbound packet queue.
pub const QUEUE_CAPACITY: usize = 64;

/// How long the receiver waits on a full queue before dropping a packet.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Read timeout of the receiver's port handle; bounds how long `close` waits.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 256;

/// Transport using the UART preamble/CRC framing.
pub type UartTransport = SerialInterface<UartFramer>;

/// Transport using the USB byte-stuffed framing.
pub type UsbTransport = SerialInterface<UsbFramer>;

/// A [`Transport`] binding one [`Framing`] to a [`Port`].
pub struct SerialInterface<F: Framing> {
    port: Box<dyn Port>,
    rx: Receiver<Packet>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    name: String,
    _framing: PhantomData<fn() -> F>,
}

impl<F: Framing> SerialInterface<F> {
    /// Start receiving on `port` with a fresh parser.
    pub fn new(port: Box<dyn Port>) -> Result<Self> {
        Self::with_framer(port, F::default())
    }

    /// Start receiving on `port` with a preconfigured parser.
    pub fn with_framer(mut port: Box<dyn Port>, framer: F) -> Result<Self> {
        port.clear_buffers()?;

        let mut reader_port = port.try_clone_port()?;
        reader_port.set_timeout(READ_POLL_INTERVAL)?;

        let name = port.name().to_string();
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));

        let reader = thread::Builder::new()
            .name(format!("{}-rx", F::NAME))
            .spawn({
                let stop = Arc::clone(&stop);
                let name = name.clone();
                move || receive_loop(reader_port, framer, &tx, &stop, &name)
            })?;

        debug!("Opened {} transport on {name}", F::NAME);

        Ok(Self {
            port,
            rx,
            stop,
            reader: Some(reader),
            name,
            _framing: PhantomData,
        })
    }
}

fn receive_loop<F: Framing>(
    mut port: Box<dyn Port>,
    mut framer: F,
    tx: &Sender<Packet>,
    stop: &AtomicBool,
    name: &str,
) {
    let mut buf = [0u8; READ_CHUNK];

    while !stop.load(Ordering::Relaxed) {
        let n = match port.read(&mut buf) {
            Ok(0) => {
                debug!("{name}: end of stream");
                break;
            },
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue;
            },
            Err(e) => {
                warn!("{name}: read failed, receiver stopping: {e}");
                break;
            },
        };
        trace!("{name}: RX {n} bytes: {:02X?}", &buf[..n]);

        for packet in framer.push(&buf[..n]) {
            match tx.send_timeout(packet, ENQUEUE_TIMEOUT) {
                Ok(()) => {},
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!("{name}: inbound queue full, dropping packet");
                },
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

impl<F: Framing> Transport for SerialInterface<F> {
    fn receive(&mut self, timeout: Duration) -> Option<Packet> {
        if timeout.is_zero() {
            self.rx.try_recv().ok()
        } else {
            self.rx.recv_timeout(timeout).ok()
        }
    }

    fn receive_all(&mut self, timeout: Duration) -> Vec<Packet> {
        let mut packets: Vec<Packet> = self.rx.try_iter().collect();
        if packets.is_empty() && !timeout.is_zero() {
            if let Ok(first) = self.rx.recv_timeout(timeout) {
                packets.push(first);
                packets.extend(self.rx.try_iter());
            }
        }
        packets
    }

    fn transmit(&mut self, packet: &Packet) -> Result<()> {
        if !self.is_open() {
            return Err(Error::PortClosed(self.name.clone()));
        }
        let frame = F::encode(packet)?;
        trace!("{}: TX {} bytes: {:02X?}", self.name, frame.len(), frame);
        self.port.write_all_bytes(&frame)
    }

    fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        if reader.join().is_err() {
            warn!("{}: receiver thread panicked", self.name);
        }
        debug!("Closed {} transport on {}", F::NAME, self.name);
        self.port.close()
    }

    fn is_open(&self) -> bool {
        self.reader.is_some() && self.port.is_open()
    }

    fn port_path(&self) -> &str {
        &self.name
    }
}

impl<F: Framing> Drop for SerialInterface<F> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("{}: error while closing: {e}", self.name);
        }
    }
}
