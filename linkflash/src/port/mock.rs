//! In-memory [`Port`] for tests.
//!
//! Cloned handles share the same inbound/outbound buffers, like two file
//! descriptors on one tty. With `echo` set, every written byte is looped back
//! into the inbound side, which is what an echoing device looks like to the
//! parsers.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

pub(crate) struct MockPort {
    name: String,
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
    open: Arc<AtomicBool>,
    echo: bool,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inbound: Arc::default(),
            outbound: Arc::default(),
            open: Arc::new(AtomicBool::new(true)),
            echo: false,
            timeout: Duration::from_millis(5),
        }
    }

    pub(crate) fn echoing(name: &str) -> Self {
        Self {
            echo: true,
            ..Self::new(name)
        }
    }

    /// Handle for the test body to inspect the line after the port moved.
    pub(crate) fn handle(&self) -> Self {
        Self {
            name: self.name.clone(),
            inbound: Arc::clone(&self.inbound),
            outbound: Arc::clone(&self.outbound),
            open: Arc::clone(&self.open),
            echo: self.echo,
            timeout: self.timeout,
        }
    }

    /// Bytes "sent by the device".
    pub(crate) fn feed(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes);
    }

    /// Everything written by the host so far.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.outbound.lock().unwrap().clone()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ));
        }
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.is_empty() {
            drop(inbound);
            thread::sleep(self.timeout);
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(inbound.len());
        for b in buf.iter_mut().take(n) {
            *b = inbound.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "port closed",
            ));
        }
        self.outbound.lock().unwrap().extend_from_slice(buf);
        if self.echo {
            self.inbound.lock().unwrap().extend(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.inbound.lock().unwrap().clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(self.handle()))
    }

    fn close(&mut self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
