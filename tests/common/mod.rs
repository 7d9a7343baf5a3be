#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use smol::net::TcpListener;

/// Collects everything a component prints.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Refuses any write containing `needle`, otherwise behaves like
/// [`SharedBuffer`].
#[derive(Clone)]
pub struct RefusingWriter {
    pub needle: &'static str,
    pub inner: SharedBuffer,
}

impl Write for RefusingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if String::from_utf8_lossy(buf).contains(self.needle) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn bind(scheme: &str, path: &str) -> (TcpListener, String) {
    let listener = smol::block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
    let url = format!("{scheme}://{}{path}", listener.local_addr().unwrap());
    (listener, url)
}
