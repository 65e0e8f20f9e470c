use std::{
    fs::File,
    io::{self, BufRead, BufReader, ErrorKind},
    path::Path,
};

use crate::error::TransportError;

/// Line-oriented device link. Port settings (baud rate, parity, read
/// timeout) belong to whatever sits behind it.
pub trait LineTransport {
    /// Next line without its terminator, `Ok(None)` at end of stream.
    fn read_line(&mut self) -> Result<Option<String>, TransportError>;
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        (**self).read_line()
    }
}

/// Adapts any buffered reader, such as a tty device node or a pipe.
pub struct ReaderTransport<R: BufRead> {
    reader: R,
    buf: String,
}

impl<R: BufRead> ReaderTransport<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> LineTransport for ReaderTransport<R> {
    /// A line cut short by a timeout stays buffered and is completed by the
    /// next call.
    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.reader.read_line(&mut self.buf) {
            Ok(0) if self.buf.is_empty() => Ok(None),
            Ok(_) => {
                let line = self.buf.trim_end_matches(['\r', '\n']).to_string();
                self.buf.clear();
                Ok(Some(line))
            }
            Err(err) => {
                let err = classify_io_error(err);
                if err != TransportError::Timeout {
                    self.buf.clear();
                }
                Err(err)
            }
        }
    }
}

fn classify_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            TransportError::Timeout
        }
        ErrorKind::InvalidData => TransportError::Garbled(err.to_string()),
        _ => TransportError::Failed(err.to_string()),
    }
}

pub type DeviceTransport = ReaderTransport<Box<dyn BufRead + Send>>;

/// Open a device node (or `-` for stdin) for line reads.
pub fn open_device(device: &str) -> io::Result<DeviceTransport> {
    let reader: Box<dyn BufRead + Send> = if device == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(Path::new(device))?;
        Box::new(BufReader::new(file))
    };
    Ok(ReaderTransport::new(reader))
}
