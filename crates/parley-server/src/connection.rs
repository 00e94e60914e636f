//! Connection lifecycle and TCP transport.
//!
//! Each accepted connection carries exactly one request/response exchange.
//! The accept loop runs on tokio; every accepted socket is turned into a
//! blocking [`TcpConnection`] with read/write timeouts and handed to the
//! timeline as one task. That task dispatches, flushes and always closes.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatch::{Dispatched, Dispatcher};
use crate::error::ServerError;
use crate::timeline::Timeline;

/// A duplex byte stream that can be closed.
pub trait Connection: Send {
    /// Borrow the read and write halves at once.
    fn split(&mut self) -> (&mut dyn Read, &mut dyn Write);

    fn close(&mut self) -> io::Result<()>;

    /// Peer description for logs.
    fn peer(&self) -> String;
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

pub struct TcpConnection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    peer: Option<SocketAddr>,
}

impl TcpConnection {
    /// Wrap a blocking stream, applying `io_timeout` to reads and writes.
    pub fn new(stream: TcpStream, io_timeout: Duration) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
            peer,
        })
    }

    /// Connect to `addr` as a client.
    pub fn connect(addr: &str, io_timeout: Duration) -> io::Result<Self> {
        Self::new(TcpStream::connect(addr)?, io_timeout)
    }
}

impl Connection for TcpConnection {
    fn split(&mut self) -> (&mut dyn Read, &mut dyn Write) {
        (&mut self.reader, &mut self.writer)
    }

    fn close(&mut self) -> io::Result<()> {
        let flushed = self.writer.flush();
        let shut = self.writer.get_ref().shutdown(Shutdown::Both);
        flushed?;
        match shut {
            // The peer may already have hung up.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer(&self) -> String {
        self.peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Serve one request on `conn`: dispatch, flush, then close regardless of
/// how dispatch went.
pub fn serve<S>(
    dispatcher: &Dispatcher<S>,
    state: &mut S,
    timeline: &Timeline<S>,
    conn: &mut dyn Connection,
) -> Result<Dispatched, ServerError> {
    let peer = conn.peer();
    let result = {
        let (input, output) = conn.split();
        dispatcher
            .dispatch(state, timeline, input, output)
            .and_then(|dispatched| {
                output.flush()?;
                Ok(dispatched)
            })
    };

    if let Err(e) = conn.close() {
        debug!(peer = %peer, error = %e, "error closing connection");
    }

    match &result {
        Ok(Dispatched::Handled(opcode, outcome)) => {
            debug!(peer = %peer, ?opcode, ?outcome, "request served")
        }
        Ok(Dispatched::Unknown(code)) => debug!(peer = %peer, code, "unknown opcode"),
        Err(e) => warn!(peer = %peer, error = %e, "connection failed"),
    }
    result
}

/// Queue `conn` to be served on the timeline.
pub fn submit<S: 'static>(
    timeline: &Timeline<S>,
    dispatcher: Arc<Dispatcher<S>>,
    mut conn: Box<dyn Connection>,
) -> Result<(), ServerError> {
    timeline.schedule_now(move |state, timeline| {
        // Failures are already logged by `serve`; the task itself succeeded.
        let _ = serve(&dispatcher, state, timeline, conn.as_mut());
        Ok(())
    })
}

/// Accept connections until the listener fails, submitting each one to the
/// timeline.
pub async fn accept_loop<S: 'static>(
    listener: tokio::net::TcpListener,
    timeline: Timeline<S>,
    dispatcher: Arc<Dispatcher<S>>,
    io_timeout: Duration,
) -> Result<(), ServerError> {
    info!(addr = %listener.local_addr()?, "accepting connections");

    loop {
        let (stream, peer) = listener.accept().await?;

        let conn = match stream
            .into_std()
            .and_then(|std_stream| TcpConnection::new(std_stream, io_timeout))
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to prepare connection");
                continue;
            }
        };

        if let Err(e) = submit(&timeline, Arc::clone(&dispatcher), Box::new(conn)) {
            warn!(peer = %peer, error = %e, "timeline stopped, no longer accepting");
            return Err(e);
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory connection (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod memory {
    use std::io::Cursor;

    use super::*;

    /// Pre-loaded request bytes in, captured response bytes out.
    pub struct MemoryConnection {
        pub input: Cursor<Vec<u8>>,
        pub output: Vec<u8>,
        pub closed: bool,
    }

    impl MemoryConnection {
        pub fn new(request: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(request),
                output: Vec::new(),
                closed: false,
            }
        }
    }

    impl Connection for MemoryConnection {
        fn split(&mut self) -> (&mut dyn Read, &mut dyn Write) {
            (&mut self.input, &mut self.output)
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn peer(&self) -> String {
            "memory".to_string()
        }
    }
}
