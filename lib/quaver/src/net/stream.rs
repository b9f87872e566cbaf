//! Thin facade over a non-blocking mio socket. Everything above this module only sees bounded waits
//! and the `NetworkError` plumbing.
use crate::net::buffer::Buffer;
use crate::net::shared::{ErrorType, NetworkError, NetworkResult};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

const LINK_TOKEN: Token = Token(0);

/// A single TCP connection to an access point together with its private poll.
pub struct Link {
    stream: TcpStream,
    poll: Poll,
    events: Events,
    peer: SocketAddr,
}

impl Link {
    /// Starts a non-blocking connect. Completion is observed through `poll_connected`.
    pub fn connect(peer: SocketAddr) -> NetworkResult<Link> {
        let poll = Poll::new()?;
        let mut stream = TcpStream::connect(peer)?;

        poll.registry().register(
            &mut stream,
            LINK_TOKEN,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        Ok(Link {
            stream,
            poll,
            events: Events::with_capacity(16),
            peer,
        })
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Waits up to `slice` for the connect to finish. Returns false while it is still in progress.
    pub fn poll_connected(&mut self, slice: Duration) -> NetworkResult<bool> {
        self.poll_for(slice)?;

        if let Some(err) = self.stream.take_error()? {
            return Err(err.into());
        }

        match self.stream.peer_addr() {
            Ok(_) => Ok(true),
            Err(ref err) if err.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes the whole slice, waiting for the socket to drain until the deadline passes.
    pub fn write_all(&mut self, mut data: &[u8], deadline: Instant) -> NetworkResult<()> {
        while !data.is_empty() {
            match self.stream.write(data) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorType::Io(io::ErrorKind::WriteZero))),
                Ok(count) => data = &data[count..],
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => self.wait_until(deadline)?,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// Fills the whole slice, waiting for data until the deadline passes.
    pub fn read_exact(&mut self, buf: &mut [u8], deadline: Instant) -> NetworkResult<()> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(NetworkError::Fatal(ErrorType::Eof)),
                Ok(count) => filled += count,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => self.wait_until(deadline)?,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    /// Sends the buffered data, waiting for the socket to drain until the deadline passes.
    pub fn flush(&mut self, buffer: &mut Buffer, deadline: Instant) -> NetworkResult<()> {
        loop {
            buffer.egress(&mut self.stream)?;

            if buffer.is_empty() {
                return Ok(());
            }

            self.wait_until(deadline)?;
        }
    }

    /// Waits up to `timeout` for socket readiness. Returns true if the socket signalled anything.
    pub fn wait(&mut self, timeout: Duration) -> NetworkResult<bool> {
        self.poll_for(timeout)?;
        Ok(!self.events.is_empty())
    }

    /// Reads everything currently available into the buffer.
    #[inline]
    pub fn ingress(&mut self, buffer: &mut Buffer) -> NetworkResult<usize> {
        Ok(buffer.ingress(&mut self.stream)?)
    }

    /// Closes both directions. Errors are irrelevant at this point.
    pub fn shutdown(&mut self) {
        drop(self.poll.registry().deregister(&mut self.stream));
        drop(self.stream.shutdown(Shutdown::Both));
    }

    fn wait_until(&mut self, deadline: Instant) -> NetworkResult<()> {
        let now = Instant::now();

        if now >= deadline {
            return Err(NetworkError::Fatal(ErrorType::Timeout));
        }

        self.poll_for(deadline - now)
    }

    fn poll_for(&mut self, timeout: Duration) -> NetworkResult<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(_) => Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                self.events.clear();
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn connected_pair() -> (Link, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut link = Link::connect(listener.local_addr().unwrap()).unwrap();
        let (remote, _) = listener.accept().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !link.poll_connected(Duration::from_millis(50)).unwrap() {
            assert!(Instant::now() < deadline, "Connect did not complete");
        }

        (link, remote)
    }

    #[test]
    fn test_connect_and_exchange() {
        let (mut link, mut remote) = connected_pair();
        let deadline = Instant::now() + Duration::from_secs(3);

        link.write_all(b"hello", deadline).unwrap();

        let mut received = [0u8; 5];
        remote.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"hello");

        remote.write_all(b"world!").unwrap();

        let mut reply = [0u8; 6];
        link.read_exact(&mut reply, deadline).unwrap();
        assert_eq!(&reply, b"world!");
    }

    #[test]
    fn test_read_timeout() {
        let (mut link, _remote) = connected_pair();

        let mut buf = [0u8; 4];
        let result = link.read_exact(&mut buf, Instant::now() + Duration::from_millis(50));

        assert_eq!(result.err().unwrap(), NetworkError::Fatal(ErrorType::Timeout));
    }

    #[test]
    fn test_ingress_reports_eof() {
        let (mut link, mut remote) = connected_pair();

        remote.write_all(&[1, 2, 3]).unwrap();
        drop(remote);

        let mut buffer = Buffer::new(1024);
        let deadline = Instant::now() + Duration::from_secs(3);

        let result = loop {
            match link.ingress(&mut buffer) {
                Ok(_) => {
                    assert!(Instant::now() < deadline, "EOF was never reported");
                    link.wait(Duration::from_millis(20)).unwrap();
                }
                Err(err) => break err,
            };
        };

        assert_eq!(result, NetworkError::Fatal(ErrorType::Eof));
        assert_eq!(buffer.read_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_connect_refused() {
        // Grab a free port, then close the listener so nothing accepts on it
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let deadline = Instant::now() + Duration::from_secs(3);

        let result = match Link::connect(addr) {
            Ok(mut link) => loop {
                match link.poll_connected(Duration::from_millis(50)) {
                    Ok(false) if Instant::now() < deadline => continue,
                    other => break other,
                }
            },
            Err(err) => Err(err),
        };

        assert!(result.is_err());
    }
}
