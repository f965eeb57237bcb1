//! Connected daemon socket.
//!
//! Wraps a Unix-domain or TCP stream behind one `Read`/`Write` type and adds
//! the two socket-level operations the protocol needs beyond plain bytes: a
//! zero-timeout readiness probe and `SCM_RIGHTS` descriptor passing.

#![allow(unsafe_code)]

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::endpoint::Endpoint;

/// An open connection to the daemon.
///
/// Owned by exactly one scan call; dropping it closes the socket.
#[derive(Debug)]
pub struct Connection {
    /// Underlying socket.
    stream: Stream,
    /// Endpoint the socket is connected to.
    endpoint: Endpoint,
}

/// Socket flavours.
#[derive(Debug)]
enum Stream {
    /// Unix-domain stream socket.
    #[cfg(unix)]
    Unix(UnixStream),
    /// TCP stream.
    Tcp(TcpStream),
}

impl Connection {
    /// Wraps a connected Unix-domain socket.
    #[cfg(unix)]
    pub(crate) const fn unix(stream: UnixStream, endpoint: Endpoint) -> Self {
        Self {
            stream: Stream::Unix(stream),
            endpoint,
        }
    }

    /// Wraps a connected TCP socket.
    pub(crate) const fn tcp(stream: TcpStream, endpoint: Endpoint) -> Self {
        Self {
            stream: Stream::Tcp(stream),
            endpoint,
        }
    }

    /// Endpoint this connection was opened to.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns `true` if descriptors can be passed over this connection.
    pub const fn can_pass_fd(&self) -> bool {
        match self.stream {
            #[cfg(unix)]
            Stream::Unix(_) => true,
            Stream::Tcp(_) => false,
        }
    }

    /// Closes the sending direction, telling the daemon no more data follows.
    pub fn shutdown_write(&self) -> io::Result<()> {
        match &self.stream {
            #[cfg(unix)]
            Stream::Unix(s) => s.shutdown(Shutdown::Write),
            Stream::Tcp(s) => s.shutdown(Shutdown::Write),
        }
    }

    /// Returns `true` if a read would not block right now.
    ///
    /// Polls with a zero timeout: this never waits for data. Hang-ups and
    /// socket errors also count as readable so the next read reports them.
    #[cfg(unix)]
    pub fn readable_now(&self) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        loop {
            // SAFETY: pfd is a valid pollfd for an open socket; timeout 0 never blocks.
            let ret = unsafe { libc::poll(&raw mut pfd, 1, 0) };
            if ret >= 0 {
                let ready = libc::POLLIN | libc::POLLHUP | libc::POLLERR;
                return Ok(ret > 0 && (pfd.revents & ready) != 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Without `poll(2)` nothing is ever reported ready; pipelined replies
    /// are then all collected when the session drains.
    #[cfg(not(unix))]
    pub fn readable_now(&self) -> io::Result<bool> {
        Ok(false)
    }

    /// Sends `fd` as `SCM_RIGHTS` ancillary data with a one-byte payload.
    ///
    /// Only Unix-domain connections can carry descriptors.
    #[cfg(unix)]
    pub fn send_fd(&mut self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let Stream::Unix(sock) = &self.stream else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "descriptor passing needs a unix socket",
            ));
        };
        send_scm_rights(sock.as_raw_fd(), fd.as_raw_fd())
    }
}

/// Builds the `msghdr` for a single descriptor and sends it.
#[cfg(unix)]
#[allow(clippy::cast_possible_truncation)]
fn send_scm_rights(sock: RawFd, fd: RawFd) -> io::Result<()> {
    let fd_len = size_of::<libc::c_int>() as libc::c_uint;
    // SAFETY: CMSG_SPACE / CMSG_LEN only compute sizes.
    let space = unsafe { libc::CMSG_SPACE(fd_len) } as usize;
    let cmsg_len = unsafe { libc::CMSG_LEN(fd_len) };

    // u64 storage keeps the control buffer aligned for `cmsghdr`.
    let mut control = vec![0u64; space.div_ceil(size_of::<u64>())];
    let mut dummy = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: dummy.as_mut_ptr().cast(),
        iov_len: dummy.len(),
    };

    // SAFETY: an all-zero msghdr is valid (null pointers, zero lengths);
    // the fields that matter are filled in below.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    // SAFETY: msg_control points at `space` zeroed, aligned bytes, enough
    // for one cmsghdr carrying a single c_int.
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
        if cmsg.is_null() {
            return Err(io::Error::other("control buffer too small"));
        }
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = cmsg_len as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>(), fd);
    }

    loop {
        // SAFETY: msg and everything it points to outlive the call.
        let sent = unsafe { libc::sendmsg(sock, &raw const msg, 0) };
        if sent >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        match &self.stream {
            Stream::Unix(s) => s.as_raw_fd(),
            Stream::Tcp(s) => s.as_raw_fd(),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs::File;
    use std::io::Seek;
    use std::os::unix::io::{AsFd, FromRawFd, OwnedFd};

    use super::*;

    fn pair() -> (Connection, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        (Connection::unix(a, Endpoint::unix("/test.sock")), b)
    }

    #[test]
    fn readiness_probe_does_not_wait() {
        let (conn, mut peer) = pair();
        assert!(!conn.readable_now().unwrap());
        peer.write_all(b"1: stream: OK\0").unwrap();
        assert!(conn.readable_now().unwrap());
    }

    #[test]
    fn hangup_counts_as_readable() {
        let (conn, peer) = pair();
        drop(peer);
        assert!(conn.readable_now().unwrap());
    }

    #[test]
    fn passed_descriptor_arrives_with_dummy_byte() {
        let (mut conn, peer) = pair();
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"payload").unwrap();
        file.rewind().unwrap();

        conn.send_fd(file.as_fd()).unwrap();

        let mut byte = [0u8; 1];
        let mut iov = libc::iovec {
            iov_base: byte.as_mut_ptr().cast(),
            iov_len: 1,
        };
        let mut control = vec![0u64; 8];
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &raw mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = (control.len() * 8) as _;
        let n = unsafe { libc::recvmsg(peer.as_raw_fd(), &raw mut msg, 0) };
        assert_eq!(n, 1);

        let received = unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&raw const msg);
            assert!(!cmsg.is_null());
            assert_eq!((*cmsg).cmsg_type, libc::SCM_RIGHTS);
            std::ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::c_int>())
        };
        let mut passed = File::from(unsafe { OwnedFd::from_raw_fd(received) });
        let mut text = String::new();
        passed.read_to_string(&mut text).unwrap();
        assert_eq!(text, "payload");
    }

    #[test]
    fn tcp_connections_cannot_pass_descriptors() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut conn = Connection::tcp(stream, Endpoint::loopback(0));
        assert!(!conn.can_pass_fd());
        let file = tempfile::tempfile().unwrap();
        let err = conn.send_fd(file.as_fd()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
