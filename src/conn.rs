use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::rt::{Read as HyperRead, ReadBufCursor, Write as HyperWrite};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep, sleep_until};

use crate::config::Timeouts;
use crate::error::TimeoutPhase;

/// Payload of the `io::ErrorKind::TimedOut` errors raised when a deadline fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{phase} deadline elapsed after {}ms", .timeout.as_millis())]
pub struct DeadlineElapsed {
    pub phase: TimeoutPhase,
    pub timeout: Duration,
}

impl DeadlineElapsed {
    pub(crate) fn new(phase: TimeoutPhase, timeout: Duration) -> Self {
        Self { phase, timeout }
    }

    pub(crate) fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, self)
    }
}

struct Deadline {
    timer: Option<Pin<Box<Sleep>>>,
    // Window the current deadline was armed with, reported on expiry.
    window: Duration,
}

impl Deadline {
    fn unset() -> Self {
        Self {
            timer: None,
            window: Duration::ZERO,
        }
    }

    fn arm(&mut self, window: Duration) {
        self.set(Some(Instant::now() + window));
        self.window = window;
    }

    fn set(&mut self, at: Option<Instant>) {
        match (at, self.timer.as_mut()) {
            (Some(at), Some(timer)) => timer.as_mut().reset(at),
            (Some(at), None) => self.timer = Some(Box::pin(sleep_until(at))),
            (None, _) => self.timer = None,
        }
        if let Some(at) = at {
            self.window = at.saturating_duration_since(Instant::now());
        }
    }

    fn poll_elapsed(&mut self, cx: &mut Context<'_>) -> bool {
        match self.timer.as_mut() {
            Some(timer) => timer.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }
}

/// Connection wrapper enforcing per-read and per-write deadlines plus a
/// refreshed maximum lifetime window.
///
/// Each read or write arms its phase deadline when the operation starts. Once
/// the operation completes, the deadline is pushed out to `now + max` so that a
/// stream of small, fast operations is still capped by the maximum window
/// rather than by the last short per-operation timer.
pub struct TimeoutConnection<T> {
    inner: T,
    timeouts: Timeouts,
    read_deadline: Deadline,
    write_deadline: Deadline,
    reading: bool,
    writing: bool,
}

impl<T> std::fmt::Debug for TimeoutConnection<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TimeoutConnection")
            .field("inner", &self.inner)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl<T> TimeoutConnection<T> {
    pub fn new(inner: T, timeouts: Timeouts) -> Self {
        let mut connection = Self {
            inner,
            timeouts,
            read_deadline: Deadline::unset(),
            write_deadline: Deadline::unset(),
            reading: false,
            writing: false,
        };
        if let Some(max) = timeouts.max_limit() {
            connection.read_deadline.arm(max);
            connection.write_deadline.arm(max);
        }
        connection
    }

    /// Replaces both deadlines; `None` clears them.
    pub fn set_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
        self.write_deadline.set(at);
    }

    pub fn set_read_deadline(&mut self, at: Option<Instant>) {
        self.read_deadline.set(at);
    }

    pub fn set_write_deadline(&mut self, at: Option<Instant>) {
        self.write_deadline.set(at);
    }

    fn finish_read(&mut self) {
        self.reading = false;
        if let Some(max) = self.timeouts.max_limit() {
            self.read_deadline.arm(max);
        }
    }

    fn finish_write(&mut self) {
        self.writing = false;
        if let Some(max) = self.timeouts.max_limit() {
            self.write_deadline.arm(max);
        }
    }
}

impl TimeoutConnection<TokioIo<TcpStream>> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.inner().local_addr()
    }

    pub fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.inner.inner().peer_addr()
    }
}

impl<T> HyperRead for TimeoutConnection<T>
where
    T: HyperRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), io::Error>> {
        let this = self.get_mut();
        if !this.reading {
            if let Some(read) = this.timeouts.read_limit() {
                this.read_deadline.arm(read);
            }
            this.reading = true;
        }

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.finish_read();
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.read_deadline.poll_elapsed(cx) {
                    let window = this.read_deadline.window;
                    this.finish_read();
                    return Poll::Ready(Err(
                        DeadlineElapsed::new(TimeoutPhase::Read, window).into_io()
                    ));
                }
                Poll::Pending
            }
        }
    }
}

impl<T> HyperWrite for TimeoutConnection<T>
where
    T: HyperWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.get_mut();
        if !this.writing {
            if let Some(write) = this.timeouts.write_limit() {
                this.write_deadline.arm(write);
            }
            this.writing = true;
        }

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.finish_write();
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.write_deadline.poll_elapsed(cx) {
                    let window = this.write_deadline.window;
                    this.finish_write();
                    return Poll::Ready(Err(
                        DeadlineElapsed::new(TimeoutPhase::Write, window).into_io()
                    ));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_shutdown(cx)
    }
}

impl<T> Connection for TimeoutConnection<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner.connected()
    }
}
