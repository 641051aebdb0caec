//! The device reactor
//!
//! One dedicated worker thread owns the descriptor. A current-thread tokio
//! runtime drives a readiness loop with exactly two descriptor suspension
//! points, readability and writability. Readability stays armed for the
//! life of the loop; writability is awaited only while the queue holds
//! packets, and an enqueue wakes the loop through a notify so the first
//! packet after an idle stretch re-arms the write side.
//!
//! The loop ends when a stop is requested or readiness registration is
//! lost; the descriptor is closed on the way out.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use socket2::SockRef;
use tokio::io::unix::{AsyncFd, AsyncFdReadyGuard};
use tokio::io::Interest;
use tokio::runtime;

use hyperspace_packet::hexdump;

use crate::config::TunnelConfig;
use crate::engine::Shared;

/// Spawn the reactor worker thread for `fd`.
pub(crate) fn spawn(
    fd: RawFd,
    shared: Arc<Shared>,
    config: TunnelConfig,
) -> io::Result<JoinHandle<()>> {
    Builder::new()
        .name(format!("hyperspace-tun {}", fd))
        .spawn(move || run(fd, shared, config))
}

fn run(fd: RawFd, shared: Arc<Shared>, config: TunnelConfig) {
    // Ownership of the descriptor moves to this thread; it is closed when
    // the loop exits.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };

    let rt = match runtime::Builder::new_current_thread().enable_io().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to build reactor runtime for fd {}: {}", fd, e);
            shared.running.store(false, Ordering::Release);
            return;
        }
    };

    rt.block_on(event_loop(owned, &shared, &config));

    shared.running.store(false, Ordering::Release);
    log::info!("tun reactor thread for fd {} finished", fd);
}

async fn event_loop(fd: OwnedFd, shared: &Shared, config: &TunnelConfig) {
    let raw_fd = fd.as_raw_fd();

    configure_buffers(&fd, config.socket_buffer_size);

    if let Err(e) = SockRef::from(&fd).set_nonblocking(true) {
        log::error!("failed to set tun fd {} non-blocking: {}", raw_fd, e);
        return;
    }

    let device = match AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE) {
        Ok(device) => device,
        Err(e) => {
            log::error!("failed to register tun fd {}: {}", raw_fd, e);
            return;
        }
    };

    log::info!("dispatching read/write events on tun fd {}", raw_fd);
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        if shared.write_queue.is_empty() {
            tokio::select! {
                _ = shared.shutdown.notified() => break,
                ready = device.readable() => match ready {
                    Ok(guard) => read_edge(guard, shared, &mut buf),
                    Err(e) => {
                        log::error!("tun fd {} read readiness lost: {}", raw_fd, e);
                        break;
                    }
                },
                // An enqueue re-arms the write side on the next pass.
                _ = shared.write_pending.notified() => {}
            }
        } else {
            tokio::select! {
                _ = shared.shutdown.notified() => break,
                ready = device.readable() => match ready {
                    Ok(guard) => read_edge(guard, shared, &mut buf),
                    Err(e) => {
                        log::error!("tun fd {} read readiness lost: {}", raw_fd, e);
                        break;
                    }
                },
                ready = device.writable() => match ready {
                    Ok(guard) => write_edge(guard, shared),
                    Err(e) => {
                        log::error!("tun fd {} write readiness lost: {}", raw_fd, e);
                        break;
                    }
                },
            }
        }
    }

    log::info!("event loop exited, closing tun fd {}", raw_fd);
    // Dropping the AsyncFd closes the descriptor.
}

/// One read-ready edge: read a frame and classify it.
fn read_edge(mut guard: AsyncFdReadyGuard<'_, OwnedFd>, shared: &Shared, buf: &mut [u8]) {
    match guard.try_io(|device| read_fd(device.get_ref().as_raw_fd(), buf)) {
        Ok(Ok(len)) if len > 0 => {
            shared.stats.record_read(len);
            if log::log_enabled!(log::Level::Trace) {
                log::trace!("tun read {} bytes\n{}", len, hexdump(&buf[..len]));
            }
            shared.handle_device_read(&buf[..len]);
        }
        // Zero-length reads are a no-op; the read event stays armed.
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::debug!("tun read error: {}", e),
        // Stale readiness was cleared; the reactor re-waits.
        Err(_) => {}
    }
}

/// One write-ready edge: drain the queue into the descriptor.
///
/// EAGAIN puts the packet back at the head so retry order matches enqueue
/// order; any other error discards that one packet.
fn write_edge(mut guard: AsyncFdReadyGuard<'_, OwnedFd>, shared: &Shared) {
    while let Some(packet) = shared.write_queue.poll() {
        match guard.try_io(|device| write_fd(device.get_ref().as_raw_fd(), &packet)) {
            Ok(Ok(written)) => {
                shared.stats.record_write(written);
            }
            Ok(Err(e)) => {
                log::warn!("tun write error, dropping packet: {}", e);
                shared.stats.record_dropped();
            }
            Err(_) => {
                // EAGAIN: the descriptor is full. Retry this packet first
                // on the next write edge.
                shared.write_queue.put_first(packet);
                break;
            }
        }
    }
}

/// Raise the descriptor's socket buffers.
///
/// utun descriptors are kernel control sockets, so SO_RCVBUF/SO_SNDBUF
/// apply. Failure is logged and not fatal.
fn configure_buffers(fd: &OwnedFd, buffer_size: usize) {
    let sock = SockRef::from(fd);
    if let Err(e) = sock.set_recv_buffer_size(buffer_size) {
        log::warn!("failed to set receive buffer size: {}", e);
    }
    if let Err(e) = sock.set_send_buffer_size(buffer_size) {
        log::warn!("failed to set send buffer size: {}", e);
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
