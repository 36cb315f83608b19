use std::{
    os::fd::RawFd,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::{Events, Poll, Token, event::Event, unix::SourceFd};

use crate::{
    interest::{Interest, WatchFlags},
    queue::DispatchQueue,
};

/// A watch callback. Shared via `Arc` rather than owned uniquely: the
/// reactor must be able to invoke it again on the next readiness event
/// without taking unique access away from whatever scheduled it onto a
/// dispatch queue for the current one. Mutation of connection state
/// happens behind interior mutability on whatever the closure captures.
pub type Callback = Arc<dyn Fn(Interest) + Send + Sync + 'static>;

const WAIT_TIMEOUT: Duration = Duration::from_secs(1);
const INITIAL_CAPACITY: usize = 10;

enum UpdateOp {
    InsertOrReplace {
        interest: Interest,
        flags: WatchFlags,
        callback: Callback,
        target_queue: Option<DispatchQueue>,
    },
    Remove,
    Shutdown,
}

struct Update {
    fd: RawFd,
    op: UpdateOp,
}

struct WatchEntry {
    fd: RawFd,
    flags: WatchFlags,
    callback: Callback,
    target_queue: Option<DispatchQueue>,
}

/// A weak reference to an installed watch entry.
///
/// Its only operation is to request removal; it does not keep the
/// callback or queue alive, and dropping it has no effect on the entry
/// (unlike the reactor's own ownership, which is the strong edge).
#[derive(Clone)]
pub struct WatchHandle {
    fd: RawFd,
    reactor: Reactor,
}

impl WatchHandle {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Schedules removal of this entry. A no-op if it is already gone by
    /// the time the reactor thread applies it.
    pub fn unregister(&self) {
        self.reactor.unregister(self.fd);
    }
}

struct Inner {
    updates_tx: Sender<Update>,
    wake_write_fd: RawFd,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// The readiness reactor ("Poll"): one dedicated thread multiplexing a
/// dynamic set of file descriptors for level-triggered readiness,
/// dispatching a callback inline or onto a named queue whenever the OS
/// reports one ready.
///
/// Cheaply `Clone` — every clone shares the same background thread and
/// update channel. `register`/`unregister` are safe from any thread,
/// including from inside a callback running on the reactor thread
/// itself (that's what makes self-rearming watches possible).
#[derive(Clone)]
pub struct Reactor(Arc<Inner>);

impl Reactor {
    /// Creates the wake pipe, spawns the reactor thread, and returns a
    /// handle to it. The wake-channel read end is installed as a
    /// permanent, repeat-flagged watch entry before the thread enters
    /// its loop (invariant R2).
    pub fn start() -> std::io::Result<Self> {
        let (wake_read_fd, wake_write_fd) = make_wake_pipe()?;
        let poll = Poll::new()?;
        let (updates_tx, updates_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(Inner { updates_tx: updates_tx.clone(), wake_write_fd, thread: Mutex::new(None) });

        let thread = thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || run(poll, wake_read_fd, updates_rx, updates_tx))
            .expect("failed to spawn reactor thread");

        *inner.thread.lock().unwrap() = Some(thread);

        Ok(Self(inner))
    }

    /// Schedules installation of a watch entry for `fd`. A second call
    /// for the same fd replaces the prior entry; its callback and queue
    /// reference are released exactly once when the replacement is
    /// applied (R1, R3).
    pub fn register(
        &self,
        fd: RawFd,
        interest: Interest,
        flags: WatchFlags,
        target_queue: Option<DispatchQueue>,
        callback: Callback,
    ) -> WatchHandle {
        self.push_update(Update {
            fd,
            op: UpdateOp::InsertOrReplace { interest, flags, callback, target_queue },
        });
        WatchHandle { fd, reactor: self.clone() }
    }

    /// Schedules removal of the entry for `fd`. A no-op if none exists
    /// when the update is applied.
    pub fn unregister(&self, fd: RawFd) {
        self.push_update(Update { fd, op: UpdateOp::Remove });
    }

    /// Stops the reactor thread and joins it. Not part of the original
    /// contract (the source reactor lives for the process lifetime) but
    /// needed so tests don't leak a thread per case; see `SPEC_FULL.md`
    /// Design Notes. Safe to call from any clone; only the first caller
    /// to observe the thread actually joins it.
    pub fn shutdown(&self) {
        let _ = self.0.updates_tx.send(Update { fd: -1, op: UpdateOp::Shutdown });
        self.wake();
        if let Some(handle) = self.0.thread.lock().unwrap().take() {
            let _ = handle.join();
            unsafe {
                libc::close(self.0.wake_write_fd);
            }
        }
    }

    fn push_update(&self, update: Update) {
        if self.0.updates_tx.send(update).is_err() {
            tracing::warn!("reactor update channel closed, dropping update");
            return;
        }
        self.wake();
    }

    fn wake(&self) {
        let byte: u8 = 1;
        let ret = unsafe { libc::write(self.0.wake_write_fd, std::ptr::from_ref(&byte).cast(), 1) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::WouldBlock {
                tracing::debug!(%err, "reactor wake pipe write failed");
            }
        }
    }
}

fn run(poll: Poll, wake_read_fd: RawFd, updates_rx: Receiver<Update>, self_updates_tx: Sender<Update>) {
    let mut entries: Vec<WatchEntry> = Vec::with_capacity(INITIAL_CAPACITY);
    let mut events = Events::with_capacity(128);

    if let Err(err) = poll.registry().register(&mut SourceFd(&wake_read_fd), Token(wake_read_fd as usize), mio::Interest::READABLE)
    {
        tracing::error!(%err, "reactor: failed to register wake channel, reactor thread exiting");
        return;
    }
    entries.push(WatchEntry {
        fd: wake_read_fd,
        flags: WatchFlags::REPEAT,
        callback: Arc::new(|_| {}),
        target_queue: None,
    });

    loop {
        drain_wake_pipe(wake_read_fd);
        if !apply_updates(&poll, &mut entries, &updates_rx) {
            break;
        }

        if let Err(err) = poll.poll(&mut events, Some(WAIT_TIMEOUT)) {
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(%err, "reactor OS wait failed, reactor thread exiting");
            return;
        }

        for event in events.iter() {
            let fd = event.token().0 as RawFd;
            let Some(index) = entries.iter().position(|e| e.fd == fd) else {
                continue;
            };

            let revents = revents_of(event);
            if revents.is_empty() {
                continue;
            }

            if !entries[index].flags.contains(WatchFlags::REPEAT) {
                // Enqueued before invocation: P2. If the callback below
                // re-registers this fd, that update lands after this
                // removal in the FIFO, so the next drain removes then
                // re-adds it, leaving it installed.
                let _ = self_updates_tx.send(Update { fd, op: UpdateOp::Remove });
            }

            let callback = Arc::clone(&entries[index].callback);
            match &entries[index].target_queue {
                Some(queue) => queue.schedule(move || callback(revents)),
                None => callback(revents),
            }
        }
    }

    unsafe {
        libc::close(wake_read_fd);
    }
}

fn apply_updates(poll: &Poll, entries: &mut Vec<WatchEntry>, updates_rx: &Receiver<Update>) -> bool {
    loop {
        match updates_rx.try_recv() {
            Ok(update) => match update.op {
                UpdateOp::Shutdown => return false,
                UpdateOp::Remove => remove_entry(poll, entries, update.fd),
                UpdateOp::InsertOrReplace { interest, flags, callback, target_queue } => {
                    insert_or_replace(poll, entries, update.fd, interest, flags, callback, target_queue);
                }
            },
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => return true,
        }
    }
}

fn insert_or_replace(
    poll: &Poll,
    entries: &mut Vec<WatchEntry>,
    fd: RawFd,
    interest: Interest,
    flags: WatchFlags,
    callback: Callback,
    target_queue: Option<DispatchQueue>,
) {
    let mio_interest = to_mio_interest(interest);
    let token = Token(fd as usize);

    if let Some(existing) = entries.iter_mut().find(|e| e.fd == fd) {
        if let Err(err) = poll.registry().reregister(&mut SourceFd(&fd), token, mio_interest) {
            tracing::warn!(fd, %err, "reactor: failed to reregister fd, dropping update");
            return;
        }
        // Old callback/queue dropped here: released exactly once (R3).
        existing.flags = flags;
        existing.callback = callback;
        existing.target_queue = target_queue;
    } else {
        if let Err(err) = poll.registry().register(&mut SourceFd(&fd), token, mio_interest) {
            tracing::warn!(fd, %err, "reactor: failed to register fd, dropping update");
            return;
        }
        entries.push(WatchEntry { fd, flags, callback, target_queue });
    }

    webserver_utils::safe_assert!(
        entries.iter().filter(|e| e.fd == fd).count() == 1,
        "fd {fd} must have exactly one watch entry after insert-or-replace (R1)"
    );
}

fn remove_entry(poll: &Poll, entries: &mut Vec<WatchEntry>, fd: RawFd) {
    if let Some(index) = entries.iter().position(|e| e.fd == fd) {
        let _ = poll.registry().deregister(&mut SourceFd(&fd));
        entries.swap_remove(index);
    }
}

fn to_mio_interest(interest: Interest) -> mio::Interest {
    match (interest.is_readable(), interest.is_writable()) {
        (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
        (true, false) => mio::Interest::READABLE,
        (false, true) => mio::Interest::WRITABLE,
        (false, false) => mio::Interest::READABLE,
    }
}

fn revents_of(event: &Event) -> Interest {
    let mut revents = Interest::empty();
    if event.is_readable() {
        revents |= Interest::READABLE;
    }
    if event.is_writable() {
        revents |= Interest::WRITABLE;
    }
    if event.is_read_closed() || event.is_write_closed() || event.is_error() {
        revents |= Interest::HANGUP;
    }
    revents
}

fn drain_wake_pipe(fd: RawFd) {
    let mut buf = [0u8; 256];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n > 0 && (n as usize) == buf.len() {
            continue;
        }
        break;
    }
}

fn make_wake_pipe() -> std::io::Result<(RawFd, RawFd)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    set_nonblocking(fds[0])?;
    set_nonblocking(fds[1])?;
    Ok((fds[0], fds[1]))
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
