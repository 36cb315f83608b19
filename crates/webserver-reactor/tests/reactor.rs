//! End-to-end tests driving `Reactor` with real pipe fds: spawn real OS
//! resources, poll for the observable effect with a short sleep, then
//! assert.

use std::{
    os::fd::RawFd,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use webserver_reactor::{DispatchQueue, Interest, Reactor, WatchFlags};

fn make_pipe() -> (RawFd, RawFd) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    for fd in fds {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    }
    (fds[0], fds[1])
}

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn fires_on_readable_and_sees_written_bytes() {
    let reactor = Reactor::start().unwrap();
    let (read_fd, write_fd) = make_pipe();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    let _handle = reactor.register(
        read_fd,
        Interest::READABLE,
        WatchFlags::empty(),
        None,
        Arc::new(move |revents| {
            assert!(revents.is_readable());
            let mut buf = [0u8; 16];
            let n = unsafe { libc::read(read_fd, buf.as_mut_ptr().cast(), buf.len()) };
            assert!(n > 0);
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );

    unsafe { libc::write(write_fd, b"x".as_ptr().cast(), 1) };

    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 1, Duration::from_secs(2)));

    reactor.shutdown();
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn non_repeat_entry_fires_once_then_is_gone() {
    let reactor = Reactor::start().unwrap();
    let (read_fd, write_fd) = make_pipe();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_cb = Arc::clone(&fired);

    reactor.register(
        read_fd,
        Interest::READABLE,
        WatchFlags::empty(), // not REPEAT
        None,
        Arc::new(move |_| {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        }),
    );

    unsafe { libc::write(write_fd, b"a".as_ptr().cast(), 1) };
    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 1, Duration::from_secs(2)));

    // Data is still sitting in the pipe (the callback above didn't drain
    // it), so if the entry were still registered it would keep firing.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    reactor.shutdown();
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn self_rearming_callback_survives_its_own_auto_removal() {
    // Scenario 6 / P2: a non-repeat watch whose callback re-registers
    // itself (for example, a connection that consumed one read and wants
    // to be notified of the next) must still be watched afterward.
    let reactor = Reactor::start().unwrap();
    let (read_fd, write_fd) = make_pipe();

    let fired = Arc::new(AtomicUsize::new(0));
    let reactor_for_cb = reactor.clone();

    fn drain_one_byte(fd: RawFd) -> bool {
        let mut buf = [0u8; 1];
        unsafe { libc::read(fd, buf.as_mut_ptr().cast(), 1) == 1 }
    }

    struct Rearm {
        fired: Arc<AtomicUsize>,
        reactor: Reactor,
        read_fd: RawFd,
    }

    impl Rearm {
        fn fire(self: &Arc<Self>, _revents: Interest) {
            drain_one_byte(self.read_fd);
            self.fired.fetch_add(1, Ordering::SeqCst);
            let this = Arc::clone(self);
            self.reactor.register(
                self.read_fd,
                Interest::READABLE,
                WatchFlags::empty(),
                None,
                Arc::new(move |revents| this.fire(revents)),
            );
        }
    }

    let rearm = Arc::new(Rearm { fired: Arc::clone(&fired), reactor: reactor_for_cb, read_fd });
    let first = Arc::clone(&rearm);
    reactor.register(
        read_fd,
        Interest::READABLE,
        WatchFlags::empty(),
        None,
        Arc::new(move |revents| first.fire(revents)),
    );

    unsafe { libc::write(write_fd, b"12".as_ptr().cast(), 2) };

    assert!(wait_until(|| fired.load(Ordering::SeqCst) >= 2, Duration::from_secs(2)));

    reactor.shutdown();
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn dispatches_onto_named_queue_off_the_reactor_thread() {
    let reactor = Reactor::start().unwrap();
    let queue = DispatchQueue::named("test-queue");
    let (read_fd, write_fd) = make_pipe();

    let queue_thread_name = Arc::new(std::sync::Mutex::new(None::<String>));
    let queue_thread_name_cb = Arc::clone(&queue_thread_name);

    reactor.register(
        read_fd,
        Interest::READABLE,
        WatchFlags::empty(),
        Some(queue.clone()),
        Arc::new(move |_| {
            *queue_thread_name_cb.lock().unwrap() = std::thread::current().name().map(str::to_string);
        }),
    );

    unsafe { libc::write(write_fd, b"q".as_ptr().cast(), 1) };

    assert!(wait_until(|| queue_thread_name.lock().unwrap().is_some(), Duration::from_secs(2)));
    assert_eq!(queue_thread_name.lock().unwrap().as_deref(), Some("test-queue"));

    reactor.shutdown();
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn replacing_a_registration_drops_the_old_callback() {
    struct DropSignal(Arc<AtomicUsize>);
    impl Drop for DropSignal {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let reactor = Reactor::start().unwrap();
    let (read_fd, write_fd) = make_pipe();

    let drops = Arc::new(AtomicUsize::new(0));
    let first_guard = Arc::new(DropSignal(Arc::clone(&drops)));
    reactor.register(read_fd, Interest::READABLE, WatchFlags::REPEAT, None, Arc::new(move |_| {
        let _keep_alive = &first_guard;
    }));

    let second_guard = Arc::new(DropSignal(Arc::clone(&drops)));
    reactor.register(read_fd, Interest::READABLE, WatchFlags::REPEAT, None, Arc::new(move |_| {
        let _keep_alive = &second_guard;
    }));

    unsafe { libc::write(write_fd, b"z".as_ptr().cast(), 1) };
    assert!(wait_until(|| drops.load(Ordering::SeqCst) >= 1, Duration::from_secs(2)));
    assert_eq!(drops.load(Ordering::SeqCst), 1, "replacing a registration must drop exactly the old callback");

    reactor.shutdown();
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}
