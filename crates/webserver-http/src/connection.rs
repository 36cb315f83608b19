use std::{
    net::SocketAddr,
    os::fd::{AsRawFd, RawFd},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use mio::net::TcpStream;
use webserver_reactor::{DispatchQueue, Interest, Reactor, WatchFlags};

use crate::{
    buffer::ReadBuffer,
    path,
    request::{self, Method},
    response::{Response, SendOutcome},
};

/// The shared collaborators every connection needs: the reactor, the
/// three dispatch queues (input/processing/output), and the resolved
/// document root. Cheaply `Clone` — every field is itself an `Arc`-style
/// handle or a reference-counted path.
#[derive(Clone)]
pub struct ServerContext {
    pub reactor: Reactor,
    pub input_queue: DispatchQueue,
    pub processing_queue: DispatchQueue,
    pub output_queue: DispatchQueue,
    pub document_root: Arc<PathBuf>,
}

struct Inner {
    stream: Option<TcpStream>,
    fd: RawFd,
    buffer: Option<ReadBuffer>,
    response: Option<Response>,
    closed: bool,
}

/// A single HTTP/1.0 connection. One-way ownership, per the source's
/// reference-counting redesign (§9): the reactor owns the callback
/// closures that keep a `Connection` alive; the connection itself never
/// owns a reactor entry, only a raw fd key it can ask the reactor to
/// drop.
#[derive(Clone)]
pub struct Connection(Arc<Mutex<Inner>>);

enum PumpOutcome {
    /// The header block is complete; byte offset of its end.
    Complete(usize),
    Suspend,
    PeerClosed,
    Error(std::io::Error),
}

impl Connection {
    /// Accepts one connection: wraps the already-non-blocking `stream`
    /// (every `mio::net::TcpStream` is opened non-blocking) and
    /// immediately enters the input pump (§4.G).
    pub fn accept(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
        let fd = stream.as_raw_fd();
        tracing::debug!(%peer_addr, fd, "accepted connection");
        let conn = Self(Arc::new(Mutex::new(Inner {
            stream: Some(stream),
            fd,
            buffer: Some(ReadBuffer::new()),
            response: None,
            closed: false,
        })));
        conn.pump_input(ctx);
    }

    fn pump_input(&self, ctx: ServerContext) {
        let outcome = {
            let mut guard = self.0.lock().unwrap();
            if guard.closed {
                return;
            }
            read_loop(&mut guard)
        };

        match outcome {
            PumpOutcome::Complete(end) => {
                let request_bytes = {
                    let mut guard = self.0.lock().unwrap();
                    let buffer = guard.buffer.take().expect("buffer owned while pumping");
                    buffer.filled()[..end].to_vec()
                };
                let conn = self.clone();
                let ctx_for_job = ctx.clone();
                ctx.processing_queue.schedule(move || conn.process(&request_bytes, ctx_for_job));
            }
            PumpOutcome::Suspend => {
                let fd = self.0.lock().unwrap().fd;
                let conn = self.clone();
                let ctx_for_cb = ctx.clone();
                ctx.reactor.register(
                    fd,
                    Interest::READABLE | Interest::HANGUP,
                    WatchFlags::empty(),
                    Some(ctx.input_queue.clone()),
                    Arc::new(move |revents| {
                        if revents.is_hangup() {
                            conn.teardown(&ctx_for_cb);
                        } else {
                            conn.pump_input(ctx_for_cb.clone());
                        }
                    }),
                );
            }
            PumpOutcome::PeerClosed => {
                tracing::debug!("peer closed before sending a complete request");
                self.teardown(&ctx);
            }
            PumpOutcome::Error(err) => {
                tracing::warn!(%err, "connection read failed");
                self.teardown(&ctx);
            }
        }
    }

    fn process(&self, request_bytes: &[u8], ctx: ServerContext) {
        let response = build_response(request_bytes, &ctx.document_root);
        self.start_send(response, ctx);
    }

    fn start_send(&self, mut response: Response, ctx: ServerContext) {
        loop {
            let outcome = {
                let mut guard = self.0.lock().unwrap();
                if guard.closed {
                    return;
                }
                let stream = guard.stream.as_mut().expect("stream present while sending");
                response.send(stream)
            };

            match outcome {
                SendOutcome::Done => {
                    self.teardown(&ctx);
                    return;
                }
                SendOutcome::Error(err) => {
                    tracing::warn!(%err, "connection write failed");
                    self.teardown(&ctx);
                    return;
                }
                SendOutcome::WouldBlock => {
                    let fd = {
                        let mut guard = self.0.lock().unwrap();
                        guard.response = Some(response);
                        guard.fd
                    };
                    let conn = self.clone();
                    let ctx_for_cb = ctx.clone();
                    ctx.reactor.register(
                        fd,
                        Interest::WRITABLE | Interest::HANGUP,
                        WatchFlags::empty(),
                        Some(ctx.output_queue.clone()),
                        Arc::new(move |revents| {
                            if revents.is_hangup() {
                                conn.teardown(&ctx_for_cb);
                                return;
                            }
                            let resumed = conn.0.lock().unwrap().response.take();
                            if let Some(response) = resumed {
                                conn.start_send(response, ctx_for_cb.clone());
                            }
                        }),
                    );
                    return;
                }
            }
        }
    }

    /// Idempotent teardown: safe across the two normal exit paths and
    /// safe if a racing callback calls it twice (§4.G).
    fn teardown(&self, ctx: &ServerContext) {
        let fd = {
            let mut guard = self.0.lock().unwrap();
            if guard.closed {
                return;
            }
            guard.closed = true;
            guard.buffer = None;
            guard.response = None;
            guard.stream = None; // drops the TcpStream, closing the socket now
            guard.fd
        };
        ctx.reactor.unregister(fd);
    }
}

fn read_loop(inner: &mut Inner) -> PumpOutcome {
    use std::io::Read;

    loop {
        let buffer = inner.buffer.as_mut().expect("buffer owned while pumping");
        let spare_len;
        let read_result = {
            let spare = buffer.spare_capacity_mut();
            spare_len = spare.len();
            inner.stream.as_mut().expect("stream present while pumping").read(spare)
        };

        match read_result {
            Ok(0) => return PumpOutcome::PeerClosed,
            Ok(n) => {
                inner.buffer.as_mut().expect("buffer owned while pumping").record_filled(n);
                let filled = inner.buffer.as_ref().unwrap().filled();
                if let Some(end) = request::headers_terminator(filled) {
                    return PumpOutcome::Complete(end);
                }
                if n < spare_len {
                    return PumpOutcome::Suspend;
                }
                // filled exactly the offered capacity: loop again after growth
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => return PumpOutcome::Suspend,
            Err(err) => return PumpOutcome::Error(err),
        }
    }
}

fn build_response(request_bytes: &[u8], document_root: &std::path::Path) -> Response {
    let request = match request::parse(request_bytes) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(%err, "rejecting unparseable request");
            return Response::new(400, "").with_inline_body("400/Bad Request");
        }
    };

    match request.method {
        Method::Other(method) => {
            tracing::debug!(method, "method not implemented");
            Response::new(501, "").with_inline_body("500/Not Implemented")
        }
        Method::Get => resolve_and_serve(&request.path, document_root),
    }
}

fn resolve_and_serve(request_path: &str, document_root: &std::path::Path) -> Response {
    // Reason phrase intentionally empty: the source always formats the
    // status line with no reason text (`HTTP/1.0 %3d %s\r\n` called with
    // `""`), and scenario 2 pins that byte-for-byte.
    let not_found = || Response::new(404, "").with_inline_body("404/Not Found");

    let resolved = match path::resolve(document_root, request_path) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::debug!(%err, request_path, "path resolution failed");
            return not_found();
        }
    };

    if !path::is_regular_file(&resolved) {
        return not_found();
    }

    match std::fs::File::open(&resolved).and_then(|file| file.metadata().map(|meta| (file, meta.len()))) {
        Ok((file, len)) => Response::new(200, "").with_file_body(file, len),
        Err(err) => {
            tracing::debug!(%err, ?resolved, "failed to open resolved file");
            not_found()
        }
    }
}
