use std::{net::TcpListener, sync::Arc};

use webserver_http::{Connection, ServerContext};
use webserver_reactor::{DispatchQueue, Reactor};

mod config;

use config::ServerConfig;

fn main() {
    let config = ServerConfig::from_args().unwrap_or_else(|err| {
        eprintln!("configuration error: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt().with_max_level(config.log_level).init();
    tracing::info!(root = %config.document_root.display(), bind = %config.bind_addr, "starting webserver");

    let reactor = Reactor::start().unwrap_or_else(|err| {
        tracing::error!(%err, "failed to start reactor");
        std::process::exit(1);
    });

    let ctx = ServerContext {
        reactor,
        input_queue: DispatchQueue::named("input"),
        processing_queue: DispatchQueue::named("processing"),
        output_queue: DispatchQueue::named("output"),
        document_root: Arc::new(config.document_root),
    };

    let listener = TcpListener::bind(config.bind_addr).unwrap_or_else(|err| {
        tracing::error!(%err, bind = %config.bind_addr, "failed to bind listener");
        std::process::exit(1);
    });

    accept_loop(&listener, &ctx);
}

/// The accept thread (§4.H, ambient/minimal): blocks on `accept()`,
/// hands each socket to a fresh `Connection`, and never restarts the
/// listener on failure — there is no supervisor in scope here.
fn accept_loop(listener: &TcpListener, ctx: &ServerContext) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(%err, "accept failed, terminating");
                std::process::exit(1);
            }
        };

        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                tracing::warn!(%err, "failed to read peer address, dropping connection");
                continue;
            }
        };

        if let Err(err) = stream.set_nonblocking(true) {
            tracing::warn!(%err, "failed to set accepted socket non-blocking, dropping connection");
            continue;
        }

        let mio_stream = mio::net::TcpStream::from_std(stream);
        Connection::accept(mio_stream, peer_addr, ctx.clone());
    }
}
