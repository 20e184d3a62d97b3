//! The listener/dispatcher (§4.F): owns the socket, the routing table, and
//! every bound node; the one thing per worker thread (§5, §9).

pub mod eventloop;
pub mod listener;
pub mod routing;

use std::cell::RefCell;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Error, Result};
use crate::message::Upstream;
use crate::node::NodeHandle;
use crate::rt_guard::ThreadGuard;
use eventloop::{EventLoop, TimerEventLoop};
use routing::RoutingTable;

/// Cadence at which the exposed loop fd fires (§4.H: "100 ms period was
/// used in the original").
const LOOP_TICK: Duration = Duration::from_millis(100);

/// Builds a [`Dispatcher`]: nodes are registered before [`Builder::open`]
/// binds the listening socket, mirroring the original's "parse options,
/// then construct nodes, then open" sequencing.
pub struct Builder {
    host: String,
    port: u16,
    pending: Vec<NodeHandle>,
}

impl Builder {
    /// Starts a builder for a server bound to `host:port` (§6 "parsing
    /// failure aborts open" — validated by `TcpListener::bind` on open,
    /// not here, so configuration errors surface at one place).
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Builder {
            host: host.into(),
            port,
            pending: Vec::new(),
        }
    }

    /// Registers a node to be bound once the dispatcher opens. Path
    /// conflicts are only detected at `open()`, once every node is known.
    pub fn with_node(mut self, handle: NodeHandle) -> Self {
        self.pending.push(handle);
        self
    }

    /// Binds the socket, registers every pending node, and spawns the
    /// accept loop on the current `LocalSet` (§4.F `open`).
    ///
    /// Must be called from within a `tokio::task::LocalSet` context, since
    /// every node and the routing table are `!Send` by design (§5).
    pub async fn open<U: Upstream + 'static>(self, upstream: Rc<U>) -> Result<Dispatcher> {
        let guard = ThreadGuard::claim()?;

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| Error::config("invalid host:port"))?;
        let std_listener = std::net::TcpListener::bind(addr).map_err(Error::from)?;
        std_listener.set_nonblocking(true).map_err(Error::from)?;
        let listener = TcpListener::from_std(std_listener).map_err(Error::from)?;
        let local_addr = listener.local_addr().map_err(Error::from)?;

        let mut routes = RoutingTable::new();
        for node in self.pending {
            routes.add(node)?;
        }
        let routes = Rc::new(RefCell::new(routes));

        let event_loop = TimerEventLoop::new(LOOP_TICK)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::task::spawn_local(listener::run(listener, routes.clone(), upstream, shutdown_rx));

        info!(%local_addr, "dispatcher open");
        Ok(Dispatcher {
            _guard: guard,
            local_addr,
            routes,
            shutdown_tx,
            event_loop: RefCell::new(Box::new(event_loop)),
        })
    }
}

/// An open HTTP/WebSocket multiplexing server bound to one TCP socket.
pub struct Dispatcher {
    _guard: ThreadGuard,
    local_addr: SocketAddr,
    routes: Rc<RefCell<RoutingTable>>,
    shutdown_tx: watch::Sender<bool>,
    event_loop: RefCell<Box<dyn EventLoop>>,
}

impl Dispatcher {
    /// The socket address actually bound (useful when `open` was given
    /// port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Binds a node at its own prefix after the dispatcher is already open
    /// (§4.F `node_add`).
    pub fn node_add(&self, handle: NodeHandle) -> Result<()> {
        self.routes.borrow_mut().add(handle)
    }

    /// Unbinds a previously added node, closing its sessions (§4.F
    /// `node_remove`).
    pub fn node_remove(&self, prefix: &str, handle: &NodeHandle) -> Result<()> {
        self.routes.borrow_mut().remove(prefix, handle)?;
        handle.close_all_sessions();
        Ok(())
    }

    /// Number of currently bound routes.
    pub fn route_count(&self) -> usize {
        self.routes.borrow().len()
    }

    /// The single readable fd a host scheduler polls to know this
    /// dispatcher has loop work pending (§4.H, §6 "Exposed fd"); `-1` once
    /// [`Dispatcher::close`] has run (§8 invariant 5).
    pub fn fd(&self) -> RawFd {
        self.event_loop.borrow().fd()
    }

    /// Advances the event loop by one non-blocking iteration. The host
    /// calls this when [`Dispatcher::fd`] reports readable (§4.H: "the host
    /// calls `process()` when it fires"); this crate's own accept loop and
    /// connection tasks run on the owning `tokio` runtime regardless, so
    /// this only drains the loop's own tick state.
    pub fn process(&self) -> Result<()> {
        self.event_loop.borrow_mut().step(LOOP_TICK)
    }

    /// Stops accepting new connections, closes every node's sessions, and
    /// tears the listener down (§4.F `close`, §8 invariant 5).
    pub fn close(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.routes.borrow_mut().drain() {
            handle.close_all_sessions();
        }
        self.event_loop.borrow_mut().close();
        info!(local_addr = %self.local_addr, "dispatcher closed");
    }
}
