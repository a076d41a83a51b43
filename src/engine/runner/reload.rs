//! Live reload over a WebSocket.
//!
//! Every page built in watch mode carries a small script that connects back
//! to this socket. Sending `"reload"` makes every open tab refresh itself.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

use crate::engine::{Task, TaskContext};
use crate::error::WatchError;

/// Preferred port of the reload socket.
pub const RELOAD_PORT: u16 = 1337;

/// Connections kept open at most; older ones are closed first.
const MAX_CLIENTS: usize = 10;

/// Something that can tell connected browsers to refresh.
pub trait Reload: Send + Sync {
    fn reload(&self) -> anyhow::Result<()>;
}

/// Pipeline step that fires a reload once its predecessors are done.
pub struct ReloadStep(pub Arc<dyn Reload>);

impl Task for ReloadStep {
    fn name(&self) -> &str {
        "reload"
    }

    fn execute(&self, _: &TaskContext) -> anyhow::Result<()> {
        self.0.reload()
    }
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// The WebSocket server behind live reload.
pub struct LiveReload {
    port: u16,
    tx: Sender<()>,
    clients: Clients,
    _threads: [JoinHandle<()>; 2],
}

impl LiveReload {
    /// Binds the socket and starts the accept and broadcast threads.
    pub fn start() -> Result<Self, WatchError> {
        let (tcp, port) = reserve_port().map_err(WatchError::Bind)?;
        let clients = Clients::default();

        let thread_i = new_thread_ws_incoming(tcp, clients.clone());
        let (tx, thread_o) = new_thread_ws_reload(clients.clone());

        Ok(Self {
            port,
            tx,
            clients,
            _threads: [thread_i, thread_o],
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of browsers currently connected.
    pub fn connected(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or(0)
    }
}

impl Reload for LiveReload {
    fn reload(&self) -> anyhow::Result<()> {
        self.tx
            .send(())
            .map_err(|_| anyhow::anyhow!("reload thread is gone"))
    }
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", RELOAD_PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let socket = match stream {
                Ok(stream) => tungstenite::accept(stream),
                Err(err) => {
                    tracing::debug!("incoming connection failed: {err}");
                    continue;
                }
            };

            match socket {
                Ok(socket) => match clients.lock() {
                    Ok(mut clients) => clients.push(socket),
                    Err(_) => break,
                },
                Err(err) => tracing::debug!("websocket handshake failed: {err}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let Ok(mut clients) = clients.lock() else {
                break;
            };

            broadcast(&mut clients);
        }
    });

    (tx, thread)
}

fn broadcast(clients: &mut Vec<WebSocket<TcpStream>>) {
    let mut broken = vec![];

    for (i, socket) in clients.iter_mut().enumerate() {
        match socket.send("reload".into()) {
            Ok(_) => {}
            Err(tungstenite::Error::Io(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                broken.push(i);
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                broken.push(i);
            }
            Err(e) => {
                tracing::error!("Error: {e:?}");
            }
        }
    }

    for i in broken.into_iter().rev() {
        clients.remove(i);
    }

    // Close all but the last few connections
    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close(None).ok();
        }
    }

    tracing::debug!(clients = clients.len(), "sent reload");
}
