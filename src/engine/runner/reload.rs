//! WebSocket side of the live-reload channel.
//!
//! One thread accepts browser connections, another waits on the reload bus
//! and broadcasts `"reload"` to every connected socket.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

use crate::core::{LiveReload, lock};

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Starts the reload server and connects it to the bus. Returns the port
/// browsers should connect to.
pub(crate) fn start(reload: &LiveReload, preferred: u16) -> std::io::Result<u16> {
    if let Some(port) = reload.port() {
        return Ok(port);
    }

    let (tcp, port) = reserve_port(preferred)?;
    let clients = Arc::new(Mutex::new(vec![]));

    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx, _thread_o) = new_thread_ws_reload(clients);

    reload.connect(tx, port);
    tracing::info!(port, "live reload listening");

    Ok(port)
}

/// Client snippet that reloads the page when the server says so.
pub(crate) fn refresh_script(port: u16) -> String {
    format!(
        r#"
const socket = new WebSocket("ws://" + location.hostname + ":{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
    )
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => lock(&clients).push(socket),
                Err(e) => tracing::warn!("reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            // Writes that land together only need one refresh.
            while rx.try_recv().is_ok() {}

            let mut clients = lock(&clients);
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_script_uses_port() {
        let script = refresh_script(4242);
        assert!(script.contains(":4242"));
        assert!(script.contains("window.location.reload()"));
    }

    #[test]
    fn test_start_is_idempotent() {
        let reload = LiveReload::default();
        let first = start(&reload, 0).unwrap();
        let second = start(&reload, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(reload.port(), Some(first));
    }
}
