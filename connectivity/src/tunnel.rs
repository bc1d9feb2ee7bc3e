//! SSH port forwarding.
//!
//! [`SshTunnelOpener`] authenticates to an SSH server, binds a listener on
//! `127.0.0.1:0` and relays every accepted connection through a
//! `direct-tcpip` channel to the database host. The returned [`Tunnel`] is a
//! scoped resource: it stops forwarding when closed or dropped.
//!
//! The SSH host key is NOT verified. Only use tunnels to servers on a
//! trusted network path.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::TunnelSpec;

const LOOPBACK: &str = "127.0.0.1";
const IDLE_WAIT: Duration = Duration::from_millis(5);
const BUFFER_SIZE: usize = 16 * 1024;

#[async_trait]
pub trait TunnelOpener: Send + Sync {
    /// Opens a forward from a local port to `target_host:target_port` as seen
    /// from the SSH server.
    async fn open(&self, spec: &TunnelSpec, target_host: &str, target_port: u16) -> AppResult<Tunnel>;
}

/// Backend of an open tunnel.
pub trait TunnelHandle: Send {
    fn shutdown(&mut self);
}

/// An open port forward. Closing is idempotent and also happens on drop.
pub struct Tunnel {
    local_port: u16,
    handle: Mutex<Option<Box<dyn TunnelHandle>>>,
}

impl Tunnel {
    pub fn new(local_port: u16, handle: Box<dyn TunnelHandle>) -> Self {
        Self {
            local_port,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn is_open(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn close(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            handle.shutdown();
            tracing::info!(local_port = self.local_port, "SSH tunnel closed");
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("local_port", &self.local_port)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens tunnels with libssh2 using password authentication.
pub struct SshTunnelOpener {
    connect_timeout: Duration,
}

impl SshTunnelOpener {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TunnelOpener for SshTunnelOpener {
    async fn open(&self, spec: &TunnelSpec, target_host: &str, target_port: u16) -> AppResult<Tunnel> {
        let spec = spec.clone();
        let target = target_host.to_string();
        let timeout = self.connect_timeout;

        let forwarder = tokio::task::spawn_blocking(move || {
            SshForwarder::start(&spec, target, target_port, timeout)
        })
        .await
        .map_err(|e| AppError::Internal(format!("tunnel task failed: {}", e)))??;

        let local_port = forwarder.local_port;
        Ok(Tunnel::new(local_port, Box::new(forwarder)))
    }
}

fn tunnel_error(e: impl std::fmt::Display) -> AppError {
    AppError::TunnelFailed(e.to_string())
}

/// Non-blocking listener for the local end of the tunnel.
fn bind_local(addr: impl ToSocketAddrs) -> AppResult<(TcpListener, u16)> {
    let listener = TcpListener::bind(addr)
        .map_err(|e| AppError::TunnelFailed(format!("cannot bind local tunnel port: {}", e)))?;
    listener.set_nonblocking(true).map_err(tunnel_error)?;
    let local_port = listener.local_addr().map_err(tunnel_error)?.port();
    Ok((listener, local_port))
}

/// Where forwarded connections go, as seen from the SSH server.
struct Target {
    host: String,
    port: u16,
    open_timeout: Duration,
}

struct SshForwarder {
    local_port: u16,
    stop: Arc<AtomicBool>,
}

impl SshForwarder {
    fn start(spec: &TunnelSpec, target_host: String, target_port: u16, timeout: Duration) -> AppResult<Self> {
        let addr = (spec.host.as_str(), spec.port)
            .to_socket_addrs()
            .map_err(tunnel_error)?
            .next()
            .ok_or_else(|| AppError::TunnelFailed(format!("cannot resolve {}", spec.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(tunnel_error)?;

        let mut session = ssh2::Session::new().map_err(tunnel_error)?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(tunnel_error)?;
        session
            .userauth_password(&spec.user, &spec.password)
            .map_err(tunnel_error)?;
        if !session.authenticated() {
            return Err(AppError::TunnelFailed(format!(
                "authentication rejected for {}@{}",
                spec.user, spec.host
            )));
        }

        let (listener, local_port) = bind_local((LOOPBACK, 0))?;

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let target = Target {
            host: target_host,
            port: target_port,
            open_timeout: timeout,
        };
        thread::Builder::new()
            .name(format!("ssh-forward-{}", local_port))
            .spawn(move || forward_loop(session, listener, target, worker_stop))
            .map_err(tunnel_error)?;

        tracing::info!(
            ssh_host = %spec.host,
            ssh_port = spec.port,
            local_port,
            target_port,
            "SSH tunnel opened"
        );
        Ok(Self { local_port, stop })
    }
}

impl TunnelHandle for SshForwarder {
    /// Signals the worker; it closes open channels and disconnects the SSH
    /// session on its way out.
    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

struct Pipe {
    stream: TcpStream,
    channel: ssh2::Channel,
}

impl Pipe {
    /// Moves whatever is ready in either direction. `Ok(false)` means idle.
    fn pump(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut moved = false;

        match self.stream.read(buf) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                write_all_nonblocking(&mut self.channel, &buf[..n])?;
                moved = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        match self.channel.read(buf) {
            Ok(0) if self.channel.eof() => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(0) => {}
            Ok(n) => {
                write_all_nonblocking(&mut self.stream, &buf[..n])?;
                moved = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        Ok(moved)
    }

    fn close(mut self) {
        let _ = self.channel.close();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn write_all_nonblocking<W: Write>(writer: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e),
        }
    }
    loop {
        match writer.flush() {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(1)),
            other => return other,
        }
    }
}

fn forward_loop(session: ssh2::Session, listener: TcpListener, target: Target, stop: Arc<AtomicBool>) {
    let open_timeout_ms = u32::try_from(target.open_timeout.as_millis()).unwrap_or(u32::MAX);
    let mut pipes: Vec<Pipe> = Vec::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    session.set_timeout(0);
    session.set_blocking(false);

    while !stop.load(Ordering::Acquire) {
        let mut busy = false;

        match listener.accept() {
            Ok((stream, peer)) => {
                busy = true;
                // Channel open is blocking, bounded by the connect timeout.
                session.set_blocking(true);
                session.set_timeout(open_timeout_ms);
                let channel = session.channel_direct_tcpip(&target.host, target.port, None);
                session.set_timeout(0);
                session.set_blocking(false);
                match channel {
                    Ok(channel) => match stream.set_nonblocking(true) {
                        Ok(()) => {
                            tracing::debug!(peer = %peer, "Forwarding new connection");
                            pipes.push(Pipe { stream, channel });
                        }
                        Err(e) => tracing::warn!(error = %e, "Cannot configure forwarded socket"),
                    },
                    Err(e) => tracing::warn!(error = %e, target_port = target.port, "SSH server refused forward"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::warn!(error = %e, "Tunnel listener accept failed"),
        }

        let mut index = 0;
        while index < pipes.len() {
            match pipes[index].pump(&mut buf) {
                Ok(moved) => {
                    busy |= moved;
                    index += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Forwarded connection finished");
                    pipes.swap_remove(index).close();
                }
            }
        }

        if !busy {
            thread::sleep(IDLE_WAIT);
        }
    }

    for pipe in pipes {
        pipe.close();
    }
    session.set_blocking(true);
    session.set_timeout(1_000);
    if let Err(e) = session.disconnect(None, "tunnel closed", None) {
        tracing::debug!(error = %e, "SSH disconnect failed");
    }
}

/// Host and port the tunnel must reach, from the explicit fields or the URL.
///
/// The host defaults to `localhost`; the port falls back to `default_port`.
pub fn resolve_target(
    url: &str,
    host: Option<&str>,
    port: Option<u16>,
    default_port: Option<u16>,
) -> AppResult<(String, u16)> {
    let parsed = parse_endpoint(url);
    let host = host
        .map(str::to_string)
        .or_else(|| parsed.as_ref().and_then(|(h, _)| h.clone()))
        .unwrap_or_else(|| "localhost".to_string());
    let port = port
        .or_else(|| parsed.as_ref().and_then(|(_, p)| *p))
        .or(default_port)
        .ok_or_else(|| AppError::TunnelFailed(format!("cannot determine the database port for {}", host)))?;
    Ok((host, port))
}

fn parse_endpoint(url: &str) -> Option<(Option<String>, Option<u16>)> {
    let (_, rest) = split_jdbc(url);
    let parsed = url::Url::parse(rest).ok()?;
    Some((parsed.host_str().map(|h| unbracket(h).to_string()), parsed.port()))
}

/// Points `url` at `127.0.0.1:<local_port>` instead of `host:port`.
///
/// The URL is rewritten structurally when it parses; otherwise the first
/// textual `host:port` occurrence is replaced. A URL that references neither
/// is an error rather than being passed through unchanged.
pub fn rewrite_url(
    url: &str,
    host: &str,
    port: u16,
    local_port: u16,
    default_port: Option<u16>,
) -> AppResult<String> {
    if let Some(rewritten) = rewrite_structural(url, host, port, local_port, default_port) {
        return Ok(rewritten);
    }

    let needle = format!("{}:{}", host, port).to_ascii_lowercase();
    if let Some(start) = url.to_ascii_lowercase().find(&needle) {
        let end = start + needle.len();
        return Ok(format!("{}{}:{}{}", &url[..start], LOOPBACK, local_port, &url[end..]));
    }

    Err(AppError::TunnelFailed(format!(
        "connection URL does not reference {}:{}",
        host, port
    )))
}

fn rewrite_structural(
    url: &str,
    host: &str,
    port: u16,
    local_port: u16,
    default_port: Option<u16>,
) -> Option<String> {
    let (prefix, rest) = split_jdbc(url);
    let mut parsed = url::Url::parse(rest).ok()?;

    let url_host = parsed.host_str()?;
    if !unbracket(url_host).eq_ignore_ascii_case(unbracket(host)) {
        return None;
    }
    if parsed.port().or(default_port) != Some(port) {
        return None;
    }

    parsed.set_host(Some(LOOPBACK)).ok()?;
    parsed.set_port(Some(local_port)).ok()?;
    Some(format!("{}{}", prefix, parsed))
}

fn split_jdbc(url: &str) -> (&str, &str) {
    match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => url.split_at(5),
        _ => ("", url),
    }
}

fn unbracket(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandle(Arc<AtomicUsize>);

    impl TunnelHandle for CountingHandle {
        fn shutdown(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let tunnel = Tunnel::new(40000, Box::new(CountingHandle(closes.clone())));
        assert!(tunnel.is_open());
        tunnel.close();
        tunnel.close();
        assert!(!tunnel.is_open());
        drop(tunnel);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_listener_is_nonblocking() {
        let (listener, port) = bind_local((LOOPBACK, 0)).unwrap();
        assert_ne!(port, 0);
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn bind_failure_is_a_tunnel_error() {
        let taken = TcpListener::bind((LOOPBACK, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind_local((LOOPBACK, port)).unwrap_err();
        assert_eq!(err.category(), "TunnelFailed");
        assert!(err.to_string().contains("cannot bind local tunnel port"));
    }

    #[test]
    fn drop_closes_the_tunnel() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _tunnel = Tunnel::new(40001, Box::new(CountingHandle(closes.clone())));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rewrites_host_and_port() {
        let out = rewrite_url("postgres://app:pw@db.internal:5432/app?sslmode=disable", "db.internal", 5432, 61000, Some(5432))
            .unwrap();
        assert_eq!(out, "postgres://app:pw@127.0.0.1:61000/app?sslmode=disable");
    }

    #[test]
    fn host_match_ignores_case() {
        let out = rewrite_url("mysql://DB.Internal:3306/app", "db.internal", 3306, 61001, Some(3306)).unwrap();
        assert_eq!(out, "mysql://127.0.0.1:61001/app");
    }

    #[test]
    fn url_without_port_matches_default_port() {
        let out = rewrite_url("postgresql://db.internal/app", "db.internal", 5432, 61002, Some(5432)).unwrap();
        assert_eq!(out, "postgresql://127.0.0.1:61002/app");
    }

    #[test]
    fn ipv6_hosts_are_matched() {
        let out = rewrite_url("postgres://[::1]:5432/app", "::1", 5432, 61003, Some(5432)).unwrap();
        assert_eq!(out, "postgres://127.0.0.1:61003/app");
    }

    #[test]
    fn jdbc_prefix_is_preserved() {
        let out = rewrite_url("jdbc:postgresql://db:5432/app", "db", 5432, 61004, Some(5432)).unwrap();
        assert_eq!(out, "jdbc:postgresql://127.0.0.1:61004/app");
    }

    #[test]
    fn unparsable_url_uses_textual_replacement() {
        let out = rewrite_url("db:5432;databaseName=app", "db", 5432, 61005, None).unwrap();
        assert_eq!(out, "127.0.0.1:61005;databaseName=app");
    }

    #[test]
    fn mismatch_is_an_error() {
        let err = rewrite_url("postgres://other:5432/app", "db.internal", 5432, 61006, Some(5432)).unwrap_err();
        assert_eq!(err.category(), "TunnelFailed");
    }

    #[test]
    fn target_comes_from_fields_then_url() {
        assert_eq!(
            resolve_target("postgres://db.internal:6543/app", None, None, Some(5432)).unwrap(),
            ("db.internal".to_string(), 6543)
        );
        assert_eq!(
            resolve_target("postgres://db.internal/app", Some("10.0.0.5"), None, Some(5432)).unwrap(),
            ("10.0.0.5".to_string(), 5432)
        );
        assert!(resolve_target("sqlite::memory:", None, None, None).is_err());
    }
}
