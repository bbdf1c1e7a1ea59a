//! Loopback SOCKS5 relay for endpoints that carry a username but no password
//!
//! reqwest only authenticates to a SOCKS5 proxy when the URL has a non-empty
//! password, so `socks5://uuid@host:port` would be dialled with no-auth only.
//! The relay accepts reqwest's no-auth CONNECT on loopback and repeats it
//! upstream, offering username/password auth with an empty password.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;
use url::Url;

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const USER_PASS: u8 = 0x02;
const NO_ACCEPTABLE_METHOD: u8 = 0xFF;
const AUTH_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const REP_SUCCEEDED: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Default SOCKS port when the endpoint omits one
const DEFAULT_PORT: u16 = 1080;

/// Upstream `host:port` and username of a `socks5://user@host:port` endpoint
/// without a password, `None` for anything reqwest can dial itself
pub fn username_only_target(url: &Url) -> Option<(String, String)> {
    if !matches!(url.scheme(), "socks5" | "socks5h") {
        return None;
    }
    if url.username().is_empty() || url.password().is_some() {
        return None;
    }
    let host = url.host_str()?;
    let upstream = format!("{}:{}", host, url.port().unwrap_or(DEFAULT_PORT));
    Some((upstream, url.username().to_string()))
}

/// A no-auth SOCKS5 listener on loopback forwarding to an authenticated
/// upstream. Stops accepting, and drops open sessions, when dropped.
pub struct AuthRelay {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl AuthRelay {
    pub async fn bind(upstream: String, username: String) -> io::Result<Self> {
        if username.is_empty() || username.len() > u8::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "socks5 username must be 1 to 255 bytes",
            ));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            while let Ok((client, _)) = listener.accept().await {
                let upstream = upstream.clone();
                let username = username.clone();
                sessions.spawn(async move {
                    if let Err(e) = relay_session(client, &upstream, &username).await {
                        debug!(%upstream, error = %e, "socks relay session failed");
                    }
                });
            }
        });

        Ok(Self { addr, task })
    }

    /// Endpoint reqwest should dial instead of the original one
    pub fn proxy_url(&self) -> String {
        format!("socks5://{}", self.addr)
    }
}

impl Drop for AuthRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay_session(mut client: TcpStream, upstream: &str, username: &str) -> io::Result<()> {
    // greeting: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;
    if !methods.contains(&NO_AUTH) {
        client.write_all(&[VERSION, NO_ACCEPTABLE_METHOD]).await?;
        return Ok(());
    }
    client.write_all(&[VERSION, NO_AUTH]).await?;

    // request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    if request[1] != CMD_CONNECT {
        client.write_all(&reply(REP_COMMAND_NOT_SUPPORTED)).await?;
        return Ok(());
    }
    let target = read_address(&mut client, request[3]).await?;

    let mut server = match connect_upstream(upstream, username, &target).await {
        Ok(server) => server,
        Err(e) => {
            let _ = client.write_all(&reply(REP_GENERAL_FAILURE)).await;
            return Err(e);
        }
    };
    client.write_all(&reply(REP_SUCCEEDED)).await?;
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

/// Dial `upstream`, authenticate as `username` with an empty password if
/// asked to, and CONNECT to the raw `ATYP ADDR PORT` bytes in `target`
async fn connect_upstream(upstream: &str, username: &str, target: &[u8]) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(upstream).await?;
    stream.write_all(&[VERSION, 2, NO_AUTH, USER_PASS]).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    match choice {
        [VERSION, NO_AUTH] => {}
        [VERSION, USER_PASS] => {
            // VER ULEN UNAME PLEN(0)
            let mut auth = Vec::with_capacity(username.len() + 3);
            auth.extend_from_slice(&[AUTH_VERSION, username.len() as u8]);
            auth.extend_from_slice(username.as_bytes());
            auth.push(0);
            stream.write_all(&auth).await?;

            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "socks5 authentication rejected",
                ));
            }
        }
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "socks5 server accepted no offered auth method",
            ))
        }
    }

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    request.extend_from_slice(target);
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != REP_SUCCEEDED {
        return Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("socks5 connect failed, REP={}", head[1]),
        ));
    }
    read_address(&mut stream, head[3]).await?;
    Ok(stream)
}

/// Read `ADDR PORT` for the given address type, returning `ATYP ADDR PORT`
async fn read_address<S: AsyncRead + Unpin>(stream: &mut S, atyp: u8) -> io::Result<Vec<u8>> {
    let mut address = vec![atyp];
    let len = match atyp {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            address.push(len);
            len as usize
        }
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown socks5 address type {}", atyp),
            ))
        }
    };
    let start = address.len();
    address.resize(start + len + 2, 0);
    stream.read_exact(&mut address[start..]).await?;
    Ok(address)
}

fn reply(rep: u8) -> [u8; 10] {
    [VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}
