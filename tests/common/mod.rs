//! In-process network doubles for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const OK_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Read an HTTP request head, up to and including the blank line
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Some(buf)
}

async fn respond<S: AsyncWrite + Unpin>(stream: &mut S, response: &[u8]) {
    let _ = stream.write_all(response).await;
    let _ = stream.shutdown().await;
}

/// A web server answering every request with the same body
pub async fn serve_body(content_type: &'static str, body: String) -> String {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                if read_head(&mut stream).await.is_none() {
                    return;
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    content_type,
                    body.len(),
                    body
                );
                respond(&mut stream, response.as_bytes()).await;
            });
        }
    });
    format!("http://{}/", addr)
}

/// A forward HTTP proxy that answers every proxied request with 200 OK
pub async fn spawn_http_proxy() -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if read_head(&mut stream).await.is_some() {
                    respond(&mut stream, OK_RESPONSE).await;
                }
            });
        }
    });
    addr
}

/// A SOCKS5 proxy that accepts any credentials and answers the tunnelled
/// HTTP request itself with 200 OK
pub async fn spawn_socks5_proxy() -> SocketAddr {
    spawn_socks5(false).await
}

/// Like [`spawn_socks5_proxy`], but refuses clients that do not offer
/// username/password auth
pub async fn spawn_socks5_proxy_requiring_auth() -> SocketAddr {
    spawn_socks5(true).await
}

async fn spawn_socks5(require_auth: bool) -> SocketAddr {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = socks5_session(stream, require_auth).await;
            });
        }
    });
    addr
}

async fn socks5_session(mut stream: TcpStream, require_auth: bool) -> std::io::Result<()> {
    // greeting: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;

    if require_auth && !methods.contains(&0x02) {
        stream.write_all(&[0x05, 0xFF]).await?;
        return Ok(());
    }

    if methods.contains(&0x02) {
        stream.write_all(&[0x05, 0x02]).await?;
        // username/password: VER ULEN UNAME PLEN PASSWD
        let mut ver_ulen = [0u8; 2];
        stream.read_exact(&mut ver_ulen).await?;
        let mut user = vec![0u8; ver_ulen[1] as usize];
        stream.read_exact(&mut user).await?;
        let mut plen = [0u8; 1];
        stream.read_exact(&mut plen).await?;
        let mut pass = vec![0u8; plen[0] as usize];
        stream.read_exact(&mut pass).await?;
        stream.write_all(&[0x01, 0x00]).await?;
    } else {
        stream.write_all(&[0x05, 0x00]).await?;
    }

    // request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    let addr_len = match request[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => return Ok(()),
    };
    let mut dest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut dest).await?;
    stream
        .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;

    if read_head(&mut stream).await.is_some() {
        respond(&mut stream, OK_RESPONSE).await;
    }
    Ok(())
}

/// An address nothing listens on
pub async fn closed_addr() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}
