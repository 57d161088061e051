//! Minimal RESP2 client for Redis/Valkey-compatible list servers.
//!
//! Speaks just enough of the protocol for the queue capability set: commands
//! are written as RESP arrays of bulk strings, replies are parsed for simple
//! strings, errors, integers, bulk strings, arrays, and nulls. One TCP
//! connection per backend, guarded by an async mutex; a broken connection is
//! dropped and re-established on the next command.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::QueueBackend;
use crate::error::{BusError, ConfigError};

/// A parsed RESP reply.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    Simple(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Reply>>),
}

pub struct RespBackend {
    addr: String,
    conn: Mutex<Option<BufStream<TcpStream>>>,
}

impl RespBackend {
    /// Connect to `valkey://host:port` or `redis://host:port` (port defaults
    /// to 6379). The connection is established eagerly so configuration
    /// errors surface at startup.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let addr = parse_queue_url(url)?;
        let stream = TcpStream::connect(&addr).await?;
        Ok(Self {
            addr,
            conn: Mutex::new(Some(BufStream::new(stream))),
        })
    }

    /// Issue one command and read one reply. On any I/O error the connection
    /// is discarded so the next command reconnects.
    async fn command(&self, args: &[&str]) -> Result<Reply, BusError> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            *guard = Some(BufStream::new(stream));
        }
        let stream = guard.as_mut().expect("connection just ensured");

        let result = async {
            stream.write_all(&encode_command(args)).await?;
            stream.flush().await?;
            read_reply(stream).await
        }
        .await;

        if result.is_err() {
            *guard = None;
        }
        result
    }
}

#[async_trait]
impl QueueBackend for RespBackend {
    async fn lpush(&self, key: &str, value: &str) -> Result<(), BusError> {
        match self.command(&["LPUSH", key, value]).await? {
            Reply::Integer(_) => Ok(()),
            other => Err(unexpected("LPUSH", &other)),
        }
    }

    async fn brpop(
        &self,
        key: &str,
        timeout_secs: u64,
    ) -> Result<Option<(String, String)>, BusError> {
        let timeout = timeout_secs.to_string();
        match self.command(&["BRPOP", key, &timeout]).await? {
            Reply::Array(None) => Ok(None),
            Reply::Array(Some(items)) => match items.as_slice() {
                [Reply::Bulk(Some(k)), Reply::Bulk(Some(v))] => {
                    Ok(Some((k.clone(), v.clone())))
                }
                _ => Err(BusError::Protocol("BRPOP returned malformed pair".into())),
            },
            other => Err(unexpected("BRPOP", &other)),
        }
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, BusError> {
        match self.command(&["RPOP", key]).await? {
            Reply::Bulk(value) => Ok(value),
            other => Err(unexpected("RPOP", &other)),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, BusError> {
        match self.command(&["KEYS", pattern]).await? {
            Reply::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(Some(k)) => Ok(k),
                    other => Err(unexpected("KEYS", &other)),
                })
                .collect(),
            Reply::Array(None) => Ok(Vec::new()),
            other => Err(unexpected("KEYS", &other)),
        }
    }

    async fn del(&self, key: &str) -> Result<u64, BusError> {
        match self.command(&["DEL", key]).await? {
            Reply::Integer(n) => Ok(n.max(0) as u64),
            other => Err(unexpected("DEL", &other)),
        }
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut guard = self.conn.lock().await;
        if let Some(mut stream) = guard.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire encoding / decoding
// ---------------------------------------------------------------------------

fn parse_queue_url(url: &str) -> Result<String, BusError> {
    let rest = url
        .strip_prefix("valkey://")
        .or_else(|| url.strip_prefix("redis://"))
        .ok_or_else(|| ConfigError::BadQueueUrl {
            url: url.to_string(),
            message: "expected valkey:// or redis:// scheme".to_string(),
        })?;
    if rest.is_empty() {
        return Err(ConfigError::BadQueueUrl {
            url: url.to_string(),
            message: "missing host".to_string(),
        }
        .into());
    }
    Ok(if rest.contains(':') {
        rest.to_string()
    } else {
        format!("{rest}:6379")
    })
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Read one reply. Boxed for the recursive array case.
fn read_reply<'a>(
    stream: &'a mut BufStream<TcpStream>,
) -> Pin<Box<dyn Future<Output = Result<Reply, BusError>> + Send + 'a>> {
    Box::pin(async move {
        let line = read_line(stream).await?;
        let (kind, rest) = line.split_at(1);
        match kind {
            "+" => Ok(Reply::Simple(rest.to_string())),
            "-" => Err(BusError::Server(rest.to_string())),
            ":" => rest
                .parse()
                .map(Reply::Integer)
                .map_err(|_| BusError::Protocol(format!("bad integer reply: {rest}"))),
            "$" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| BusError::Protocol(format!("bad bulk length: {rest}")))?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let mut data = vec![0u8; len as usize + 2];
                stream.read_exact(&mut data).await?;
                data.truncate(len as usize);
                let text = String::from_utf8(data)
                    .map_err(|_| BusError::Protocol("non-UTF-8 bulk string".into()))?;
                Ok(Reply::Bulk(Some(text)))
            }
            "*" => {
                let len: i64 = rest
                    .parse()
                    .map_err(|_| BusError::Protocol(format!("bad array length: {rest}")))?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(stream).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => Err(BusError::Protocol(format!("unknown reply type: {other}"))),
        }
    })
}

async fn read_line(stream: &mut BufStream<TcpStream>) -> Result<String, BusError> {
    let mut line = String::new();
    let n = stream.read_line(&mut line).await?;
    if n == 0 {
        return Err(BusError::Protocol("connection closed by server".into()));
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    if line.is_empty() {
        return Err(BusError::Protocol("empty reply line".into()));
    }
    Ok(line)
}

fn unexpected(cmd: &str, reply: &Reply) -> BusError {
    BusError::Protocol(format!("{cmd} returned unexpected reply: {reply:?}"))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_command_produces_resp_array() {
        let encoded = encode_command(&["LPUSH", "queue:a", "hi"]);
        assert_eq!(
            encoded,
            b"*3\r\n$5\r\nLPUSH\r\n$7\r\nqueue:a\r\n$2\r\nhi\r\n"
        );
    }

    #[test]
    fn parse_queue_url_accepts_both_schemes() {
        assert_eq!(parse_queue_url("valkey://localhost:6379").unwrap(), "localhost:6379");
        assert_eq!(parse_queue_url("redis://10.0.0.2:7000").unwrap(), "10.0.0.2:7000");
        assert_eq!(parse_queue_url("valkey://queues").unwrap(), "queues:6379");
    }

    #[test]
    fn parse_queue_url_rejects_unknown_scheme() {
        assert!(parse_queue_url("http://localhost").is_err());
        assert!(parse_queue_url("valkey://").is_err());
    }

    /// Drives the backend against a scripted in-process TCP server that
    /// answers with canned RESP replies.
    async fn scripted_server(replies: Vec<&'static [u8]>) -> (RespBackend, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            for reply in replies {
                // Consume whatever the client sent, then answer.
                let _ = socket.read(&mut buf).await.unwrap();
                socket.write_all(reply).await.unwrap();
            }
        });

        let backend = RespBackend::connect(&format!("redis://{addr}")).await.unwrap();
        (backend, handle)
    }

    #[tokio::test]
    async fn lpush_parses_integer_reply() {
        let (backend, server) = scripted_server(vec![b":1\r\n"]).await;
        backend.lpush("queue:a", "x").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn brpop_parses_pair_and_null() {
        let (backend, server) = scripted_server(vec![
            b"*2\r\n$7\r\nqueue:a\r\n$5\r\nhello\r\n",
            b"*-1\r\n",
        ])
        .await;

        let got = backend.brpop("queue:a", 1).await.unwrap();
        assert_eq!(got, Some(("queue:a".to_string(), "hello".to_string())));

        let empty = backend.brpop("queue:a", 1).await.unwrap();
        assert_eq!(empty, None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rpop_parses_bulk_and_nil() {
        let (backend, server) =
            scripted_server(vec![b"$2\r\nhi\r\n", b"$-1\r\n"]).await;

        assert_eq!(backend.rpop("queue:a").await.unwrap().as_deref(), Some("hi"));
        assert_eq!(backend.rpop("queue:a").await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn keys_parses_string_array() {
        let (backend, server) =
            scripted_server(vec![b"*2\r\n$7\r\nqueue:a\r\n$7\r\nqueue:b\r\n"]).await;

        let keys = backend.keys("queue:*").await.unwrap();
        assert_eq!(keys, vec!["queue:a", "queue:b"]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn server_error_reply_surfaces() {
        let (backend, server) = scripted_server(vec![b"-ERR wrong type\r\n"]).await;
        let err = backend.del("queue:a").await.unwrap_err();
        assert!(matches!(err, BusError::Server(msg) if msg.contains("wrong type")));
        server.await.unwrap();
    }
}
