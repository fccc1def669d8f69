//! Blocking Redis client
//!
//! One [`RedisConnection`] per scan. Every socket operation is bounded by the
//! configuration's timeout, so an unresponsive server truncates the scan
//! instead of hanging the build.

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

use extscore_core::SourceConfig;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::protocol::{ExternalStore, StoreConnector};
use crate::resp::{encode_command, read_value, RespValue};

/// Connector opening [`RedisConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl StoreConnector for RedisConnector {
    fn connect(&self, config: &SourceConfig) -> StoreResult<Box<dyn ExternalStore>> {
        Ok(Box::new(RedisConnection::connect(config)?))
    }
}

/// A RESP2 connection to a Redis-compatible server
pub struct RedisConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    out: Vec<u8>,
}

impl RedisConnection {
    /// Connect to `config.address()` with the configured timeout applied to
    /// connect, read and write.
    pub fn connect(config: &SourceConfig) -> StoreResult<Self> {
        let timeout = config.timeout();
        let addrs = (config.host(), config.port())
            .to_socket_addrs()
            .map_err(|e| StoreError::Unreachable(format!("{}: {}", config.address(), e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    let writer = stream.try_clone()?;
                    debug!(target: "extscore::scan", address = %addr, "Connected to external store");
                    return Ok(RedisConnection {
                        reader: BufReader::new(stream),
                        writer,
                        out: Vec::with_capacity(256),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(StoreError::Unreachable(match last_err {
            Some(e) => format!("{}: {}", config.address(), e),
            None => format!("{}: no addresses resolved", config.address()),
        }))
    }

    /// Send one command and read its reply. Error replies become
    /// `StoreError::Server`.
    pub fn command(&mut self, args: &[&[u8]]) -> StoreResult<RespValue> {
        self.out.clear();
        encode_command(args, &mut self.out);
        self.writer.write_all(&self.out)?;
        self.writer.flush()?;
        read_value(&mut self.reader)?.into_result()
    }
}

impl ExternalStore for RedisConnection {
    fn auth(&mut self, password: &str) -> StoreResult<()> {
        match self.command(&[b"AUTH", password.as_bytes()]) {
            Ok(RespValue::Simple(ref s)) if s == "OK" => Ok(()),
            Ok(other) => Err(StoreError::Auth(format!("unexpected reply {:?}", other))),
            Err(StoreError::Server(msg)) => Err(StoreError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    fn range_with_scores(
        &mut self,
        key: &str,
        start: i64,
        end: i64,
    ) -> StoreResult<Vec<(String, f64)>> {
        let start = start.to_string();
        let end = end.to_string();
        let reply = self.command(&[
            b"ZRANGE",
            key.as_bytes(),
            start.as_bytes(),
            end.as_bytes(),
            b"WITHSCORES",
        ])?;
        let items = expect_array(reply, "ZRANGE")?;
        if items.len() % 2 != 0 {
            return Err(StoreError::Protocol(
                "ZRANGE WITHSCORES returned an odd number of items".to_string(),
            ));
        }

        let mut out = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
            let member = member
                .as_text()
                .ok_or_else(|| StoreError::Protocol("ZRANGE member is not a string".to_string()))?;
            let score_text = score
                .as_text()
                .ok_or_else(|| StoreError::Protocol("ZRANGE score is not a string".to_string()))?;
            let score: f64 = score_text.parse().map_err(|_| {
                StoreError::Protocol(format!("ZRANGE score '{}' is not a number", score_text))
            })?;
            out.push((member, score));
        }
        Ok(out)
    }

    fn scan(&mut self, cursor: &str, count: usize) -> StoreResult<(String, Vec<String>)> {
        let count = count.to_string();
        let reply = self.command(&[b"SCAN", cursor.as_bytes(), b"COUNT", count.as_bytes()])?;
        let mut parts = expect_array(reply, "SCAN")?.into_iter();
        let (Some(next), Some(keys), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(StoreError::Protocol("SCAN reply must have two items".to_string()));
        };
        let next = next
            .as_text()
            .ok_or_else(|| StoreError::Protocol("SCAN cursor is not a string".to_string()))?;
        let keys = expect_array(keys, "SCAN")?
            .into_iter()
            .map(|k| {
                k.as_text()
                    .ok_or_else(|| StoreError::Protocol("SCAN key is not a string".to_string()))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((next, keys))
    }

    fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        match self.command(&[b"GET", key.as_bytes()])? {
            RespValue::Bulk(None) => Ok(None),
            other => other
                .as_text()
                .map(Some)
                .ok_or_else(|| StoreError::Protocol(format!("GET returned {:?}", other))),
        }
    }
}

fn expect_array(reply: RespValue, command: &str) -> StoreResult<Vec<RespValue>> {
    match reply {
        RespValue::Array(Some(items)) => Ok(items),
        RespValue::Array(None) => Ok(Vec::new()),
        other => Err(StoreError::Protocol(format!(
            "{} returned {:?} instead of an array",
            command, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extscore_core::LayoutKind;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    /// Serve canned replies, one per received command, and return the
    /// commands seen (as their first argument).
    fn fake_server(replies: Vec<&'static [u8]>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = std::io::BufReader::new(stream);
            let mut seen = Vec::new();
            for reply in replies {
                match read_value(&mut reader) {
                    Ok(RespValue::Array(Some(args))) => {
                        seen.push(args[0].as_text().unwrap());
                    }
                    _ => break,
                }
                writer.write_all(reply).unwrap();
            }
            // drain until the client hangs up
            let mut rest = Vec::new();
            let _ = reader.read_to_end(&mut rest);
            seen
        });
        (port, handle)
    }

    fn config(port: u16) -> SourceConfig {
        SourceConfig::new(LayoutKind::SortedSet, "pop", "id")
            .with_address("127.0.0.1", port)
            .with_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_auth_ok_and_rejected() {
        let (port, server) = fake_server(vec![b"+OK\r\n", b"-ERR invalid password\r\n"]);
        let mut conn = RedisConnection::connect(&config(port)).unwrap();
        conn.auth("right").unwrap();
        let err = conn.auth("wrong").unwrap_err();
        assert!(matches!(err, StoreError::Auth(_)));
        drop(conn);
        assert_eq!(server.join().unwrap(), vec!["AUTH", "AUTH"]);
    }

    #[test]
    fn test_zrange_with_scores() {
        let (port, server) = fake_server(vec![
            b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$3\r\n2.5\r\n",
        ]);
        let mut conn = RedisConnection::connect(&config(port)).unwrap();
        let page = conn.range_with_scores("pop", 0, 10).unwrap();
        assert_eq!(page, vec![("a".to_string(), 1.0), ("b".to_string(), 2.5)]);
        drop(conn);
        assert_eq!(server.join().unwrap(), vec!["ZRANGE"]);
    }

    #[test]
    fn test_scan_and_get() {
        let (port, server) = fake_server(vec![
            b"*2\r\n$1\r\n0\r\n*1\r\n$8\r\norders:7\r\n",
            b"$3\r\n3.5\r\n",
            b"$-1\r\n",
        ]);
        let mut conn = RedisConnection::connect(&config(port)).unwrap();
        let (cursor, keys) = conn.scan("0", 100).unwrap();
        assert_eq!(cursor, "0");
        assert_eq!(keys, vec!["orders:7"]);
        assert_eq!(conn.get("orders:7").unwrap(), Some("3.5".to_string()));
        assert_eq!(conn.get("orders:8").unwrap(), None);
        drop(conn);
        assert_eq!(server.join().unwrap(), vec!["SCAN", "GET", "GET"]);
    }

    #[test]
    fn test_server_error_is_command_scoped() {
        let (port, server) = fake_server(vec![
            b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
            b"$1\r\n1\r\n",
        ]);
        let mut conn = RedisConnection::connect(&config(port)).unwrap();
        let err = conn.get("pop").unwrap_err();
        assert!(err.is_command_scoped());
        assert_eq!(conn.get("pop:1").unwrap(), Some("1".to_string()));
        drop(conn);
        server.join().unwrap();
    }

    #[test]
    fn test_unreachable() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let result = RedisConnection::connect(&config(port).with_timeout(Duration::from_millis(200)));
        assert!(matches!(result, Err(StoreError::Unreachable(_))));
    }

    #[test]
    fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });
        let mut conn =
            RedisConnection::connect(&config(port).with_timeout(Duration::from_millis(100))).unwrap();
        let err = conn.get("k").unwrap_err();
        assert!(err.is_timeout());
        server.join().unwrap();
    }
}
