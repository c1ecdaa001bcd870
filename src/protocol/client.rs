//! beanstalkd text protocol over tokio TCP.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::error::{ProtocolError, ProtocolResult};
use super::{validate_tube_name, yaml, Connection, Job, JobState, DEFAULT_TUBE};

/// Largest body a reply may announce. beanstalkd caps `-z` at 1 GiB, so
/// anything above that is a corrupt header.
pub const MAX_BODY_LEN: u64 = 1 << 30;

/// A single beanstalkd session.
///
/// Tracks the used tube and watch list so `use`, `watch` and `ignore` are
/// only sent when they change something.
pub struct BeanstalkConnection {
    stream: BufStream<TcpStream>,
    addr: String,
    used: String,
    watched: Vec<String>,
}

impl BeanstalkConnection {
    /// Dial a beanstalkd server.
    pub async fn connect(addr: &str) -> ProtocolResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);

        // Detect a server that vanished while we sit in a long reserve
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(5))
            .with_retries(3);
        let _ = SockRef::from(&stream).set_tcp_keepalive(&keepalive);

        debug!(addr = %addr, "beanstalk connection opened");

        Ok(Self {
            stream: BufStream::new(stream),
            addr: addr.to_string(),
            used: DEFAULT_TUBE.to_string(),
            watched: vec![DEFAULT_TUBE.to_string()],
        })
    }

    /// Server address this connection was dialed to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Tubes currently on the watch list.
    pub fn watched(&self) -> &[String] {
        &self.watched
    }

    async fn send(&mut self, cmd: &str, body: Option<&[u8]>) -> ProtocolResult<()> {
        trace!(cmd = %cmd, "send");
        self.stream.write_all(cmd.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if let Some(body) = body {
            self.stream.write_all(body).await?;
            self.stream.write_all(b"\r\n").await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> ProtocolResult<String> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        trace!(reply = %line, "recv");
        Ok(line)
    }

    async fn read_body(&mut self, len: u64) -> ProtocolResult<Bytes> {
        if len > MAX_BODY_LEN {
            return Err(ProtocolError::UnexpectedReply(format!(
                "announced body of {} bytes exceeds {} byte limit",
                len, MAX_BODY_LEN
            )));
        }
        let len = len as usize;
        let mut buf = vec![0u8; len + 2];
        self.stream.read_exact(&mut buf).await?;
        if !buf.ends_with(b"\r\n") {
            return Err(ProtocolError::UnexpectedReply(
                "job body not terminated by CRLF".to_string(),
            ));
        }
        buf.truncate(len);
        Ok(Bytes::from(buf))
    }

    /// Send a command and return its reply line, mapping generic errors.
    async fn command(&mut self, cmd: &str, body: Option<&[u8]>) -> ProtocolResult<String> {
        self.send(cmd, body).await?;
        let line = self.read_line().await?;
        match ProtocolError::from_reply(&line) {
            Some(err) => Err(err),
            None => Ok(line),
        }
    }

    async fn use_tube(&mut self, tube: &str) -> ProtocolResult<()> {
        validate_tube_name(tube)?;
        if self.used == tube {
            return Ok(());
        }
        let line = self.command(&format!("use {}", tube), None).await?;
        expect_args(&line, "USING")?;
        self.used = tube.to_string();
        Ok(())
    }

    async fn watch_exactly(&mut self, tubes: &[String]) -> ProtocolResult<()> {
        for tube in tubes {
            if self.watched.contains(tube) {
                continue;
            }
            validate_tube_name(tube)?;
            let line = self.command(&format!("watch {}", tube), None).await?;
            expect_args(&line, "WATCHING")?;
            self.watched.push(tube.clone());
        }

        let stale: Vec<String> = self
            .watched
            .iter()
            .filter(|w| !tubes.contains(w))
            .cloned()
            .collect();
        for tube in stale {
            let line = self.command(&format!("ignore {}", tube), None).await?;
            expect_args(&line, "WATCHING")?;
            self.watched.retain(|w| *w != tube);
        }

        Ok(())
    }

    /// Read the `<id> <bytes>` header args and the body that follows.
    async fn read_job(&mut self, line: &str, word: &str) -> ProtocolResult<(u64, Bytes)> {
        let args = expect_args(line, word)?;
        let (id, len) = args
            .split_once(' ')
            .ok_or_else(|| ProtocolError::UnexpectedReply(line.to_string()))?;
        let id = parse_num(id, line)?;
        let len = parse_num(len, line)?;
        let body = self.read_body(len).await?;
        Ok((id, body))
    }

    async fn read_yaml(&mut self, cmd: &str) -> ProtocolResult<Bytes> {
        let line = self.command(cmd, None).await?;
        let len = parse_num(expect_args(&line, "OK")?, &line)?;
        self.read_body(len).await
    }
}

#[async_trait]
impl Connection for BeanstalkConnection {
    async fn put(
        &mut self,
        tube: &str,
        body: &[u8],
        priority: u32,
        delay: Duration,
        ttr: Duration,
    ) -> ProtocolResult<u64> {
        self.use_tube(tube).await?;
        let cmd = format!(
            "put {} {} {} {}",
            priority,
            delay.as_secs(),
            ttr.as_secs(),
            body.len()
        );
        let line = self.command(&cmd, Some(body)).await?;
        if let Ok(id) = expect_args(&line, "BURIED") {
            return Err(ProtocolError::Buried(parse_num(id, &line)?));
        }
        parse_num(expect_args(&line, "INSERTED")?, &line)
    }

    async fn bury(&mut self, id: u64, priority: u32) -> ProtocolResult<()> {
        let line = self.command(&format!("bury {} {}", id, priority), None).await?;
        expect_exact(&line, "BURIED")
    }

    async fn kick(&mut self, tube: &str, bound: u32) -> ProtocolResult<u64> {
        self.use_tube(tube).await?;
        let line = self.command(&format!("kick {}", bound), None).await?;
        parse_num(expect_args(&line, "KICKED")?, &line)
    }

    async fn touch(&mut self, id: u64) -> ProtocolResult<()> {
        let line = self.command(&format!("touch {}", id), None).await?;
        expect_exact(&line, "TOUCHED")
    }

    async fn peek(&mut self, id: u64) -> ProtocolResult<Bytes> {
        let line = self.command(&format!("peek {}", id), None).await?;
        let (_, body) = self.read_job(&line, "FOUND").await?;
        Ok(body)
    }

    async fn peek_state(&mut self, tube: &str, state: JobState) -> ProtocolResult<Job> {
        self.use_tube(tube).await?;
        let line = self.command(&format!("peek-{}", state), None).await?;
        let (id, body) = self.read_job(&line, "FOUND").await?;
        Ok(Job {
            id,
            tube: tube.to_string(),
            body,
        })
    }

    async fn reserve(
        &mut self,
        tubes: &[String],
        timeout: Duration,
    ) -> ProtocolResult<(u64, Bytes)> {
        if !tubes.is_empty() {
            self.watch_exactly(tubes).await?;
        }
        let cmd = format!("reserve-with-timeout {}", timeout.as_secs());
        let line = self.command(&cmd, None).await?;
        self.read_job(&line, "RESERVED").await
    }

    async fn list_tubes(&mut self) -> ProtocolResult<Vec<String>> {
        let data = self.read_yaml("list-tubes").await?;
        yaml::parse_list(&data)
    }

    async fn stats_job(&mut self, id: u64) -> ProtocolResult<HashMap<String, String>> {
        let data = self.read_yaml(&format!("stats-job {}", id)).await?;
        yaml::parse_dict(&data)
    }

    async fn stats_tube(&mut self, tube: &str) -> ProtocolResult<HashMap<String, String>> {
        validate_tube_name(tube)?;
        let data = self.read_yaml(&format!("stats-tube {}", tube)).await?;
        yaml::parse_dict(&data)
    }

    async fn delete(&mut self, id: u64) -> ProtocolResult<()> {
        let line = self.command(&format!("delete {}", id), None).await?;
        expect_exact(&line, "DELETED")
    }

    async fn quit(&mut self) -> ProtocolResult<()> {
        self.send("quit", None).await?;
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }
}

/// Strip `word ` from the start of `line`, returning the arguments.
fn expect_args<'a>(line: &'a str, word: &str) -> ProtocolResult<&'a str> {
    line.strip_prefix(word)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or_else(|| ProtocolError::UnexpectedReply(line.to_string()))
}

fn expect_exact(line: &str, word: &str) -> ProtocolResult<()> {
    if line == word {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedReply(line.to_string()))
    }
}

fn parse_num(s: &str, line: &str) -> ProtocolResult<u64> {
    s.trim()
        .parse()
        .map_err(|_| ProtocolError::UnexpectedReply(line.to_string()))
}
