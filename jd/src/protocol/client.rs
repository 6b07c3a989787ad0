//! TCP client for talking to the job server
//!
//! Each request opens a connection, sends one framed command, reads one
//! framed reply, and closes the connection.

use std::time::Duration;

use eyre::{Context, Result};
use tokio::net::TcpStream;
use tracing::debug;

use super::codec::{Command, CommandCodec, Reply};
use super::frame::{DEFAULT_MAX_FRAME_SIZE, read_frame, write_frame};

/// Default timeout for connect, write, and read
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one job server address
#[derive(Debug, Clone)]
pub struct JobClient {
    addr: String,
    codec: CommandCodec,
    timeout: Duration,
    max_frame_size: usize,
}

impl JobClient {
    /// Create a client using the default field codec
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            codec: CommandCodec::default(),
            timeout: DEFAULT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Use a specific command codec (must match the server's)
    pub fn with_codec(mut self, codec: CommandCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn add(
        &self,
        name: &str,
        filename: &str,
        launch_command: &str,
        interval_ms: u64,
        file_contents: &str,
    ) -> Result<Reply> {
        self.send(&Command::Add {
            name: name.to_string(),
            filename: filename.to_string(),
            launch_command: launch_command.to_string(),
            interval_ms,
            file_contents: file_contents.to_string(),
        })
        .await
    }

    pub async fn remove(&self, name: &str) -> Result<Reply> {
        self.send(&Command::Remove { name: name.to_string() }).await
    }

    pub async fn start(&self, name: &str) -> Result<Reply> {
        self.send(&Command::Start { name: name.to_string() }).await
    }

    pub async fn stop(&self, name: &str) -> Result<Reply> {
        self.send(&Command::Stop { name: name.to_string() }).await
    }

    pub async fn list(&self) -> Result<Reply> {
        self.send(&Command::List).await
    }

    pub async fn get(&self, name: &str) -> Result<Reply> {
        self.send(&Command::Get { name: name.to_string() }).await
    }

    /// Ask the server to stop accepting connections
    pub async fn shutdown(&self) -> Result<Reply> {
        self.send(&Command::Shutdown).await
    }

    /// Send one command on a fresh connection and wait for the reply
    pub async fn send(&self, command: &Command) -> Result<Reply> {
        debug!(addr = %self.addr, command = command.name(), "JobClient: sending command");

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to job server")?;

        self.send_on_stream(&mut stream, command).await
    }

    /// Send a command on an existing stream
    ///
    /// Lets callers keep one connection open for several commands.
    pub async fn send_on_stream(&self, stream: &mut TcpStream, command: &Command) -> Result<Reply> {
        let payload = self.codec.encode(command).context("Failed to encode command")?;

        tokio::time::timeout(self.timeout, write_frame(stream, &payload))
            .await
            .context("Write timeout")?
            .context("Failed to write command")?;

        let raw = tokio::time::timeout(self.timeout, read_frame(stream, self.max_frame_size))
            .await
            .context("Read timeout")?
            .context("Failed to read reply")?;

        let text = String::from_utf8(raw).context("Reply is not valid UTF-8")?;
        let reply = Reply::parse(&text);
        debug!(?reply, "JobClient: received reply");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_client_with_timeout() {
        let client = JobClient::new("127.0.0.1:1").with_timeout(Duration::from_secs(10));
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.addr(), "127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_send_against_mock_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mock_server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let payload = read_frame(&mut stream, 1024).await.unwrap();
            let command = CommandCodec::fields().decode(&payload).unwrap();
            assert_eq!(command, Command::List);
            write_frame(&mut stream, br#"list ["a"]"#).await.unwrap();
        });

        let client = JobClient::new(addr);
        let reply = client.list().await.unwrap();
        assert_eq!(reply, Reply::List(vec!["a".to_string()]));

        mock_server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_fails_when_server_closes_early() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mock_server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream, 1024).await.unwrap();
        });

        let client = JobClient::new(addr);
        assert!(client.get("x").await.is_err());

        mock_server.await.unwrap();
    }
}
