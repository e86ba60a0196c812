//! Minimal async client.
//!
//! Sends each command as one canonical frame in a single write and reads
//! back exactly one reply. Used by the integration tests and benchmarks.
//!
//! # Example
//!
//! ```ignore
//! use emberkv::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:6379").await?;
//! client.command(&["SET", "name", "Ariz"]).await?;
//! let reply = client.command(&["GET", "name"]).await?;
//! println!("{}", reply);
//! ```

use crate::protocol::{encode_command, read_reply, Reply, ReplyError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};

pub struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ReplyError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Sends one command and waits for its reply.
    ///
    /// Error replies from the server are returned as `Ok(Reply::Error(..))`.
    pub async fn command<A: AsRef<[u8]>>(&mut self, args: &[A]) -> Result<Reply, ReplyError> {
        self.send_raw(&encode_command(args)).await
    }

    /// Writes `request` verbatim and reads one reply.
    pub async fn send_raw(&mut self, request: &[u8]) -> Result<Reply, ReplyError> {
        let stream = self.stream.get_mut();
        stream.write_all(request).await?;
        stream.flush().await?;
        read_reply(&mut self.stream).await
    }
}
