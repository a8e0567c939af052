/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use log::debug;
use smtp_proto::{response::parser::ResponseReceiver, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    pub(crate) async fn read(&mut self) -> crate::Result<Response<String>> {
        let mut buf = vec![0u8; 1024];
        let mut parser = ResponseReceiver::default();

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }

            match parser.parse(&mut buf[..br].iter()) {
                Ok(reply) => {
                    debug!("S: {} {}", reply.code(), reply.message());
                    return Ok(reply);
                }
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(_) => return Err(crate::Error::UnparseableReply),
            }
        }
    }

    /// Sends a command to the SMTP server and waits for a reply.
    pub async fn cmd(&mut self, cmd: impl AsRef<[u8]>) -> crate::Result<Response<String>> {
        let cmd = cmd.as_ref();
        debug!("C: {}", String::from_utf8_lossy(cmd).trim_end());
        self.exchange(cmd).await
    }

    /// Sends a command carrying credentials, keeping them out of the protocol trace.
    pub(crate) async fn cmd_sensitive(
        &mut self,
        cmd: impl AsRef<[u8]>,
        shown: &str,
    ) -> crate::Result<Response<String>> {
        debug!("C: {shown}");
        self.exchange(cmd.as_ref()).await
    }

    async fn exchange(&mut self, cmd: &[u8]) -> crate::Result<Response<String>> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(cmd).await?;
            self.stream.flush().await?;
            self.read().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::SmtpClient;

    #[tokio::test]
    async fn command_round_trip() {
        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let mut client = SmtpClient {
            stream: client_end,
            timeout: Duration::from_secs(5),
        };

        let server = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = server_end.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"NOOP\r\n");
            // Multi-line reply split across two writes
            server_end.write_all(b"250-first\r\n").await.unwrap();
            server_end.write_all(b"250 second\r\n").await.unwrap();
            server_end
        });

        let reply = client.cmd(b"NOOP\r\n").await.unwrap();
        assert_eq!(reply.code(), 250);
        assert!(reply.message().contains("second"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection() {
        let (client_end, server_end) = tokio::io::duplex(64);
        drop(server_end);
        let mut client = SmtpClient {
            stream: client_end,
            timeout: Duration::from_secs(5),
        };

        assert!(matches!(
            client.cmd(b"NOOP\r\n").await,
            Err(crate::Error::Io(_)) | Err(crate::Error::UnparseableReply)
        ));
    }

    #[tokio::test]
    async fn garbage_reply() {
        let (client_end, mut server_end) = tokio::io::duplex(64);
        let mut client = SmtpClient {
            stream: client_end,
            timeout: Duration::from_secs(5),
        };
        server_end.write_all(b"hello there\r\n").await.unwrap();

        assert!(matches!(
            client.read().await,
            Err(crate::Error::UnparseableReply)
        ));
    }
}
