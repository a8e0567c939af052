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
use smtp_proto::{
    response::parser::{ResponseReceiver, MAX_RESPONSE_LENGTH},
    EhloResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::SmtpClient;

impl<T: AsyncRead + AsyncWrite + Unpin> SmtpClient<T> {
    /// Sends a EHLO command to the server.
    pub async fn ehlo(&mut self, hostname: &str) -> crate::Result<EhloResponse<String>> {
        debug!("C: EHLO {hostname}");
        tokio::time::timeout(self.timeout, async {
            self.stream
                .write_all(format!("EHLO {hostname}\r\n").as_bytes())
                .await?;
            self.stream.flush().await?;
            self.read_ehlo().await
        })
        .await
        .map_err(|_| crate::Error::Timeout)?
    }

    /// Reads a complete EHLO reply, buffering partial reads until the last line arrives.
    pub async fn read_ehlo(&mut self) -> crate::Result<EhloResponse<String>> {
        let mut buf = vec![0u8; 1024];
        let mut pending = Vec::with_capacity(1024);

        loop {
            let br = self.stream.read(&mut buf).await?;

            if br == 0 {
                return Err(crate::Error::UnparseableReply);
            }
            pending.extend_from_slice(&buf[..br]);
            if pending.len() >= MAX_RESPONSE_LENGTH {
                return Err(crate::Error::UnparseableReply);
            }

            let mut iter = pending.iter();
            match EhloResponse::parse(&mut iter) {
                Ok(reply) => {
                    debug!(
                        "S: 250 {} (capabilities {:#x}, auth {:#x})",
                        reply.hostname, reply.capabilities, reply.auth_mechanisms
                    );
                    return Ok(reply);
                }
                Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                Err(smtp_proto::Error::InvalidResponse { code }) => {
                    // Not a 250, read the rest as a regular reply
                    match ResponseReceiver::from_code(code).parse(&mut iter) {
                        Ok(response) => return Err(crate::Error::UnexpectedReply(response)),
                        Err(smtp_proto::Error::NeedsMoreData { .. }) => (),
                        Err(_) => return Err(crate::Error::UnparseableReply),
                    }
                }
                Err(_) => return Err(crate::Error::UnparseableReply),
            }
        }
    }
}
