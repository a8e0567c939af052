/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{fs, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine};
use mail_hammer::{
    dispatch::{AuthStatus, Error},
    DispatchReport, Dispatcher, SessionConfig,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

const USERNAME: &str = "tim@example.com";
const PASSWORD: &str = "secret";

const RECIPIENTS: &str = concat!(
    "first@example.com\n",
    "not-an-address\n",
    "second@example.com\n",
    "third@example.org\n",
);

#[derive(Default)]
struct Transcript {
    commands: Vec<String>,
    messages: Vec<String>,
}

impl Transcript {
    fn rcpts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| c.strip_prefix("RCPT TO:"))
            .collect()
    }
}

/// Accepts one connection and plays a minimal ESMTP server. The RCPT command
/// number `reject_rcpt` (one-based) is refused with a 550.
async fn mock_server(reject_rcpt: Option<usize>) -> (u16, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let login = format!(
        "AUTH PLAIN {}",
        STANDARD.encode(format!("\0{USERNAME}\0{PASSWORD}"))
    );

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut transcript = Transcript::default();
        let mut data: Option<String> = None;
        let mut rcpt_count = 0;

        write.write_all(b"220 mx.test ESMTP ready\r\n").await.unwrap();
        while let Some(line) = lines.next_line().await.unwrap() {
            if data.is_some() {
                if line == "." {
                    transcript.messages.extend(data.take());
                    write.write_all(b"250 2.0.0 Queued\r\n").await.unwrap();
                } else if let Some(message) = data.as_mut() {
                    message.push_str(&line);
                    message.push('\n');
                }
                continue;
            }

            let reply = if line.starts_with("EHLO") {
                concat!(
                    "250-mx.test\r\n",
                    "250-AUTH PLAIN\r\n",
                    "250-8BITMIME\r\n",
                    "250 SMTPUTF8\r\n"
                )
            } else if line.starts_with("AUTH") {
                if line == login {
                    "235 2.7.0 Authentication successful\r\n"
                } else {
                    "535 5.7.8 Authentication credentials invalid\r\n"
                }
            } else if line.starts_with("RCPT") {
                rcpt_count += 1;
                if Some(rcpt_count) == reject_rcpt {
                    "550 5.1.1 Mailbox unavailable\r\n"
                } else {
                    "250 2.1.5 Ok\r\n"
                }
            } else if line == "DATA" {
                data = Some(String::new());
                "354 End data with <CR><LF>.<CR><LF>\r\n"
            } else if line == "QUIT" {
                "221 2.0.0 Bye\r\n"
            } else {
                "250 2.0.0 Ok\r\n"
            };

            let quit = line == "QUIT";
            transcript.commands.push(line);
            write.write_all(reply.as_bytes()).await.unwrap();
            if quit {
                break;
            }
        }

        transcript
    });

    (port, handle)
}

fn write_config(dir: &Path, port: u16, password: &str, extra: &str) -> SessionConfig {
    fs::write(
        dir.join("template.html"),
        "<html><body><h1>Hello!</h1></body></html>",
    )
    .unwrap();
    fs::write(dir.join("emails.txt"), RECIPIENTS).unwrap();

    let path = dir.join("mailing.ini");
    fs::write(
        &path,
        format!(
            concat!(
                "[Server]\n",
                "server = 127.0.0.1\n",
                "port = {port}\n",
                "auth_required = yes\n",
                "username = {username}\n",
                "password = {password}\n",
                "helo_host = mailhammer.test\n",
                "timeout = 10\n",
                "\n",
                "[Message]\n",
                "message = {dir}/template.html\n",
                "from_header = Тимофей <{username}>\n",
                "subject = Новости\n",
                "emails = {dir}/emails.txt\n",
                "{extra}",
            ),
            port = port,
            username = USERNAME,
            password = password,
            dir = dir.display(),
            extra = extra,
        ),
    )
    .unwrap();

    SessionConfig::load(path).unwrap()
}

const NO_EXTRAS: &str = "attachment =\ntracking_handler =\n";

fn positions(report: &DispatchReport) -> Vec<(usize, usize, &str)> {
    report
        .delivered
        .iter()
        .map(|d| (d.position, d.total, d.recipient.as_str()))
        .collect()
}

#[tokio::test]
async fn delivers_in_list_order() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = mock_server(None).await;
    let config = write_config(dir.path(), port, PASSWORD, NO_EXTRAS);

    let report = Dispatcher::new(config).verbosity(1).run().await.unwrap();
    assert_eq!(report.auth, AuthStatus::Succeeded);
    assert_eq!(
        positions(&report),
        vec![
            (1, 3, "first@example.com"),
            (2, 3, "second@example.com"),
            (3, 3, "third@example.org"),
        ]
    );

    let transcript = server.await.unwrap();
    assert_eq!(transcript.commands[0], "EHLO mailhammer.test");
    assert!(transcript.commands[1].starts_with("AUTH PLAIN "));
    assert_eq!(
        transcript.rcpts(),
        vec![
            "<first@example.com>",
            "<second@example.com>",
            "<third@example.org>"
        ]
    );
    assert!(transcript
        .commands
        .iter()
        .filter(|c| c.starts_with("MAIL FROM:"))
        .all(|c| c == "MAIL FROM:<tim@example.com> BODY=8BITMIME SMTPUTF8"));
    assert_eq!(transcript.commands.last().unwrap(), "QUIT");

    assert_eq!(transcript.messages.len(), 3);
    for (message, to) in transcript
        .messages
        .iter()
        .zip(["first@example.com", "second@example.com", "third@example.org"])
    {
        assert!(message.contains(&format!("\nTo: {to}\n")), "{message}");
        assert!(message.contains("Content-Type: text/html; charset=\"utf-8\""));
        assert!(message.contains(" <tim@example.com>\n"));
        assert!(!message.contains("multipart"));
    }
}

#[tokio::test]
async fn rejected_recipient_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = mock_server(Some(2)).await;
    let config = write_config(dir.path(), port, PASSWORD, NO_EXTRAS);

    match Dispatcher::new(config).run().await {
        Err(Error::Send {
            recipient,
            position,
            total,
            source: mail_hammer::Error::UnexpectedReply(reply),
        }) => {
            assert_eq!(recipient.as_str(), "second@example.com");
            assert_eq!((position, total), (2, 3));
            assert_eq!(reply.code(), 550);
        }
        other => panic!("unexpected result {other:?}"),
    }

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript.rcpts(),
        vec!["<first@example.com>", "<second@example.com>"]
    );
    assert_eq!(transcript.messages.len(), 1);
    assert_eq!(transcript.commands.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn failed_login_still_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = mock_server(None).await;
    let config = write_config(dir.path(), port, "wrong", NO_EXTRAS);

    let report = Dispatcher::new(config).run().await.unwrap();
    assert_eq!(report.auth, AuthStatus::Failed);
    assert_eq!(report.delivered.len(), 3);

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript
            .commands
            .iter()
            .filter(|c| c.starts_with("AUTH"))
            .count(),
        1
    );
    assert_eq!(transcript.messages.len(), 3);
}

#[tokio::test]
async fn attachment_and_tracking() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("price.pdf"), b"%PDF-1.4 fake").unwrap();
    let (port, server) = mock_server(None).await;
    let config = write_config(
        dir.path(),
        port,
        PASSWORD,
        &format!(
            "attachment = {}/price.pdf\ntracking_handler = https://t.example.com/px\n",
            dir.path().display()
        ),
    );

    let report = Dispatcher::new(config).run().await.unwrap();
    assert_eq!(report.delivered.len(), 3);

    let transcript = server.await.unwrap();
    let first = &transcript.messages[0];
    assert!(first.contains("Content-Type: multipart/mixed; boundary="));
    assert!(first.contains("Content-Disposition: attachment; filename=\"price.pdf\""));

    let html_part = first
        .split("Content-Transfer-Encoding: base64\n\n")
        .nth(1)
        .unwrap();
    let html_part: String = html_part
        .lines()
        .take_while(|line| !line.starts_with("--"))
        .collect();
    let html = String::from_utf8(STANDARD.decode(html_part).unwrap()).unwrap();
    assert_eq!(
        html,
        format!(
            "<html><body><h1>Hello!</h1><img alt=\"\" src=\"https://t.example.com/px?u={}\" width=\"1\" height=\"1\" border=\"0\" /></body></html>",
            STANDARD.encode("first@example.com")
        )
    );
}

#[tokio::test]
async fn missing_attachment_closes_session() {
    let dir = tempfile::tempdir().unwrap();
    let (port, server) = mock_server(None).await;
    let config = write_config(
        dir.path(),
        port,
        PASSWORD,
        &format!(
            "attachment = {}/missing.pdf\ntracking_handler =\n",
            dir.path().display()
        ),
    );

    assert!(matches!(
        Dispatcher::new(config).run().await,
        Err(Error::Render(mail_hammer::render::Error::Attachment { .. }))
    ));

    let transcript = server.await.unwrap();
    assert!(transcript.messages.is_empty());
    assert_eq!(transcript.commands.last().unwrap(), "QUIT");
}
