#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use courier_smtp::client::{ClientError, MessageBuilder, SmtpClient};
use pretty_assertions::assert_eq;
use support::mock_server::{MockSmtpServer, SmtpCommand};

async fn connected(server: &MockSmtpServer) -> SmtpClient {
    let mut client = SmtpClient::connect(&server.addr().to_string(), "localhost")
        .await
        .expect("connect");
    let greeting = client.read_greeting().await.expect("greeting");
    assert_eq!(greeting.code, 220);
    client
}

#[tokio::test]
async fn test_full_transaction_is_dot_stuffed() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connected(&server).await;

    let ehlo = client.ehlo("courier.test").await.unwrap();
    assert!(ehlo.is_success());
    assert!(ehlo.supports("8BITMIME"));

    assert!(client.mail_from("news@example.com").await.unwrap().is_success());
    assert!(client.rcpt_to("reader@example.org").await.unwrap().is_success());
    assert_eq!(client.data().await.unwrap().code, 354);

    let response = client
        .send_data("Subject: dots\r\n\r\n.starts with a dot\n.\nend")
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(client.quit().await.unwrap().code, 221);

    let messages = server.messages().await;
    assert_eq!(
        messages,
        vec!["Subject: dots\r\n\r\n..starts with a dot\r\n..\r\nend\r\n".to_string()]
    );

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("courier.test".to_string()));
    assert_eq!(
        commands[1],
        SmtpCommand::MailFrom("FROM:<news@example.com>".to_string())
    );
    assert_eq!(
        commands[2],
        SmtpCommand::RcptTo("reader@example.org".to_string())
    );
    assert_eq!(commands.last(), Some(&SmtpCommand::Quit));
}

#[tokio::test]
async fn test_rejected_recipient_is_reported_as_reply() {
    let server = MockSmtpServer::builder()
        .with_rcpt_response_for("gone@example.org", 550, "No such user")
        .build()
        .await
        .unwrap();
    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();
    client.mail_from("news@example.com").await.unwrap();

    let response = client.rcpt_to("gone@example.org").await.unwrap();
    assert!(response.is_permanent_error());
    assert_eq!(response.message(), "No such user");

    let err = response.into_result().unwrap_err();
    assert!(matches!(err, ClientError::SmtpError { code: 550, .. }));

    // The session stays usable after a rejected recipient
    assert!(client.rset().await.unwrap().is_success());
    assert!(client.noop().await.unwrap().is_success());
}

#[tokio::test]
async fn test_auth_plain_and_login() {
    let server = MockSmtpServer::builder()
        .with_credentials("courier", "s3cret")
        .build()
        .await
        .unwrap();

    let mut client = connected(&server).await;
    let ehlo = client.ehlo("courier.test").await.unwrap();
    assert_eq!(ehlo.extension_params("AUTH"), vec!["PLAIN", "LOGIN"]);
    assert_eq!(
        client.auth_plain("courier", "s3cret").await.unwrap().code,
        235
    );

    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();
    assert_eq!(
        client.auth_login("courier", "s3cret").await.unwrap().code,
        235
    );
}

#[tokio::test]
async fn test_wrong_credentials_fail() {
    let server = MockSmtpServer::builder()
        .with_credentials("courier", "s3cret")
        .build()
        .await
        .unwrap();

    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();
    let err = client.auth_plain("courier", "nope").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::AuthenticationFailed { code: 535, .. }
    ));

    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();
    let err = client.auth_login("someone", "nope").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::AuthenticationFailed { code: 535, .. }
    ));
}

#[tokio::test]
async fn test_starttls_refused_keeps_plain_connection() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();

    let response = client.starttls().await.unwrap();
    assert_eq!(response.code, 502);
    assert!(!client.is_tls());
    assert!(client.noop().await.unwrap().is_success());
}

#[tokio::test]
async fn test_built_message_survives_transfer() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut client = connected(&server).await;
    client.ehlo("courier.test").await.unwrap();

    let message = MessageBuilder::new()
        .from("news@example.com")
        .to("reader@example.org")
        .subject("Spring")
        .text(".leading dot\nsecond line")
        .html("<p>hi</p>")
        .boundary("t")
        .build()
        .unwrap();

    client.mail_from("news@example.com").await.unwrap();
    client.rcpt_to("reader@example.org").await.unwrap();
    client.data().await.unwrap();
    assert!(client.send_data(&message).await.unwrap().is_success());

    let received = server.messages().await.pop().unwrap();
    assert!(received.contains("\r\n..leading dot\r\nsecond line\r\n"));
    assert!(received.ends_with("--t_mixed--\r\n"));
}

#[tokio::test]
async fn test_closed_connection_is_an_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut client = SmtpClient::connect(&addr.to_string(), "localhost")
        .await
        .unwrap();
    let err = client.read_greeting().await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::ConnectionClosed | ClientError::Io(_)
    ));
}
