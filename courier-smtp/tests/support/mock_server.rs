//! Scriptable SMTP relay for client tests
//!
//! Speaks just enough submission SMTP to exercise the client: EHLO capabilities, AUTH
//! PLAIN / LOGIN with fixed credentials, per-address RCPT replies and DATA capture.
#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// What the server saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Auth(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Raw DATA payload as received, still dot-stuffed, without the terminator
    MessageContent(String),
    Rset,
    Noop,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.message)
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    credentials: Option<(String, String)>,
    mail_from: Reply,
    rcpt_default: Reply,
    rcpt_by_address: HashMap<String, Reply>,
    data_end: Reply,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.example.com ESMTP"),
            capabilities: vec!["mock.example.com".to_string(), "8BITMIME".to_string()],
            credentials: None,
            mail_from: Reply::new(250, "OK"),
            rcpt_default: Reply::new(250, "OK"),
            rcpt_by_address: HashMap::new(),
            data_end: Reply::new(250, "OK: queued"),
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<String> {
        self.commands
            .read()
            .await
            .iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    async fn handle_client(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(script.greeting.line().as_bytes()).await?;

        loop {
            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let text = line.trim_end_matches(['\r', '\n']).to_string();
            let (verb, argument) = text.split_once(' ').unwrap_or((text.as_str(), ""));
            let verb = verb.to_ascii_uppercase();

            let (command, reply) = match verb.as_str() {
                "EHLO" => {
                    let mut reply = String::new();
                    let count = script.capabilities.len();
                    for (index, capability) in script.capabilities.iter().enumerate() {
                        let separator = if index + 1 == count { ' ' } else { '-' };
                        reply.push_str(&format!("250{separator}{capability}\r\n"));
                    }
                    (SmtpCommand::Ehlo(argument.to_string()), reply)
                }
                "AUTH" => {
                    let reply =
                        Self::authenticate(argument, &script, &mut reader, &mut writer).await?;
                    (SmtpCommand::Auth(argument.to_string()), reply.line())
                }
                "MAIL" => (
                    SmtpCommand::MailFrom(argument.to_string()),
                    script.mail_from.line(),
                ),
                "RCPT" => {
                    let address = argument
                        .trim_start_matches("TO:")
                        .trim_matches(['<', '>'])
                        .to_string();
                    let reply = script
                        .rcpt_by_address
                        .get(&address)
                        .unwrap_or(&script.rcpt_default)
                        .line();
                    (SmtpCommand::RcptTo(address), reply)
                }
                "DATA" => {
                    commands.write().await.push(SmtpCommand::Data);
                    writer
                        .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                        .await?;

                    let mut content = String::new();
                    let mut data_line = String::new();
                    loop {
                        data_line.clear();
                        if reader.read_line(&mut data_line).await? == 0 {
                            return Ok(());
                        }
                        if data_line == ".\r\n" {
                            break;
                        }
                        content.push_str(&data_line);
                    }

                    (SmtpCommand::MessageContent(content), script.data_end.line())
                }
                "RSET" => (SmtpCommand::Rset, Reply::new(250, "OK").line()),
                "NOOP" => (SmtpCommand::Noop, Reply::new(250, "OK").line()),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    SmtpCommand::Other(text.clone()),
                    Reply::new(502, "Command not implemented").line(),
                ),
            };

            commands.write().await.push(command);
            writer.write_all(reply.as_bytes()).await?;
        }
    }

    async fn authenticate(
        argument: &str,
        script: &Script,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
    ) -> std::io::Result<Reply> {
        let Some((username, password)) = &script.credentials else {
            return Ok(Reply::new(503, "AUTH not available"));
        };

        let decode = |value: &str| {
            STANDARD
                .decode(value.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_default()
        };

        let (mechanism, initial) = argument.split_once(' ').unwrap_or((argument, ""));
        let accepted = match mechanism.to_ascii_uppercase().as_str() {
            "PLAIN" => decode(initial) == format!("\0{username}\0{password}"),
            "LOGIN" => {
                let mut answer = String::new();
                writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                reader.read_line(&mut answer).await?;
                let given_user = decode(&answer);

                answer.clear();
                writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                reader.read_line(&mut answer).await?;
                let given_password = decode(&answer);

                given_user == *username && given_password == *password
            }
            _ => return Ok(Reply::new(504, "Unrecognized authentication type")),
        };

        Ok(if accepted {
            Reply::new(235, "Authentication successful")
        } else {
            Reply::new(535, "Authentication credentials invalid")
        })
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: &str) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: &str) -> Self {
        self.script.capabilities.push(capability.to_string());
        self
    }

    /// Enables AUTH PLAIN and LOGIN with these credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.script
            .capabilities
            .push("AUTH PLAIN LOGIN".to_string());
        self.script.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: &str) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_response_for(mut self, address: &str, code: u16, message: &str) -> Self {
        self.script
            .rcpt_by_address
            .insert(address.to_string(), Reply::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: &str) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));

        let accept_commands = Arc::clone(&commands);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let commands = Arc::clone(&accept_commands);
                tokio::spawn(async move {
                    let _ = MockSmtpServer::handle_client(stream, script, commands).await;
                });
            }
        });

        Ok(MockSmtpServer { addr, commands })
    }
}
