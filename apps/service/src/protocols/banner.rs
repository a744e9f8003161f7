//! Banner checks for line based services.
//!
//! The probe connects, reads the greeting line and checks it contains the
//! expected marker. The marker may be overridden with the `banner` argument:
//!
//!    host.example.com must run ssh with port 2222
//!    host.example.com must run ftp with banner 'ProFTPD'

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;

use super::tcp::connect;
use super::{PORT_PATTERN, ProtocolTest, Registry, port_argument};
use crate::monitoring::types::{Options, Test};

const ARGUMENTS: &[(&str, &str)] = &[("port", PORT_PATTERN), ("banner", ".+")];

/// Greeting check for one protocol
pub struct BannerTest {
    name: &'static str,
    default_port: u16,
    expected: &'static str,
    example: &'static str,
}

const SSH: BannerTest = BannerTest {
    name: "ssh",
    default_port: 22,
    expected: "SSH-",
    example: "host.example.com must run ssh [with port 22] [with banner 'OpenSSH']",
};

const FTP: BannerTest = BannerTest {
    name: "ftp",
    default_port: 21,
    expected: "220",
    example: "host.example.com must run ftp [with port 21] [with banner 'ProFTPD']",
};

const RSYNC: BannerTest = BannerTest {
    name: "rsync",
    default_port: 873,
    expected: "RSYNCD",
    example: "host.example.com must run rsync [with port 873]",
};

const SMTP: BannerTest = BannerTest {
    name: "smtp",
    default_port: 25,
    expected: "220",
    example: "mail.example.com must run smtp [with port 25] [with banner 'ESMTP']",
};

const POP3: BannerTest = BannerTest {
    name: "pop3",
    default_port: 110,
    expected: "+OK",
    example: "mail.example.com must run pop3 [with port 110]",
};

const IMAP: BannerTest = BannerTest {
    name: "imap",
    default_port: 143,
    expected: "* OK",
    example: "mail.example.com must run imap [with port 143]",
};

#[async_trait::async_trait]
impl ProtocolTest for BannerTest {
    fn arguments(&self) -> &[(&'static str, &'static str)] {
        ARGUMENTS
    }

    fn should_resolve_hostname(&self) -> bool {
        true
    }

    async fn run_test(&self, test: &Test, target: &str, options: &Options) -> Result<()> {
        let port = port_argument(test, Some(self.default_port))?;
        let stream = connect(target, port, options).await?;

        let mut banner = String::new();
        timeout(options.timeout, BufReader::new(stream).read_line(&mut banner))
            .await
            .map_err(|_| anyhow!("timed out waiting for the {} banner", self.name))??;

        let expected = test.arguments.get("banner").map(String::as_str).unwrap_or(self.expected);
        if options.verbose {
            tracing::info!(protocol = self.name, banner = banner.trim_end(), "Received banner");
        }

        if banner.contains(expected) {
            Ok(())
        } else {
            Err(anyhow!("banner doesn't look like an {} banner: {:?}", self.name, banner.trim_end()))
        }
    }

    fn example(&self) -> &str {
        self.example
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("ssh", || Arc::new(SSH));
    registry.register("ftp", || Arc::new(FTP));
    registry.register("rsync", || Arc::new(RSYNC));
    registry.register("smtp", || Arc::new(SMTP));
    registry.register("pop3", || Arc::new(POP3));
    registry.register("imap", || Arc::new(IMAP));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn greeter(greeting: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(greeting.as_bytes()).await;
            }
        });
        port
    }

    fn banner_test(port: u16, banner: Option<&str>) -> Test {
        let mut arguments = HashMap::from([("port".to_string(), port.to_string())]);
        if let Some(banner) = banner {
            arguments.insert("banner".to_string(), banner.to_string());
        }
        Test {
            input: String::new(),
            target: "127.0.0.1".to_string(),
            test_type: "ssh".to_string(),
            tag: String::new(),
            test_label: None,
            arguments,
        }
    }

    #[tokio::test]
    async fn test_ssh_banner() {
        let port = greeter("SSH-2.0-OpenSSH_9.6\r\n").await;
        let result = SSH.run_test(&banner_test(port, None), "127.0.0.1", &Options::default()).await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn test_rsync_banner_mismatch() {
        let port = greeter("220 welcome\r\n").await;
        let error = RSYNC.run_test(&banner_test(port, None), "127.0.0.1", &Options::default()).await.unwrap_err();
        assert!(error.to_string().contains("rsync"));
    }

    #[tokio::test]
    async fn test_custom_banner() {
        let port = greeter("220 ProFTPD Server ready\r\n").await;
        let ok = FTP.run_test(&banner_test(port, Some("ProFTPD")), "127.0.0.1", &Options::default()).await;
        assert!(ok.is_ok());

        let port = greeter("220 vsftpd\r\n").await;
        let failed = FTP.run_test(&banner_test(port, Some("ProFTPD")), "127.0.0.1", &Options::default()).await;
        assert!(failed.is_err());
    }
}
