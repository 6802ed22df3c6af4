//! Connection descriptors handed to buyers. Rendering is pure.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::channels::markdown;
use crate::model::{Account, ServiceKind};

const SSH_PORT: u16 = 22;
const TLS_PORT: u16 = 443;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionDescriptor {
    Ssh {
        host: String,
        port: u16,
        username: String,
        password: String,
        expires_at: DateTime<Utc>,
        connection_string: String,
    },
    Vless {
        host: String,
        port: u16,
        username: String,
        uuid: String,
        path: &'static str,
        security: &'static str,
        expires_at: DateTime<Utc>,
        link: String,
    },
    Vmess {
        host: String,
        port: u16,
        username: String,
        uuid: String,
        path: &'static str,
        security: &'static str,
        expires_at: DateTime<Utc>,
        link: String,
    },
    Trojan {
        host: String,
        port: u16,
        username: String,
        password: String,
        path: &'static str,
        security: &'static str,
        expires_at: DateTime<Utc>,
        link: String,
    },
}

impl ConnectionDescriptor {
    pub fn render(account: &Account, host: &str) -> Self {
        let username = account.username.clone();
        let secret = account.secret.clone();
        let expires_at = account.expires_at;
        match account.kind {
            ServiceKind::Ssh => Self::Ssh {
                host: host.to_string(),
                port: SSH_PORT,
                connection_string: format!("ssh {username}@{host}"),
                username,
                password: secret,
                expires_at,
            },
            ServiceKind::Vless => Self::Vless {
                host: host.to_string(),
                port: TLS_PORT,
                link: format!(
                    "vless://{secret}@{host}:{TLS_PORT}?path=/vless&security=tls&encryption=none&type=ws#{username}"
                ),
                username,
                uuid: secret,
                path: "/vless",
                security: "tls",
                expires_at,
            },
            ServiceKind::Vmess => {
                let share = json!({
                    "v": "2",
                    "ps": username,
                    "add": host,
                    "port": TLS_PORT.to_string(),
                    "id": secret,
                    "aid": "0",
                    "net": "ws",
                    "path": "/vmess",
                    "type": "none",
                    "host": host,
                    "tls": "tls"
                });
                Self::Vmess {
                    host: host.to_string(),
                    port: TLS_PORT,
                    link: format!("vmess://{}", STANDARD.encode(share.to_string())),
                    username,
                    uuid: secret,
                    path: "/vmess",
                    security: "tls",
                    expires_at,
                }
            }
            ServiceKind::Trojan => Self::Trojan {
                host: host.to_string(),
                port: TLS_PORT,
                link: format!(
                    "trojan://{secret}@{host}:{TLS_PORT}?path=/trojan&security=tls&type=ws#{username}"
                ),
                username,
                password: secret,
                path: "/trojan",
                security: "tls",
                expires_at,
            },
        }
    }

    /// Share link for tunnel kinds.
    pub fn link(&self) -> Option<&str> {
        match self {
            Self::Ssh { .. } => None,
            Self::Vless { link, .. } | Self::Vmess { link, .. } | Self::Trojan { link, .. } => {
                Some(link)
            }
        }
    }

    /// Buyer-facing Markdown summary.
    pub fn to_message(&self) -> String {
        match self {
            Self::Ssh {
                host,
                port,
                username,
                password,
                expires_at,
                connection_string,
            } => format!(
                "*SSH account*\nHost: {}\nPort: {}\nUsername: {}\nPassword: {}\n\
                 Expires: {}\n\nConnect: {}",
                markdown::code(host),
                markdown::code(port),
                markdown::code(username),
                markdown::code(password),
                expires_at.format("%Y-%m-%d"),
                markdown::code(connection_string)
            ),
            Self::Vless {
                host,
                username,
                expires_at,
                link,
                ..
            }
            | Self::Vmess {
                host,
                username,
                expires_at,
                link,
                ..
            }
            | Self::Trojan {
                host,
                username,
                expires_at,
                link,
                ..
            } => format!(
                "*{} account*\nHost: {}\nPort: {}\nUsername: {}\nExpires: {}\n\n{}",
                self.kind().label(),
                markdown::code(host),
                markdown::code(TLS_PORT),
                markdown::code(username),
                expires_at.format("%Y-%m-%d"),
                markdown::code(link)
            ),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Ssh { .. } => ServiceKind::Ssh,
            Self::Vless { .. } => ServiceKind::Vless,
            Self::Vmess { .. } => ServiceKind::Vmess,
            Self::Trojan { .. } => ServiceKind::Trojan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::fixtures::account;
    use serde_json::Value;

    #[test]
    fn ssh_descriptor_has_port_22_and_command() {
        let mut acct = account("alice", ServiceKind::Ssh);
        acct.secret = "pw123".to_string();

        match ConnectionDescriptor::render(&acct, "vpn.example.com") {
            ConnectionDescriptor::Ssh {
                port,
                connection_string,
                password,
                ..
            } => {
                assert_eq!(port, 22);
                assert_eq!(connection_string, "ssh alice@vpn.example.com");
                assert_eq!(password, "pw123");
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }
    }

    #[test]
    fn vless_and_trojan_links_match_share_format() {
        let mut vless = account("alice", ServiceKind::Vless);
        vless.secret = "11111111-2222-3333-4444-555555555555".to_string();
        assert_eq!(
            ConnectionDescriptor::render(&vless, "vpn.example.com").link(),
            Some(
                "vless://11111111-2222-3333-4444-555555555555@vpn.example.com:443?path=/vless&security=tls&encryption=none&type=ws#alice"
            )
        );

        let mut trojan = account("bob", ServiceKind::Trojan);
        trojan.secret = "secret-uuid".to_string();
        assert_eq!(
            ConnectionDescriptor::render(&trojan, "vpn.example.com").link(),
            Some("trojan://secret-uuid@vpn.example.com:443?path=/trojan&security=tls&type=ws#bob")
        );
    }

    #[test]
    fn vmess_link_is_base64_share_json() {
        let mut vmess = account("carol", ServiceKind::Vmess);
        vmess.secret = "vmess-uuid".to_string();

        let descriptor = ConnectionDescriptor::render(&vmess, "vpn.example.com");
        let encoded = descriptor.link().unwrap().strip_prefix("vmess://").unwrap();
        let decoded: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();

        assert_eq!(decoded["v"], "2");
        assert_eq!(decoded["ps"], "carol");
        assert_eq!(decoded["add"], "vpn.example.com");
        assert_eq!(decoded["port"], "443");
        assert_eq!(decoded["id"], "vmess-uuid");
        assert_eq!(decoded["aid"], "0");
        assert_eq!(decoded["net"], "ws");
        assert_eq!(decoded["path"], "/vmess");
        assert_eq!(decoded["tls"], "tls");
    }

    #[test]
    fn serializes_with_type_tag() {
        let acct = account("dave", ServiceKind::Trojan);
        let value = serde_json::to_value(ConnectionDescriptor::render(&acct, "h")).unwrap();
        assert_eq!(value["type"], "trojan");
        assert_eq!(value["port"], 443);
        assert_eq!(value["password"], acct.secret.as_str());
    }

    #[test]
    fn credential_message_survives_markdown_special_characters() {
        let mut ssh = account("budi_x", ServiceKind::Ssh);
        ssh.secret = "pa`ss_*1".to_string();
        let message = ConnectionDescriptor::render(&ssh, "vpn.example.com").to_message();
        assert!(markdown::is_well_formed(&message), "{message}");
        assert!(message.contains("`budi_x`"));
        assert!(message.contains("pa\\`ss\\_\\*1"));

        let trojan = account("team_a", ServiceKind::Trojan);
        let message = ConnectionDescriptor::render(&trojan, "vpn.example.com").to_message();
        assert!(markdown::is_well_formed(&message), "{message}");
        assert!(message.contains("#team_a`"));
    }
}
