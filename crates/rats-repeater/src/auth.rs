//! USER/PASS gate run on a network client before framing starts
//!
//! ```text
//! S: 101 Authorization required
//! C: USER w1aw
//! S: 102 USER okay
//! C: PASS secret
//! S: 200 Authorized            (or 500 Not authorized)
//! ```
//!
//! Malformed lines get `501 Invalid Syntax`, out-of-order commands get
//! `201 Protocol violation`. Either ends the exchange.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Lines read before the exchange gives up
pub const MAX_AUTH_LINES: usize = 3;

/// Who has to authenticate, and against which users file
#[derive(Debug, Clone, Default)]
pub struct AuthPolicy {
    /// Require credentials
    pub reqauth: bool,
    /// Let loopback peers in without credentials
    pub trustlocal: bool,
    /// `USERNAME PASSWORD` file
    pub users_file: Option<PathBuf>,
}

/// Credentials collected by [`auth_exchange`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Value of the USER line
    pub username: Option<String>,
    /// Value of the PASS line
    pub password: Option<String>,
}

/// Read `users.txt`-style content
///
/// Usernames are upper-cased; lines without a space are skipped.
pub fn parse_users(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line = line.trim();
            match line.split_once(' ') {
                Some((user, pass)) => Some((user.to_uppercase(), pass.to_string())),
                None => {
                    if !line.is_empty() {
                        warn!("Failed to parse line {} in users file: {}", i + 1, line);
                    }
                    None
                }
            }
        })
        .collect()
}

/// Load the users file; a missing or unreadable file yields no users
pub fn load_users(path: &Path) -> Vec<(String, String)> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_users(&content),
        Err(e) => {
            warn!("Failed to open {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Run the USER/PASS exchange
///
/// Stops after [`MAX_AUTH_LINES`] lines, at end of stream, or on the first
/// bad line.
pub async fn auth_exchange<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<Credentials>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut creds = Credentials::default();
    let mut line = String::new();

    for _ in 0..MAX_AUTH_LINES {
        if creds.username.is_some() && creds.password.is_some() {
            break;
        }

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let Some((cmd, value)) = text.split_once(' ') else {
            warn!("Unable to read auth command: `{}'", text);
            writer.write_all(b"501 Invalid Syntax\r\n").await?;
            break;
        };
        let cmd = cmd.to_uppercase();

        match (cmd.as_str(), &creds.username, &creds.password) {
            ("USER", None, None) => creds.username = Some(value.to_string()),
            ("PASS", Some(_), None) => creds.password = Some(value.to_string()),
            _ => {
                writer.write_all(b"201 Protocol violation\r\n").await?;
                break;
            }
        }

        if creds.username.is_some() && creds.password.is_none() {
            writer
                .write_all(format!("102 {} okay\r\n", cmd).as_bytes())
                .await?;
        }
    }

    if creds.username.is_none() || creds.password.is_none() {
        info!("Negotiation failed with client");
    }
    Ok(creds)
}

fn is_local(peer: IpAddr) -> bool {
    match peer {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

/// Decide whether a freshly accepted peer may attach
///
/// The result is reported to the peer as a status line; closing a refused
/// connection is up to the caller.
pub async fn auth_user<R, W>(
    reader: &mut R,
    writer: &mut W,
    peer: IpAddr,
    policy: &AuthPolicy,
) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if !policy.reqauth {
        writer
            .write_all(b"100 Authentication not required\r\n")
            .await?;
        return Ok(true);
    }
    if policy.trustlocal && is_local(peer) {
        writer
            .write_all(b"100 Authentication not required for localhost\r\n")
            .await?;
        return Ok(true);
    }

    let users = policy
        .users_file
        .as_deref()
        .map(load_users)
        .unwrap_or_default();

    writer.write_all(b"101 Authorization required\r\n").await?;
    let creds = auth_exchange(reader, writer).await?;

    if let (Some(user), Some(pass)) = (&creds.username, &creds.password) {
        let user = user.to_uppercase();
        if users.iter().any(|(u, p)| *u == user && p == pass) {
            info!("Authorized user {}", user);
            writer.write_all(b"200 Authorized\r\n").await?;
            return Ok(true);
        }
    }

    info!(
        "User {} failed to authenticate",
        creds.username.as_deref().unwrap_or("<none>")
    );
    writer.write_all(b"500 Not authorized\r\n").await?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::Ipv4Addr;

    use tokio::io::{AsyncReadExt, BufReader};

    use super::*;

    const REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn run(input: &str, peer: IpAddr, policy: &AuthPolicy) -> (bool, String) {
        let mut reader = BufReader::new(input.as_bytes());
        let mut out = Vec::new();
        let ok = auth_user(&mut reader, &mut out, peer, policy).await.unwrap();
        (ok, String::from_utf8(out).unwrap())
    }

    fn policy_with_users(users: &str) -> (AuthPolicy, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(users.as_bytes()).unwrap();
        let policy = AuthPolicy {
            reqauth: true,
            trustlocal: false,
            users_file: Some(file.path().to_path_buf()),
        };
        (policy, file)
    }

    #[tokio::test]
    async fn test_no_auth_required_reads_nothing() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = BufReader::new(client);
        let mut out = Vec::new();

        let ok = auth_user(&mut reader, &mut out, REMOTE, &AuthPolicy::default())
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(out, b"100 Authentication not required\r\n");

        // Nothing was consumed from the peer
        server.write_all(b"x").await.unwrap();
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"x");
    }

    #[tokio::test]
    async fn test_trusted_localhost() {
        let policy = AuthPolicy {
            reqauth: true,
            trustlocal: true,
            users_file: None,
        };
        let (ok, out) = run("", LOCAL, &policy).await;
        assert!(ok);
        assert_eq!(out, "100 Authentication not required for localhost\r\n");

        let (ok, _) = run("", REMOTE, &policy).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_successful_login() {
        let (policy, _file) = policy_with_users("w1aw secret\nKK7DS other\n");
        let (ok, out) = run("USER w1aw\r\nPASS secret\r\n", REMOTE, &policy).await;
        assert!(ok);
        assert_eq!(
            out,
            "101 Authorization required\r\n102 USER okay\r\n200 Authorized\r\n"
        );
    }

    #[tokio::test]
    async fn test_password_is_case_sensitive() {
        let (policy, _file) = policy_with_users("W1AW secret\n");
        let (ok, out) = run("USER W1AW\r\nPASS SECRET\r\n", REMOTE, &policy).await;
        assert!(!ok);
        assert!(out.ends_with("500 Not authorized\r\n"));
    }

    #[tokio::test]
    async fn test_pass_before_user_is_violation() {
        let (policy, _file) = policy_with_users("W1AW secret\n");
        let (ok, out) = run("PASS secret\r\n", REMOTE, &policy).await;
        assert!(!ok);
        assert_eq!(
            out,
            "101 Authorization required\r\n201 Protocol violation\r\n500 Not authorized\r\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_syntax() {
        let (policy, _file) = policy_with_users("W1AW secret\n");
        let (ok, out) = run("HELLO\r\n", REMOTE, &policy).await;
        assert!(!ok);
        assert!(out.contains("501 Invalid Syntax\r\n"));
    }

    #[tokio::test]
    async fn test_missing_users_file_refuses_everyone() {
        let policy = AuthPolicy {
            reqauth: true,
            trustlocal: false,
            users_file: Some(PathBuf::from("/nonexistent/users.txt")),
        };
        let (ok, _) = run("USER W1AW\r\nPASS secret\r\n", REMOTE, &policy).await;
        assert!(!ok);
    }

    #[test]
    fn test_parse_users_skips_bad_lines() {
        let users = parse_users("w1aw pass word\nbroken\n\nkk7ds x\n");
        assert_eq!(
            users,
            vec![
                ("W1AW".to_string(), "pass word".to_string()),
                ("KK7DS".to_string(), "x".to_string()),
            ]
        );
    }
}
