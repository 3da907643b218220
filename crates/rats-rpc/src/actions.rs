//! Action providers: what a station does when a remote job arrives
//!
//! [`RpcActions`] is the contract jobs execute against. [`FileActions`] is
//! the stock provider: it serves a download directory and a message store,
//! and reaches position and mail services through injected traits. Side
//! effects that belong to the rest of the application (sending a file,
//! sending a chat line, logging an event) are emitted as [`ActionEvent`]s.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use rats_protocol::{RpcDict, BROADCAST_CALL};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::job::{JobCompleter, RpcJob};
use crate::jobs::{
    CheckMailJob, DeleteFileJob, FileListJob, FormListJob, GetVersionJob, MailAccount,
    PositionReportJob, PullFileJob, PullFormJob,
};

/// Operations a station performs on behalf of remote jobs
///
/// Methods returning `Option` may answer later through the completer.
pub trait RpcActions: Send + Sync {
    /// Files offered for download
    fn file_list(&self, job: &FileListJob) -> RpcDict;

    /// Stored messages
    fn form_list(&self, job: &FormListJob) -> RpcDict;

    /// Send a file to the requester
    fn file_pull(&self, job: &PullFileJob) -> RpcDict;

    /// Delete a file on the requester's behalf
    fn file_delete(&self, job: &DeleteFileJob) -> RpcDict;

    /// Send a stored message to the requester
    fn form_pull(&self, job: &PullFormJob) -> RpcDict;

    /// Report a station's position
    fn pos_report(&self, job: &PositionReportJob, completer: JobCompleter) -> Option<RpcDict>;

    /// Software version information
    fn get_version(&self, job: &GetVersionJob) -> RpcDict;

    /// Poll a mail account for the requester
    fn check_mail(&self, job: &CheckMailJob, completer: JobCompleter) -> Option<RpcDict>;
}

/// Side effects requested by actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    /// Start a file transfer to `station`
    SendFile {
        /// Receiving station
        station: String,
        /// Local path
        path: PathBuf,
        /// Name the file is offered under
        name: String,
    },
    /// Start a message transfer to `station`
    SendForm {
        /// Receiving station
        station: String,
        /// Local path of the message
        path: PathBuf,
        /// Message subject
        subject: String,
    },
    /// Send a chat line
    SendChat {
        /// Destination callsign
        station: String,
        /// Text to send
        text: String,
        /// Send without chat formatting
        raw: bool,
    },
    /// Line for the event log
    Event(String),
}

/// One stored message as listed by a [`MessageStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// Subject line
    pub subject: String,
    /// When it was stored
    pub stamp: SystemTime,
    /// File name inside the messages directory
    pub filename: String,
}

/// Where stored messages come from
pub trait MessageStore: Send + Sync {
    /// Messages visible to `station`
    fn message_list(&self, station: &str) -> Vec<MessageEntry>;
}

/// Where positions come from
pub trait PositionSource: Send + Sync {
    /// APRS text for `station`, or for this station when `None`
    fn current_position(&self, station: Option<&str>) -> Option<String>;
}

/// Completion callback for a mail poll: success flag and message
pub type MailDone = Box<dyn FnOnce(bool, String) + Send>;

/// Mail gateways reachable from this station
pub trait MailGateway: Send + Sync {
    /// Start polling `account` for `station`; call `done` when finished
    fn check_mail(&self, account: MailAccount, station: &str, done: MailDone);
}

/// Settings for [`FileActions`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// This station's callsign
    pub callsign: String,
    /// Directory served to remote stations
    pub download_dir: PathBuf,
    /// Directory holding stored messages
    pub messages_dir: PathBuf,
    /// Allow remote file pulls
    pub allow_remote_files: bool,
    /// Comma-separated callsigns allowed to delete files (`None` = misconfigured)
    pub delete_from: Option<String>,
    /// Password required for deletes (empty = none)
    pub remote_admin_passwd: String,
    /// Allow Winlink mail checks
    pub msg_allow_wl2k: bool,
    /// Allow POP3 mail checks
    pub msg_allow_pop3: bool,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            download_dir: PathBuf::from("."),
            messages_dir: PathBuf::from("messages"),
            allow_remote_files: false,
            delete_from: Some(String::new()),
            remote_admin_passwd: String::new(),
            msg_allow_wl2k: false,
            msg_allow_pop3: false,
        }
    }
}

/// Filesystem-backed action provider
pub struct FileActions {
    config: ActionsConfig,
    port: String,
    events: mpsc::UnboundedSender<ActionEvent>,
    messages: Option<Arc<dyn MessageStore>>,
    position: Option<Arc<dyn PositionSource>>,
    mail: Option<Arc<dyn MailGateway>>,
}

impl FileActions {
    /// Create a provider for the link named `port`
    pub fn new(
        config: ActionsConfig,
        port: impl Into<String>,
        events: mpsc::UnboundedSender<ActionEvent>,
    ) -> Self {
        Self {
            config,
            port: port.into(),
            events,
            messages: None,
            position: None,
            mail: None,
        }
    }

    /// Attach a message store
    pub fn with_messages(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(store);
        self
    }

    /// Attach a position source
    pub fn with_position(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.position = Some(source);
        self
    }

    /// Attach a mail gateway
    pub fn with_mail(mut self, gateway: Arc<dyn MailGateway>) -> Self {
        self.mail = Some(gateway);
        self
    }

    /// Link name this provider answers on
    pub fn port(&self) -> &str {
        &self.port
    }

    fn emit(&self, event: ActionEvent) {
        if self.events.send(event).is_err() {
            debug!("No listener for action events");
        }
    }

    fn log_event(&self, text: String) {
        self.emit(ActionEvent::Event(text));
    }

    fn messages(&self) -> Vec<MessageEntry> {
        self.messages
            .as_ref()
            .map(|store| store.message_list(BROADCAST_CALL))
            .unwrap_or_default()
    }
}

/// A bare name inside the serving directory: one normal path component
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut parts = Path::new(name).components();
    matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn rc(text: impl Into<String>) -> RpcDict {
    RpcDict::from([("rc".to_string(), text.into())])
}

fn rc_msg(rc: &str, msg: impl Into<String>) -> RpcDict {
    RpcDict::from([
        ("rc".to_string(), rc.to_string()),
        ("msg".to_string(), msg.into()),
    ])
}

/// `"<size> B|KB (<mtime>)"` as shown in remote file listings
fn describe_file(size: u64, modified: SystemTime) -> String {
    let (size, units) = if size < 1024 {
        (size, "B")
    } else {
        (size >> 10, "KB")
    };
    let stamp: DateTime<Local> = modified.into();
    format!("{} {} ({})", size, units, stamp.format("%Y-%m-%d %H:%M:%S"))
}

/// Files matching `*.*` directly inside `dir`
fn listable_files(dir: &Path) -> std::io::Result<Vec<(String, std::fs::Metadata)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.contains('.') {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_dir() {
            continue;
        }
        files.push((name, meta));
    }
    Ok(files)
}

impl RpcActions for FileActions {
    fn file_list(&self, job: &FileListJob) -> RpcDict {
        let mut result = RpcDict::new();
        match listable_files(&self.config.download_dir) {
            Ok(files) => {
                for (name, meta) in files {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    result.insert(name, describe_file(meta.len(), modified));
                }
            }
            Err(e) => warn!(
                "Unable to list {}: {}",
                self.config.download_dir.display(),
                e
            ),
        }

        self.log_event(format!("{} Requested file list", job.dest()));
        result
    }

    fn form_list(&self, job: &FormListJob) -> RpcDict {
        let result = self
            .messages()
            .into_iter()
            .map(|entry| {
                let stamp: DateTime<Local> = entry.stamp.into();
                let value = format!("{}/{}", entry.subject, stamp.format("%b-%d-%Y %H:%M:%S"));
                (entry.filename, value)
            })
            .collect();

        self.log_event(format!("{} Requested message list", job.dest()));
        result
    }

    fn file_pull(&self, job: &PullFileJob) -> RpcDict {
        if !self.config.allow_remote_files {
            return rc("Remote file transfers not enabled");
        }

        let name = job.file().unwrap_or_default();
        if !name.is_empty() && !is_plain_file_name(name) {
            warn!("Refusing file {:?} requested by {}", name, job.dest());
            self.log_event(format!("{} Requested file {} (refused)", job.dest(), name));
            return rc("Access denied (invalid file name)");
        }
        let path = self.config.download_dir.join(name);
        info!("Remote requested {}", path.display());

        let result = if !name.is_empty() && path.is_file() {
            self.emit(ActionEvent::SendFile {
                station: job.dest().to_string(),
                path,
                name: name.to_string(),
            });
            rc("OK")
        } else {
            rc("File not found")
        };

        self.log_event(format!("{} Requested file {}", job.dest(), name));
        result
    }

    fn file_delete(&self, job: &DeleteFileJob) -> RpcDict {
        let Some(permlist) = self.config.delete_from.as_deref() else {
            return rc("Access list not properly configured");
        };
        let dest = job.dest().to_uppercase();
        if !permlist
            .to_uppercase()
            .split(',')
            .any(|call| call.trim() == dest)
        {
            return rc(format!("Access denied for {}", job.dest()));
        }

        let passwd = &self.config.remote_admin_passwd;
        if !passwd.is_empty() && job.pass() != passwd {
            return rc("Access denied (Incorrect Password)");
        }

        let name = job.file().unwrap_or_default();
        if name.contains(['/', '\\']) {
            return rc("Access denied (file contains slash)");
        }

        let path = self.config.download_dir.join(name);
        if !is_plain_file_name(name) || !path.is_file() {
            return rc(format!("File not found ({})", name));
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Deleted {} for {}", path.display(), job.dest());
                rc(format!("File {} deleted", name))
            }
            Err(e) => rc(format!("Unable to delete {}: {}", name, e)),
        }
    }

    fn form_pull(&self, job: &PullFormJob) -> RpcDict {
        let wanted = job.form().unwrap_or_default();
        let mut result = rc("Form not found");

        if let Some(entry) = self.messages().into_iter().find(|m| m.filename == wanted) {
            let path = self.config.messages_dir.join(&entry.filename);
            if path.exists() {
                result = rc("OK");
                self.emit(ActionEvent::SendForm {
                    station: job.dest().to_string(),
                    path,
                    subject: entry.subject,
                });
            }
        }

        self.log_event(format!("{} Requested message {}", job.dest(), wanted));
        result
    }

    fn pos_report(&self, job: &PositionReportJob, completer: JobCompleter) -> Option<RpcDict> {
        let requested = job.station();
        info!("Position request for `{}'", requested);

        let station = (requested != self.config.callsign && requested != ".").then_some(requested);
        let fix = self
            .position
            .as_ref()
            .and_then(|source| source.current_position(station));

        let result = match fix {
            Some(aprs) => {
                self.emit(ActionEvent::SendChat {
                    station: BROADCAST_CALL.to_string(),
                    text: aprs.clone(),
                    raw: true,
                });
                rc_msg("True", aprs)
            }
            None => {
                warn!("No position available for {}", requested);
                rc_msg("False", format!(" No data for station '{}'", requested))
            }
        };

        // The position itself goes out as a chat line; the ack follows it
        completer.complete(result);
        None
    }

    fn get_version(&self, _job: &GetVersionJob) -> RpcDict {
        RpcDict::from([
            ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
            (
                "os".to_string(),
                format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            ),
            ("rustver".to_string(), env!("CARGO_PKG_RUST_VERSION").to_string()),
        ])
    }

    fn check_mail(&self, job: &CheckMailJob, completer: JobCompleter) -> Option<RpcDict> {
        let account = match job.account() {
            Ok(account) => account,
            Err(e) => return Some(rc_msg("False", e.to_string())),
        };

        if account.is_winlink() && !self.config.msg_allow_wl2k {
            return Some(rc_msg("False", "WL2K gateway is disabled"));
        }
        if !account.is_winlink() && !self.config.msg_allow_pop3 {
            return Some(rc_msg("False", "POP3 gateway is disabled"));
        }
        let Some(gateway) = self.mail.clone() else {
            return Some(rc_msg("False", "No mail gateway available"));
        };

        let station = job.dest().to_string();
        let events = self.events.clone();
        let done_station = station.clone();
        gateway.check_mail(
            account,
            &station,
            Box::new(move |success, message| {
                let _ = events.send(ActionEvent::Event(format!(
                    "Checking mail for {}: {}",
                    done_station, message
                )));
                completer.complete(rc_msg(if success { "0" } else { "-1" }, message));
            }),
        );

        self.log_event(format!("{} requested a mail check", station));
        None
    }
}
