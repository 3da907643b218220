//! The concrete RPC jobs
//!
//! Tags match the names D-RATS stations put on the wire, so peers running
//! other implementations can talk to these.

use rats_protocol::RpcDict;

use crate::actions::RpcActions;
use crate::error::RpcError;
use crate::job::{JobBase, JobCompleter, RpcJob};

/// Implements the boilerplate [`RpcJob`] methods for a job struct with a
/// `base: JobBase` field.
macro_rules! impl_job_base {
    ($job:ty, $tag:expr) => {
        impl $job {
            /// Registry tag for this job type
            pub const TAG: &'static str = $tag;

            /// Create a job addressed to `dest`
            pub fn new(dest: impl Into<String>, desc: impl Into<String>) -> Self {
                Self {
                    base: JobBase::new(dest, desc),
                }
            }
        }

        impl RpcJob for $job {
            fn tag(&self) -> &'static str {
                Self::TAG
            }

            fn base(&self) -> &JobBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut JobBase {
                &mut self.base
            }

            fn do_action(
                &self,
                actions: &dyn RpcActions,
                completer: JobCompleter,
            ) -> Option<RpcDict> {
                self.run(actions, completer)
            }
        }
    };
}

fn arg<'a>(job: &'a dyn RpcJob, key: &str) -> Option<&'a str> {
    job.args().get(key).map(String::as_str)
}

/// List files offered for download
#[derive(Debug, Clone)]
pub struct FileListJob {
    base: JobBase,
}
impl_job_base!(FileListJob, "RPCFileListJob");

impl FileListJob {
    /// Carry a file list (names are the keys)
    pub fn set_file_list<I, S>(&mut self, files: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base.args = files.into_iter().map(|f| (f.into(), String::new())).collect();
    }

    /// File names carried by the job
    pub fn file_list(&self) -> Vec<String> {
        self.base.args.keys().cloned().collect()
    }

    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.file_list(self))
    }
}

/// List stored messages
#[derive(Debug, Clone)]
pub struct FormListJob {
    base: JobBase,
}
impl_job_base!(FormListJob, "RPCFormListJob");

impl FormListJob {
    /// Message names carried by the job
    pub fn form_list(&self) -> Vec<String> {
        self.base.args.keys().cloned().collect()
    }

    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.form_list(self))
    }
}

/// Ask the remote station to send a file
#[derive(Debug, Clone)]
pub struct PullFileJob {
    base: JobBase,
}
impl_job_base!(PullFileJob, "RPCPullFileJob");

impl PullFileJob {
    /// Set the requested file name
    pub fn set_file(&mut self, filename: impl Into<String>) {
        self.base.args = RpcDict::from([("fn".to_string(), filename.into())]);
    }

    /// Requested file name
    pub fn file(&self) -> Option<&str> {
        arg(self, "fn")
    }

    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.file_pull(self))
    }
}

/// Ask the remote station to delete a file
#[derive(Debug, Clone)]
pub struct DeleteFileJob {
    base: JobBase,
}
impl_job_base!(DeleteFileJob, "RPCDeleteFileJob");

impl DeleteFileJob {
    /// Set the file to delete
    pub fn set_file(&mut self, filename: impl Into<String>) {
        self.base.args.insert("fn".into(), filename.into());
    }

    /// Set the admin password
    pub fn set_pass(&mut self, passwd: impl Into<String>) {
        self.base.args.insert("passwd".into(), passwd.into());
    }

    /// File to delete
    pub fn file(&self) -> Option<&str> {
        arg(self, "fn")
    }

    /// Admin password (empty if not given)
    pub fn pass(&self) -> &str {
        arg(self, "passwd").unwrap_or("")
    }

    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.file_delete(self))
    }
}

/// Ask the remote station to send a stored message
#[derive(Debug, Clone)]
pub struct PullFormJob {
    base: JobBase,
}
impl_job_base!(PullFormJob, "RPCPullFormJob");

impl PullFormJob {
    /// Set the requested message file name
    pub fn set_form(&mut self, form: impl Into<String>) {
        self.base.args = RpcDict::from([("fn".to_string(), form.into())]);
    }

    /// Requested message file name
    pub fn form(&self) -> Option<&str> {
        arg(self, "fn")
    }

    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.form_pull(self))
    }
}

/// Ask for a station's position
#[derive(Debug, Clone)]
pub struct PositionReportJob {
    base: JobBase,
}
impl_job_base!(PositionReportJob, "RPCPositionReport");

impl PositionReportJob {
    /// Set the station whose position is wanted
    pub fn set_station(&mut self, station: impl Into<String>) {
        self.base.args = RpcDict::from([("st".to_string(), station.into())]);
    }

    /// Station whose position is wanted
    pub fn station(&self) -> &str {
        arg(self, "st").unwrap_or("ERROR")
    }

    fn run(&self, actions: &dyn RpcActions, completer: JobCompleter) -> Option<RpcDict> {
        actions.pos_report(self, completer)
    }
}

/// Ask for the remote software version
#[derive(Debug, Clone)]
pub struct GetVersionJob {
    base: JobBase,
}
impl_job_base!(GetVersionJob, "RPCGetVersion");

impl GetVersionJob {
    fn run(&self, actions: &dyn RpcActions, _completer: JobCompleter) -> Option<RpcDict> {
        Some(actions.get_version(self))
    }
}

/// Mail account a [`CheckMailJob`] asks the remote station to poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAccount {
    /// Mail host, or `@WL2K` for Winlink
    pub host: String,
    /// Account user
    pub user: String,
    /// Account password
    pub password: String,
    /// Server port
    pub port: u16,
    /// Use TLS
    pub ssl: bool,
}

impl MailAccount {
    /// Host value that selects the Winlink gateway
    pub const WINLINK_HOST: &'static str = "@WL2K";

    /// Whether this account goes through Winlink
    pub fn is_winlink(&self) -> bool {
        self.host == Self::WINLINK_HOST
    }
}

/// Ask the remote station to check mail on our behalf
#[derive(Debug, Clone)]
pub struct CheckMailJob {
    base: JobBase,
}
impl_job_base!(CheckMailJob, "RPCCheckMail");

impl CheckMailJob {
    /// Set the account to check
    pub fn set_account(&mut self, account: &MailAccount) {
        self.base.args = RpcDict::from([
            ("host".to_string(), account.host.clone()),
            ("user".to_string(), account.user.clone()),
            ("pasw".to_string(), account.password.clone()),
            ("port".to_string(), account.port.to_string()),
            ("ssl".to_string(), if account.ssl { "True" } else { "False" }.to_string()),
        ]);
    }

    /// Account carried by the job
    pub fn account(&self) -> Result<MailAccount, RpcError> {
        let get = |key: &str| {
            arg(self, key)
                .map(str::to_string)
                .ok_or_else(|| RpcError::BadArgument {
                    key: key.to_string(),
                    reason: "missing".to_string(),
                })
        };
        let port = get("port")?;
        Ok(MailAccount {
            host: get("host")?,
            user: get("user")?,
            password: get("pasw")?,
            port: port.parse().map_err(|_| RpcError::BadArgument {
                key: "port".to_string(),
                reason: format!("`{}' is not a port number", port),
            })?,
            ssl: get("ssl")? == "True",
        })
    }

    fn run(&self, actions: &dyn RpcActions, completer: JobCompleter) -> Option<RpcDict> {
        actions.check_mail(self, completer)
    }
}
