//! Job type registry
//!
//! Maps the tag carried in a request frame to a constructor. Tags that are
//! not registered are rejected before anything is built.

use std::collections::HashMap;

use crate::error::RpcError;
use crate::job::RpcJob;
use crate::jobs::{
    CheckMailJob, DeleteFileJob, FileListJob, FormListJob, GetVersionJob, PositionReportJob,
    PullFileJob, PullFormJob,
};

/// Builds an empty job addressed to the given station
pub type JobFactory = fn(&str) -> Box<dyn RpcJob>;

/// Description given to jobs built from incoming requests
pub const REMOTE_JOB_DESC: &str = "New job";

/// Tag to constructor table
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<&'static str, JobFactory>,
}

impl JobRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every stock job type
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(FileListJob::TAG, |dest| {
            Box::new(FileListJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(FormListJob::TAG, |dest| {
            Box::new(FormListJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(PullFileJob::TAG, |dest| {
            Box::new(PullFileJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(DeleteFileJob::TAG, |dest| {
            Box::new(DeleteFileJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(PullFormJob::TAG, |dest| {
            Box::new(PullFormJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(PositionReportJob::TAG, |dest| {
            Box::new(PositionReportJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(GetVersionJob::TAG, |dest| {
            Box::new(GetVersionJob::new(dest, REMOTE_JOB_DESC))
        });
        registry.register(CheckMailJob::TAG, |dest| {
            Box::new(CheckMailJob::new(dest, REMOTE_JOB_DESC))
        });
        registry
    }

    /// Add or replace a job type
    pub fn register(&mut self, tag: &'static str, factory: JobFactory) {
        self.factories.insert(tag, factory);
    }

    /// Whether `tag` is known
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.factories.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Build an empty job of type `tag` addressed to `dest`
    pub fn create(&self, tag: &str, dest: &str) -> Result<Box<dyn RpcJob>, RpcError> {
        self.factories
            .get(tag)
            .map(|factory| factory(dest))
            .ok_or_else(|| RpcError::UnknownCall(tag.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tags() {
        let registry = JobRegistry::standard();
        assert_eq!(
            registry.tags(),
            vec![
                "RPCCheckMail",
                "RPCDeleteFileJob",
                "RPCFileListJob",
                "RPCFormListJob",
                "RPCGetVersion",
                "RPCPositionReport",
                "RPCPullFileJob",
                "RPCPullFormJob",
            ]
        );
    }

    #[test]
    fn test_create_sets_dest_and_tag() {
        let registry = JobRegistry::standard();
        let job = registry.create("RPCPullFileJob", "KK7DS").unwrap();
        assert_eq!(job.tag(), "RPCPullFileJob");
        assert_eq!(job.dest(), "KK7DS");
        assert_eq!(job.desc(), REMOTE_JOB_DESC);
        assert!(job.args().is_empty());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let registry = JobRegistry::standard();
        assert_eq!(
            registry.create("RPCFormatDisk", "KK7DS").unwrap_err(),
            RpcError::UnknownCall("RPCFormatDisk".into())
        );
        assert!(!JobRegistry::new().contains("RPCGetVersion"));
    }
}
