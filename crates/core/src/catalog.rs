//! Named job factories, so a session can build a job from a request.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::CatalogError;
use crate::job::Job;

type Factory = dyn Fn(&Value) -> Result<Box<dyn Job>, String> + Send + Sync;

struct CatalogEntry {
    description: String,
    factory: Box<Factory>,
}

/// A job kind as advertised to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobKind {
    pub kind: String,
    pub description: String,
}

#[derive(Default)]
pub struct JobCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `kind`, replacing any previous one. The
    /// factory reports bad parameters as a plain message.
    pub fn register<F>(&mut self, kind: impl Into<String>, description: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Job>, String> + Send + Sync + 'static,
    {
        self.entries.insert(
            kind.into(),
            CatalogEntry {
                description: description.into(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn build(&self, kind: &str, params: &Value) -> Result<Box<dyn Job>, CatalogError> {
        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| CatalogError::UnknownKind(kind.to_string()))?;
        (entry.factory)(params).map_err(|message| CatalogError::InvalidParams {
            kind: kind.to_string(),
            message,
        })
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.entries
            .iter()
            .map(|(kind, entry)| JobKind {
                kind: kind.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{job_fn, JobContext, JobOutput};
    use serde_json::json;

    fn catalog() -> JobCatalog {
        let mut catalog = JobCatalog::new();
        catalog.register("noop", "does nothing", |_params: &Value| {
            Ok(Box::new(job_fn("noop", |_ctx: &JobContext| Ok(JobOutput::summary(["ok"])))) as Box<dyn Job>)
        });
        catalog.register("sized", "needs a size", |params: &Value| {
            let size = params
                .get("size")
                .and_then(Value::as_u64)
                .ok_or_else(|| "missing 'size'".to_string())?;
            Ok(Box::new(job_fn("sized", move |_ctx: &JobContext| {
                Ok(JobOutput::summary([format!("size {size}")]))
            })) as Box<dyn Job>)
        });
        catalog
    }

    #[test]
    fn builds_registered_kind() {
        let job = catalog().build("noop", &Value::Null).unwrap();
        assert_eq!(job.name(), "noop");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = catalog().build("merge", &Value::Null).err().unwrap();
        assert_eq!(err, CatalogError::UnknownKind("merge".into()));
    }

    #[test]
    fn factory_message_becomes_invalid_params() {
        let err = catalog().build("sized", &json!({})).err().unwrap();
        assert_eq!(
            err,
            CatalogError::InvalidParams {
                kind: "sized".into(),
                message: "missing 'size'".into()
            }
        );
        assert!(catalog().build("sized", &json!({"size": 3})).is_ok());
    }

    #[test]
    fn kinds_are_sorted() {
        let kinds: Vec<String> = catalog().kinds().into_iter().map(|k| k.kind).collect();
        assert_eq!(kinds, vec!["noop", "sized"]);
    }
}
