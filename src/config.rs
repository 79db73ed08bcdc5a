use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::backend::AcademicBackend;
use crate::http::HttpBackend;
use crate::memory::MemoryBackend;
use crate::snapshot;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Where student data comes from, as given on the command line or in the
/// environment.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    pub api_url: Option<String>,
    pub snapshot: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

pub enum DataSource {
    Remote(HttpBackend),
    Offline { backend: MemoryBackend, path: PathBuf },
}

impl SourceConfig {
    pub fn open(&self) -> anyhow::Result<DataSource> {
        match (&self.api_url, &self.snapshot) {
            (Some(_), Some(_)) => bail!("configure either GRADE_API_URL or GRADE_SNAPSHOT, not both"),
            (None, None) => bail!("GRADE_API_URL or GRADE_SNAPSHOT must be set"),
            (Some(url), None) => {
                let timeout = Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
                let backend = HttpBackend::new(url, timeout)
                    .with_context(|| format!("failed to build HTTP client for {url}"))?;
                Ok(DataSource::Remote(backend))
            }
            (None, Some(path)) => {
                let backend = MemoryBackend::new(snapshot::load(path)?);
                Ok(DataSource::Offline {
                    backend,
                    path: path.clone(),
                })
            }
        }
    }
}

impl DataSource {
    pub fn backend(&self) -> &dyn AcademicBackend {
        match self {
            DataSource::Remote(backend) => backend,
            DataSource::Offline { backend, .. } => backend,
        }
    }

    /// Writes offline changes back to the snapshot file. Remote sources
    /// already committed theirs.
    pub fn commit(self) -> anyhow::Result<()> {
        match self {
            DataSource::Remote(_) => Ok(()),
            DataSource::Offline { backend, path } => snapshot::save(&path, &backend.into_snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_source_is_required() {
        let none = SourceConfig::default();
        assert!(none.open().is_err());

        let both = SourceConfig {
            api_url: Some("http://localhost:5000".to_string()),
            snapshot: Some(PathBuf::from("snapshot.json")),
            timeout_secs: None,
        };
        assert!(both.open().is_err());
    }

    #[test]
    fn remote_source_builds_client() {
        let remote = SourceConfig {
            api_url: Some("http://localhost:5000".to_string()),
            ..SourceConfig::default()
        };
        assert!(matches!(remote.open().unwrap(), DataSource::Remote(_)));
    }

    #[test]
    fn offline_source_commits_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        snapshot::save(&path, &snapshot::seed()).unwrap();

        let source = SourceConfig {
            snapshot: Some(path.clone()),
            ..SourceConfig::default()
        }
        .open()
        .unwrap();
        source.commit().unwrap();

        assert_eq!(snapshot::load(&path).unwrap(), snapshot::seed());
    }
}
