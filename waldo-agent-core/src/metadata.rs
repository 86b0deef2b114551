//! Local record of successful uploads, one JSON file per upload under
//! `~/.waldo/builds`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    #[serde(rename = "appID")]
    pub app_id: String,
    #[serde(rename = "appVersionID")]
    pub app_version_id: String,
    pub host: String,
    #[serde(rename = "uploadTime")]
    pub upload_time: DateTime<Utc>,
}

/// The part of the build upload response the agent cares about.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "applicationId", default)]
    application_id: String,
    #[serde(rename = "id", default)]
    app_version_id: String,
}

impl UploadMetadata {
    /// Parse a build upload response body received from `host`.
    pub fn from_response(body: &[u8], host: &str, upload_time: DateTime<Utc>) -> Result<Self> {
        let response: UploadResponse = serde_json::from_slice(body)?;
        Ok(Self {
            app_id: response.application_id,
            app_version_id: response.app_version_id,
            host: host.to_string(),
            upload_time,
        })
    }

    /// File name derived from the upload time, second resolution.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.upload_time.format("%Y-%m-%d-%H-%M-%S"))
    }
}

/// Directory that upload metadata is written to.
///
/// Without a home directory the store has no root and every save fails,
/// which the upload treats like any other metadata failure.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: Option<PathBuf>,
}

impl MetadataStore {
    /// `~/.waldo/builds`.
    pub fn in_home() -> Self {
        Self {
            root: dirs::home_dir().map(|home| home.join(".waldo").join("builds")),
        }
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Write `metadata` and return the path of the file.
    ///
    /// The directory is created owner-only, the file owner read/write only.
    pub fn save(&self, metadata: &UploadMetadata) -> Result<PathBuf> {
        let root = self.root().ok_or(AgentError::NoHomeDirectory)?;
        create_private_dir(root)?;

        let path = root.join(metadata.file_name());
        let data = serde_json::to_vec(metadata)?;
        let mut file = open_private_file(&path)?;
        file.write_all(&data)?;

        info!(path = %path.display(), app_version_id = %metadata.app_version_id, "[UPLOAD] Saved upload metadata");
        Ok(path)
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(unix)]
fn open_private_file(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?)
}

#[cfg(not(unix))]
fn open_private_file(path: &Path) -> Result<fs::File> {
    Ok(fs::File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn parses_ids_from_upload_response() {
        let body = br#"{"id":"appv-123","applicationId":"app-9","status":"pending","size":42}"#;
        let metadata = UploadMetadata::from_response(body, "api.waldo.com", sample_time()).unwrap();
        assert_eq!(metadata.app_id, "app-9");
        assert_eq!(metadata.app_version_id, "appv-123");
        assert_eq!(metadata.host, "api.waldo.com");
    }

    #[test]
    fn store_without_root_cannot_save() {
        let store = MetadataStore { root: None };
        let metadata = UploadMetadata {
            app_id: String::new(),
            app_version_id: String::new(),
            host: String::new(),
            upload_time: sample_time(),
        };
        assert!(matches!(store.save(&metadata), Err(AgentError::NoHomeDirectory)));
    }

    #[test]
    fn rejects_non_json_response() {
        assert!(matches!(
            UploadMetadata::from_response(b"<html>", "api.waldo.com", sample_time()),
            Err(AgentError::Json(_))
        ));
    }

    #[test]
    fn file_is_named_after_upload_time() {
        let root = tempdir().unwrap();
        let store = MetadataStore::at(root.path().join(".waldo").join("builds"));
        let metadata = UploadMetadata {
            app_id: "app-9".into(),
            app_version_id: "appv-123".into(),
            host: "api.waldo.com".into(),
            upload_time: sample_time(),
        };

        let path = store.save(&metadata).unwrap();
        assert_eq!(path, store.root().unwrap().join("2024-03-07-09-05-02.json"));

        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["appID"], "app-9");
        assert_eq!(written["appVersionID"], "appv-123");
        assert_eq!(written["host"], "api.waldo.com");
        assert!(written["uploadTime"].as_str().unwrap().starts_with("2024-03-07T09:05:02"));
    }

    #[cfg(unix)]
    #[test]
    fn metadata_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempdir().unwrap();
        let store = MetadataStore::at(root.path().join("builds"));
        let metadata = UploadMetadata {
            app_id: String::new(),
            app_version_id: "appv-1".into(),
            host: "localhost:8080".into(),
            upload_time: sample_time(),
        };

        let path = store.save(&metadata).unwrap();
        let dir_mode = fs::metadata(store.root().unwrap()).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
