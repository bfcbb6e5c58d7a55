use std::path::Path;

use mime_guess::from_path;
use reqwest::Method;

use crate::api::client::ApiClient;
use crate::error::{ClientError, ClientResult};
use crate::models::{SignedUpload, SignedUploadRequest};
use crate::source::DataSource;

const FALLBACK_FILENAME: &str = "upload.bin";

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub async fn read(path: &Path) -> ClientResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|error| {
            tracing::warn!(error = ?error, path = %path.display(), "failed to read upload");
            ClientError::Io(error)
        })?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(FALLBACK_FILENAME)
            .to_string();
        let content_type = from_path(path).first_or_octet_stream().to_string();

        Ok(Self {
            filename,
            content_type,
            bytes,
        })
    }
}

/// Requests a signed URL, PUTs the bytes straight to storage and returns the
/// public URL. The API server never sees the file body.
pub async fn signed_upload(
    client: &ApiClient,
    token: Option<&str>,
    filename: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> ClientResult<String> {
    let signed: SignedUpload = client
        .send_json(
            Method::POST,
            "/attachments/signed-url",
            &SignedUploadRequest {
                filename: filename.to_string(),
                content_type: content_type.to_string(),
            },
            token,
        )
        .await?;

    client
        .put_bytes(&signed.upload_url, bytes, content_type)
        .await?;
    tracing::info!(filename, public_url = %signed.public_url, "file uploaded");

    Ok(signed.public_url)
}

pub async fn upload_path(
    source: &dyn DataSource,
    token: Option<&str>,
    path: &Path,
) -> ClientResult<String> {
    let file = FileUpload::read(path).await?;
    source
        .upload_file(token, &file.filename, &file.content_type, file.bytes)
        .await
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::source::http::HttpSource;
    use crate::test_support::{spawn_stub_backend, test_client};

    #[tokio::test]
    async fn read_guesses_content_type_from_extension() {
        let dir = tempdir().expect("tempdir should be created");
        let path = dir.path().join("brief.pdf");
        fs::write(&path, b"%PDF-1.4").expect("file should be written");

        let upload = FileUpload::read(&path).await.expect("file should be read");
        assert_eq!(upload.filename, "brief.pdf");
        assert_eq!(upload.content_type, "application/pdf");
        assert_eq!(upload.bytes, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn upload_goes_to_signed_url_and_returns_public_url() {
        let backend = spawn_stub_backend().await;
        let source = HttpSource::new(test_client(&backend.base_url));
        let dir = tempdir().expect("tempdir should be created");
        let path = dir.path().join("notes.txt");
        fs::write(&path, "kickoff notes").expect("file should be written");

        let public_url = upload_path(&source, Some("tok-1"), &path)
            .await
            .expect("upload should succeed");
        assert_eq!(public_url, "https://storage.example/public/notes.txt");

        let stored = backend.uploads();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content_type, "text/plain");
        assert_eq!(stored[0].bytes, b"kickoff notes");

        backend.abort();
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempdir().expect("tempdir should be created");
        let error = FileUpload::read(&dir.path().join("absent.txt"))
            .await
            .expect_err("file does not exist");
        assert!(matches!(error, ClientError::Io(_)));
    }
}
