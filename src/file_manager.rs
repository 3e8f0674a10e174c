//! Client for the file manager service.
//!
//! Files live in buckets under a directory path. Uploads and updates are
//! multipart forms; downloads come back either as JSON (service messages)
//! or as the raw file bytes.

use std::path::Path;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::FileManagerConfig;
use crate::error_body::describe_http_error;

pub const FILE_ROUTE: &str = "file";
pub const STRUCTURE_ROUTE: &str = "structure";

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("invalid file manager request: {0}")]
    Validation(&'static str),

    #[error("Connection error: {0}")]
    Transport(reqwest::Error),

    #[error("{message}")]
    HttpStatus { status: StatusCode, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

/// A file to send in an upload or update form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reads `path` into memory, naming the upload after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, FileManagerError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| FileManagerError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(file_name, bytes))
    }

    fn into_part(self) -> Result<Part, FileManagerError> {
        let part = Part::bytes(self.bytes).file_name(self.file_name);
        match self.content_type {
            Some(mime) => part.mime_str(&mime).map_err(FileManagerError::Transport),
            None => Ok(part),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FileContent {
    /// The service answered with a JSON document instead of a file.
    Json(Value),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileResponse {
    pub content: FileContent,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl FileResponse {
    pub fn is_file(&self) -> bool {
        matches!(self.content, FileContent::Bytes(_))
    }
}

#[derive(Clone, Debug)]
pub struct FileManagerClient {
    http: Client,
    api_url: String,
}

impl FileManagerClient {
    pub fn new(config: &FileManagerConfig) -> Result<Self, FileManagerError> {
        let http = Client::builder()
            .no_proxy()
            .timeout(config.timeout)
            .build()
            .map_err(FileManagerError::Transport)?;

        Ok(Self {
            http,
            api_url: config.api_url(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Stores `file` under `directory` in `bucket_id`.
    pub async fn upload_file(
        &self,
        bucket_id: &str,
        directory: &str,
        file: FileUpload,
    ) -> Result<Value, FileManagerError> {
        self.send_file(Method::POST, bucket_id, directory, file).await
    }

    pub async fn upload_file_from_path(
        &self,
        bucket_id: &str,
        directory: &str,
        path: impl AsRef<Path>,
    ) -> Result<Value, FileManagerError> {
        let file = FileUpload::from_path(path).await?;
        self.upload_file(bucket_id, directory, file).await
    }

    /// Replaces an existing file.
    pub async fn update_file(
        &self,
        bucket_id: &str,
        directory: &str,
        file: FileUpload,
    ) -> Result<Value, FileManagerError> {
        self.send_file(Method::PUT, bucket_id, directory, file).await
    }

    pub async fn update_file_from_path(
        &self,
        bucket_id: &str,
        directory: &str,
        path: impl AsRef<Path>,
    ) -> Result<Value, FileManagerError> {
        let file = FileUpload::from_path(path).await?;
        self.update_file(bucket_id, directory, file).await
    }

    pub async fn get_file(
        &self,
        bucket_id: &str,
        file_path: &str,
    ) -> Result<FileResponse, FileManagerError> {
        require_path_args(bucket_id, file_path)?;
        let url = self.url(
            FILE_ROUTE,
            &[("bucket_id", bucket_id), ("file_path", file_path)],
        )?;
        debug!(event = "file_manager_request", method = "GET", url = %url);

        let response = self.http.get(url).send().await.map_err(FileManagerError::Transport)?;
        let response = ensure_success(response).await?;
        read_file_response(response).await
    }

    /// Returns the bucket's directory tree, optionally filtered by extension.
    pub async fn list_files<S: AsRef<str>>(
        &self,
        bucket_id: &str,
        extensions: &[S],
    ) -> Result<Value, FileManagerError> {
        let mut query = vec![("bucket_id", bucket_id)];
        query.extend(extensions.iter().map(|ext| ("extensions", ext.as_ref())));
        let url = self.url(STRUCTURE_ROUTE, &query)?;
        debug!(event = "file_manager_request", method = "GET", url = %url);

        let response = self.http.get(url).send().await.map_err(FileManagerError::Transport)?;
        read_json(response).await
    }

    pub async fn delete_file(
        &self,
        bucket_id: &str,
        file_path: &str,
    ) -> Result<Value, FileManagerError> {
        require_path_args(bucket_id, file_path)?;
        let url = self.url(
            FILE_ROUTE,
            &[("bucket_id", bucket_id), ("file_path", file_path)],
        )?;
        debug!(event = "file_manager_request", method = "DELETE", url = %url);

        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(FileManagerError::Transport)?;
        read_json(response).await
    }

    async fn send_file(
        &self,
        method: Method,
        bucket_id: &str,
        directory: &str,
        file: FileUpload,
    ) -> Result<Value, FileManagerError> {
        if bucket_id.is_empty() || directory.is_empty() || file.file_name.is_empty() {
            return Err(FileManagerError::Validation(
                "bucket_id, directory and file are required for save/update operations",
            ));
        }

        let url = self.url(FILE_ROUTE, &[])?;
        debug!(
            event = "file_manager_request",
            method = %method,
            url = %url,
            bucket_id,
            directory,
            file_name = %file.file_name,
            size = file.bytes.len()
        );

        let form = Form::new()
            .text("bucket_id", bucket_id.to_string())
            .text("directory", directory.to_string())
            .part("file", file.into_part()?);

        let response = self
            .http
            .request(method, url)
            .multipart(form)
            .send()
            .await
            .map_err(FileManagerError::Transport)?;
        read_json(response).await
    }

    /// Builds `{api_url}/{route}?…`, dropping empty query values.
    fn url(&self, route: &str, query: &[(&str, &str)]) -> Result<Url, FileManagerError> {
        let mut url = Url::parse(&format!("{}/{route}", self.api_url))
            .map_err(|_| FileManagerError::Validation("file manager base url is not a valid url"))?;
        let present: Vec<_> = query.iter().filter(|(_, value)| !value.is_empty()).collect();
        if !present.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in present {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

fn require_path_args(bucket_id: &str, file_path: &str) -> Result<(), FileManagerError> {
    if bucket_id.is_empty() || file_path.is_empty() {
        return Err(FileManagerError::Validation(
            "bucket_id and file_path are required for get/delete operations",
        ));
    }
    Ok(())
}

async fn ensure_success(response: Response) -> Result<Response, FileManagerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.map_err(FileManagerError::Transport)?;
    let message = describe_http_error(status.as_u16(), &body);
    debug!(event = "file_manager_failed", status = status.as_u16(), message = %message);
    Err(FileManagerError::HttpStatus { status, message })
}

async fn read_json(response: Response) -> Result<Value, FileManagerError> {
    let response = ensure_success(response).await?;
    let body = response.text().await.map_err(FileManagerError::Transport)?;
    serde_json::from_str(&body).map_err(|err| FileManagerError::Parse(err.to_string()))
}

async fn read_file_response(response: Response) -> Result<FileResponse, FileManagerError> {
    let content_type = header_value(&response, CONTENT_TYPE.as_str());
    let filename =
        header_value(&response, CONTENT_DISPOSITION.as_str()).and_then(|cd| filename_from_disposition(&cd));
    let content_length = response.content_length();

    let bytes = response.bytes().await.map_err(FileManagerError::Transport)?;
    let is_json = content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("application/json"));

    if is_json {
        let value = serde_json::from_slice(&bytes).map_err(|err| FileManagerError::Parse(err.to_string()))?;
        return Ok(FileResponse {
            content: FileContent::Json(value),
            filename: None,
            content_type,
            content_length,
        });
    }

    Ok(FileResponse {
        content_length: content_length.or(Some(bytes.len() as u64)),
        content: FileContent::Bytes(bytes.to_vec()),
        filename,
        content_type,
    })
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Pulls the file name out of a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let (_, tail) = header.rsplit_once("filename=")?;
    let name = tail.split(';').next()?.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}
