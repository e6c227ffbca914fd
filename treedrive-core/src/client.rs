use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Session,
    Denied,
    NotFound,
    Conflict,
    RateLimit,
    Transient,
    Permanent,
}

impl ApiError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            ApiError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self.classification() {
            Some(class) => matches!(class, ApiErrorClass::RateLimit | ApiErrorClass::Transient),
            // Transport-level failures (connect, timeout) are always retryable.
            None => matches!(self, ApiError::Request(_)),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    match status {
        StatusCode::UNAUTHORIZED => ApiErrorClass::Session,
        StatusCode::FORBIDDEN => ApiErrorClass::Denied,
        StatusCode::NOT_FOUND => ApiErrorClass::NotFound,
        StatusCode::CONFLICT => ApiErrorClass::Conflict,
        StatusCode::TOO_MANY_REQUESTS => ApiErrorClass::RateLimit,
        _ if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT => {
            ApiErrorClass::Transient
        }
        _ => ApiErrorClass::Permanent,
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    session_token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, session_token: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            session_token: session_token.into(),
        })
    }

    pub async fn list_children(
        &self,
        folder: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<ChildrenPage, ApiError> {
        let mut url = self.endpoint("/api/listChildren")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("folder", folder);
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let raw: RawChildrenPage = Self::handle_response(response).await?;
        Ok(ChildrenPage {
            items: raw.items.into_iter().map(RawChildItem::normalize).collect(),
            next_cursor: raw.next_cursor,
        })
    }

    pub async fn folder_stats(
        &self,
        folder: &str,
        source_id: &str,
    ) -> Result<FolderStats, ApiError> {
        let mut url = self.endpoint("/api/folderStats")?;
        url.query_pairs_mut()
            .append_pair("folder", folder)
            .append_pair("sourceId", source_id);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches the capability set for a folder. A missing resource (404) is
    /// reported as `None` rather than an error.
    pub async fn capabilities(
        &self,
        folder: &str,
        source_id: &str,
    ) -> Result<Option<CapabilitySet>, ApiError> {
        let mut url = self.endpoint("/api/capabilities")?;
        url.query_pairs_mut()
            .append_pair("folder", folder)
            .append_pair("sourceId", source_id);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::handle_response(response).await?))
    }

    pub async fn move_folder(&self, request: &MoveRequest) -> Result<MoveOutcome, ApiError> {
        let url = self.endpoint("/api/moveFolder")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(request)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn rename_folder(
        &self,
        old_folder: &str,
        new_folder: &str,
    ) -> Result<RenameOutcome, ApiError> {
        let url = self.endpoint("/api/renameFolder")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&RenameRequest {
                old_folder,
                new_folder,
            })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn encryption_plan(
        &self,
        folder: &str,
        mode: JobMode,
    ) -> Result<EncryptionPlan, ApiError> {
        let mut url = self.endpoint("/api/encryptionPlan")?;
        url.query_pairs_mut()
            .append_pair("folder", folder)
            .append_pair("mode", mode.as_str());
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Starts a folder-wide encryption job. A 409 means a job is already
    /// running for the target; the server reports it in the body so the
    /// caller can reattach instead of failing.
    pub async fn encryption_job_start(
        &self,
        folder: &str,
        mode: JobMode,
        total_files: u64,
        total_bytes: u64,
    ) -> Result<StartOutcome, ApiError> {
        let url = self.endpoint("/api/encryptionJobStart")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&StartRequest {
                folder,
                mode,
                total_files,
                total_bytes,
            })
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            let envelope: JobEnvelope = response.json().await?;
            return Ok(StartOutcome::AlreadyRunning(envelope.job));
        }
        let started: StartResponse = Self::handle_response(response).await?;
        Ok(StartOutcome::Started {
            job_id: started.job_id,
        })
    }

    /// Asks the server to process one bounded unit of job work and returns
    /// the refreshed job snapshot.
    pub async fn encryption_job_tick(
        &self,
        job_id: &str,
        max_files: u32,
    ) -> Result<EncryptionJob, ApiError> {
        let url = self.endpoint("/api/encryptionJobTick")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&TickRequest { job_id, max_files })
            .send()
            .await?;
        let envelope: JobEnvelope = Self::handle_response(response).await?;
        Ok(envelope.job)
    }

    pub async fn encryption_job_status(&self, job_id: &str) -> Result<EncryptionJob, ApiError> {
        let mut url = self.endpoint("/api/encryptionJobStatus")?;
        url.query_pairs_mut().append_pair("jobId", job_id);
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let envelope: JobEnvelope = Self::handle_response(response).await?;
        Ok(envelope.job)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.session_token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Api { status, body })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildEntry {
    pub name: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub has_subfolders: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildrenPage {
    pub items: Vec<ChildEntry>,
    pub next_cursor: Option<String>,
}

// Older servers return bare names; newer ones return annotated objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChildItem {
    Entry(ChildEntry),
    Name(String),
}

impl RawChildItem {
    fn normalize(self) -> ChildEntry {
        match self {
            RawChildItem::Entry(entry) => entry,
            RawChildItem::Name(name) => ChildEntry {
                name,
                locked: false,
                encrypted: false,
                has_subfolders: None,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChildrenPage {
    items: Vec<RawChildItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderStats {
    pub folders: u64,
    pub files: u64,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionCaps {
    pub encrypted: bool,
    pub can_encrypt: bool,
    pub can_decrypt: bool,
    pub inherited: bool,
    pub root: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitySet {
    pub can_view: Option<bool>,
    pub can_create: bool,
    pub can_rename: bool,
    pub can_move_folder: bool,
    pub can_delete_folder: bool,
    pub can_share_folder: bool,
    pub can_edit: bool,
    pub encryption: EncryptionCaps,
    pub owner: Option<String>,
    // Legacy fields kept for older server responses.
    pub can_read: Option<bool>,
    pub can_read_own: Option<bool>,
    pub is_admin: Option<bool>,
}

impl CapabilitySet {
    /// View access with fallback through the legacy permission fields.
    pub fn can_view(&self) -> bool {
        self.can_view
            .or(self.can_read)
            .or(self.can_read_own)
            .or(self.is_admin)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub source: String,
    pub destination: String,
    pub source_id: String,
    pub dest_source_id: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MoveOutcome {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest<'a> {
    old_folder: &'a str,
    new_folder: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RenameOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Encrypt,
    Decrypt,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Encrypt => "encrypt",
            JobMode::Decrypt => "decrypt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Done,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionPlan {
    pub ok: bool,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    folder: &'a str,
    mode: JobMode,
    total_files: u64,
    total_bytes: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    #[allow(dead_code)]
    ok: bool,
    job_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TickRequest<'a> {
    job_id: &'a str,
    max_files: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionJob {
    pub id: String,
    pub folder: String,
    pub mode: JobMode,
    pub state: JobState,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub done_files: u64,
    #[serde(default)]
    pub done_bytes: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl EncryptionJob {
    /// Progress in percent, preferring file counters and falling back to
    /// bytes when the file total is unknown.
    pub fn progress_percent(&self) -> Option<u8> {
        let (done, total) = if self.total_files > 0 {
            (self.done_files, self.total_files)
        } else if self.total_bytes > 0 {
            (self.done_bytes, self.total_bytes)
        } else {
            return None;
        };
        Some(((done.min(total) as f64 / total as f64) * 100.0).round() as u8)
    }
}

#[derive(Deserialize)]
struct JobEnvelope {
    job: EncryptionJob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { job_id: String },
    AlreadyRunning(EncryptionJob),
}
