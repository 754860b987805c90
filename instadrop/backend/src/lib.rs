//! Client for the InstaDrop document-processing backend.
//!
//! Every tool is a multipart `POST /api/<tool>` carrying the input under the
//! `file` field (`files` for image-to-pdf) plus tool specific text fields.
//! File tools answer with the processed document, `ocr` and `chat-pdf` with
//! JSON.

mod usage;

use std::{io, path::Path, time::Duration};

use reqwest::{
    Client, Response, StatusCode,
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub use usage::RemoteUsageStore;

/// Processing limit of the backend tools.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(
        "the request took too long ({}s limit), please retry with a smaller input",
        .0.as_secs()
    )]
    Timeout(Duration),
    #[error("backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("invalid backend URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// File sent to a tool.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Upload {
    /// MIME type is guessed from the file name.
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string();
        Self {
            file_name,
            mime_type,
            data,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());
        Ok(Self::new(file_name, data))
    }

    fn into_part(self) -> Result<Part, BackendError> {
        Part::bytes(self.data)
            .file_name(self.file_name)
            .mime_str(&self.mime_type)
            .map_err(BackendError::Http)
    }
}

/// Processed document returned by a file tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct OcrResponse {
    pub filename: String,
    pub extracted_text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    pub response: String,
}

#[derive(Clone, Debug)]
pub struct BackendClient {
    base: Url,
    pub(crate) client: Client,
    timeout: Duration,
}

impl BackendClient {
    pub fn new(api_url: &str) -> Result<Self, BackendError> {
        Self::with_timeout(api_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut base = Url::parse(api_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            base,
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn compress_pdf(
        &self,
        file: Upload,
        quality: u8,
    ) -> Result<ToolOutput, BackendError> {
        let form = single(file)?.text("quality", quality.to_string());
        self.file_tool("api/compress-pdf", form).await
    }

    pub async fn compress_image(
        &self,
        file: Upload,
        target_kb: u32,
    ) -> Result<ToolOutput, BackendError> {
        let form = single(file)?.text("target_kb", target_kb.to_string());
        self.file_tool("api/compress-image", form).await
    }

    /// `ranges` such as `1-3,5`. Multiple ranges come back as a zip.
    pub async fn split_pdf(
        &self,
        file: Upload,
        ranges: &str,
    ) -> Result<ToolOutput, BackendError> {
        let form = single(file)?.text("ranges", ranges.to_owned());
        self.file_tool("api/split-pdf", form).await
    }

    /// `order` is a comma separated list of 1-based page numbers.
    pub async fn organize_pdf(
        &self,
        file: Upload,
        order: &str,
    ) -> Result<ToolOutput, BackendError> {
        let form = single(file)?.text("order", order.to_owned());
        self.file_tool("api/organize-pdf", form).await
    }

    pub async fn unlock_pdf(
        &self,
        file: Upload,
        password: &str,
    ) -> Result<ToolOutput, BackendError> {
        let form = single(file)?.text("password", password.to_owned());
        self.file_tool("api/unlock-pdf", form).await
    }

    pub async fn repair_pdf(
        &self,
        file: Upload,
    ) -> Result<ToolOutput, BackendError> {
        self.file_tool("api/repair-pdf", single(file)?).await
    }

    pub async fn pdf_to_word(
        &self,
        file: Upload,
    ) -> Result<ToolOutput, BackendError> {
        self.file_tool("api/pdf-to-word", single(file)?).await
    }

    pub async fn office_to_pdf(
        &self,
        file: Upload,
    ) -> Result<ToolOutput, BackendError> {
        self.file_tool("api/office-to-pdf", single(file)?).await
    }

    /// Combines images into one PDF, in the given order.
    pub async fn image_to_pdf(
        &self,
        files: Vec<Upload>,
    ) -> Result<ToolOutput, BackendError> {
        let mut form = Form::new();
        for file in files {
            form = form.part("files", file.into_part()?);
        }
        self.file_tool("api/image-to-pdf", form).await
    }

    pub async fn ocr(&self, file: Upload) -> Result<OcrResponse, BackendError> {
        self.json_tool("api/ocr", single(file)?).await
    }

    pub async fn chat_pdf(
        &self,
        file: Upload,
        query: &str,
    ) -> Result<ChatResponse, BackendError> {
        let form = single(file)?.text("query", query.to_owned());
        self.json_tool("api/chat-pdf", form).await
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base.join(path)?)
    }

    pub(crate) fn http_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Http(e)
        }
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, BackendError> {
        let response = check_status(response).await?;
        response.json().await.map_err(|e| self.http_error(e))
    }

    async fn post(
        &self,
        path: &str,
        form: Form,
    ) -> Result<Response, BackendError> {
        let url = self.endpoint(path)?;
        info!("POST {url}");
        self.client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.http_error(e))
    }

    async fn file_tool(
        &self,
        path: &str,
        form: Form,
    ) -> Result<ToolOutput, BackendError> {
        let response = check_status(self.post(path, form).await?).await?;

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_owned();
        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(attachment_name)
            .unwrap_or_else(|| "output".to_owned());
        let data = response
            .bytes()
            .await
            .map_err(|e| self.http_error(e))?
            .to_vec();

        debug!("received `{file_name}` ({} bytes, {mime_type})", data.len());
        Ok(ToolOutput {
            file_name,
            mime_type,
            data,
        })
    }

    async fn json_tool<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, BackendError> {
        let response = self.post(path, form).await?;
        self.read_json(response).await
    }
}

fn single(file: Upload) -> Result<Form, BackendError> {
    Ok(Form::new().part("file", file.into_part()?))
}

/// Passes 2xx responses through, turns the rest into `Status` with the
/// FastAPI `detail` when the body carries one.
async fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        detail: error_detail(status, &body),
    })
}

fn error_detail(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: serde_json::Value,
    }

    match serde_json::from_str::<Detail>(body) {
        Ok(Detail {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(Detail { detail }) => detail.to_string(),
        Err(_) if !body.trim().is_empty() => body.trim().to_owned(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned(),
    }
}

/// File name of a `Content-Disposition: attachment` header.
fn attachment_name(header: &str) -> Option<String> {
    let mut plain = None;
    for param in header.split(';').map(str::trim) {
        if let Some(encoded) = param.strip_prefix("filename*=") {
            let encoded = encoded.trim_matches('"');
            let value = encoded
                .split_once("''")
                .map_or(encoded, |(_, value)| value);
            return Some(percent_decode(value));
        }
        if let Some(name) = param.strip_prefix("filename=") {
            plain = Some(name.trim_matches('"').to_owned());
        }
    }
    plain.filter(|name| !name.is_empty())
}

fn percent_decode(value: &str) -> String {
    percent_encoding::percent_decode_str(value)
        .decode_utf8_lossy()
        .into_owned()
}
