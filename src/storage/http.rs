use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use tracing::Instrument;
use uuid::Uuid;

use super::PinBackend;
use crate::error::PinError;
use crate::model::{PinId, PinRecord, PinStats, PinSubmission, Scope};

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// How a non-success status is reported for a given endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Rejected,
    Authorization,
}

/// `PinBackend` over the session-authenticated REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, session_cookie: Option<&str>, timeout: Duration) -> Result<Self> {
        let base = parse_base_url(base_url)?;
        let mut headers = HeaderMap::new();
        if let Some(session) = session_cookie.filter(|value| !value.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("sessionid={session}"))
                .context("session cookie contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
        let client = Client::builder()
            .user_agent(concat!("pintrav/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, PinError> {
        self.base
            .join(path)
            .map_err(|err| PinError::Network(format!("invalid endpoint {path}: {err}")))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        failure: Failure,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, PinError> {
        let url = self.endpoint(path)?;
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("request", id = %request_id, method = method.as_str(), path);
        async move {
            let request = self
                .client
                .request(method, url)
                .header(REQUEST_ID_HEADER, request_id.to_string());
            let response = build(request).send().await.map_err(|err| {
                tracing::warn!(?err, "request failed");
                PinError::Network(err.to_string())
            })?;
            let status = response.status();
            tracing::debug!(status = status.as_u16(), "response received");
            if status.is_success() {
                return Ok(response);
            }
            let status = status.as_u16();
            Err(match failure {
                Failure::Rejected => PinError::Rejected { status },
                Failure::Authorization => PinError::Authorization { status },
            })
        }
        .instrument(span)
        .await
    }
}

/// Accepts a bare host as well as a prefix path; endpoints are joined beneath it.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).with_context(|| format!("invalid server url `{raw}`"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("server url must be http or https, got `{}`", url.scheme());
    }
    Ok(url)
}

fn list_path(scope: Scope) -> &'static str {
    match scope {
        Scope::Mine => "api/pins/",
        Scope::Public => "api/pins/public/",
    }
}

/// Text parts of a create/update body, in the order they are sent.
pub fn form_fields(submission: &PinSubmission) -> Result<Vec<(&'static str, String)>, PinError> {
    let sections = serde_json::to_string(&submission.sections)
        .map_err(|err| PinError::Decode(err.to_string()))?;
    let mut fields = vec![("title", submission.title.clone()), ("sections", sections)];
    if let Some(coordinate) = submission.coordinate {
        fields.push(("latitude", coordinate.lat().to_string()));
        fields.push(("longitude", coordinate.lon().to_string()));
    }
    fields.push(("is_public", submission.is_public.to_string()));
    fields.push(("status", submission.status.as_str().to_string()));
    fields.push(("category", submission.category.as_str().to_string()));
    Ok(fields)
}

fn multipart(submission: &PinSubmission) -> Result<Form, PinError> {
    let mut form = Form::new();
    for (name, value) in form_fields(submission)? {
        form = form.text(name, value);
    }
    if let Some(image) = &submission.image {
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name.clone())
            .mime_str(image.mime)
            .map_err(|err| PinError::Decode(err.to_string()))?;
        form = form.part("image", part);
    }
    Ok(form)
}

#[async_trait]
impl PinBackend for HttpBackend {
    async fn fetch(&self, scope: Scope) -> Result<Vec<PinRecord>, PinError> {
        let response = self
            .send(Method::GET, list_path(scope), Failure::Rejected, |req| req)
            .await?;
        Ok(response.json().await?)
    }

    async fn create(&self, submission: &PinSubmission) -> Result<PinRecord, PinError> {
        if submission.coordinate.is_none() {
            return Err(crate::error::StagingError::MissingCoordinate.into());
        }
        let form = multipart(submission)?;
        let response = self
            .send(Method::POST, "api/pins/add/", Failure::Rejected, |req| {
                req.multipart(form)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn update(&self, id: PinId, submission: &PinSubmission) -> Result<PinRecord, PinError> {
        let mut body = submission.clone();
        body.coordinate = None;
        let form = multipart(&body)?;
        let path = format!("api/pins/{}/update/", id.0);
        let response = self
            .send(Method::PUT, &path, Failure::Authorization, |req| {
                req.multipart(form)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, id: PinId) -> Result<(), PinError> {
        let path = format!("api/pins/{}/delete/", id.0);
        self.send(Method::DELETE, &path, Failure::Authorization, |req| req)
            .await?;
        Ok(())
    }

    async fn copy(&self, id: PinId) -> Result<(), PinError> {
        let path = format!("api/pins/{}/copy/", id.0);
        self.send(Method::POST, &path, Failure::Authorization, |req| req)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<PinStats, PinError> {
        let response = self
            .send(Method::GET, "api/pins/stats/", Failure::Rejected, |req| req)
            .await?;
        Ok(response.json().await?)
    }
}
