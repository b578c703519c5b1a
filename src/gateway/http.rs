//! HTTP adapters for the gateway contracts.
//!
//! These adapters speak a small JSON protocol against operator-provided
//! endpoints; the concrete wire format is an adapter detail the engine
//! never sees. Transport failures map to `GatewayError::Unreachable`,
//! unparseable bodies to `GatewayError::MalformedResponse`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::gateway::{
    ArtifactHost, ReviewGate, ReviewHandle, ReviewStatus, ValidationGateway, ValidationHandle,
    ValidationStatus,
};
use crate::phase::{ArtifactRef, PhaseId};

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    phase: &'a str,
    artifact: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

/// Body of a validation status response.
#[derive(Debug, Deserialize)]
pub struct ValidationStatusBody {
    pub status: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Normalize a validation status body into the three-way outcome.
pub fn parse_validation_status(body: &ValidationStatusBody) -> Result<ValidationStatus, GatewayError> {
    match body.status.as_str() {
        "pending" | "queued" | "running" => Ok(ValidationStatus::Pending),
        "pass" => Ok(ValidationStatus::Pass),
        "fail" => Ok(ValidationStatus::Fail {
            details: body.details.clone().unwrap_or_default(),
        }),
        "error" => Ok(ValidationStatus::Error {
            reason: body.reason.clone().unwrap_or_default(),
        }),
        other => Err(GatewayError::MalformedResponse(format!(
            "unknown validation status '{}'",
            other
        ))),
    }
}

/// Body of a review status response.
#[derive(Debug, Deserialize)]
pub struct ReviewStatusBody {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Normalize a review status body.
pub fn parse_review_status(body: &ReviewStatusBody) -> Result<ReviewStatus, GatewayError> {
    match body.status.as_str() {
        "pending" => Ok(ReviewStatus::Pending),
        "approved" => Ok(ReviewStatus::Approved),
        "rejected" => Ok(ReviewStatus::Rejected {
            reason: body.reason.clone().unwrap_or_default(),
        }),
        other => Err(GatewayError::MalformedResponse(format!(
            "unknown review status '{}'",
            other
        ))),
    }
}

fn transport_err(err: reqwest::Error) -> GatewayError {
    GatewayError::Unreachable(err.to_string())
}

/// CI validation behind a `POST /validations` + `GET /validations/{id}`
/// endpoint pair.
pub struct HttpValidationGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpValidationGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ValidationGateway for HttpValidationGateway {
    async fn submit(
        &self,
        phase: &PhaseId,
        artifact: &ArtifactRef,
    ) -> Result<ValidationHandle, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/validations", self.base_url))
            .json(&SubmitRequest {
                phase,
                artifact: artifact.as_str(),
            })
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;

        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(ValidationHandle::new(body.id))
    }

    async fn poll(&self, handle: &ValidationHandle) -> Result<ValidationStatus, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/validations/{}", self.base_url, handle.as_str()))
            .send()
            .await
            .map_err(transport_err)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::UnknownHandle(handle.as_str().to_string()));
        }

        let resp = resp.error_for_status().map_err(transport_err)?;
        let body: ValidationStatusBody = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        parse_validation_status(&body)
    }
}

/// Review approvals behind a `POST /reviews` + `GET /reviews/{id}`
/// endpoint pair.
pub struct HttpReviewGate {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReviewGate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ReviewGate for HttpReviewGate {
    async fn request_review(
        &self,
        phase: &PhaseId,
        artifact: &ArtifactRef,
    ) -> Result<ReviewHandle, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/reviews", self.base_url))
            .json(&SubmitRequest {
                phase,
                artifact: artifact.as_str(),
            })
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;

        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(ReviewHandle::new(body.id))
    }

    async fn status(&self, handle: &ReviewHandle) -> Result<ReviewStatus, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/reviews/{}", self.base_url, handle.as_str()))
            .send()
            .await
            .map_err(transport_err)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::UnknownHandle(handle.as_str().to_string()));
        }

        let resp = resp.error_for_status().map_err(transport_err)?;
        let body: ReviewStatusBody = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        parse_review_status(&body)
    }
}

#[derive(Debug, Serialize)]
struct OpenArtifactRequest<'a> {
    phase: &'a str,
    attempt: u32,
}

#[derive(Debug, Deserialize)]
struct OpenArtifactResponse {
    reference: String,
}

/// Version-control host behind `POST /artifacts` and
/// `POST /artifacts/{reference}/merge`.
pub struct HttpArtifactHost {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactHost {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ArtifactHost for HttpArtifactHost {
    async fn open_artifact(
        &self,
        phase: &PhaseId,
        attempt: u32,
    ) -> Result<ArtifactRef, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/artifacts", self.base_url))
            .json(&OpenArtifactRequest { phase, attempt })
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;

        let body: OpenArtifactResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(ArtifactRef::new(body.reference))
    }

    async fn merge(&self, artifact: &ArtifactRef) -> Result<(), GatewayError> {
        self.client
            .post(format!(
                "{}/artifacts/{}/merge",
                self.base_url,
                artifact.as_str()
            ))
            .send()
            .await
            .map_err(transport_err)?
            .error_for_status()
            .map_err(transport_err)?;

        Ok(())
    }
}
