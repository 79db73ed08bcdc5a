//! HTTP client for the remote academic API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::backend::AcademicBackend;
use crate::error::BackendError;
use crate::models::{
    AssessmentType, ConversionRule, GradeValue, HistoryRecord, LedgerRecord, OriginalValue,
    PersistedConversion, StudentProfile, TransferResponse,
};

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct CreateLedgerRecordRequest<'a> {
    student_id: &'a str,
    subject_id: &'a str,
    original_value: OriginalValue,
}

#[derive(Serialize)]
struct PersistConversionRequest<'a> {
    ledger_record_id: &'a str,
    rule_code: &'a str,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    destination_institution_id: &'a str,
    rule_code: &'a str,
}

impl HttpBackend {
    /// `base_url` should be like `http://localhost:5000` (no trailing slash).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let url = self.url(path);
        info!(url = %url, "fetching");
        let resp = self.client.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let url = self.url(path);
        info!(url = %url, "posting");
        let resp = self.client.post(&url).json(body).send().await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl AcademicBackend for HttpBackend {
    async fn fetch_history(&self, student_id: &str) -> Result<Vec<HistoryRecord>, BackendError> {
        self.get(&format!("students/{student_id}/history")).await
    }

    async fn fetch_ledger(&self, student_id: &str) -> Result<Vec<LedgerRecord>, BackendError> {
        self.get(&format!("students/{student_id}/grades")).await
    }

    async fn fetch_rules(&self) -> Result<Vec<ConversionRule>, BackendError> {
        self.get("conversion-rules").await
    }

    async fn fetch_profile(&self, student_id: &str) -> Result<StudentProfile, BackendError> {
        self.get(&format!("students/{student_id}")).await
    }

    async fn create_ledger_record(
        &self,
        student_id: &str,
        subject_id: &str,
        kind: AssessmentType,
        grade: &GradeValue,
    ) -> Result<LedgerRecord, BackendError> {
        let body = CreateLedgerRecordRequest {
            student_id,
            subject_id,
            original_value: OriginalValue {
                kind,
                grade: grade.clone(),
            },
        };
        self.post("grades", &body).await
    }

    async fn persist_conversion(
        &self,
        ledger_record_id: &str,
        rule_code: &str,
    ) -> Result<PersistedConversion, BackendError> {
        let body = PersistConversionRequest {
            ledger_record_id,
            rule_code,
        };
        self.post("conversions", &body).await
    }

    async fn transfer_institution(
        &self,
        student_id: &str,
        destination_institution_id: &str,
        rule_code: &str,
    ) -> Result<TransferResponse, BackendError> {
        let body = TransferRequest {
            destination_institution_id,
            rule_code,
        };
        self.post(&format!("students/{student_id}/transfer"), &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_trims_trailing_slash() {
        let backend = HttpBackend::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.base_url, "http://localhost:5000");
        assert_eq!(
            backend.url("conversion-rules"),
            "http://localhost:5000/api/v1/conversion-rules"
        );
    }

    #[test]
    fn create_request_uses_wire_type_name() {
        let body = CreateLedgerRecordRequest {
            student_id: "st-1",
            subject_id: "mat",
            original_value: OriginalValue {
                kind: AssessmentType::FinalProject,
                grade: GradeValue::Numeric(9.0),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["original_value"]["type"], "FINAL_PROJECT");
        assert_eq!(json["original_value"]["grade"], 9.0);
    }

    #[test]
    fn transfer_response_parses() {
        let json = r#"{
            "total_homologated": 2,
            "updated_student_profile": {
                "id": "st-1",
                "name": "Avery Lee",
                "email": "avery@example.com",
                "institution_id": "inst-2",
                "institution_name": "Escuela Tecnica"
            }
        }"#;
        let parsed: TransferResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.total_homologated, 2);
        assert_eq!(parsed.updated_student_profile.institution_id, "inst-2");
    }
}
