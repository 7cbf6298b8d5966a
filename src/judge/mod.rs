use serde::{Deserialize, Serialize};

use crate::error::{Result, RtcError};

/// A code-execution request forwarded verbatim to the judge backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub input: String,
}

/// The judge's verdict. Treated as opaque; no interpretation beyond
/// relaying it to the requesting client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeResponse {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// HTTP client for the external code-execution judge.
///
/// Optional like the storage backend: without `JUDGE_URL` the execute
/// endpoint reports the judge as unavailable.
pub struct JudgeClient {
    client: reqwest::Client,
    execute_url: String,
}

impl JudgeClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("JUDGE_URL").ok()?;
        tracing::info!(base_url = %base_url, "Code execution judge enabled");
        Some(Self {
            client: reqwest::Client::new(),
            execute_url: format!("{}/execute", base_url.trim_end_matches('/')),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            execute_url: format!("{}/execute", base_url.trim_end_matches('/')),
        }
    }

    pub async fn execute(&self, request: &JudgeRequest) -> Result<JudgeResponse> {
        tracing::debug!(
            language = %request.language,
            bytes = request.code.len(),
            "Submitting code to judge"
        );
        let response = self
            .client
            .post(&self.execute_url)
            .json(request)
            .send()
            .await
            .map_err(|e| RtcError::JudgeFailed(format!("request: {}", e)))?;

        if !response.status().is_success() {
            return Err(RtcError::JudgeFailed(format!(
                "status {}",
                response.status()
            )));
        }

        response
            .json::<JudgeResponse>()
            .await
            .map_err(|e| RtcError::JudgeFailed(format!("decode verdict: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = JudgeRequest {
            code: "print(1)".to_string(),
            language: "python".to_string(),
            input: String::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["code"], "print(1)");
        assert_eq!(value["language"], "python");
        assert_eq!(value["input"], "");
    }

    #[test]
    fn test_response_tolerates_missing_streams() {
        let verdict: JudgeResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(verdict.success);
        assert!(verdict.stdout.is_empty());
        assert!(verdict.stderr.is_empty());
    }

    #[test]
    fn test_execute_url_is_derived_from_base() {
        let client = JudgeClient::with_base_url("http://judge:7000/");
        assert_eq!(client.execute_url, "http://judge:7000/execute");
    }
}
