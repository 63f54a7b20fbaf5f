//! Response envelopes shared by every backend endpoint.

use serde::{Deserialize, Serialize};

use super::ApiError;

/// The `{success, data, error, message}` wrapper around every payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Take the payload, failing loudly when the backend left it out.
    pub fn into_data(self) -> Result<T, ApiError> {
        match self.data {
            Some(data) => Ok(data),
            None => Err(ApiError::ResponseShape(
                self.message
                    .or(self.error)
                    .unwrap_or_else(|| "missing data field".to_string()),
            )),
        }
    }
}

/// Pagination metadata returned by list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

/// A page of resources. List endpoints return this without an envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.meta.page < self.meta.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_data_is_a_shape_error() {
        let envelope: Envelope<String> =
            serde_json::from_str(r#"{"success": true, "message": "ok"}"#).unwrap();
        let err = envelope.into_data().unwrap_err();
        assert!(matches!(err, ApiError::ResponseShape(ref m) if m == "ok"));
    }

    #[test]
    fn test_page_meta_uses_camel_case() {
        let page: Page<u32> = serde_json::from_str(
            r#"{"data": [1, 2], "meta": {"total": 12, "page": 1, "limit": 2, "totalPages": 6}}"#,
        )
        .unwrap();
        assert_eq!(page.data, vec![1, 2]);
        assert_eq!(page.meta.total_pages, 6);
        assert!(page.has_next());
    }
}
