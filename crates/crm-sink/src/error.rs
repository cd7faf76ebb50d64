/// Errors returned by the CRM client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CrmError {
    /// Network failure after retries were exhausted
    #[error("CRM request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The CRM rejected the whole request
    #[error("CRM rejected request with status {status} ({}): {message}", .category.as_deref().unwrap_or("UNKNOWN"))]
    Rejected {
        status: u16,
        category: Option<String>,
        message: String,
    },

    /// The response body was not the expected JSON shape
    #[error("Failed to decode CRM response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl CrmError {
    /// Whether the CRM refused the request because a record with the same
    /// unique value already exists.
    pub fn is_duplicate(&self) -> bool {
        match self {
            CrmError::Rejected {
                status,
                category,
                message,
            } => {
                *status == 409
                    || category.as_deref() == Some("CONFLICT")
                    || is_duplicate_message(message)
            }
            _ => false,
        }
    }
}

pub(crate) fn is_duplicate_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already exists") || lower.contains("already has that value")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(status: u16, category: Option<&str>, message: &str) -> CrmError {
        CrmError::Rejected {
            status,
            category: category.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_duplicate_classification() {
        assert!(rejected(409, None, "Conflict").is_duplicate());
        assert!(rejected(400, Some("CONFLICT"), "x").is_duplicate());
        assert!(rejected(
            400,
            Some("VALIDATION_ERROR"),
            "Contact already exists. Existing ID: 51"
        )
        .is_duplicate());
        assert!(rejected(
            400,
            Some("VALIDATION_ERROR"),
            "lms_course_id already has that value on record 8"
        )
        .is_duplicate());
        assert!(!rejected(400, Some("VALIDATION_ERROR"), "Property missing").is_duplicate());
        assert!(!CrmError::Transport {
            url: "u".into(),
            message: "reset".into()
        }
        .is_duplicate());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            rejected(400, None, "bad").to_string(),
            "CRM rejected request with status 400 (UNKNOWN): bad"
        );
    }
}
