/// Errors returned by the LMS client.
#[derive(Debug, thiserror::Error)]
pub enum LmsError {
    /// Network failure after retries were exhausted
    #[error("LMS request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Non-success status after retries were exhausted
    #[error("LMS request to {url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The response body was not the expected JSON shape
    #[error("Failed to decode LMS response from {url}: {message}")]
    Decode { url: String, message: String },
}
