//! Wire protocol types for the SiGa service.
//!
//! Defines the JSON bodies exchanged with the `/hashcodecontainers` and
//! `/upload/hashcodecontainers` endpoints. Binary payloads travel as
//! standard Base64 strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Metadata describing one data file of a hashcode container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFileMeta {
    /// Logical file name inside the container.
    #[serde(rename = "fileName")]
    pub file_name: String,
    /// Base64 SHA-256 digest of the file contents.
    #[serde(rename = "fileHashSha256")]
    pub file_hash_sha256: String,
    /// Base64 SHA-512 digest of the file contents.
    #[serde(rename = "fileHashSha512")]
    pub file_hash_sha512: String,
    /// Size of the file contents in bytes.
    #[serde(rename = "fileSize")]
    pub file_size: u64,
}

/// Request to create a new hashcode container.
#[derive(Debug, Serialize)]
pub struct CreateContainerRequest {
    #[serde(rename = "dataFiles")]
    pub data_files: Vec<DataFileMeta>,
}

/// Response carrying the identifier of a created or uploaded container.
#[derive(Debug, Deserialize)]
pub struct ContainerResponse {
    #[serde(rename = "containerId")]
    pub container_id: String,
}

/// Request to upload an existing container in hashcode form.
#[derive(Debug, Serialize)]
pub struct UploadContainerRequest {
    /// Base64-encoded hashcode container bytes.
    pub container: String,
}

impl UploadContainerRequest {
    pub fn new(container: &[u8]) -> Self {
        Self { container: BASE64.encode(container) }
    }
}

/// Request to start a remote signing ceremony.
#[derive(Debug, Serialize)]
pub struct StartRemoteSigningRequest {
    /// Base64-encoded DER signing certificate.
    #[serde(rename = "signingCertificate")]
    pub signing_certificate: String,
    #[serde(rename = "signatureProfile")]
    pub signature_profile: String,
}

impl StartRemoteSigningRequest {
    pub fn new(cert_der: &[u8], profile: &str) -> Self {
        Self {
            signing_certificate: BASE64.encode(cert_der),
            signature_profile: profile.to_string(),
        }
    }
}

/// Response to a remote signing start.
#[derive(Debug, Deserialize)]
pub struct StartRemoteSigningResponse {
    /// Base64-encoded data to be signed.
    #[serde(rename = "dataToSign")]
    pub data_to_sign: String,
    /// Digest algorithm the data was prepared for.
    #[serde(rename = "digestAlgorithm")]
    pub digest_algorithm: String,
    /// Identifier of the in-flight signature.
    #[serde(rename = "generatedSignatureId")]
    pub signature_id: String,
}

impl StartRemoteSigningResponse {
    /// Decode the data-to-sign payload.
    pub fn decode_data_to_sign(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data_to_sign)
    }
}

/// Request completing a remote signing ceremony.
#[derive(Debug, Serialize)]
pub struct FinalizeRemoteSigningRequest {
    /// Base64-encoded signature value produced by the signer.
    #[serde(rename = "signatureValue")]
    pub signature_value: String,
}

impl FinalizeRemoteSigningRequest {
    pub fn new(signature: &[u8]) -> Self {
        Self { signature_value: BASE64.encode(signature) }
    }
}

/// Request to start a Mobile-ID signing ceremony.
#[derive(Debug, Serialize)]
pub struct StartMobileIdSigningRequest {
    #[serde(rename = "personIdentifier")]
    pub person_identifier: String,
    #[serde(rename = "phoneNo")]
    pub phone_no: String,
    pub language: String,
    #[serde(rename = "signatureProfile")]
    pub signature_profile: String,
    /// Text shown on the signer's phone, if any.
    #[serde(rename = "messageToDisplay", skip_serializing_if = "Option::is_none")]
    pub message_to_display: Option<String>,
}

/// Response to a Mobile-ID signing start.
#[derive(Debug, Deserialize)]
pub struct StartMobileIdSigningResponse {
    /// Challenge shown to the signer for confirmation.
    #[serde(rename = "challengeId")]
    pub challenge_id: String,
    /// Identifier of the in-flight signature.
    #[serde(rename = "generatedSignatureId")]
    pub signature_id: String,
}

/// Response to a Mobile-ID status poll.
#[derive(Debug, Deserialize)]
pub struct MobileIdStatusResponse {
    #[serde(rename = "midStatus")]
    pub status: String,
}

/// Mobile-ID status meaning the signature is complete.
pub const MID_STATUS_SIGNATURE: &str = "SIGNATURE";
/// Mobile-ID status meaning the ceremony is still in progress.
pub const MID_STATUS_OUTSTANDING: &str = "OUTSTANDING_TRANSACTION";

/// Response carrying a container in hashcode form.
#[derive(Debug, Deserialize)]
pub struct GetContainerResponse {
    /// Base64-encoded hashcode container bytes.
    pub container: String,
}

impl GetContainerResponse {
    /// Decode the container bytes.
    pub fn decode_container(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.container)
    }
}

/// Error body returned by SiGa on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
    #[serde(rename = "errorMessage", default)]
    pub error_message: Option<String>,
}
