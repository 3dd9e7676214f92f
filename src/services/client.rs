//! The signing orchestrator.
//!
//! [`Client`] composes the SiGa HTTPS client, the session store, and the
//! container transformations into the two user-facing signing flows
//! (remote signing and Mobile-ID). Each operation fetches the session's
//! container status, issues one or more SiGa calls, and writes the updated
//! status back. After a SiGa-side side effect whose local bookkeeping
//! failed, a compensating DELETE is attempted in the background and its
//! outcome is never reported to the caller.
//!
//! Operations on distinct sessions are independent; concurrent operations
//! on the same session must be serialized by the caller. Dropping an
//! operation future cancels the in-flight HTTPS call without mutating
//! store state for the cancelled step.

use crate::adapters::siga::http::{escape_path_segment, SigaHttpClient};
use crate::adapters::siga::protocol::{
    ContainerResponse, CreateContainerRequest, DataFileMeta, FinalizeRemoteSigningRequest,
    GetContainerResponse, MobileIdStatusResponse, StartMobileIdSigningRequest,
    StartMobileIdSigningResponse, StartRemoteSigningRequest, StartRemoteSigningResponse,
    UploadContainerRequest, MID_STATUS_OUTSTANDING, MID_STATUS_SIGNATURE,
};
use crate::domain::datafile::DataFile;
use crate::domain::hashcode::{from_hashcode, to_hashcode};
use crate::domain::zipstream::ZipInputStream;
use crate::infra::config::Conf;
use crate::infra::error::{ServiceError, SigaError, SigaResult, Step};
use crate::services::store::{data_key, MemoryStore, SessionStatus, SessionStore};
use reqwest::Method;
use sha2::{Digest, Sha512};
use std::io::{Cursor, Read, Seek, Write};
use std::sync::Arc;

/// Client for creating and signing containers through the SiGa service.
///
/// The interface is purposefully more limited than what SiGa offers: it
/// uses a pre-configured signature profile and excludes signer role and
/// signature production place options.
pub struct Client {
    http: SigaHttpClient,
    store: Arc<dyn SessionStore>,
    profile: String,
    language: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("http", &self.http)
            .field("profile", &self.profile)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with the in-process session store.
    pub fn new(conf: &Conf) -> SigaResult<Self> {
        Self::with_store(conf, Arc::new(MemoryStore::new()))
    }

    /// Create a client with a caller-provided session store.
    pub fn with_store(conf: &Conf, store: Arc<dyn SessionStore>) -> SigaResult<Self> {
        Ok(Self {
            http: SigaHttpClient::new(conf)?,
            store,
            profile: conf.profile().to_string(),
            language: conf.language().to_string(),
        })
    }

    /// Create a new unsigned container for the session with the given data
    /// files. Any existing container for this session is closed first.
    pub async fn create_container(
        &self,
        session: &str,
        datafiles: Vec<DataFile>,
    ) -> SigaResult<()> {
        if let Err(e) = self.close_container(session).await {
            log::debug!("close old container for {session}: {e}");
            // Continue with creating the container.
        }

        let request = CreateContainerRequest {
            data_files: datafiles.iter().map(meta_of).collect(),
        };
        let response: ContainerResponse = self
            .http
            .exchange(Method::POST, "/hashcodecontainers", Some(&request))
            .await
            .step("post siga")?;
        log::info!("created container {}", response.container_id);

        self.store_container(session, response.container_id, datafiles)
            .await
    }

    /// Upload an existing complete container for the session. Any existing
    /// container for this session is closed first.
    pub async fn upload_container(&self, session: &str, mut r: impl Read) -> SigaResult<()> {
        // Ensure the input is a valid container before touching the old one.
        let mut complete = Vec::new();
        r.read_to_end(&mut complete)
            .map_err(|e| SigaError::Internal(format!("read container: {e}")))?;

        let mut buffered = Cursor::new(Vec::new());
        let datafiles = to_hashcode(&mut buffered, Cursor::new(complete)).step("to hashcode")?;

        // Until SiGa fixes the way it parses ZIP archives, the hashcode
        // form is normalized for sequential readers before upload.
        let mut rewriter = ZipInputStream::new(Vec::new());
        rewriter.write(buffered.get_ref()).step("rewrite container")?;
        let hashcode = rewriter.finish().step("rewrite container")?;

        if let Err(e) = self.close_container(session).await {
            log::debug!("close old container for {session}: {e}");
            // Continue with uploading the container.
        }

        let request = UploadContainerRequest::new(&hashcode);
        let response: ContainerResponse = self
            .http
            .exchange(Method::POST, "/upload/hashcodecontainers", Some(&request))
            .await
            .step("post siga")?;
        log::info!("uploaded container {}", response.container_id);

        self.store_container(session, response.container_id, datafiles)
            .await
    }

    /// Record a freshly created or uploaded container in the session store,
    /// compensating on the SiGa side when the bookkeeping fails.
    async fn store_container(
        &self,
        session: &str,
        container_id: String,
        datafiles: Vec<DataFile>,
    ) -> SigaResult<()> {
        let status = SessionStatus {
            container_id: container_id.clone(),
            filenames: datafiles.iter().map(|d| d.name().to_string()).collect(),
            signature_id: String::new(),
        };
        if let Err(e) = self.store.put_status(session, status) {
            // Best-effort attempt to clean up the SiGa side.
            self.spawn_container_delete(container_id);
            return Err(e.step("put status"));
        }

        // Do not store data files before the status is successfully
        // written: otherwise there is no reference for cleaning them up
        // later.
        for datafile in datafiles {
            let key = data_key(&container_id, datafile.name());
            let name = datafile.name().to_string();
            if let Err(e) = self.store.put_data(&key, datafile.into_contents()) {
                // Ignore close error: best-effort attempt to clean up.
                if let Err(close_err) = self.close_container(session).await {
                    log::debug!("close after failed put data: {close_err}");
                }
                return Err(e.step(&format!("put data {name}")));
            }
        }
        Ok(())
    }

    /// Start signing the container using external methods. `cert` must be
    /// a DER-encoded X.509 certificate. Returns the hashed data to be
    /// signed and the name of the digest algorithm that hashed it.
    ///
    /// Interrupts any outstanding signing operation for this session.
    pub async fn start_remote_signing(
        &self,
        session: &str,
        cert: &[u8],
    ) -> SigaResult<(Vec<u8>, &'static str)> {
        let mut status = self.require_status(session)?;

        let uri = format!(
            "/hashcodecontainers/{}/remotesigning",
            escape_path_segment(&status.container_id)
        );
        let request = StartRemoteSigningRequest::new(cert, &self.profile);
        let response: StartRemoteSigningResponse = self
            .http
            .exchange(Method::POST, &uri, Some(&request))
            .await
            .step("post siga")?;

        let data_to_sign = response
            .decode_data_to_sign()
            .map_err(|e| SigaError::Protocol(format!("decode dataToSign: {e}")))?;
        let (hash, algorithm) = match response.digest_algorithm.as_str() {
            "SHA512" => (Sha512::digest(&data_to_sign).to_vec(), "SHA-512"),
            other => {
                return Err(SigaError::Validation(format!(
                    "unknown digestAlgorithm: {other}"
                )))
            }
        };

        status.signature_id = response.signature_id;
        self.store.put_status(session, status).step("put status")?;

        Ok((hash, algorithm))
    }

    /// Complete the signing operation started with
    /// [`start_remote_signing`](Self::start_remote_signing) by providing
    /// the externally generated signature value.
    pub async fn finalize_remote_signing(&self, session: &str, signature: &[u8]) -> SigaResult<()> {
        let mut status = self.require_status(session)?;
        if status.signature_id.is_empty() {
            return Err(SigaError::Validation("container signing not started".into()));
        }

        let uri = format!(
            "/hashcodecontainers/{}/remotesigning/{}",
            escape_path_segment(&status.container_id),
            escape_path_segment(&status.signature_id)
        );
        let request = FinalizeRemoteSigningRequest::new(signature);
        self.http
            .send(Method::PUT, &uri, Some(&request))
            .await
            .step("put siga")?;

        status.signature_id.clear();
        self.store.put_status(session, status).step("put status")
    }

    /// Start signing the container using Mobile-ID. The phone number must
    /// carry its country prefix. The message, if not empty, is displayed
    /// to the signer on their phone. Returns the challenge identifier to
    /// display to the signer for confirmation.
    ///
    /// Interrupts any outstanding signing operation for this session.
    pub async fn start_mobile_id_signing(
        &self,
        session: &str,
        person: &str,
        phone: &str,
        message: &str,
    ) -> SigaResult<String> {
        let mut status = self.require_status(session)?;

        let uri = format!(
            "/hashcodecontainers/{}/mobileidsigning",
            escape_path_segment(&status.container_id)
        );
        let request = StartMobileIdSigningRequest {
            person_identifier: person.to_string(),
            phone_no: phone.to_string(),
            language: self.language.clone(),
            signature_profile: self.profile.clone(),
            message_to_display: if message.is_empty() {
                None
            } else {
                Some(message.to_string())
            },
        };
        let response: StartMobileIdSigningResponse = self
            .http
            .exchange(Method::POST, &uri, Some(&request))
            .await
            .step("post siga")?;

        status.signature_id = response.signature_id;
        self.store.put_status(session, status).step("put status")?;

        Ok(response.challenge_id)
    }

    /// Poll the status of the signing operation started with
    /// [`start_mobile_id_signing`](Self::start_mobile_id_signing).
    ///
    /// Returns `true` when the signature is complete and `false` while the
    /// transaction is outstanding; every other status is an error.
    pub async fn request_mobile_id_signing_status(&self, session: &str) -> SigaResult<bool> {
        let mut status = self.require_status(session)?;
        if status.signature_id.is_empty() {
            return Err(SigaError::Validation("container signing not started".into()));
        }

        let uri = format!(
            "/hashcodecontainers/{}/mobileidsigning/{}/status",
            escape_path_segment(&status.container_id),
            escape_path_segment(&status.signature_id)
        );
        let response: MobileIdStatusResponse = self
            .http
            .exchange::<(), _>(Method::GET, &uri, None)
            .await
            .step("get siga")?;

        match response.status.as_str() {
            MID_STATUS_SIGNATURE => {
                status.signature_id.clear();
                self.store.put_status(session, status).step("put status")?;
                Ok(true)
            }
            MID_STATUS_OUTSTANDING => Ok(false),
            other => Err(SigaError::Service(ServiceError {
                status: 200,
                code: Some(other.to_string()),
                message: Some("Mobile-ID signing failed".into()),
                decode: None,
            })),
        }
    }

    /// Retrieve the container, convert it from hashcode form back to a
    /// complete container using the stored data files, and write it to
    /// `w`. If no signing operation completed, the output is an unsigned
    /// container.
    pub async fn write_container(
        &self,
        session: &str,
        w: &mut (impl Write + Seek),
    ) -> SigaResult<()> {
        let status = self.require_status(session)?;

        let uri = format!(
            "/hashcodecontainers/{}",
            escape_path_segment(&status.container_id)
        );
        let response: GetContainerResponse = self
            .http
            .exchange::<(), _>(Method::GET, &uri, None)
            .await
            .step("get siga")?;
        let hashcode = response
            .decode_container()
            .map_err(|e| SigaError::Protocol(format!("decode container: {e}")))?;

        let mut datafiles = Vec::with_capacity(status.filenames.len());
        for filename in &status.filenames {
            let contents = self
                .store
                .data(&data_key(&status.container_id, filename))
                .step(&format!("get data {filename}"))?;
            datafiles.push(DataFile::from_bytes(filename.clone(), contents));
        }

        from_hashcode(w, Cursor::new(hashcode), &datafiles).step("from hashcode")
    }

    /// Delete the container in the SiGa service and remove all local state
    /// for it. A session with no open container is a no-op.
    pub async fn close_container(&self, session: &str) -> SigaResult<()> {
        let status = match self.store.status(session).step("get status")? {
            Some(status) => status,
            None => return Ok(()), // Nothing to close.
        };

        let uri = format!(
            "/hashcodecontainers/{}",
            escape_path_segment(&status.container_id)
        );
        self.http
            .send::<()>(Method::DELETE, &uri, None)
            .await
            .step("delete siga")?;

        for filename in &status.filenames {
            self.store
                .remove_data(&data_key(&status.container_id, filename))
                .step(&format!("remove data {filename}"))?;
        }
        self.store.remove_status(session).step("remove status")
    }

    /// Release the resources held by the client.
    pub fn close(&self) -> SigaResult<()> {
        self.store.close()
    }

    fn require_status(&self, session: &str) -> SigaResult<SessionStatus> {
        match self.store.status(session).step("get status")? {
            Some(status) => Ok(status),
            None => Err(SigaError::NotFound(format!(
                "no open container for {session}"
            ))),
        }
    }

    /// Fire-and-forget DELETE of a container whose local bookkeeping
    /// failed. The request has already failed for the caller; the outcome
    /// of the compensation is only logged.
    fn spawn_container_delete(&self, container_id: String) {
        let http = self.http.clone();
        tokio::spawn(async move {
            let uri = format!("/hashcodecontainers/{}", escape_path_segment(&container_id));
            if let Err(e) = http.send::<()>(Method::DELETE, &uri, None).await {
                log::debug!("compensating delete of {container_id} failed: {e}");
            }
        });
    }
}

fn meta_of(datafile: &DataFile) -> DataFileMeta {
    DataFileMeta {
        file_name: datafile.name().to_string(),
        file_hash_sha256: datafile.sha256_b64().to_string(),
        file_hash_sha512: datafile.sha512_b64().to_string(),
        file_size: datafile.size(),
    }
}
