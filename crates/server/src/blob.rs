// Blob storage with time-limited signed download URLs.
//
// Objects are written under a secure random name; downloads go through
// a signed URL with a bounded TTL. When no signing secret is configured
// the object is marked publicly readable and its canonical public URL
// is returned instead, matching the store's degraded mode.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;

/// Default lifetime of an issued download URL.
pub const DOWNLOAD_URL_TTL_SECS: i64 = 3600;

const SECURE_NAME_BYTES: usize = 16;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("failed to store object: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct ObjectMeta {
    content_type: String,
    size: u64,
    public: bool,
}

#[derive(Debug, Clone)]
enum Backend {
    Local(PathBuf),
    Memory(Arc<RwLock<HashMap<String, Vec<u8>>>>),
}

/// Object store issuing signed (or public-fallback) download URLs.
#[derive(Debug, Clone)]
pub struct BlobStore {
    backend: Backend,
    public_base_url: String,
    signer: Option<UrlSigner>,
    meta: Arc<RwLock<HashMap<String, ObjectMeta>>>,
}

impl BlobStore {
    /// On-disk store rooted at `root`. Creates the root directory.
    pub async fn local(
        root: PathBuf,
        public_base_url: String,
        signer: Option<UrlSigner>,
    ) -> Result<Self, BlobError> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            backend: Backend::Local(root),
            public_base_url,
            signer,
            meta: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// In-memory store, used by tests.
    pub fn memory(public_base_url: String, signer: Option<UrlSigner>) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            public_base_url,
            signer,
            meta: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store `bytes` under `secure_name`.
    pub async fn put(
        &self,
        secure_name: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BlobError> {
        match &self.backend {
            Backend::Local(root) => {
                tokio::fs::write(root.join(secure_name), bytes).await?;
            }
            Backend::Memory(objects) => {
                objects.write().await.insert(secure_name.to_owned(), bytes.to_vec());
            }
        }

        self.meta.write().await.insert(
            secure_name.to_owned(),
            ObjectMeta {
                content_type: content_type.to_owned(),
                size: bytes.len() as u64,
                public: false,
            },
        );
        Ok(())
    }

    pub async fn exists(&self, secure_name: &str) -> bool {
        self.meta.read().await.contains_key(secure_name)
    }

    /// Issue a download URL for a stored object, valid for `ttl_secs`.
    ///
    /// With a signer configured the URL carries an expiry and signature;
    /// without one the object is marked publicly readable and its
    /// canonical public URL is returned.
    pub async fn download_url(
        &self,
        secure_name: &str,
        ttl_secs: i64,
        method: &str,
    ) -> Result<String, BlobError> {
        if !self.exists(secure_name).await {
            return Err(BlobError::NotFound(secure_name.to_owned()));
        }

        let base = format!("{}/files/{}", self.public_base_url, secure_name);
        match &self.signer {
            Some(signer) => {
                let expires = Utc::now().timestamp() + ttl_secs;
                let signature = signer.signature(secure_name, method, expires);
                Ok(format!("{base}?expires={expires}&sig={signature}"))
            }
            None => {
                self.mark_public(secure_name).await;
                Ok(base)
            }
        }
    }

    /// Read an object's bytes and content type if the request is
    /// authorized: a valid unexpired signature, or a public object.
    pub async fn read_authorized(
        &self,
        secure_name: &str,
        signature: Option<(i64, &str)>,
    ) -> Result<(Vec<u8>, String), BlobError> {
        let meta = self
            .meta
            .read()
            .await
            .get(secure_name)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(secure_name.to_owned()))?;

        let authorized = match (&self.signer, signature) {
            (Some(signer), Some((expires, sig))) => {
                signer.verify(secure_name, "GET", expires, sig) || meta.public
            }
            _ => meta.public || self.signer.is_none(),
        };
        if !authorized {
            return Err(BlobError::NotFound(secure_name.to_owned()));
        }

        let bytes = match &self.backend {
            Backend::Local(root) => tokio::fs::read(root.join(secure_name)).await?,
            Backend::Memory(objects) => objects
                .read()
                .await
                .get(secure_name)
                .cloned()
                .ok_or_else(|| BlobError::NotFound(secure_name.to_owned()))?,
        };
        Ok((bytes, meta.content_type))
    }

    async fn mark_public(&self, secure_name: &str) {
        if let Some(meta) = self.meta.write().await.get_mut(secure_name) {
            meta.public = true;
        }
    }
}

/// Signs download URLs with a SHA-256 digest over the server secret,
/// object name, HTTP method, and expiry timestamp.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    secret: Arc<str>,
}

impl UrlSigner {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self { secret: secret.into() }
    }

    fn signature(&self, secure_name: &str, method: &str, expires_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(secure_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires_unix.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    pub fn verify(&self, secure_name: &str, method: &str, expires_unix: i64, sig: &str) -> bool {
        if expires_unix < Utc::now().timestamp() {
            return false;
        }
        self.signature(secure_name, method, expires_unix) == sig
    }
}

/// Random, unguessable object name preserving the original extension.
pub fn secure_object_name(original_name: &str) -> String {
    let mut token = [0u8; SECURE_NAME_BYTES];
    rand::thread_rng().fill_bytes(&mut token);
    let stem = URL_SAFE_NO_PAD.encode(token);
    match original_name.rsplit_once('.') {
        Some((prefix, extension)) if !prefix.is_empty() && !extension.is_empty() => {
            format!("{stem}.{extension}")
        }
        _ => stem,
    }
}
