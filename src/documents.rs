//! The user's uploaded documents and the backend collaborators that store them.
//!
//! The [`DocumentSet`] belongs to the user, not to any session: every
//! document-chat turn reads it afresh to build its context.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::answering::{ensure_success, parse_endpoint};
use crate::error::{DocumentError, StoreError, TransportError};
use crate::settings::EffectiveSettings;
use crate::storage::PersistentStore;

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub display_name: String,
    pub backend_file_id: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Documents newest-uploaded-first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSet {
    documents: Vec<Document>,
}

impl DocumentSet {
    pub fn as_slice(&self) -> &[Document] {
        &self.documents
    }

    /// Backend identifiers of every document, comma-joined.
    pub fn context(&self) -> String {
        self.documents
            .iter()
            .map(|d| d.backend_file_id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn insert(&mut self, doc: Document) {
        self.documents.insert(0, doc);
    }

    fn remove(&mut self, id: Uuid) -> Option<Document> {
        let pos = self.documents.iter().position(|d| d.id == id)?;
        Some(self.documents.remove(pos))
    }

    fn get(&self, id: Uuid) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub user_id: String,
    pub file_id: String,
}

/// Remote storage and indexing of document binaries.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn upload(&self, req: UploadRequest) -> Result<(), TransportError>;
    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody<'a> {
    file_id: &'a str,
    user_id: &'a str,
}

#[derive(Clone)]
pub struct HttpDocumentService {
    client: reqwest::Client,
    upload_url: Option<Url>,
    delete_url: Option<Url>,
    api_key: Option<String>,
}

impl HttpDocumentService {
    pub fn from_settings(settings: &EffectiveSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self {
            client,
            upload_url: parse_endpoint("upload", settings.endpoints.upload_url.as_deref())?,
            delete_url: parse_endpoint("delete", settings.endpoints.delete_url.as_deref())?,
            api_key: settings.api_key.clone(),
        })
    }

    fn authorize(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }
}

#[async_trait]
impl DocumentService for HttpDocumentService {
    async fn upload(&self, req: UploadRequest) -> Result<(), TransportError> {
        let url = self.upload_url.as_ref().ok_or(TransportError::NotConfigured("upload"))?;
        let part = reqwest::multipart::Part::bytes(req.bytes)
            .file_name(req.file_name)
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("userId", req.user_id)
            .text("fileId", req.file_id);
        let rb = self.authorize(self.client.post(url.clone()).multipart(form));
        ensure_success(rb.send().await?).await?;
        Ok(())
    }

    async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), TransportError> {
        let url = self.delete_url.as_ref().ok_or(TransportError::NotConfigured("delete"))?;
        let rb = self.authorize(self.client.post(url.clone()).json(&DeleteBody { file_id, user_id }));
        ensure_success(rb.send().await?).await?;
        Ok(())
    }
}

fn looks_like_pdf(file_name: &str, bytes: &[u8]) -> bool {
    let by_name = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    by_name || bytes.starts_with(PDF_MAGIC)
}

/// A user's [`DocumentSet`], persisted locally and mirrored to the backend.
pub struct DocumentLibrary {
    store: Arc<dyn PersistentStore>,
    service: Arc<dyn DocumentService>,
    user_id: String,
    documents: Mutex<DocumentSet>,
}

impl DocumentLibrary {
    pub async fn open(
        store: Arc<dyn PersistentStore>,
        service: Arc<dyn DocumentService>,
        user_id: &str,
    ) -> Result<Self, StoreError> {
        let key = Self::key_for(user_id);
        let documents = match store.get(&key).await? {
            // An unreadable record is left in place; writing over it would lose the set.
            Some(raw) => serde_json::from_str(&raw).inspect_err(|e| {
                tracing::warn!(user_id, error = %e, "document set unreadable");
            })?,
            None => DocumentSet::default(),
        };
        Ok(Self {
            store,
            service,
            user_id: user_id.to_string(),
            documents: Mutex::new(documents),
        })
    }

    fn key_for(user_id: &str) -> String {
        format!("documents/{}", user_id)
    }

    async fn persist(&self, set: &DocumentSet) -> Result<(), StoreError> {
        let raw = serde_json::to_string(set)?;
        self.store.put(&Self::key_for(&self.user_id), &raw).await
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn list(&self) -> Vec<Document> {
        self.documents.lock().await.as_slice().to_vec()
    }

    /// Comma-joined backend ids of the documents present right now.
    pub async fn context(&self) -> String {
        self.documents.lock().await.context()
    }

    pub async fn upload_file(&self, path: &Path) -> Result<Document, DocumentError> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.upload(&name, bytes).await
    }

    /// Sends the file to the backend under a fresh file id and records it once accepted.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<Document, DocumentError> {
        if !looks_like_pdf(file_name, &bytes) {
            return Err(DocumentError::NotPdf(file_name.to_string()));
        }
        let file_id = Uuid::new_v4().to_string();
        self.service
            .upload(UploadRequest {
                file_name: file_name.to_string(),
                bytes,
                user_id: self.user_id.clone(),
                file_id: file_id.clone(),
            })
            .await?;

        let doc = Document {
            id: Uuid::new_v4(),
            display_name: file_name.to_string(),
            backend_file_id: file_id,
            uploaded_at: Utc::now(),
        };
        let mut set = self.documents.lock().await;
        let mut next = set.clone();
        next.insert(doc.clone());
        self.persist(&next).await?;
        *set = next;
        metrics::counter!("docchat_documents_total", "op" => "upload").increment(1);
        tracing::info!(document_id = %doc.id, file_id = %doc.backend_file_id, "document uploaded");
        Ok(doc)
    }

    /// Deletes on the backend first; the local entry goes only after it confirms.
    pub async fn delete(&self, id: Uuid) -> Result<Document, DocumentError> {
        let file_id = {
            let set = self.documents.lock().await;
            set.get(id).map(|d| d.backend_file_id.clone()).ok_or(DocumentError::NotFound(id))?
        };
        self.service.delete(&file_id, &self.user_id).await?;

        let mut set = self.documents.lock().await;
        let mut next = set.clone();
        let removed = next.remove(id).ok_or(DocumentError::NotFound(id))?;
        self.persist(&next).await?;
        *set = next;
        metrics::counter!("docchat_documents_total", "op" => "delete").increment(1);
        tracing::info!(document_id = %id, file_id = %removed.backend_file_id, "document deleted");
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::{resolve_effective_settings, EnvOverrides, GlobalConfigDefaults, RequestOverrides};
    use crate::storage::MemoryStore;
    use axum::{extract::Multipart, http::StatusCode, routing::post, Json, Router};
    use std::sync::Mutex as StdMutex;

    /// Records calls; fails every call while `fail` is set.
    #[derive(Default)]
    pub(crate) struct StubDocuments {
        pub uploads: StdMutex<Vec<UploadRequest>>,
        pub deletes: StdMutex<Vec<(String, String)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl StubDocuments {
        fn check(&self) -> Result<(), TransportError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransportError::Status { status: 500, body: "down".into() });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentService for StubDocuments {
        async fn upload(&self, req: UploadRequest) -> Result<(), TransportError> {
            self.check()?;
            self.uploads.lock().unwrap().push(req);
            Ok(())
        }

        async fn delete(&self, file_id: &str, user_id: &str) -> Result<(), TransportError> {
            self.check()?;
            self.deletes.lock().unwrap().push((file_id.to_string(), user_id.to_string()));
            Ok(())
        }
    }

    async fn library() -> (Arc<MemoryStore>, Arc<StubDocuments>, DocumentLibrary) {
        let store = Arc::new(MemoryStore::new());
        let stub = Arc::new(StubDocuments::default());
        let lib = DocumentLibrary::open(store.clone(), stub.clone(), "user-1").await.unwrap();
        (store, stub, lib)
    }

    #[tokio::test]
    async fn upload_records_document_with_fresh_file_id() {
        let (_store, stub, lib) = library().await;
        let a = lib.upload("a.pdf", b"%PDF-1.7 a".to_vec()).await.unwrap();
        let b = lib.upload("scan", b"%PDF-1.4 b".to_vec()).await.unwrap();
        assert_ne!(a.backend_file_id, b.backend_file_id);

        let uploads = stub.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].file_id, a.backend_file_id);
        assert_eq!(uploads[0].user_id, "user-1");

        let listed = lib.list().await;
        assert_eq!(listed.iter().map(|d| d.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        assert_eq!(lib.context().await, format!("{},{}", b.backend_file_id, a.backend_file_id));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_before_upload() {
        let (_store, stub, lib) = library().await;
        let err = lib.upload("notes.txt", b"hello".to_vec()).await.unwrap_err();
        assert!(matches!(err, DocumentError::NotPdf(ref n) if n == "notes.txt"));
        assert!(stub.uploads.lock().unwrap().is_empty());
        assert!(lib.list().await.is_empty());
    }

    #[tokio::test]
    async fn failed_backend_leaves_set_untouched() {
        let (_store, stub, lib) = library().await;
        let doc = lib.upload("a.pdf", b"%PDF-".to_vec()).await.unwrap();
        stub.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(matches!(lib.upload("b.pdf", b"%PDF-".to_vec()).await, Err(DocumentError::Backend(_))));
        assert!(matches!(lib.delete(doc.id).await, Err(DocumentError::Backend(_))));
        assert_eq!(lib.list().await, vec![doc]);
    }

    #[tokio::test]
    async fn delete_removes_after_confirmation_and_persists() {
        let (store, stub, lib) = library().await;
        let a = lib.upload("a.pdf", b"%PDF-".to_vec()).await.unwrap();
        let b = lib.upload("b.pdf", b"%PDF-".to_vec()).await.unwrap();

        let removed = lib.delete(a.id).await.unwrap();
        assert_eq!(removed.id, a.id);
        assert_eq!(
            stub.deletes.lock().unwrap().as_slice(),
            &[(a.backend_file_id.clone(), "user-1".to_string())]
        );
        assert_eq!(lib.context().await, b.backend_file_id);
        assert!(matches!(lib.delete(a.id).await, Err(DocumentError::NotFound(_))));

        let reopened = DocumentLibrary::open(store, stub, "user-1").await.unwrap();
        assert_eq!(reopened.list().await, vec![b]);
    }

    #[tokio::test]
    async fn unreadable_set_fails_open_and_is_kept() {
        let store = Arc::new(MemoryStore::new());
        store.put("documents/user-1", "{not a document set").await.unwrap();
        let stub = Arc::new(StubDocuments::default());

        let err = DocumentLibrary::open(store.clone(), stub, "user-1").await.err().unwrap();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(
            store.get("documents/user-1").await.unwrap().as_deref(),
            Some("{not a document set")
        );
    }

    #[tokio::test]
    async fn sets_are_scoped_per_user() {
        let (store, stub, lib) = library().await;
        lib.upload("a.pdf", b"%PDF-".to_vec()).await.unwrap();
        let other = DocumentLibrary::open(store, stub, "user-2").await.unwrap();
        assert!(other.list().await.is_empty());
        assert_eq!(other.context().await, "");
    }

    #[tokio::test]
    async fn http_service_sends_multipart_and_json() {
        let app = Router::new()
            .route("/upload", post(|mut form: Multipart| async move {
                let mut fields = Vec::new();
                while let Some(field) = form.next_field().await.unwrap() {
                    let name = field.name().unwrap_or_default().to_string();
                    let data = field.bytes().await.unwrap();
                    fields.push(format!("{}={}", name, data.len()));
                }
                Json(serde_json::json!({ "fields": fields }))
            }))
            .route("/delete", post(|Json(body): Json<serde_json::Value>| async move {
                if body["fileId"].is_string() && body["userId"] == "u" {
                    (StatusCode::OK, Json(serde_json::json!({ "ok": true })))
                } else {
                    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "fileId and userId are required" })))
                }
            }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut request = RequestOverrides::default();
        request.endpoints.upload_url = Some(format!("http://{}/upload", addr));
        request.endpoints.delete_url = Some(format!("http://{}/delete", addr));
        let settings = resolve_effective_settings(&GlobalConfigDefaults::default(), &EnvOverrides::default(), &request);
        let svc = HttpDocumentService::from_settings(&settings).unwrap();

        svc.upload(UploadRequest {
            file_name: "a.pdf".into(),
            bytes: b"%PDF-1.7".to_vec(),
            user_id: "u".into(),
            file_id: "f".into(),
        })
        .await
        .unwrap();
        svc.delete("f", "u").await.unwrap();
        let err = svc.delete("f", "someone-else").await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 400, .. }));
    }
}
