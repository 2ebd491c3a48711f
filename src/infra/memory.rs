use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::domain::{
    identity::BucketIdentity,
    permission::{Permission, PermissionSet},
    yaml_config::ResolvedSuite,
    storage::{
        BackendConnector, CompletedPartRef, ObjectBackend, ObjectInfo, ObjectSummary, PutOptions,
        RemoteError, StorageError,
    },
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    e_tag: String,
    last_modified: i64,
}

impl StoredObject {
    fn new(data: Bytes, options: &PutOptions) -> Self {
        Self {
            e_tag: format!("\"{:x}\"", Sha256::digest(&data)),
            data,
            content_type: options.content_type.clone(),
            metadata: options.metadata.clone(),
            last_modified: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    options: PutOptions,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct BucketState {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    /// `None` lets one request through untouched
    faults: VecDeque<Option<RemoteError>>,
    requests: u64,
    next_upload_id: u64,
}

/// In-memory bucket shared by every backend created from it.
///
/// Stands in for the remote service in self-checks, dry runs and tests. Each
/// [`MemoryBackend`] view enforces its own policy, the way distinct credentials
/// would on a real service.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    bucket_name: String,
    state: Arc<Mutex<BucketState>>,
}

impl MemoryStore {
    pub fn new(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            state: Arc::default(),
        }
    }

    /// A view of this bucket that enforces `policy` on every request
    pub fn backend(&self, policy: PermissionSet) -> MemoryBackend {
        MemoryBackend {
            store: self.clone(),
            policy,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Write an object directly, bypassing policy and request accounting
    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        let object = StoredObject::new(data.into(), &PutOptions::default());
        self.state.lock().objects.insert(key.to_string(), object);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().objects.contains_key(key)
    }

    pub fn content(&self, key: &str) -> Option<Bytes> {
        self.state.lock().objects.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().objects.keys().cloned().collect()
    }

    /// Fail the next `times` requests with `err`, whatever they are
    pub fn fail_next(&self, err: RemoteError, times: usize) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.faults.push_back(Some(err.clone()));
        }
    }

    /// Let `skip` requests through, then fail the one after with `err`
    pub fn fail_after(&self, skip: usize, err: RemoteError) {
        let mut state = self.state.lock();
        for _ in 0..skip {
            state.faults.push_back(None);
        }
        state.faults.push_back(Some(err));
    }

    /// Requests that reached the store, denied ones included
    pub fn request_count(&self) -> u64 {
        self.state.lock().requests
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: MemoryStore,
    policy: PermissionSet,
}

impl MemoryBackend {
    /// Count the request, replay injected faults, then enforce the policy
    fn admit(
        &self,
        state: &mut BucketState,
        permission: Permission,
        key: &str,
    ) -> Result<(), RemoteError> {
        state.requests += 1;
        if let Some(Some(fault)) = state.faults.pop_front() {
            return Err(fault);
        }
        if !self.policy.allows(permission) {
            tracing::debug!(
                "memory bucket '{}' denied {} on '{}'",
                self.store.bucket_name,
                permission,
                key
            );
            return Err(RemoteError::access_denied(format!(
                "Access Denied ({} required)",
                permission
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.store.bucket_name
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        options: &PutOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, key)?;
        state
            .objects
            .insert(key.to_string(), StoredObject::new(body, options));
        Ok(())
    }

    async fn get_object(
        &self,
        key: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Read, key)?;
        let object = state
            .objects
            .get(key)
            .ok_or_else(|| RemoteError::no_such_key(key))?;
        Ok(Box::new(Cursor::new(object.data.clone())))
    }

    async fn head_object(&self, key: &str) -> Result<ObjectInfo, RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Read, key)?;
        let object = state.objects.get(key).ok_or_else(|| RemoteError {
            // HEAD responses carry no error body
            code: None,
            status: Some(404),
            message: "Not Found".to_string(),
        })?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: object.data.len() as u64,
            content_type: object.content_type.clone(),
            e_tag: Some(object.e_tag.clone()),
            last_modified: Some(object.last_modified),
            metadata: object.metadata.clone(),
        })
    }

    async fn list_objects(
        &self,
        prefix: &str,
        max_keys: Option<i32>,
    ) -> Result<Vec<ObjectSummary>, RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::List, prefix)?;
        let limit = max_keys.map(|n| n.max(0) as usize).unwrap_or(usize::MAX);
        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as u64,
            })
            .collect())
    }

    async fn delete_object(&self, key: &str) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Delete, key)?;
        // S3 answers 204 for missing keys too
        state.objects.remove(key);
        Ok(())
    }

    /// Gated on write only, matching the move operation's requirements
    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, dst_key)?;
        let source = state
            .objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| RemoteError::no_such_key(src_key))?;
        state.objects.insert(dst_key.to_string(), source);
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        options: &PutOptions,
    ) -> Result<String, RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, key)?;
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, key)?;
        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| RemoteError::new("NoSuchUpload", 404, "upload does not exist"))?;
        let e_tag = format!("\"{:x}\"", Sha256::digest(&body));
        upload.parts.insert(part_number, (body, e_tag.clone()));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartRef>,
    ) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, key)?;
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| RemoteError::new("NoSuchUpload", 404, "upload does not exist"))?;

        let mut data = Vec::new();
        for part in &parts {
            match upload.parts.get(&part.part_number) {
                Some((bytes, e_tag)) if *e_tag == part.e_tag => data.extend_from_slice(bytes),
                _ => {
                    return Err(RemoteError::new(
                        "InvalidPart",
                        400,
                        format!("part {} was not uploaded", part.part_number),
                    ))
                }
            }
        }
        let object = StoredObject::new(Bytes::from(data), &upload.options);
        state.objects.insert(upload.key, object);
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), RemoteError> {
        let mut state = self.store.state.lock();
        self.admit(&mut state, Permission::Write, key)?;
        state.uploads.remove(upload_id);
        Ok(())
    }
}

/// Hands out [`MemoryBackend`]s keyed by bucket name, with the policy chosen
/// by the identity's principal: its access key, or its name when it has no
/// credentials.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, MemoryStore>>,
    policies: HashMap<String, PermissionSet>,
    bucket_policies: HashMap<(String, String), PermissionSet>,
    default_policy: PermissionSet,
}

impl MemoryConnector {
    /// Unknown principals get no permissions at all
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that enforces nothing: every credential may do everything
    pub fn permissive() -> Self {
        Self {
            default_policy: PermissionSet::all(),
            ..Self::default()
        }
    }

    /// A service that grants exactly what `suite` declares
    pub fn conformant(suite: &ResolvedSuite) -> Self {
        let mut connector = Self::new();
        for bucket in &suite.buckets {
            let principal = bucket
                .credentials
                .as_ref()
                .map(|c| c.access_key_id.clone())
                .unwrap_or_else(|| bucket.name.clone());
            connector = connector.grant_on(&bucket.bucket_name, principal, bucket.tier.permissions());
            if let Some(admin) = &bucket.admin {
                connector = connector.grant_on(
                    &bucket.bucket_name,
                    admin.access_key_id.clone(),
                    PermissionSet::all(),
                );
            }
        }
        connector
    }

    /// Grant `policy` to `principal` on every bucket
    pub fn grant(mut self, principal: impl Into<String>, policy: PermissionSet) -> Self {
        self.policies.insert(principal.into(), policy);
        self
    }

    pub fn grant_on(
        mut self,
        bucket_name: &str,
        principal: impl Into<String>,
        policy: PermissionSet,
    ) -> Self {
        self.bucket_policies
            .insert((bucket_name.to_string(), principal.into()), policy);
        self
    }

    pub fn store(&self, bucket_name: &str) -> MemoryStore {
        self.stores
            .lock()
            .entry(bucket_name.to_string())
            .or_insert_with(|| MemoryStore::new(bucket_name))
            .clone()
    }

    fn policy_for(&self, identity: &BucketIdentity) -> PermissionSet {
        let principal = identity.access_key_id().unwrap_or(identity.name.as_str());
        self.bucket_policies
            .get(&(identity.bucket_name.clone(), principal.to_string()))
            .or_else(|| self.policies.get(principal))
            .copied()
            .unwrap_or(self.default_policy)
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(
        &self,
        identity: &BucketIdentity,
    ) -> Result<Arc<dyn ObjectBackend>, StorageError> {
        let policy = self.policy_for(identity);
        tracing::debug!(
            "Connecting '{}' to memory bucket '{}' with policy {}",
            identity.name,
            identity.bucket_name,
            policy
        );
        Ok(Arc::new(self.store(&identity.bucket_name).backend(policy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::CredentialPair;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_policy_is_enforced_per_view() {
        let store = MemoryStore::new("bucket");
        let reader = store.backend(PermissionSet::none().with(Permission::Read));
        let writer = store.backend(PermissionSet::none().with(Permission::Write));

        let denied = reader
            .put_object("a.txt", Bytes::from_static(b"x"), &PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(denied.code.as_deref(), Some("AccessDenied"));
        assert!(!store.contains("a.txt"));

        writer
            .put_object("a.txt", Bytes::from_static(b"hello"), &PutOptions::default())
            .await
            .unwrap();

        let mut body = Vec::new();
        reader
            .get_object("a.txt")
            .await
            .unwrap()
            .read_to_end(&mut body)
            .await
            .unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(store.request_count(), 3);
    }

    #[tokio::test]
    async fn test_list_respects_prefix_and_limit() {
        let store = MemoryStore::new("bucket");
        store.insert("a/1", "1");
        store.insert("a/2", "2");
        store.insert("b/1", "3");
        let backend = store.backend(PermissionSet::all());

        let listed = backend.list_objects("a/", None).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/1", "a/2"]);

        let first = backend.list_objects("", Some(1)).await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn test_head_missing_has_no_code() {
        let backend = MemoryStore::new("bucket").backend(PermissionSet::all());
        let err = backend.head_object("missing").await.unwrap_err();
        assert_eq!(err.code, None);
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_multipart_assembles_parts_in_order() {
        let store = MemoryStore::new("bucket");
        let backend = store.backend(PermissionSet::all());

        let id = backend
            .create_multipart_upload("big", &PutOptions::default())
            .await
            .unwrap();
        let second = backend
            .upload_part("big", &id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let first = backend
            .upload_part("big", &id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        assert_eq!(store.pending_uploads(), 1);

        backend
            .complete_multipart_upload(
                "big",
                &id,
                vec![
                    CompletedPartRef {
                        part_number: 1,
                        e_tag: first,
                    },
                    CompletedPartRef {
                        part_number: 2,
                        e_tag: second,
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.content("big").unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_injected_faults_come_first() {
        let store = MemoryStore::new("bucket");
        store.fail_next(RemoteError::new("SlowDown", 503, "slow down"), 1);
        let backend = store.backend(PermissionSet::all());

        let err = backend.list_objects("", None).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("SlowDown"));
        assert!(backend.list_objects("", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_picks_policy_by_access_key() {
        let connector = MemoryConnector::new()
            .grant("reader", PermissionSet::none().with(Permission::Read));
        connector.store("bucket").insert("k", "v");

        let reader = BucketIdentity::new("r", "bucket")
            .with_credentials(CredentialPair::new("reader", "secret"));
        let stranger = BucketIdentity::new("s", "bucket")
            .with_credentials(CredentialPair::new("stranger", "secret"));

        let backend = connector.connect(&reader).await.unwrap();
        assert!(backend.head_object("k").await.is_ok());

        let backend = connector.connect(&stranger).await.unwrap();
        assert!(backend.head_object("k").await.is_err());
    }

    #[tokio::test]
    async fn test_bucket_grant_overrides_global_grant() {
        let connector = MemoryConnector::new()
            .grant("key", PermissionSet::all())
            .grant_on("locked", "key", PermissionSet::none());
        connector.store("open").insert("k", "v");
        connector.store("locked").insert("k", "v");

        let open = BucketIdentity::new("open", "open")
            .with_credentials(CredentialPair::new("key", "secret"));
        let locked = BucketIdentity::new("locked", "locked")
            .with_credentials(CredentialPair::new("key", "secret"));

        assert!(connector.connect(&open).await.unwrap().head_object("k").await.is_ok());
        assert!(connector.connect(&locked).await.unwrap().head_object("k").await.is_err());
    }
}
