use async_trait::async_trait;
use bytes::Bytes;
use pinbox_storage::error::{StorageError, StorageResult};
use pinbox_storage::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory object store. Streaming writes become visible on `finish`.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    pub puts: AtomicUsize,
}

#[allow(dead_code)]
impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
        })
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.get(key).await?;
        // Split so consumers see more than one frame.
        let mid = data.len() / 2;
        let frames = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(frames)))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(MemoryUpload {
            objects: self.objects.clone(),
            key: key.to_string(),
            buf: Vec::new(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let data = objects
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryUpload {
    objects: Arc<Mutex<BTreeMap<String, Bytes>>>,
    key: String,
    buf: Vec<u8>,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buf.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let len = self.buf.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(self.key, Bytes::from(self.buf));
        Ok(len)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

/// Wraps a backend and fails streaming reads of keys containing `needle`.
pub struct FailingReadBackend {
    pub inner: Arc<MemoryBackend>,
    pub needle: String,
}

#[async_trait]
impl ObjectStore for FailingReadBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        if key.contains(&self.needle) {
            return Err(StorageError::Io(std::io::Error::other("injected read failure")));
        }
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.rename(from, to).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}
