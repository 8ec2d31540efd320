//! In-memory reference [`MetadataStore`] adapter. The four tables are
//! plain `HashMap`s behind one `Mutex`, so `commit_file_creation` and
//! `commit_multipart_completion` are atomic for free -- a real deployment
//! replaces this with a SQL store that wraps the same two operations in
//! an actual DB transaction (spec.md §6).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, StorageError};
use crate::model::{File, FileId, StorageObject, SyncEvent, Tier, UploadPart, UploadSession, SessionStatus};
use crate::ports::metadata::{FileCreationTxn, MetadataStore};

#[derive(Default)]
struct Tables {
    files: HashMap<FileId, File>,
    objects: HashMap<(FileId, Tier), StorageObject>,
    sessions: HashMap<String, UploadSession>,
    parts: HashMap<(String, u32), UploadPart>,
    sync_events: HashMap<String, SyncEvent>,
}

#[derive(Default)]
pub struct InMemoryMetadata {
    tables: Mutex<Tables>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_creation(tables: &mut Tables, txn: FileCreationTxn) {
        tables.files.insert(txn.file.id.clone(), txn.file);
        tables.objects.insert((txn.cache_object.file_id.clone(), Tier::Cache), txn.cache_object);
        tables.objects.insert((txn.nas_object.file_id.clone(), Tier::Nas), txn.nas_object);
        tables.sync_events.insert(txn.sync_event.id.clone(), txn.sync_event);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadata {
    async fn commit_file_creation(&self, txn: FileCreationTxn) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        Self::apply_creation(&mut tables, txn);
        Ok(())
    }

    async fn commit_multipart_completion(&self, txn: FileCreationTxn, session_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StorageError::SessionNotFound(session_id.to_string()))?;
        session.status = SessionStatus::Completing;
        session.file_id = Some(txn.file.id.clone());
        session.updated_at = Utc::now();
        Self::apply_creation(&mut tables, txn);
        Ok(())
    }

    async fn get_file(&self, id: &str) -> Result<Option<File>> {
        Ok(self.tables.lock().unwrap().files.get(id).cloned())
    }

    async fn update_file(&self, file: File) -> Result<()> {
        self.tables.lock().unwrap().files.insert(file.id.clone(), file);
        Ok(())
    }

    async fn find_duplicate_file(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Option<File>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .files
            .values()
            .find(|f| {
                f.folder_id == folder_id
                    && f.name == name
                    && f.mime_type == mime_type
                    && f.created_at == created_at
            })
            .cloned())
    }

    async fn find_active_file_by_name(&self, folder_id: &str, name: &str) -> Result<Option<File>> {
        use crate::model::FileState;
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .files
            .values()
            .find(|f| f.folder_id == folder_id && f.name == name && f.state == FileState::Active)
            .cloned())
    }

    async fn get_storage_object(&self, file_id: &FileId, tier: Tier) -> Result<Option<StorageObject>> {
        Ok(self.tables.lock().unwrap().objects.get(&(file_id.clone(), tier)).cloned())
    }

    async fn upsert_storage_object(&self, obj: StorageObject) -> Result<()> {
        self.tables.lock().unwrap().objects.insert((obj.file_id.clone(), obj.tier), obj);
        Ok(())
    }

    async fn delete_storage_object(&self, file_id: &FileId, tier: Tier) -> Result<()> {
        self.tables.lock().unwrap().objects.remove(&(file_id.clone(), tier));
        Ok(())
    }

    async fn insert_session(&self, session: UploadSession) -> Result<()> {
        self.tables.lock().unwrap().sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<UploadSession>> {
        Ok(self.tables.lock().unwrap().sessions.get(id).cloned())
    }

    async fn update_session(&self, session: UploadSession) -> Result<()> {
        self.tables.lock().unwrap().sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.tables.lock().unwrap().sessions.remove(id);
        Ok(())
    }

    async fn get_completing_session_for_file(&self, file_id: &FileId) -> Result<Option<UploadSession>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .sessions
            .values()
            .find(|s| s.status == SessionStatus::Completing && s.file_id.as_deref() == Some(file_id.as_str()))
            .cloned())
    }

    async fn list_sessions_by_status(
        &self,
        statuses: &[SessionStatus],
        updated_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<UploadSession>> {
        let tables = self.tables.lock().unwrap();
        let mut matches: Vec<UploadSession> = tables
            .sessions
            .values()
            .filter(|s| statuses.contains(&s.status))
            .filter(|s| updated_before.map(|cutoff| s.updated_at < cutoff).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by_key(|s| s.updated_at);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn upsert_part(&self, part: UploadPart) -> Result<()> {
        self.tables.lock().unwrap().parts.insert((part.session_id.clone(), part.part_number), part);
        Ok(())
    }

    async fn get_part(&self, session_id: &str, part_number: u32) -> Result<Option<UploadPart>> {
        Ok(self.tables.lock().unwrap().parts.get(&(session_id.to_string(), part_number)).cloned())
    }

    async fn list_parts(&self, session_id: &str) -> Result<Vec<UploadPart>> {
        let tables = self.tables.lock().unwrap();
        let mut parts: Vec<UploadPart> = tables
            .parts
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn delete_parts(&self, session_id: &str) -> Result<()> {
        self.tables.lock().unwrap().parts.retain(|(sid, _), _| sid != session_id);
        Ok(())
    }

    async fn insert_sync_event(&self, event: SyncEvent) -> Result<()> {
        self.tables.lock().unwrap().sync_events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn get_sync_event(&self, id: &str) -> Result<Option<SyncEvent>> {
        Ok(self.tables.lock().unwrap().sync_events.get(id).cloned())
    }

    async fn update_sync_event(&self, event: SyncEvent) -> Result<()> {
        self.tables.lock().unwrap().sync_events.insert(event.id.clone(), event);
        Ok(())
    }

    async fn get_latest_sync_event_for_file(&self, file_id: &FileId) -> Result<Option<SyncEvent>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .sync_events
            .values()
            .filter(|e| &e.file_id == file_id)
            .max_by_key(|e| e.created_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AvailabilityStatus, FileState, SyncAction};

    fn sample_txn() -> FileCreationTxn {
        let now = Utc::now();
        let file = File {
            id: "f1".into(),
            name: "a.txt".into(),
            folder_id: "root".into(),
            size_bytes: 3,
            mime_type: "text/plain".into(),
            state: FileState::Active,
            created_by: "u1".into(),
            created_at: now,
            updated_at: now,
        };
        let cache = StorageObject::new("f1".into(), Tier::Cache, "cache/f1".into(), AvailabilityStatus::Available);
        let nas = StorageObject::new("f1".into(), Tier::Nas, "nas/f1".into(), AvailabilityStatus::Syncing);
        let event = SyncEvent::new("f1".into(), SyncAction::Upload);
        FileCreationTxn { file, cache_object: cache, nas_object: nas, sync_event: event }
    }

    #[tokio::test]
    async fn commit_file_creation_is_visible_atomically() {
        let store = InMemoryMetadata::new();
        store.commit_file_creation(sample_txn()).await.unwrap();
        assert!(store.get_file("f1").await.unwrap().is_some());
        assert!(store.get_storage_object(&"f1".to_string(), Tier::Cache).await.unwrap().is_some());
        assert!(store.get_storage_object(&"f1".to_string(), Tier::Nas).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn commit_multipart_completion_transitions_session() {
        let store = InMemoryMetadata::new();
        let now = Utc::now();
        let session = UploadSession {
            id: "s1".into(),
            file_name: "a.txt".into(),
            folder_id: "root".into(),
            total_size: 3,
            mime_type: "text/plain".into(),
            part_size: 3,
            total_parts: 1,
            completed_parts: [1].into_iter().collect(),
            uploaded_bytes: 3,
            status: SessionStatus::Active,
            conflict_strategy: crate::model::ConflictStrategy::Error,
            expires_at: now,
            file_id: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_session(session).await.unwrap();
        store.commit_multipart_completion(sample_txn(), "s1").await.unwrap();
        let updated = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Completing);
        assert_eq!(updated.file_id.as_deref(), Some("f1"));
    }
}
