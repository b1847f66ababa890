//! In-memory sinks for single-process runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::{
    Group, GroupStore, NewGroup, ProcessingLock, ProgressSink, Result, StoreError, Upload,
    UploadStatus, UploadStore,
};

/// Expiring locks held in process memory.
///
/// The holder is the acquiring thread; only that thread can release.
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (ThreadId, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.get(key).is_some_and(|(_, until)| *until > Instant::now()))
            .unwrap_or(false)
    }
}

impl ProcessingLock for MemoryLock {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match held.get(key) {
            Some((_, until)) if *until > now => Ok(false),
            _ => {
                held.insert(key.to_string(), (thread::current().id(), now + ttl));
                Ok(true)
            }
        }
    }

    fn release(&self, key: &str) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held
            .get(key)
            .is_some_and(|(holder, _)| *holder == thread::current().id())
        {
            held.remove(key);
        }
        Ok(())
    }
}

/// Uploads, groups and progress history kept in memory.
///
/// Every progress write is recorded so callers can inspect the full sequence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<String, Upload>>,
    groups: Mutex<Vec<Group>>,
    progress: Mutex<Vec<(String, u8, String)>>,
    next_group_id: AtomicI64,
    lock: MemoryLock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress updates written for an upload, oldest first.
    pub fn progress_history(&self, upload_id: &str) -> Vec<(u8, String)> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _, _)| id == upload_id)
            .map(|(_, percent, message)| (*percent, message.clone()))
            .collect()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.lock.is_held(key)
    }

    fn update_upload<F>(&self, upload_id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Upload),
    {
        let mut uploads = self.uploads.lock().unwrap_or_else(|e| e.into_inner());
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::UploadNotFound(upload_id.to_string()))?;
        apply(upload);
        upload.updated_at = Utc::now();
        Ok(())
    }
}

impl UploadStore for MemoryStore {
    fn create_upload(&self, upload: &Upload) -> Result<()> {
        self.uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(upload.id.clone())
            .or_insert_with(|| upload.clone());
        Ok(())
    }

    fn get_upload(&self, upload_id: &str) -> Result<Option<Upload>> {
        Ok(self
            .uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(upload_id)
            .cloned())
    }

    fn set_source(&self, upload_id: &str, owner_id: &str, source_path: &Path) -> Result<()> {
        self.update_upload(upload_id, |u| {
            u.owner_id = owner_id.to_string();
            u.source_path = source_path.to_path_buf();
        })
    }

    fn mark_processing(&self, upload_id: &str) -> Result<()> {
        self.update_upload(upload_id, |u| {
            u.status = UploadStatus::Processing;
            u.error_message = None;
            u.progress = 0;
            u.progress_message = Some("Processing".to_string());
        })
    }

    fn mark_completed(&self, upload_id: &str, total_pages: u32) -> Result<()> {
        self.update_upload(upload_id, |u| {
            u.status = UploadStatus::Completed;
            u.total_pages = Some(total_pages);
            u.error_message = None;
            u.progress = 100;
        })
    }

    fn mark_failed(&self, upload_id: &str, message: &str) -> Result<()> {
        self.update_upload(upload_id, |u| {
            u.status = UploadStatus::Failed;
            u.error_message = Some(message.to_string());
        })
    }
}

impl GroupStore for MemoryStore {
    fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let created = Group {
            id: self.next_group_id.fetch_add(1, Ordering::SeqCst) + 1,
            code: group.code.clone(),
            label: group.label.clone(),
            pdf_path: group.pdf_path.clone(),
            pages: group.pages.clone(),
            pages_count: group.pages_count(),
            owner_id: group.owner_id.clone(),
            upload_id: group.upload_id.clone(),
            created_at: Utc::now(),
        };
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(created.clone());
        Ok(created)
    }

    fn delete_all_for_upload(&self, upload_id: &str) -> Result<Vec<Group>> {
        let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        let (deleted, kept): (Vec<Group>, Vec<Group>) =
            groups.drain(..).partition(|g| g.upload_id == upload_id);
        *groups = kept;
        Ok(deleted)
    }

    fn list_for_upload(&self, upload_id: &str) -> Result<Vec<Group>> {
        Ok(self
            .groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|g| g.upload_id == upload_id)
            .cloned()
            .collect())
    }
}

impl ProgressSink for MemoryStore {
    fn write_progress(&self, upload_id: &str, percent: u8, message: &str) -> Result<()> {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((upload_id.to_string(), percent, message.to_string()));
        if let Some(upload) = self
            .uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(upload_id)
        {
            upload.progress = percent;
            upload.progress_message = Some(message.to_string());
        }
        Ok(())
    }
}

impl ProcessingLock for MemoryStore {
    fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.lock.acquire(key, ttl)
    }

    fn release(&self, key: &str) -> Result<()> {
        self.lock.release(key)
    }
}
