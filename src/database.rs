use crate::error::StoreError;
use crate::model::*;
use async_trait::async_trait;
use sled::transaction::{abort, TransactionError, Transactional};
use std::time::{Duration, Instant};

/// Write access to a record store, valid until `expires_at`.
#[derive(Debug, Clone)]
pub struct Credential {
    token: Option<String>,
    expires_at: Instant,
}

impl Credential {
    pub fn new(token: Option<String>, lifetime: Duration) -> Self {
        Credential {
            token,
            expires_at: Instant::now() + lifetime,
        }
    }

    /// The token to attach to a write, or `Auth` once the lifetime is over.
    pub fn token(&self) -> Result<Option<&str>, StoreError> {
        if Instant::now() >= self.expires_at {
            return Err(StoreError::Auth("credential expired".to_owned()));
        }
        Ok(self.token.as_deref())
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn authenticate(&self) -> Result<Credential, StoreError>;
    async fn list_all(&self) -> Result<Vec<Entry>, StoreError>;
    async fn find_by_owner(&self, owner: &str) -> Result<Option<Entry>, StoreError>;
    async fn create(
        &self,
        credential: &Credential,
        owner: &str,
        images: Vec<ImageFile>,
    ) -> Result<Entry, StoreError>;
    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError>;
    /// Applies `patch` only if the stored entry still equals `expected`.
    async fn update_if(
        &self,
        credential: &Credential,
        expected: &Entry,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError>;
    fn file_url(&self, entry_id: &str, filename: &str) -> String;

    /// File contents for stores whose files are served by this app.
    async fn open_file(
        &self,
        _entry_id: &str,
        _filename: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
}

const ENTRIES: &[u8] = b"entries";
const ENTRIES_OWNER: &[u8] = b"ENTRIES_OWNER";
const FILES: &[u8] = b"files";

const LOCAL_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(60);

fn format_id(id: u64) -> String {
    format!("{:015x}", id)
}

fn file_key(entry_id: &str, filename: &str) -> String {
    format!("{}/{}", entry_id, filename)
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn transaction_error(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Storage(e),
    }
}

fn patched(mut entry: Entry, patch: &EntryPatch, added: &[(String, Vec<u8>)]) -> Entry {
    if let Some(images) = &patch.images {
        entry.images = images.clone();
    }
    entry.images.extend(added.iter().map(|(name, _)| name.clone()));
    if let Some(voted_users) = &patch.voted_users {
        entry.voted_users = voted_users.clone();
    }
    entry
}

trait SledStoreExt {
    fn stored_names(&self, images: Vec<ImageFile>) -> sled::Result<Vec<(String, Vec<u8>)>>;
    fn write_patch(
        &self,
        id: &str,
        expected: Option<&Entry>,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError>;
}

impl SledStoreExt for sled::Db {
    fn stored_names(&self, images: Vec<ImageFile>) -> sled::Result<Vec<(String, Vec<u8>)>> {
        images
            .into_iter()
            .map(|image| -> sled::Result<(String, Vec<u8>)> {
                let name = format!(
                    "{}_{}",
                    format_id(self.generate_id()?),
                    sanitize_filename(&image.filename)
                );
                Ok((name, image.bytes))
            })
            .collect()
    }

    fn write_patch(
        &self,
        id: &str,
        expected: Option<&Entry>,
        mut patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        let entries = self.open_tree(ENTRIES)?;
        let files = self.open_tree(FILES)?;
        let added = self.stored_names(std::mem::take(&mut patch.new_images))?;
        (&entries, &files)
            .transaction(|(entries, files)| {
                let current: Entry = match entries.get(id.as_bytes())? {
                    Some(bytes) => match bincode::deserialize(&bytes) {
                        Ok(entry) => entry,
                        Err(e) => return abort(StoreError::Codec(e)),
                    },
                    None => return abort(StoreError::NotFound(id.to_owned())),
                };
                if let Some(expected) = expected {
                    if &current != expected {
                        return abort(StoreError::Conflict);
                    }
                }
                let updated = patched(current.clone(), &patch, &added);
                let bytes = match bincode::serialize(&updated) {
                    Ok(bytes) => bytes,
                    Err(e) => return abort(StoreError::Codec(e)),
                };
                entries.insert(id.as_bytes(), bytes)?;
                for (name, data) in &added {
                    files.insert(file_key(id, name).as_bytes(), data.clone())?;
                }
                for name in current.images.iter().filter(|name| !updated.images.contains(*name)) {
                    files.remove(file_key(id, name).as_bytes())?;
                }
                Ok(updated)
            })
            .map_err(transaction_error)
    }
}

#[async_trait]
impl RecordStore for sled::Db {
    async fn authenticate(&self) -> Result<Credential, StoreError> {
        Ok(Credential::new(None, LOCAL_CREDENTIAL_LIFETIME))
    }

    async fn list_all(&self) -> Result<Vec<Entry>, StoreError> {
        let entries = self.open_tree(ENTRIES)?;
        entries
            .iter()
            .values()
            .map(|bytes| -> Result<Entry, StoreError> { Ok(bincode::deserialize(&bytes?)?) })
            .collect()
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Option<Entry>, StoreError> {
        let entries_owner = self.open_tree(ENTRIES_OWNER)?;
        let entries = self.open_tree(ENTRIES)?;
        if let Some(id) = entries_owner.get(owner.as_bytes())? {
            let bytes = entries
                .get(&id)?
                .ok_or_else(|| StoreError::NotFound(String::from_utf8_lossy(&id).into_owned()))?;
            Ok(Some(bincode::deserialize(&bytes)?))
        } else {
            Ok(None)
        }
    }

    async fn create(
        &self,
        credential: &Credential,
        owner: &str,
        images: Vec<ImageFile>,
    ) -> Result<Entry, StoreError> {
        credential.token()?;
        let entries = self.open_tree(ENTRIES)?;
        let entries_owner = self.open_tree(ENTRIES_OWNER)?;
        let files = self.open_tree(FILES)?;
        let id = format_id(self.generate_id()?);
        let stored = self.stored_names(images)?;
        let entry = Entry {
            id,
            owner: owner.to_owned(),
            images: stored.iter().map(|(name, _)| name.clone()).collect(),
            voted_users: Vec::new(),
        };
        let bytes = bincode::serialize(&entry)?;
        (&entries, &entries_owner, &files)
            .transaction(|(entries, entries_owner, files)| {
                if entries_owner
                    .insert(owner.as_bytes(), entry.id.as_bytes())?
                    .is_some()
                {
                    return abort(StoreError::DuplicateOwner(owner.to_owned()));
                }
                entries.insert(entry.id.as_bytes(), bytes.clone())?;
                for (name, data) in &stored {
                    files.insert(file_key(&entry.id, name).as_bytes(), data.clone())?;
                }
                Ok(())
            })
            .map_err(transaction_error)?;
        Ok(entry)
    }

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        credential.token()?;
        self.write_patch(id, None, patch)
    }

    async fn update_if(
        &self,
        credential: &Credential,
        expected: &Entry,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        credential.token()?;
        self.write_patch(&expected.id, Some(expected), patch)
    }

    fn file_url(&self, entry_id: &str, filename: &str) -> String {
        format!("/files/{}/{}", entry_id, filename)
    }

    async fn open_file(
        &self,
        entry_id: &str,
        filename: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let files = self.open_tree(FILES)?;
        Ok(files
            .get(file_key(entry_id, filename).as_bytes())?
            .map(|data| data.to_vec()))
    }
}
