//! User actions. Each one reads every entry, runs the quota check and only
//! then acquires a credential for its single write.

use crate::database::RecordStore;
use crate::error::{AppError, StoreError};
use crate::model::*;
use crate::quota::{self, VotePolicy};
use log::info;

pub async fn upload_images(
    store: &dyn RecordStore,
    user: &str,
    files: Vec<ImageFile>,
) -> Result<Entry, AppError> {
    if files.is_empty() {
        return Err(AppError::NoFiles);
    }
    let entries = store.list_all().await?;
    let existing = quota::owned_entry(&entries, user).cloned();
    let names: Vec<String> = files.iter().map(|file| file.filename.clone()).collect();
    let planned = quota::apply_upload(existing.clone(), user, &names)?;

    let credential = store.authenticate().await?;
    let entry = match existing {
        None => store.create(&credential, user, files).await?,
        Some(entry) => {
            let patch = EntryPatch::append_images(entry.images.clone(), files);
            store.update_if(&credential, &entry, patch).await?
        }
    };
    info!(
        "{} uploaded {} image(s) to entry {}, {} of {} slots used",
        user,
        names.len(),
        entry.id,
        planned.images.len(),
        quota::MAX_IMAGES
    );
    Ok(entry)
}

pub async fn cast_vote(
    store: &dyn RecordStore,
    policy: VotePolicy,
    user: &str,
    entry_id: &str,
) -> Result<Entry, AppError> {
    let entries = store.list_all().await?;
    let target = quota::check_vote(&entries, user, entry_id, policy)?;
    let remaining = quota::remaining_votes(&entries, user);
    let voted = quota::apply_vote(target.clone(), user, remaining)?;

    let credential = store.authenticate().await?;
    let entry = store
        .update_if(&credential, target, EntryPatch::voters(voted.voted_users))
        .await?;
    info!("{} voted for entry {} ({} left)", user, entry.id, remaining - 1);
    Ok(entry)
}

pub async fn remove_image(
    store: &dyn RecordStore,
    user: &str,
    entry_id: &str,
    filename: &str,
) -> Result<Entry, AppError> {
    let entry = store
        .find_by_owner(user)
        .await?
        .filter(|entry| entry.id == entry_id)
        .ok_or_else(|| AppError::NotOwner(entry_id.to_owned()))?;
    if !entry.images.iter().any(|image| image == filename) {
        return Err(StoreError::NotFound(filename.to_owned()).into());
    }
    let remaining: Vec<String> = entry
        .images
        .iter()
        .filter(|image| *image != filename)
        .cloned()
        .collect();

    let credential = store.authenticate().await?;
    let entry = store
        .update_if(&credential, &entry, EntryPatch::keep_images(remaining))
        .await?;
    info!("{} removed {} from entry {}", user, filename, entry.id);
    Ok(entry)
}
