//! Record store backed by a PocketBase collection.
//!
//! Reads go through the public list rule of the collection. Writes need a
//! superuser token, which is acquired per action by [`RecordStore::authenticate`]
//! and dropped with the returned [`Credential`].

use crate::config::PocketBaseSettings;
use crate::database::{Credential, RecordStore};
use crate::error::StoreError;
use crate::model::*;
use async_trait::async_trait;
use log::debug;
use reqwest::{
    header::AUTHORIZATION,
    multipart::{Form, Part},
    RequestBuilder, Response, StatusCode,
};
use serde::Deserialize;
use std::time::Duration;

const PAGE_SIZE: u32 = 200;

#[derive(Deserialize, Debug)]
struct Record {
    id: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    image: Option<Vec<String>>,
    #[serde(default)]
    voted_users: Option<Vec<String>>,
}

impl From<Record> for Entry {
    fn from(record: Record) -> Self {
        Entry {
            id: record.id,
            owner: record.user.unwrap_or_default(),
            images: record.image.unwrap_or_default(),
            voted_users: record.voted_users.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct RecordPage {
    page: i64,
    #[serde(rename = "totalPages")]
    total_pages: i64,
    items: Vec<Record>,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct PocketBase {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    admin_email: String,
    admin_password: String,
    credential_lifetime: Duration,
}

/// Filter expression matching records owned by exactly `owner`.
fn owner_filter(owner: &str) -> String {
    let escaped = owner.replace('\\', "\\\\").replace('"', "\\\"");
    format!("user = \"{}\"", escaped)
}

async fn checked(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Auth(message),
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        _ => StoreError::Backend {
            status: status.as_u16(),
            message,
        },
    })
}

fn authorized(request: RequestBuilder, credential: &Credential) -> Result<RequestBuilder, StoreError> {
    Ok(match credential.token()? {
        Some(token) => request.header(AUTHORIZATION, token),
        None => request,
    })
}

fn image_part(image: ImageFile) -> Result<Part, StoreError> {
    Ok(Part::bytes(image.bytes)
        .file_name(image.filename)
        .mime_str(image.kind.mime())?)
}

impl PocketBase {
    pub fn new(settings: &PocketBaseSettings) -> Self {
        PocketBase {
            http: reqwest::Client::new(),
            base_url: settings.url.trim_end_matches('/').to_owned(),
            collection: settings.collection.clone(),
            admin_email: settings.admin_email.clone(),
            admin_password: settings.admin_password.clone(),
            credential_lifetime: settings.credential_lifetime,
        }
    }

    fn records_url(&self) -> String {
        format!(
            "{}/api/collections/{}/records",
            self.base_url, self.collection
        )
    }

    fn record_url(&self, id: &str) -> String {
        format!("{}/{}", self.records_url(), id)
    }

    async fn fetch(&self, id: &str) -> Result<Entry, StoreError> {
        let response = self.http.get(self.record_url(id)).send().await?;
        let record: Record = checked(response).await?.json().await?;
        Ok(record.into())
    }
}

#[async_trait]
impl RecordStore for PocketBase {
    async fn authenticate(&self) -> Result<Credential, StoreError> {
        let response = self
            .http
            .post(format!(
                "{}/api/collections/_superusers/auth-with-password",
                self.base_url
            ))
            .json(&serde_json::json!({
                "identity": self.admin_email,
                "password": self.admin_password,
            }))
            .send()
            .await?;
        let response = checked(response).await.map_err(|err| match err {
            StoreError::Backend { message, .. } | StoreError::NotFound(message) => {
                StoreError::Auth(message)
            }
            err => err,
        })?;
        let auth: AuthResponse = response.json().await?;
        Ok(Credential::new(Some(auth.token), self.credential_lifetime))
    }

    async fn list_all(&self) -> Result<Vec<Entry>, StoreError> {
        let mut entries = Vec::new();
        let mut page = 1i64;
        loop {
            let response = self
                .http
                .get(self.records_url())
                .query(&[("page", page.to_string()), ("perPage", PAGE_SIZE.to_string())])
                .send()
                .await?;
            let body: RecordPage = checked(response).await?.json().await?;
            entries.extend(body.items.into_iter().map(Entry::from));
            if body.page >= body.total_pages {
                break;
            }
            page = body.page + 1;
        }
        debug!("fetched {} entries from {}", entries.len(), self.collection);
        Ok(entries)
    }

    async fn find_by_owner(&self, owner: &str) -> Result<Option<Entry>, StoreError> {
        let response = self
            .http
            .get(self.records_url())
            .query(&[("filter", owner_filter(owner))])
            .send()
            .await?;
        let body: RecordPage = checked(response).await?.json().await?;
        Ok(body
            .items
            .into_iter()
            .map(Entry::from)
            .find(|entry| entry.owner == owner))
    }

    async fn create(
        &self,
        credential: &Credential,
        owner: &str,
        images: Vec<ImageFile>,
    ) -> Result<Entry, StoreError> {
        // No unique index to lean on; re-check right before the insert.
        if self.find_by_owner(owner).await?.is_some() {
            return Err(StoreError::DuplicateOwner(owner.to_owned()));
        }
        let mut form = Form::new().text("user", owner.to_owned());
        for image in images {
            form = form.part("image", image_part(image)?);
        }
        let request = authorized(self.http.post(self.records_url()), credential)?;
        let response = request.multipart(form).send().await?;
        let record: Record = checked(response).await?.json().await?;
        Ok(record.into())
    }

    async fn update(
        &self,
        credential: &Credential,
        id: &str,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        let request = authorized(self.http.patch(self.record_url(id)), credential)?;
        let request = if patch.new_images.is_empty() {
            let mut fields = serde_json::Map::new();
            if let Some(images) = patch.images {
                fields.insert("image".to_owned(), images.into());
            }
            if let Some(voted_users) = patch.voted_users {
                fields.insert("voted_users".to_owned(), voted_users.into());
            }
            request.json(&fields)
        } else {
            let mut form = Form::new();
            for name in patch.images.unwrap_or_default() {
                form = form.text("image", name);
            }
            for image in patch.new_images {
                form = form.part("image", image_part(image)?);
            }
            if let Some(voted_users) = patch.voted_users {
                form = form.text(
                    "voted_users",
                    serde_json::Value::from(voted_users).to_string(),
                );
            }
            request.multipart(form)
        };
        let response = request.send().await?;
        let record: Record = checked(response).await?.json().await?;
        Ok(record.into())
    }

    async fn update_if(
        &self,
        credential: &Credential,
        expected: &Entry,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        // PocketBase has no conditional PATCH; compare a fresh read right before writing.
        let current = self.fetch(&expected.id).await?;
        if &current != expected {
            return Err(StoreError::Conflict);
        }
        self.update(credential, &expected.id, patch).await
    }

    fn file_url(&self, entry_id: &str, filename: &str) -> String {
        format!(
            "{}/api/files/{}/{}/{}",
            self.base_url, self.collection, entry_id, filename
        )
    }
}
