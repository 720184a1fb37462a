use crate::actions;
use crate::config::Config;
use crate::database::RecordStore;
use crate::error::{AppError, Notice, QuotaError};
use crate::model::*;
use crate::quota;
use crate::session;
use actix_identity::Identity;
use actix_multipart::Multipart;
use actix_web::{http::header, web, HttpResponse};
use futures_util::TryStreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};

type Tera = web::Data<tera::Tera>;
type Store = web::Data<dyn RecordStore>;
type Settings = web::Data<Config>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/login", web::get().to(login))
        .route("/login", web::post().to(login_post))
        .route("/logout", web::get().to(logout))
        .route("/upload", web::get().to(upload))
        .route("/upload", web::post().to(upload_post))
        .route("/gallery", web::get().to(gallery))
        .route(
            "/gallery/{entry_id}/images/{filename}/delete",
            web::post().to(delete_image),
        )
        .route("/voting", web::get().to(voting))
        .route("/vote/{entry_id}", web::post().to(vote_post))
        .route("/files/{entry_id}/{filename}", web::get().to(file));
}

#[derive(Deserialize)]
struct NoticeQuery {
    notice: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct LoginParams {
    username: String,
}

#[derive(Serialize)]
struct ImageView {
    entry_id: String,
    filename: String,
    url: String,
}

#[derive(Serialize)]
struct EntryView {
    id: String,
    owner: String,
    image_urls: Vec<String>,
    votes: usize,
    voted: bool,
    own: bool,
    can_vote: bool,
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location.to_owned()))
        .finish()
}

fn notice_redirect(path: &str, code: &str) -> HttpResponse {
    redirect(&format!("{}?notice={}", path, code))
}

fn context(user: Option<&str>, query: &NoticeQuery, page: &str) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("user", &user);
    ctx.insert("page", page);
    ctx.insert(
        "notice",
        &query.notice.as_deref().and_then(Notice::from_code),
    );
    ctx
}

fn render(tera: &tera::Tera, template: &str, ctx: &tera::Context) -> Result<HttpResponse, AppError> {
    let body = tera.render(template, ctx)?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body))
}

async fn index() -> HttpResponse {
    redirect("/upload")
}

async fn login(
    id: Identity,
    tera: Tera,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    if session::is_logged_in(&id) {
        return Ok(redirect("/upload"));
    }
    render(&tera, "login.html", &context(None, &query, "login"))
}

async fn login_post(
    params: web::Form<LoginParams>,
    id: Identity,
    config: Settings,
) -> HttpResponse {
    match session::login(&id, &params.username, config.session_lifetime) {
        Ok(username) => {
            info!("{} logged in", username);
            redirect("/upload")
        }
        Err(err) => notice_redirect("/login", err.notice()),
    }
}

async fn logout(id: Identity) -> HttpResponse {
    session::logout(&id);
    notice_redirect("/login", "logged_out")
}

async fn upload(
    id: Identity,
    tera: Tera,
    store: Store,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return Ok(redirect("/login")),
    };
    let entries = store.list_all().await?;
    let mut ctx = context(Some(&user), &query, "upload");
    ctx.insert(
        "remaining_slots",
        &quota::remaining_upload_slots(&entries, &user),
    );
    ctx.insert("max_images", &quota::MAX_IMAGES);
    ctx.insert("can_upload", &quota::can_upload(&entries, &user, 1));
    render(&tera, "upload.html", &ctx)
}

/// Reads at most `max_files` images of at most `max_bytes` each. Anything
/// beyond that is refused before it is buffered.
async fn read_images(
    mut payload: Multipart,
    max_files: usize,
    max_bytes: usize,
) -> Result<Vec<ImageFile>, AppError> {
    let mut images = Vec::new();
    while let Some(mut field) = payload.try_next().await? {
        let filename = field
            .content_disposition()
            .get_filename()
            .map(str::to_owned)
            .unwrap_or_default();
        // file inputs left empty still send a part without a name
        if filename.is_empty() {
            while field.try_next().await?.is_some() {}
            continue;
        }
        if images.len() == max_files {
            return Err(QuotaError::TooManyFiles {
                existing: 0,
                proposed: images.len() + 1,
                max: max_files,
            }
            .into());
        }
        let kind = ImageKind::from_filename(&filename)
            .ok_or_else(|| AppError::UnsupportedFile(filename.clone()))?;
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::FileTooLarge(filename));
            }
            bytes.extend_from_slice(&chunk);
        }
        images.push(ImageFile {
            filename,
            kind,
            bytes,
        });
    }
    Ok(images)
}

async fn upload_post(
    id: Identity,
    store: Store,
    config: Settings,
    payload: Multipart,
) -> HttpResponse {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return redirect("/login"),
    };
    let result = match read_images(payload, quota::MAX_IMAGES, config.max_upload_bytes).await {
        Ok(files) => actions::upload_images(store.get_ref(), &user, files).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(_) => notice_redirect("/upload", "uploaded"),
        Err(err) => {
            debug!("upload by {} rejected: {}", user, err);
            notice_redirect("/upload", err.notice())
        }
    }
}

async fn gallery(
    id: Identity,
    tera: Tera,
    store: Store,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return Ok(redirect("/login")),
    };
    let images = store
        .find_by_owner(&user)
        .await?
        .map(|entry| {
            entry
                .images
                .iter()
                .map(|filename| ImageView {
                    entry_id: entry.id.clone(),
                    filename: filename.clone(),
                    url: store.file_url(&entry.id, filename),
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let mut ctx = context(Some(&user), &query, "gallery");
    ctx.insert("images", &images);
    render(&tera, "gallery.html", &ctx)
}

async fn delete_image(
    id: Identity,
    store: Store,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return redirect("/login"),
    };
    let (entry_id, filename) = path.into_inner();
    match actions::remove_image(store.get_ref(), &user, &entry_id, &filename).await {
        Ok(_) => notice_redirect("/gallery", "removed"),
        Err(err) => {
            debug!("removal by {} rejected: {}", user, err);
            notice_redirect("/gallery", err.notice())
        }
    }
}

async fn voting(
    id: Identity,
    tera: Tera,
    store: Store,
    config: Settings,
    query: web::Query<NoticeQuery>,
) -> Result<HttpResponse, AppError> {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return Ok(redirect("/login")),
    };
    let entries = store.list_all().await?;
    let views = entries
        .iter()
        .map(|entry| EntryView {
            id: entry.id.clone(),
            owner: entry.owner.clone(),
            image_urls: entry
                .images
                .iter()
                .map(|filename| store.file_url(&entry.id, filename))
                .collect(),
            votes: entry.votes(),
            voted: entry.has_voted(&user),
            own: entry.owner == user,
            can_vote: quota::can_vote(&entries, &user, &entry.id, config.vote_policy),
        })
        .collect::<Vec<_>>();
    let mut ctx = context(Some(&user), &query, "voting");
    ctx.insert("entries", &views);
    ctx.insert("remaining_votes", &quota::remaining_votes(&entries, &user));
    render(&tera, "voting.html", &ctx)
}

async fn vote_post(
    id: Identity,
    store: Store,
    config: Settings,
    path: web::Path<String>,
) -> HttpResponse {
    let user = match session::current_user(&id) {
        Some(user) => user,
        None => return redirect("/login"),
    };
    let entry_id = path.into_inner();
    match actions::cast_vote(store.get_ref(), config.vote_policy, &user, &entry_id).await {
        Ok(_) => notice_redirect("/voting", "voted"),
        Err(err) => {
            debug!("vote by {} rejected: {}", user, err);
            notice_redirect("/voting", err.notice())
        }
    }
}

async fn file(store: Store, path: web::Path<(String, String)>) -> Result<HttpResponse, AppError> {
    let (entry_id, filename) = path.into_inner();
    Ok(match store.open_file(&entry_id, &filename).await? {
        Some(bytes) => {
            let mime = ImageKind::from_filename(&filename)
                .map(ImageKind::mime)
                .unwrap_or("application/octet-stream");
            HttpResponse::Ok().content_type(mime).body(bytes)
        }
        None => HttpResponse::NotFound().finish(),
    })
}
