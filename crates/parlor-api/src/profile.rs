use std::path::{Path, PathBuf};

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State},
};
use tracing::{error, info, warn};

use parlor_db::Snapshot;
use parlor_types::api::ApiResponse;
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::models::{PublicUser, User, UserId};

use crate::auth::{AppState, respond, run_blocking};

/// 8 MB upload limit for avatars
pub const MAX_AVATAR_SIZE: usize = 8 * 1024 * 1024;

/// Fields of an update-profile request. Blank strings mean "leave as is",
/// except `bio`, which may be cleared.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub color: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
}

struct Avatar {
    extension: String,
    data: Bytes,
}

/// POST /update-profile: multipart form with `id`, optional text fields
/// and an optional `pfp` image.
pub async fn update_profile(State(state): State<AppState>, mut multipart: Multipart) -> Json<ApiResponse> {
    let mut id: Option<String> = None;
    let mut update = ProfileUpdate::default();
    let mut avatar: Option<Avatar> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("update-profile: bad multipart body: {}", e);
                return respond(Err(ChatError::validation("Invalid Form")));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        if name == "pfp" {
            let extension = avatar_extension(field.file_name());
            match field.bytes().await {
                Ok(data) if !data.is_empty() => avatar = Some(Avatar { extension, data }),
                Ok(_) => {}
                Err(e) => {
                    warn!("update-profile: avatar upload failed: {}", e);
                    return respond(Err(ChatError::validation("Invalid Form")));
                }
            }
            continue;
        }

        let value = match field.text().await {
            Ok(value) => value,
            Err(e) => {
                warn!("update-profile: unreadable field {}: {}", name, e);
                return respond(Err(ChatError::validation("Invalid Form")));
            }
        };
        match name.as_str() {
            "id" => id = Some(value),
            "color" => update.color = Some(value),
            "displayName" => update.display_name = Some(value),
            "email" => update.email = Some(value),
            "bio" => update.bio = Some(value),
            _ => {}
        }
    }

    let Some(user_id) = id.as_deref().and_then(|v| v.trim().parse::<UserId>().ok()) else {
        return respond(Err(ChatError::validation("User Id Required")));
    };

    respond(apply(&state, user_id, update, avatar).await)
}

async fn apply(
    state: &AppState,
    user_id: UserId,
    mut update: ProfileUpdate,
    avatar: Option<Avatar>,
) -> ChatResult<ApiResponse> {
    let exists = run_blocking(state.clone(), move |state| {
        Ok(state.store.read()?.user(user_id).is_some())
    })
    .await?;
    if !exists {
        return Err(ChatError::not_found("User Not Found"));
    }

    let saved = match avatar {
        Some(avatar) => Some(save_avatar(&state.public_dir, &avatar).await?),
        None => None,
    };
    update.profile_pic = saved.as_ref().map(|(url, _)| url.clone());

    let result = run_blocking(state.clone(), move |state| {
        let mut tx = state.store.begin()?;
        let user = apply_profile_update(&mut tx, user_id, update)?;
        tx.commit()?;
        Ok(user)
    })
    .await;

    match result {
        Ok(user) => {
            info!("user {} updated profile", user.id);
            Ok(ApiResponse::with_user(PublicUser::from(&user)))
        }
        Err(e) => {
            if let Some((_, path)) = saved {
                let _ = tokio::fs::remove_file(&path).await;
            }
            Err(e)
        }
    }
}

/// Merge a profile update into the stored user.
pub fn apply_profile_update(
    snapshot: &mut Snapshot,
    user_id: UserId,
    update: ProfileUpdate,
) -> ChatResult<User> {
    let email = non_blank(update.email);
    if let Some(email) = &email {
        if snapshot.users.iter().any(|u| u.id != user_id && &u.email == email) {
            return Err(ChatError::validation("Email Already Exists"));
        }
    }

    let user = snapshot
        .user_mut(user_id)
        .ok_or_else(|| ChatError::not_found("User Not Found"))?;

    if let Some(color) = non_blank(update.color) {
        user.color = color;
    }
    if let Some(display_name) = non_blank(update.display_name) {
        user.display_name = display_name;
    }
    if let Some(email) = email {
        user.email = email;
    }
    if let Some(bio) = update.bio {
        user.bio = bio;
    }
    if let Some(profile_pic) = update.profile_pic {
        user.profile_pic = profile_pic;
    }

    Ok(user.clone())
}

/// Write an avatar under `<public_dir>/pfps`. Returns (public URL, disk path).
async fn save_avatar(public_dir: &Path, avatar: &Avatar) -> ChatResult<(String, PathBuf)> {
    let dir = public_dir.join("pfps");
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        error!("Failed to create avatar directory {}: {}", dir.display(), e);
        ChatError::Store(e.into())
    })?;

    let file_name = format!(
        "{}-{:x}{}",
        chrono::Utc::now().timestamp_millis(),
        rand::random::<u64>(),
        avatar.extension
    );
    let path = dir.join(&file_name);
    tokio::fs::write(&path, &avatar.data).await.map_err(|e| {
        error!("Failed to write avatar {}: {}", path.display(), e);
        ChatError::Store(e.into())
    })?;

    Ok((format!("/pfps/{}", file_name), path))
}

/// `.ext` from the uploaded file name, or empty if it looks unsafe.
fn avatar_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
