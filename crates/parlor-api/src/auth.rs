use std::path::PathBuf;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info};

use parlor_db::{Snapshot, Store};
use parlor_types::api::{ApiResponse, Claims, LoginRequest, SetRoleRequest, SignupRequest};
use parlor_types::error::{ChatError, ChatResult};
use parlor_types::models::{PublicUser, Role, User};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Store,
    pub jwt_secret: String,
    /// Accounts allowed to assign roles.
    pub owner_emails: Vec<String>,
    /// Root of the static files; avatars go to `<public_dir>/pfps`.
    pub public_dir: PathBuf,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Json<ApiResponse> {
    respond(run_blocking(state, move |state| signup_inner(state, req)).await)
}

fn signup_inner(state: &AppStateInner, req: SignupRequest) -> ChatResult<ApiResponse> {
    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(ChatError::validation("Email And Password Required"));
    }

    let password_hash = hash_password(&req.password)?;

    let mut tx = state.store.begin()?;
    let user = register_user(&mut tx, email, &req.display_name, password_hash)?;
    tx.commit()?;
    drop(tx);

    info!("user {} signed up ({})", user.id, user.email);
    let token = create_token(&state.jwt_secret, &user)?;
    Ok(ApiResponse::with_user(PublicUser::from(&user)).with_token(token))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Json<ApiResponse> {
    respond(run_blocking(state, move |state| login_inner(state, req)).await)
}

fn login_inner(state: &AppStateInner, req: LoginRequest) -> ChatResult<ApiResponse> {
    let snapshot = state.store.read()?;
    let user = snapshot
        .user_by_email(req.email.trim())
        .ok_or_else(|| ChatError::not_found("User Not Found"))?;

    verify_password(&req.password, &user.password_hash)?;

    let token = create_token(&state.jwt_secret, user)?;
    Ok(ApiResponse::with_user(PublicUser::from(user)).with_token(token))
}

pub async fn set_role(
    State(state): State<AppState>,
    Json(req): Json<SetRoleRequest>,
) -> Json<ApiResponse> {
    respond(run_blocking(state, move |state| set_role_inner(state, req)).await)
}

fn set_role_inner(state: &AppStateInner, req: SetRoleRequest) -> ChatResult<ApiResponse> {
    let mut tx = state.store.begin()?;
    assign_role(&mut tx, &state.owner_emails, &req)?;
    tx.commit()?;

    info!(
        "user {} set role of {} to {}",
        req.requester_id, req.target_user_id, req.role
    );
    Ok(ApiResponse::success())
}

/// Run store and password work off the async runtime. The store lock is
/// shared with the gateway and Argon2 is slow on purpose.
pub(crate) async fn run_blocking<T, F>(state: AppState, f: F) -> ChatResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppStateInner) -> ChatResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Store(anyhow::anyhow!("spawn_blocking join error: {}", e))
        })?
}

/// Add a user with a fresh id. Emails are unique.
pub fn register_user(
    snapshot: &mut Snapshot,
    email: &str,
    display_name: &str,
    password_hash: String,
) -> ChatResult<User> {
    if snapshot.user_by_email(email).is_some() {
        return Err(ChatError::validation("Email Already Exists"));
    }

    let display_name = match display_name.trim() {
        "" => email.split('@').next().unwrap_or(email).to_string(),
        name => name.to_string(),
    };
    let user = User::new(
        snapshot.next_user_id(),
        email.to_string(),
        display_name,
        password_hash,
    );
    snapshot.users.push(user.clone());
    Ok(user)
}

/// Change a user's role. Only accounts listed in `owner_emails` may do this.
pub fn assign_role(
    snapshot: &mut Snapshot,
    owner_emails: &[String],
    req: &SetRoleRequest,
) -> ChatResult<()> {
    let requester = snapshot
        .user(req.requester_id)
        .ok_or_else(|| ChatError::not_found("User Not Found"))?;
    if snapshot.user(req.target_user_id).is_none() {
        return Err(ChatError::not_found("User Not Found"));
    }
    if !owner_emails.iter().any(|e| e.eq_ignore_ascii_case(&requester.email)) {
        return Err(ChatError::forbidden("Not Authorized"));
    }

    let role: Role = req.role.parse().map_err(ChatError::Validation)?;
    if let Some(target) = snapshot.user_mut(req.target_user_id) {
        target.role = role;
    }
    Ok(())
}

pub fn hash_password(password: &str) -> ChatResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ChatError::Store(anyhow::anyhow!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, password_hash: &str) -> ChatResult<()> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| ChatError::Store(anyhow::anyhow!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ChatError::forbidden("Incorrect Password"))
}

pub fn create_token(secret: &str, user: &User) -> ChatResult<String> {
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ChatError::Store(e.into()))
}

/// Validate a token presented on gateway upgrade.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Map a result onto the `{ok, ...}` REST shape.
pub(crate) fn respond(result: ChatResult<ApiResponse>) -> Json<ApiResponse> {
    Json(match result {
        Ok(response) => response,
        Err(ChatError::Validation(message))
        | Err(ChatError::NotFound(message))
        | Err(ChatError::Forbidden(message)) => ApiResponse::failure(message),
        Err(ChatError::Store(e)) => {
            error!("identity request failed: {:#}", e);
            ApiResponse::failure("Internal Error")
        }
    })
}
