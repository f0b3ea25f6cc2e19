//! Bearer-token authentication for protected routes.
//!
//! The token is generated once per data directory and stored in a file only
//! the owner can read; local presentation layers read it from there.

use std::path::Path;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::error::ApiError;
use crate::state::AppState;

/// Random 32-character hex token.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Read the token stored at `token_path`, or generate and store a new one.
///
/// A token that cannot be saved is still returned; it is then valid for
/// this process only.
pub fn load_or_generate_token(token_path: &Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            tracing::info!("API token loaded from {}", token_path.display());
            return token;
        }
    }

    let token = generate_token();

    if let Some(parent) = token_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(error = %e, "Failed to create token directory {}", parent.display());
        }
    }
    match std::fs::write(token_path, &token) {
        Ok(()) => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600))
                {
                    tracing::warn!(
                        error = %e,
                        "Failed to restrict permissions on {}",
                        token_path.display()
                    );
                }
            }
            tracing::info!("API token saved to {}", token_path.display());
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to save API token to {}", token_path.display());
        }
    }

    token
}

/// Middleware rejecting requests without `Authorization: Bearer <token>`
/// matching `AppState::api_token`.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let verdict = match req.headers().get("authorization") {
        None => Err("Missing Authorization header"),
        Some(value) => match value.to_str() {
            Err(_) => Err("Invalid Authorization header encoding"),
            Ok(value) => match value.strip_prefix("Bearer ") {
                Some(token) if token == state.api_token => Ok(()),
                _ => Err("Invalid bearer token"),
            },
        },
    };

    match verdict {
        Ok(()) => next.run(req).await,
        Err(reason) => ApiError::Unauthorized(reason.to_string()).into_response(),
    }
}
