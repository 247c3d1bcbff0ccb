use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{error::AppError, models::RegisterReq};

pub const SESSION_USER_KEY: &str = "user_id";

/// Check a registration form, reporting every problem at once.
pub fn validate_registration(req: &RegisterReq) -> Result<(), AppError> {
    let mut problems = Vec::new();

    let name_len = req.name.trim().chars().count();
    if !(2..=100).contains(&name_len) {
        problems.push("name must be between 2 and 100 characters");
    }
    if !looks_like_email(req.email.trim()) {
        problems.push("invalid email address");
    }
    if req.password.chars().count() < 6 {
        problems.push("password must be at least 6 characters");
    }
    if req.password != req.confirm_password {
        problems.push("passwords must match");
    }
    if !(10..=100).contains(&req.age) {
        problems.push("age must be between 10 and 100");
    }
    if !short_required(&req.degree) {
        problems.push("degree is required (at most 100 characters)");
    }
    if !short_required(&req.branch) {
        problems.push("branch is required (at most 100 characters)");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(problems.join("; ")))
    }
}

fn short_required(value: &str) -> bool {
    (1..=100).contains(&value.trim().chars().count())
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !email.contains(char::is_whitespace)
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::internal(format!("failed to hash password: {e}")))
}

/// False for a wrong password or an unreadable stored hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        tracing::warn!("stored password hash is not a PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// The logged-in user's id, taken from the session.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::internal(msg))?;
        session
            .get::<Uuid>(SESSION_USER_KEY)
            .await?
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> RegisterReq {
        RegisterReq {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            password: "engine42".into(),
            confirm_password: "engine42".into(),
            age: 28,
            degree: "BSc".into(),
            branch: "Mathematics".into(),
        }
    }

    #[test]
    fn accepts_a_complete_form() {
        assert!(validate_registration(&form()).is_ok());
    }

    #[test]
    fn reports_each_problem() {
        let mut req = form();
        req.name = "A".into();
        req.email = "ada.example.com".into();
        req.confirm_password = "different".into();
        req.age = 9;
        req.branch = String::new();
        let Err(AppError::Validation(msg)) = validate_registration(&req) else {
            panic!("expected validation error");
        };
        assert!(msg.contains("name"));
        assert!(msg.contains("email"));
        assert!(msg.contains("passwords must match"));
        assert!(msg.contains("age"));
        assert!(msg.contains("branch"));
        assert!(!msg.contains("degree"));
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@b.io"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.io"));
        assert!(!looks_like_email("a@.io"));
        assert!(!looks_like_email("a b@c.io"));
    }

    #[test]
    fn password_round_trip() {
        let hash = hash_password("engine42").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("engine42", &hash));
        assert!(!verify_password("engine43", &hash));
        assert!(!verify_password("engine42", "not a hash"));
    }
}
