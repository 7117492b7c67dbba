//! Database helpers for users, refresh tokens, and tickets.
//!
//! Every mutation that must be single-use (ticket consumption, refresh-token
//! rotation) is a single conditional statement so the database serializes
//! concurrent attempts per row; the second caller sees zero rows and fails.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{generate_token, hash_token, is_unique_violation};

const USER_COLUMNS: &str = "id, disabled, display_name, avatar_url, locale, email, new_email, \
     password_hash, email_verified, is_anonymous, default_role, totp_secret, active_mfa_type";

const TOKEN_INSERT_ATTEMPTS: usize = 3;

/// User row as the engine sees it.
#[derive(Clone, Debug)]
pub struct AuthUserRow {
    pub id: Uuid,
    pub disabled: bool,
    pub display_name: String,
    pub avatar_url: String,
    pub locale: String,
    pub email: Option<String>,
    pub new_email: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub is_anonymous: bool,
    pub default_role: String,
    pub totp_secret: Option<String>,
    pub active_mfa_type: Option<String>,
}

fn user_from_row(row: &PgRow) -> AuthUserRow {
    AuthUserRow {
        id: row.get("id"),
        disabled: row.get("disabled"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        locale: row.get("locale"),
        email: row.get("email"),
        new_email: row.get("new_email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        is_anonymous: row.get("is_anonymous"),
        default_role: row.get("default_role"),
        totp_secret: row.get("totp_secret"),
        active_mfa_type: row.get("active_mfa_type"),
    }
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub(super) enum InsertUserOutcome {
    Created(Uuid),
    EmailTaken,
}

/// Outcome when promoting an anonymous user in place.
#[derive(Debug)]
pub(super) enum DeanonymizeOutcome {
    Updated,
    EmailTaken,
    NotAnonymous,
}

pub(super) struct InsertUserParams {
    pub(super) display_name: String,
    pub(super) avatar_url: String,
    pub(super) locale: String,
    pub(super) email: Option<String>,
    pub(super) password_hash: Option<String>,
    pub(super) email_verified: bool,
    pub(super) is_anonymous: bool,
    pub(super) disabled: bool,
    pub(super) default_role: String,
    pub(super) roles: Vec<String>,
}

pub(super) struct DeanonymizeParams {
    pub(super) user_id: Uuid,
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) display_name: String,
    pub(super) locale: String,
    pub(super) email_verified: bool,
    pub(super) default_role: String,
    pub(super) roles: Vec<String>,
}

pub(super) async fn get_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<AuthUserRow>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to get user by id")?;
    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<AuthUserRow>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to get user by email")?;
    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn get_user_roles(pool: &PgPool, user_id: Uuid) -> Result<Vec<String>> {
    let query = "SELECT role FROM user_roles WHERE user_id = $1 ORDER BY role";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to get user roles")?;
    Ok(rows.iter().map(|row| row.get("role")).collect())
}

pub(super) async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    params: InsertUserParams,
) -> Result<InsertUserOutcome> {
    let query = r"
        INSERT INTO users
            (display_name, avatar_url, locale, email, password_hash,
             email_verified, is_anonymous, disabled, default_role)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&params.display_name)
        .bind(&params.avatar_url)
        .bind(&params.locale)
        .bind(&params.email)
        .bind(&params.password_hash)
        .bind(params.email_verified)
        .bind(params.is_anonymous)
        .bind(params.disabled)
        .bind(&params.default_role)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                return Ok(InsertUserOutcome::EmailTaken);
            }
            return Err(err).context("failed to insert user");
        }
    };

    replace_user_roles(tx, user_id, &params.roles).await?;

    Ok(InsertUserOutcome::Created(user_id))
}

async fn replace_user_roles(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    roles: &[String],
) -> Result<()> {
    let query = "DELETE FROM user_roles WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete user roles")?;

    let query = "INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING";
    for role in roles {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(role)
            .execute(&mut **tx)
            .instrument(span)
            .await
            .context("failed to insert user role")?;
    }
    Ok(())
}

pub(super) async fn email_exists(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "SELECT 1 FROM users WHERE email = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check email availability")?;
    Ok(row.is_some())
}

pub(super) async fn set_email_verified(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(())
}

pub(super) async fn set_new_email(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    new_email: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET new_email = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_email)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to store pending email change")?;
    Ok(())
}

/// Copy `new_email` into `email` for a user with a pending change.
///
/// Returns `false` when no change was pending.
pub(super) async fn confirm_email_change(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email = new_email,
            new_email = NULL,
            email_verified = TRUE,
            updated_at = NOW()
        WHERE id = $1
          AND new_email IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to confirm email change")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn update_password(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

pub(super) async fn deanonymize_user(
    tx: &mut Transaction<'_, Postgres>,
    params: DeanonymizeParams,
) -> Result<DeanonymizeOutcome> {
    // The is_anonymous predicate makes the check-and-mutate atomic: a
    // concurrent second deanonymization matches zero rows.
    let query = r"
        UPDATE users
        SET email = $2,
            password_hash = $3,
            display_name = $4,
            locale = $5,
            email_verified = $6,
            default_role = $7,
            is_anonymous = FALSE,
            updated_at = NOW()
        WHERE id = $1
          AND is_anonymous
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(params.user_id)
        .bind(&params.email)
        .bind(&params.password_hash)
        .bind(&params.display_name)
        .bind(&params.locale)
        .bind(params.email_verified)
        .bind(&params.default_role)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(done) if done.rows_affected() == 0 => return Ok(DeanonymizeOutcome::NotAnonymous),
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => return Ok(DeanonymizeOutcome::EmailTaken),
        Err(err) => return Err(err).context("failed to deanonymize user"),
    }

    replace_user_roles(tx, params.user_id, &params.roles).await?;

    Ok(DeanonymizeOutcome::Updated)
}

pub(super) async fn touch_last_seen(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_seen = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update user last seen")?;
    Ok(())
}

pub(super) async fn set_totp_secret(pool: &PgPool, user_id: Uuid, secret: &str) -> Result<()> {
    let query = r"
        UPDATE users
        SET totp_secret = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store TOTP secret")?;
    Ok(())
}

/// Flip MFA on for a user who holds a generated secret.
///
/// Returns `false` when no secret was stored.
pub(super) async fn activate_totp(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE users
        SET active_mfa_type = 'totp',
            updated_at = NOW()
        WHERE id = $1
          AND totp_secret IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to activate TOTP")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn insert_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can hand it to the client.
    let query = r"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..TOKEN_INSERT_ATTEMPTS {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(&token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert refresh token"),
        }
    }

    Err(anyhow!("failed to generate unique refresh token"))
}

pub(super) async fn get_user_by_refresh_token(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<AuthUserRow>> {
    let query = format!(
        "SELECT {USER_COLUMNS} FROM users \
         JOIN refresh_tokens ON refresh_tokens.user_id = users.id \
         WHERE refresh_tokens.token_hash = $1 \
           AND refresh_tokens.expires_at > NOW()"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = %query
    );
    let row = sqlx::query(&query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to get user by refresh token")?;
    Ok(row.as_ref().map(user_from_row))
}

/// Rotate a refresh token in place.
///
/// The conditional update is the replay guard: of two concurrent calls with
/// the same old value, exactly one matches the row. Returns the new raw token
/// or `None` when the old value is unknown or expired.
pub(super) async fn rotate_refresh_token(
    pool: &PgPool,
    old_hash: &[u8],
    ttl_seconds: i64,
) -> Result<Option<String>> {
    let query = r"
        UPDATE refresh_tokens
        SET token_hash = $2,
            expires_at = NOW() + ($3 * INTERVAL '1 second')
        WHERE token_hash = $1
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );

    for _ in 0..TOKEN_INSERT_ATTEMPTS {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(old_hash)
            .bind(&token_hash)
            .bind(ttl_seconds)
            .fetch_optional(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(Some(_)) => return Ok(Some(token)),
            Ok(None) => return Ok(None),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to rotate refresh token"),
        }
    }

    Err(anyhow!("failed to generate unique refresh token"))
}

pub(super) async fn delete_refresh_token(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Sign-out is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete refresh token")?;
    Ok(())
}

/// Delete every refresh token of the user owning the presented token.
///
/// No-op when the token is unknown; sign-out stays idempotent.
pub(super) async fn delete_all_refresh_tokens(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = r"
        DELETE FROM refresh_tokens
        WHERE user_id = (
            SELECT user_id FROM refresh_tokens WHERE token_hash = $1
        )
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user refresh tokens")?;
    Ok(())
}

pub(super) async fn delete_user_refresh_tokens(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<()> {
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete user refresh tokens")?;
    Ok(())
}

pub(super) async fn delete_expired_refresh_tokens(pool: &PgPool) -> Result<u64> {
    let query = "DELETE FROM refresh_tokens WHERE expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete expired refresh tokens")?;
    Ok(result.rows_affected())
}

pub(super) async fn upsert_ticket(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    purpose: &str,
    token_hash: &[u8],
    ttl_seconds: i64,
) -> Result<()> {
    // One active ticket per (user, purpose): issuing replaces the prior row,
    // which invalidates the previously emailed value.
    let query = r"
        INSERT INTO tickets (user_id, purpose, token_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ON CONFLICT (user_id, purpose) DO UPDATE
        SET token_hash = EXCLUDED.token_hash,
            created_at = NOW(),
            expires_at = EXCLUDED.expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(purpose)
        .bind(token_hash)
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to upsert ticket")?;
    Ok(())
}

/// Consume a ticket: the conditional delete is the single-use guard.
pub(super) async fn consume_ticket(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
    purpose: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        DELETE FROM tickets
        WHERE token_hash = $1
          AND purpose = $2
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(purpose)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume ticket")?;
    Ok(row.map(|row| row.get("user_id")))
}

pub(super) async fn lookup_ticket(
    pool: &PgPool,
    token_hash: &[u8],
    purpose: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        SELECT user_id
        FROM tickets
        WHERE token_hash = $1
          AND purpose = $2
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(purpose)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to look up ticket")?;
    Ok(row.map(|row| row.get("user_id")))
}

#[cfg(test)]
mod tests {
    use super::{AuthUserRow, DeanonymizeOutcome, InsertUserOutcome};
    use uuid::Uuid;

    #[test]
    fn insert_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", InsertUserOutcome::Created(Uuid::nil())),
            format!("Created({:?})", Uuid::nil())
        );
        assert_eq!(format!("{:?}", InsertUserOutcome::EmailTaken), "EmailTaken");
    }

    #[test]
    fn deanonymize_outcome_debug_names() {
        assert_eq!(format!("{:?}", DeanonymizeOutcome::Updated), "Updated");
        assert_eq!(format!("{:?}", DeanonymizeOutcome::EmailTaken), "EmailTaken");
        assert_eq!(
            format!("{:?}", DeanonymizeOutcome::NotAnonymous),
            "NotAnonymous"
        );
    }

    #[test]
    fn user_row_holds_values() {
        let row = AuthUserRow {
            id: Uuid::nil(),
            disabled: false,
            display_name: "Jane Doe".to_string(),
            avatar_url: String::new(),
            locale: "en".to_string(),
            email: Some("jane@acme.com".to_string()),
            new_email: None,
            password_hash: None,
            email_verified: true,
            is_anonymous: false,
            default_role: "user".to_string(),
            totp_secret: None,
            active_mfa_type: None,
        };
        assert_eq!(row.id, Uuid::nil());
        assert_eq!(row.email.as_deref(), Some("jane@acme.com"));
        assert!(row.email_verified);
        assert!(!row.is_anonymous);
    }
}
