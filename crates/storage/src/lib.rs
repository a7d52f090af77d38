use anyhow::{bail, Context, Result};
use shared::domain::{UserId, UserProfile};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::info;
use uuid::Uuid;

const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Inputs for provisioning a profile on first sign-in.
#[derive(Debug, Clone)]
pub struct ProfileSeed<'a> {
    pub user_id: &'a UserId,
    pub email: Option<&'a str>,
    pub referral_code: Option<&'a str>,
    pub starting_credits: i64,
    pub referral_bonus: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub profile: UserProfile,
    pub created: bool,
    /// Set only when this sync created the profile and rewarded a referrer.
    pub rewarded_referrer: Option<UserId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed { remaining: i64 },
    Insufficient,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT user_id, email, credits, referral_code, referred_by
             FROM profiles WHERE user_id = ?",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    pub async fn profile_by_referral_code(&self, code: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT user_id, email, credits, referral_code, referred_by
             FROM profiles WHERE referral_code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(profile_from_row))
    }

    /// Returns the stored profile, creating it (and rewarding a valid referrer)
    /// only when none exists yet. Repeated calls never re-grant credits.
    pub async fn sync_profile(&self, seed: ProfileSeed<'_>) -> Result<SyncOutcome> {
        if seed.user_id.is_blank() {
            bail!("user id must not be empty");
        }

        let mut tx = self.pool.begin().await?;

        if let Some(existing) = fetch_profile(&mut tx, seed.user_id).await? {
            tx.commit().await?;
            return Ok(SyncOutcome {
                profile: existing,
                created: false,
                rewarded_referrer: None,
            });
        }

        let referrer = match seed.referral_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => sqlx::query_scalar::<_, String>(
                "SELECT user_id FROM profiles WHERE referral_code = ? AND user_id <> ?",
            )
            .bind(code)
            .bind(seed.user_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .map(UserId),
            None => None,
        };

        let own_code = unused_referral_code(&mut tx).await?;
        let inserted = sqlx::query(
            "INSERT INTO profiles (user_id, email, credits, referral_code, referred_by)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(seed.user_id.as_str())
        .bind(seed.email)
        .bind(seed.starting_credits)
        .bind(&own_code)
        .bind(referrer.as_ref().map(UserId::as_str))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rewarded_referrer = if inserted == 1 {
            if let Some(referrer) = &referrer {
                sqlx::query("UPDATE profiles SET credits = credits + ? WHERE user_id = ?")
                    .bind(seed.referral_bonus)
                    .bind(referrer.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
            referrer
        } else {
            None
        };

        let profile = fetch_profile(&mut tx, seed.user_id)
            .await?
            .context("profile missing after insert")?;
        tx.commit().await?;

        if inserted == 1 {
            info!(
                user_id = %seed.user_id,
                credits = profile.credits,
                referred_by = rewarded_referrer.as_ref().map(UserId::as_str),
                "provisioned profile"
            );
        }

        Ok(SyncOutcome {
            profile,
            created: inserted == 1,
            rewarded_referrer,
        })
    }

    /// Spends one credit. The conditional update keeps the balance from going
    /// negative even when several consumers race.
    pub async fn consume_credit(&self, user_id: &UserId) -> Result<ConsumeOutcome> {
        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE profiles SET credits = credits - 1
             WHERE user_id = ? AND credits > 0
             RETURNING credits",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match remaining {
            Some(remaining) => ConsumeOutcome::Consumed { remaining },
            None => ConsumeOutcome::Insufficient,
        })
    }
}

async fn fetch_profile(conn: &mut SqliteConnection, user_id: &UserId) -> Result<Option<UserProfile>> {
    let row = sqlx::query(
        "SELECT user_id, email, credits, referral_code, referred_by
         FROM profiles WHERE user_id = ?",
    )
    .bind(user_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(profile_from_row))
}

async fn unused_referral_code(conn: &mut SqliteConnection) -> Result<String> {
    for _ in 0..REFERRAL_CODE_ATTEMPTS {
        let candidate = new_referral_code();
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM profiles WHERE referral_code = ?")
                .bind(&candidate)
                .fetch_optional(&mut *conn)
                .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
    }
    bail!("could not allocate a unique referral code")
}

fn new_referral_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(REFERRAL_CODE_LEN)
        .collect()
}

fn profile_from_row(row: &SqliteRow) -> UserProfile {
    UserProfile {
        user_id: UserId(row.get::<String, _>("user_id")),
        email: row.get::<Option<String>, _>("email"),
        credits: row.get::<i64, _>("credits"),
        referral_code: row.get::<String, _>("referral_code"),
        referred_by: row.get::<Option<String>, _>("referred_by").map(UserId),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
