use chrono::{DateTime, NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

pub struct UserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUserSession {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub created_at: Option<NaiveDateTime>,
    pub expires_at: NaiveDateTime,
}

impl From<DbUserSession> for UserSession {
    fn from(db: DbUserSession) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            token: db.token,
            created_at: db
                .created_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
            expires_at: DateTime::<Utc>::from_naive_utc_and_offset(db.expires_at, Utc),
        }
    }
}

impl UserSession {
    pub fn generate_token() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}
