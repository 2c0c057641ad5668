use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::utils::time::unix_now;

/// Append-only audit log of accepted orders.
///
/// The table is created on connect if absent:
/// ```sql
/// CREATE TABLE IF NOT EXISTS orders (
///   username    TEXT,
///   email       TEXT,
///   uid         TEXT,
///   server_time INT,
///   portfolioId TEXT,
///   market      TEXT,
///   quantity    TEXT,
///   price       DOUBLE
/// );
/// ```
#[derive(Clone)]
pub struct OrderRecorder {
    pool: SqlitePool,
}

impl OrderRecorder {
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&format!("sqlite://{path}?mode=rwc"))
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders \
             (username TEXT, email TEXT, uid TEXT, server_time INT, \
              portfolioId TEXT, market TEXT, quantity TEXT, price DOUBLE)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_order(
        &self,
        username: &str,
        email: &str,
        uid: &str,
        portfolio_id: &str,
        market: &str,
        quantity: &str,
        price: f64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO orders \
             (username, email, uid, server_time, portfolioId, market, quantity, price) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(username)
        .bind(email)
        .bind(uid)
        .bind(unix_now())
        .bind(portfolio_id)
        .bind(market)
        .bind(quantity)
        .bind(price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
