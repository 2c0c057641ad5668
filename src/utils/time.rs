use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Folder name for today's trade logs, `DD_MM_YYYY`.
pub fn trade_log_folder() -> String {
    Utc::now().format("%d_%m_%Y").to_string()
}
