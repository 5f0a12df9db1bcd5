//! Shelf entry payloads for the remote API

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Where the user currently is with a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingCategory {
    ToRead,
    Reading,
    AlmostFinished,
    Finished,
}

impl ReadingCategory {
    /// Stable string form used for the store's category index.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingCategory::ToRead => "TO_READ",
            ReadingCategory::Reading => "READING",
            ReadingCategory::AlmostFinished => "ALMOST_FINISHED",
            ReadingCategory::Finished => "FINISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TO_READ" => Some(ReadingCategory::ToRead),
            "READING" => Some(ReadingCategory::Reading),
            "ALMOST_FINISHED" => Some(ReadingCategory::AlmostFinished),
            "FINISHED" => Some(ReadingCategory::Finished),
            _ => None,
        }
    }
}

/// Request body for `POST /user/books`.
///
/// Carries the immutable bibliographic block plus the initial reading
/// state. The server answers with its own `userBookId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfCreatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<i64>,
    pub isbn: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub pub_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub total_pages: Option<i64>,
    #[serde(default)]
    pub main_genre: Option<String>,
    pub category: ReadingCategory,
    #[serde(default)]
    pub expectation: Option<String>,
    #[serde(default)]
    pub purchase_type: Option<String>,
}

/// Partial body for `PUT /user/books/{userBookId}`.
///
/// Only the mutable reading state; absent fields are left untouched by
/// the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfUpdatePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ReadingCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_finished_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
}

impl ShelfUpdatePayload {
    pub fn is_empty(&self) -> bool {
        self == &ShelfUpdatePayload::default()
    }
}

/// Body for `POST /user/books/{userBookId}/start-reading`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReadingPayload {
    pub reading_start_date: NaiveDate,
    pub reading_progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_type: Option<String>,
}

/// Shelf entry as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfResponse {
    pub user_book_id: i64,
    #[serde(default)]
    pub book_id: Option<i64>,
    pub isbn: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub pub_date: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub total_pages: Option<i64>,
    #[serde(default)]
    pub main_genre: Option<String>,
    pub category: ReadingCategory,
    #[serde(default)]
    pub expectation: Option<String>,
    #[serde(default)]
    pub last_read_page: Option<i64>,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reading_finished_date: Option<NaiveDate>,
    #[serde(default)]
    pub purchase_type: Option<String>,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub review: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_index_string() {
        for category in [
            ReadingCategory::ToRead,
            ReadingCategory::Reading,
            ReadingCategory::AlmostFinished,
            ReadingCategory::Finished,
        ] {
            assert_eq!(ReadingCategory::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn update_payload_omits_absent_fields() {
        let update = ShelfUpdatePayload {
            category: Some(ReadingCategory::Reading),
            last_read_page: Some(12),
            ..Default::default()
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["category"], "READING");
        assert_eq!(json["lastReadPage"], 12);
        assert!(json.get("rating").is_none());
        assert!(json.get("review").is_none());
    }
}
