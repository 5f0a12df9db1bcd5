//! Memo payloads for the remote API

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Request body for creating or replacing a memo.
///
/// The same shape is POSTed on create and PUT on update; the server
/// distinguishes by path. Field names follow the server's camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoPayload {
    pub user_book_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    pub content: String,
    pub tags: Vec<String>,
    pub memo_start_time: DateTime<Utc>,
}

/// Memo as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoResponse {
    pub id: i64,
    pub user_book_id: i64,
    #[serde(default)]
    pub page_number: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub memo_start_time: DateTime<Utc>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Memos for one book within the today-flow view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMemoGroup {
    pub user_book_id: i64,
    #[serde(default)]
    pub book_title: Option<String>,
    pub memos: Vec<MemoResponse>,
}

/// Memos sharing one tag within the today-flow view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagMemoGroup {
    pub tag: String,
    pub memos: Vec<MemoResponse>,
}

/// Response of `GET /memos/today-flow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayFlowResponse {
    #[serde(default)]
    pub memos_by_book: Vec<BookMemoGroup>,
    #[serde(default)]
    pub memos_by_tag: Vec<TagMemoGroup>,
    pub total_memo_count: u64,
}

/// Query parameters for the today-flow read.
#[derive(Debug, Clone, Default)]
pub struct TodayFlowQuery {
    pub date: Option<NaiveDate>,
    pub sort_by: Option<String>,
    pub tag_category: Option<String>,
}
