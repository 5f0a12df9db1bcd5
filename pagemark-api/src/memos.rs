//! Memo endpoints

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use pagemark_proto::memo::{MemoResponse, TodayFlowQuery, TodayFlowResponse};

use crate::client::{ApiClient, IDEMPOTENCY_KEY_HEADER};
use crate::errors::Result;

impl ApiClient {
    /// `POST /memos` with the item's idempotency key.
    pub async fn create_memo<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        idempotency_key: Uuid,
    ) -> Result<MemoResponse> {
        let response = self
            .authorize(self.http.post(self.url("/memos")))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key.to_string())
            .json(payload)
            .send()
            .await?;
        let memo = Self::check(response).await?.json::<MemoResponse>().await?;
        debug!(server_id = memo.id, "memo created");
        Ok(memo)
    }

    /// `PUT /memos/{id}`.
    pub async fn update_memo<T: Serialize + ?Sized>(
        &self,
        server_id: i64,
        payload: &T,
    ) -> Result<MemoResponse> {
        let response = self
            .authorize(self.http.put(self.url(&format!("/memos/{}", server_id))))
            .json(payload)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `DELETE /memos/{id}`.
    pub async fn delete_memo(&self, server_id: i64) -> Result<()> {
        let response = self
            .authorize(self.http.delete(self.url(&format!("/memos/{}", server_id))))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `GET /memos/today-flow?date&sortBy&tagCategory`.
    pub async fn today_flow(&self, query: &TodayFlowQuery) -> Result<TodayFlowResponse> {
        let mut request = self.authorize(self.http.get(self.url("/memos/today-flow")));
        if let Some(date) = query.date {
            request = request.query(&[("date", date.to_string())]);
        }
        if let Some(sort_by) = &query.sort_by {
            request = request.query(&[("sortBy", sort_by)]);
        }
        if let Some(tag_category) = &query.tag_category {
            request = request.query(&[("tagCategory", tag_category)]);
        }

        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /memos/books/{userBookId}?date`.
    pub async fn memos_by_book(
        &self,
        user_book_id: i64,
        date: Option<NaiveDate>,
    ) -> Result<Vec<MemoResponse>> {
        let mut request = self.authorize(
            self.http
                .get(self.url(&format!("/memos/books/{}", user_book_id))),
        );
        if let Some(date) = date {
            request = request.query(&[("date", date.to_string())]);
        }

        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `GET /memos/dates?year&month` — days in the month that have memos.
    pub async fn memo_dates(&self, year: i32, month: u32) -> Result<Vec<NaiveDate>> {
        let response = self
            .authorize(self.http.get(self.url("/memos/dates")))
            .query(&[("year", year.to_string()), ("month", month.to_string())])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
