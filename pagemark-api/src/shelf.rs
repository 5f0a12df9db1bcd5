//! Shelf endpoints

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use pagemark_proto::shelf::{ShelfResponse, StartReadingPayload};

use crate::client::{ApiClient, IDEMPOTENCY_KEY_HEADER};
use crate::errors::Result;

impl ApiClient {
    /// `GET /user/books` — the whole shelf.
    pub async fn list_books(&self) -> Result<Vec<ShelfResponse>> {
        let response = self
            .authorize(self.http.get(self.url("/user/books")))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// `POST /user/books` with the item's idempotency key.
    pub async fn create_book<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        idempotency_key: Uuid,
    ) -> Result<ShelfResponse> {
        let response = self
            .authorize(self.http.post(self.url("/user/books")))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key.to_string())
            .json(payload)
            .send()
            .await?;
        let book = Self::check(response).await?.json::<ShelfResponse>().await?;
        debug!(user_book_id = book.user_book_id, "shelf entry created");
        Ok(book)
    }

    /// `PUT /user/books/{userBookId}` with a partial body.
    pub async fn update_book<T: Serialize + ?Sized>(
        &self,
        user_book_id: i64,
        payload: &T,
    ) -> Result<()> {
        let response = self
            .authorize(
                self.http
                    .put(self.url(&format!("/user/books/{}", user_book_id))),
            )
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `DELETE /user/books/{userBookId}`.
    pub async fn delete_book(&self, user_book_id: i64) -> Result<()> {
        let response = self
            .authorize(
                self.http
                    .delete(self.url(&format!("/user/books/{}", user_book_id))),
            )
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `POST /user/books/{userBookId}/start-reading`.
    pub async fn start_reading(
        &self,
        user_book_id: i64,
        payload: &StartReadingPayload,
    ) -> Result<()> {
        let response = self
            .authorize(
                self.http
                    .post(self.url(&format!("/user/books/{}/start-reading", user_book_id))),
            )
            .json(payload)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
