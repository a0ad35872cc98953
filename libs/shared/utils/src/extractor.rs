use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use shared_models::error::AppError;

/// `Json<T>` whose rejections (malformed body, wrong field types, unknown enum
/// values, missing content type) come back as the standard 400 error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!("Rejected request body: {}", rejection.body_text());
                Err(AppError::ValidationError(rejection.body_text()))
            }
        }
    }
}
