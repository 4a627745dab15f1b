//! Request validation
//!
//! Provides a `ValidatedJson` extractor that validates request bodies using
//! the validator crate and reports failures as `ApiError::ValidationFailed`.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::error::{ApiError, FieldError};

/// A JSON extractor that also validates the request body.
///
/// ```ignore
/// #[derive(Deserialize, Validate)]
/// struct Subscribe {
///     #[validate(email)]
///     email: String,
/// }
///
/// async fn handler(ValidatedJson(req): ValidatedJson<Subscribe>) { /* validated */ }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(json_rejection)?;

        value
            .validate()
            .map_err(|e| ApiError::ValidationFailed(field_errors(&e)))?;

        Ok(Self(value))
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::with_status(rejection.status(), rejection.body_text())
}

/// Flatten validator output into field errors, ordered by field name.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                let message = error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string);
                FieldError::new(field.to_string(), message)
            })
        })
        .collect()
}
