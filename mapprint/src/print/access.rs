//! Access evaluation seam.

use thiserror::Error;

use crate::job::AccessAssertion;

/// The assertion does not grant access to the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AccessDenied(pub String);

/// Decides whether an assertion may print a request.
///
/// Closures `Fn(&AccessAssertion, &serde_json::Value) -> Result<(), AccessDenied>`
/// implement this trait.
pub trait AccessEvaluator: Send + Sync + 'static {
    fn evaluate(
        &self,
        assertion: &AccessAssertion,
        request: &serde_json::Value,
    ) -> Result<(), AccessDenied>;
}

impl<F> AccessEvaluator for F
where
    F: Fn(&AccessAssertion, &serde_json::Value) -> Result<(), AccessDenied> + Send + Sync + 'static,
{
    fn evaluate(
        &self,
        assertion: &AccessAssertion,
        request: &serde_json::Value,
    ) -> Result<(), AccessDenied> {
        self(assertion, request)
    }
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermitAll;

impl AccessEvaluator for PermitAll {
    fn evaluate(&self, _: &AccessAssertion, _: &serde_json::Value) -> Result<(), AccessDenied> {
        Ok(())
    }
}
