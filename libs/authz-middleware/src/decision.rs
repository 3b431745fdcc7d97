//! Decision invoker: one single-decision query per call.

use authorizer_sdk::{
    AuthorizerClient, IdentityContext, IsRequest, IsResponse, Policy, ResourceContext,
};

use crate::error::AuthzError;

/// Reduce a single-decision response to its verdict.
///
/// # Errors
///
/// Returns [`AuthzError::InvalidDecision`] unless the response holds exactly
/// one decision.
pub fn reduce(response: &IsResponse) -> Result<bool, AuthzError> {
    match response.decisions.as_slice() {
        [decision] => Ok(decision.is),
        other => Err(AuthzError::InvalidDecision { count: other.len() }),
    }
}

/// Ask `client` for `policy.decision` of the module at `path`.
///
/// Logs a denial at info level before returning `Ok(false)`.
///
/// # Errors
///
/// - [`AuthzError::Backend`] if the call fails
/// - [`AuthzError::InvalidDecision`] for a malformed response
pub async fn evaluate(
    client: &dyn AuthorizerClient,
    policy: &Policy,
    identity: IdentityContext,
    path: String,
    resource: ResourceContext,
) -> Result<bool, AuthzError> {
    let request = IsRequest::new(identity, policy, path, resource);
    let path = request.policy_context.path.clone();
    tracing::debug!(
        policy = %policy.name,
        path = %path,
        identity_type = ?request.identity_context.kind,
        "evaluating policy"
    );

    let response = client.is(request).await.map_err(|err| {
        tracing::warn!(path = %path, error = %err, "authorizer call failed");
        AuthzError::from(err)
    })?;

    let allowed = reduce(&response)?;
    if !allowed {
        tracing::info!(
            policy = %policy.name,
            path = %path,
            decision = %policy.decision,
            "authorization denied"
        );
    }
    Ok(allowed)
}
