/// Router Module Index
///
/// Routes are split by access level so the authentication layer is applied per module rather than
/// per handler.

/// Routes open to anonymous callers. Handlers that take `MaybeAuthUser` still honour a bearer
/// token when one is sent.
pub mod public;

/// Routes wrapped in the authentication layer. Requires a valid identity.
pub mod authenticated;

/// Moderation and administration routes nested under `/admin`. Authentication is applied by the
/// router; role checks happen in the policy module.
pub mod admin;
