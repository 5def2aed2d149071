pub mod api_key_auth;
pub mod meta_guard;

pub use api_key_auth::{ApiKeyContext, RequireApiKey};
pub use meta_guard::MetaGuard;
