mod auth_service_fake;
mod auth_service_impl;
mod password_hasher;
mod revocation_store_memory;
mod token_codec;

pub use auth_service_fake::*;
pub use auth_service_impl::*;
pub use password_hasher::*;
pub use revocation_store_memory::*;
pub use token_codec::*;
