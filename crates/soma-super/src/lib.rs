mod credentials;
mod error;
mod kex;
mod ldap;
mod supervisor;
mod tokens;

pub use error::SuperError;
pub use kex::{KexReply, KexSession, DEFAULT_KEX_EXPIRY_SECONDS};
pub use ldap::{DenyAllVerifier, LdapVerifier, OwnershipVerifier, StaticVerifier};
pub use supervisor::{
    ActivateRequest, InvalidateScope, PasswordRequest, PasswordVariant, Supervisor, TokenIdentity,
    TokenRequest,
};
