//! Authentication session and token-security core.
//!
//! Issues, stores, rotates, encrypts, and revokes long-lived credentials,
//! tracks short-lived OAuth handshake state, and produces tamper-evident
//! audit records. HTTP routing, primary login, and the provider handshake
//! itself are thin callers of this core.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod aes;
    pub mod csrf;
    pub mod envelope;
}

pub mod models {
    pub mod audit;
    pub mod key;
    pub mod session;
    pub mod token;
}

pub mod repositories {
    pub mod keys;
    pub mod sessions;
    pub mod tokens;
}

pub mod services {
    pub mod audit;
    pub mod keys;
    pub mod sessions;
    pub mod tokens;
}

pub mod handlers {
    pub mod auth;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod csrf;
}

pub mod validation {
    pub mod auth;
}
