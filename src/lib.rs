//! # paraclient - Rust client for the Para backend
//!
//! A blocking client for persisting, reading and listing objects stored by a
//! Para server over its REST API.
//!
//! ## Features
//!
//! - Every call is authenticated per request, in order of preference:
//!   - a JWT bearer token, refreshed transparently before it expires
//!   - AWS Signature Version 4 with the app's access and secret keys
//!   - an anonymous header carrying only the access key
//! - Canonical query strings that keep signatures stable with repeated keys
//! - Pluggable HTTP transport, with a pooled `reqwest` implementation
//! - Objects as plain JSON field maps
//!
//! ## Basic Usage
//!
//! ```no_run
//! use paraclient::{ParaClient, ParaObject};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ParaClient::new("app:myapp", "secret")?;
//!
//!     let mut dog = ParaObject::new(None, "dog");
//!     dog.set("name", "Rex");
//!
//!     if let Some(saved) = client.create(&dog)? {
//!         println!("created {}", saved.object_uri());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! ```no_run
//! use paraclient::ParaClient;
//!
//! let client = ParaClient::new("app:myapp", "")?;
//! if let Some(user) = client.sign_in("facebook", "provider-token", true)? {
//!     println!("signed in as {:?}", user.name());
//! }
//! // every later call carries the JWT and refreshes it when due
//! let me = client.me(None)?;
//! client.sign_out();
//! # Ok::<(), paraclient::ParaError>(())
//! ```

pub mod auth;
pub mod canonical;
pub mod client;
pub mod error;
pub mod object;
pub mod pager;
pub mod response;
pub mod rest;
pub mod signer;
pub mod time;
pub mod token;
pub mod transport;

// Re-export main types for convenience
pub use auth::{AuthMode, Credentials};
pub use canonical::{canonicalize, CanonicalQuery};
pub use client::{Config, DEFAULT_ENDPOINT, DEFAULT_PATH, JWT_PATH};
pub use error::{ParaError, Result};
pub use object::ParaObject;
pub use pager::Pager;
pub use response::HttpResponse;
pub use rest::{ParaClient, RequestDescriptor};
pub use signer::RequestSigner;
pub use token::{BearerToken, TokenState};
pub use transport::{PreparedRequest, ReqwestTransport, Transport};

// Re-export serde_json for convenience
pub use serde_json::json;
