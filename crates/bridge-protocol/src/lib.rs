//! # avb-bridge-protocol
//!
//! Wire vocabulary shared by both sides of the AVB datastore bridge.
//!
//! The bridge speaks two protocols:
//!
//! - **Upstream** - the datastore's HTTP long-polling API. Resources live under
//!   `/datastore[/<path>]`, every request carries a `client` query parameter,
//!   and changes are detected by echoing the last `ETag` in `If-None-Match`.
//! - **Downstream** - plain JSON text frames over a websocket. Clients send
//!   key/value update objects and receive the upstream payloads unchanged.
//!
//! ## Example
//!
//! ```rust
//! use avb_bridge_protocol::{datastore_url, ChangeToken, ClientId, ResourcePath};
//!
//! let path = ResourcePath::from_target("/datastore/mixer/1").unwrap();
//! assert_eq!(path.as_str(), "mixer/1");
//!
//! let url = datastore_url("http://localhost:8888", &path, ClientId::new(42));
//! assert_eq!(url, "http://localhost:8888/datastore/mixer/1?client=42");
//!
//! assert_eq!(ChangeToken::initial().as_str(), "-1");
//! ```

pub mod codec;
pub mod messages;
pub mod resource;
pub mod token;

pub use codec::{decode_update, decode_update_bytes, encode, update_form, ProtocolError};
pub use messages::{ErrorKind, ErrorNotice, ServerMessage};
pub use resource::{datastore_url, ClientId, ResourcePath, DATASTORE_PREFIX};
pub use token::{ChangeToken, CHANGE_TOKEN_HEADER, CONDITIONAL_HEADER};
