//! Buffer-level format stages used by the buffered pipeline.
//!
//! - [`gzip`]: compress / decompress
//! - [`delimiter`]: column separator conversion
//! - [`gpg`]: encrypt / decrypt
//! - [`naming`]: extension bookkeeping for the delivered name

pub mod delimiter;
pub mod gpg;
pub mod gzip;
pub mod naming;

pub use delimiter::convert_delimiter;
pub use gpg::Gpg;
pub use naming::ResponseName;
