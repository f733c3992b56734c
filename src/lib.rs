//! SPF (Sender Policy Framework, RFC 4408) evaluation engine.
//!
//! Given a client IP, an envelope sender and a HELO identity, decides
//! whether the sending host is authorized to send mail for the sender's
//! domain. DNS caching is the caller's responsibility. This library
//! provides a `DnsResolver` trait — implement it with caching at the
//! resolver layer.

pub mod common;
pub mod fixture;
pub mod spf;

pub use common::dns::{DnsError, DnsResolver, HickoryResolver, MockResolver};
pub use spf::{SpfResult, SpfVerifier};
