//! Common infrastructure: CIDR matching, domain helpers, DNS abstraction.

pub mod cidr;
pub mod dns;
pub mod domain;
