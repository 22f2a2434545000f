//! certkeep core - shared protocol types
//!
//! Types exchanged between the certkeep server and management clients over
//! the Unix management socket. Certificates only ever cross this boundary as
//! [`CertificateView`] projections, which carry no key material.

mod protocol;

pub use protocol::*;
