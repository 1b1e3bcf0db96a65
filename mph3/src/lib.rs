#![doc = include_str!("../README.md")]

mod error;
pub use error::Error;

mod sig;
pub use sig::Signature;

pub mod store;
pub use store::{SigStore, Buckets, Bucket, StoreValue};

pub mod system;
pub use system::{Modulo3Equation, Modulo3System, add_mod3, sub_mod3, neg_mod3};

mod graph;

mod builder;
pub use builder::BuildConf;

mod function;
pub use function::Function;

mod mphf;
pub use mphf::Mphf;

pub mod stats;
