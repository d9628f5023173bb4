//! etcd-backed store for discovery-core
pub mod api;
pub mod client;

pub use client::EtcdStore;
