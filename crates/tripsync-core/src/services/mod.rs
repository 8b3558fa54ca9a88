//! Service wrappers shared by every client.

mod store;

pub use store::LocalStore;
