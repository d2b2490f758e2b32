pub mod cache;
pub mod configure;
pub mod exports;
pub mod handle;
pub mod resource;
pub mod session;
pub mod state;
