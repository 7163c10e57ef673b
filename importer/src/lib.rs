pub mod api;
pub mod auth;
pub mod bookmarks;
pub mod config;
pub mod did;
pub mod errors;
pub mod flow;
pub mod handle;
pub mod import;
pub mod pipeline;
pub mod setup;
pub mod state;

pub use errors::{ErrorKind, FlowError, FlowResult, Recovery};
pub use flow::{Flow, Step};
pub use pipeline::Importer;
pub use state::AppState;
