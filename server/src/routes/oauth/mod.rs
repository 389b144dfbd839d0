//! Browser-facing authorization code flow and the internal token route

mod callback;
mod login;
mod token;
mod utils;

pub use callback::*;
pub use login::*;
pub use token::*;
