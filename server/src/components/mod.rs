pub mod button;
pub mod layout;
