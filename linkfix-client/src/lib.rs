pub mod app;
pub mod backend;
pub mod icons;
pub mod notify;
pub mod remote;
pub mod settings;
pub mod store;
pub mod views;
