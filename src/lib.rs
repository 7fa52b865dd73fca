pub mod astro;
pub mod config;
pub mod rotator;
pub mod tracker;
