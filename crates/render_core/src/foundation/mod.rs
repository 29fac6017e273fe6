//! Foundation module - utilities shared by the whole crate
//!
//! Currently this is the logging facade; math lives with its users in
//! [`crate::scene`].

pub mod logging;
