pub mod client;
pub mod gate;
pub mod pager;
pub mod token;

pub use client::{ApiResponse, CommerceApi, HttpCommerceApi};
pub use gate::RateGate;
pub use token::{EnvTokenProvider, TokenProvider};
