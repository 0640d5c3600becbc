//! JSON REST provider for grid time series.
//!
//! One endpoint per domain under a common base url, paginated with an opaque
//! `next_page_token`, authenticated with a bearer token taken from the
//! environment.

pub mod params;
pub mod provider;
pub mod response;

pub use params::GridRestConfig;
pub use provider::GridRestProvider;
