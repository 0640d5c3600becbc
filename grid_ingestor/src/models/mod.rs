pub mod domain;
pub mod observation;
pub mod resolution;
pub mod series;
pub mod window;
