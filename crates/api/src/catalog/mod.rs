//! Product catalog: products, reviews, and geo lookups

pub mod geo;
pub mod products;
pub mod reviews;

pub use geo::{DistanceUnit, LatLng};
pub use products::{Product, ProductQuery, ProductType};
pub use reviews::Review;
