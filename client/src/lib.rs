pub mod animation;
pub mod config;
pub mod demo;
pub mod error;
pub mod feed;
pub mod headless;
pub mod http_store;
pub mod map_view;
pub mod markers;
pub mod notices;
pub mod spin;
pub mod sse;
pub mod store;
pub mod viewport;

pub use error::{FetchError, InitializationError, PlacementError, SubscriptionError};
pub use map_view::LiveMapView;
