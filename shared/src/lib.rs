pub mod camera;
pub mod colors;
pub mod events;
pub mod location;
pub mod profile;

pub use camera::*;
pub use colors::{Gradient, GradientStop, placeholder_gradient};
pub use events::*;
pub use location::*;
pub use profile::*;
