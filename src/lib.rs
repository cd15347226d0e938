pub mod geometry;
pub mod io;
pub mod system;
pub mod tracking;
