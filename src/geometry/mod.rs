//! Geometry utilities: SE3 transforms, SO3 helpers, PnP solving.

pub mod pnp;
pub mod se3;
pub mod so3;

pub use pnp::{
    reprojection_residual, solve_pnp, solve_pnp_detailed, Correspondence, PnPConfig, PnPResult,
};
pub use se3::SE3;
