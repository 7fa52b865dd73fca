mod site;
mod transform;
mod types;

pub use site::ObserverSite;
pub use transform::{separation_deg, to_equatorial, to_galactic, to_horizontal};
pub use types::{Equatorial, Galactic, Horizontal};
