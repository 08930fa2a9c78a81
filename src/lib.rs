pub mod codec;
pub mod config;
pub mod error;
pub mod loader;
pub mod lookup;
pub mod matcher;
pub mod models;
pub mod service;
pub mod storage;

pub use codec::{CidrBlock, EncodedAddress, IpVersion};
pub use error::{GeoError, GeoResult};
pub use lookup::LookupCoordinator;
pub use models::{Attributes, GeoAttributes, GeoRecord, GeoRow, Kind, KindRow};
pub use service::GeoService;
